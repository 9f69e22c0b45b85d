//! Typed traversal from an enclosing config to the layer a preset needs.
//!
//! `C: ConfigPath<T>` means "`C` contains exactly one `T`" (or is one).
//! Presets are written against the layer they touch, so they work on any
//! enclosing config and keep working when nesting changes. Asking for a
//! layer a config does not contain is a compile error.

use crate::command::Arg;
use crate::error::Result;
use crate::policy::OnDuplicate;
use crate::workload::container::ContainerConfig;
use crate::workload::pod_spec::PodSpecConfig;
use crate::workload::pod_template::PodTemplateSpecConfig;
use crate::workload::stateful_group::{StatefulGroupConfig, StatefulGroupSpecConfig};

pub trait ConfigPath<T> {
    fn config(&self) -> &T;
    fn config_mut(&mut self) -> &mut T;
}

impl<T> ConfigPath<T> for T {
    fn config(&self) -> &T {
        self
    }

    fn config_mut(&mut self) -> &mut T {
        self
    }
}

macro_rules! config_path {
    ($outer:ty => $inner:ty, |$c:ident| $get:expr, |$m:ident| $get_mut:expr) => {
        impl ConfigPath<$inner> for $outer {
            fn config(&self) -> &$inner {
                let $c = self;
                $get
            }

            fn config_mut(&mut self) -> &mut $inner {
                let $m = self;
                $get_mut
            }
        }
    };
}

config_path!(StatefulGroupConfig => StatefulGroupSpecConfig,
    |c| c.spec(), |m| m.spec_mut());
config_path!(StatefulGroupConfig => PodTemplateSpecConfig,
    |c| c.spec().pod_template(), |m| m.spec_mut().pod_template_mut());
config_path!(StatefulGroupConfig => PodSpecConfig,
    |c| c.spec().pod_template().pod_spec(),
    |m| m.spec_mut().pod_template_mut().pod_spec_mut());
config_path!(StatefulGroupSpecConfig => PodTemplateSpecConfig,
    |c| c.pod_template(), |m| m.pod_template_mut());
config_path!(StatefulGroupSpecConfig => PodSpecConfig,
    |c| c.pod_template().pod_spec(), |m| m.pod_template_mut().pod_spec_mut());
config_path!(PodTemplateSpecConfig => PodSpecConfig,
    |c| c.pod_spec(), |m| m.pod_spec_mut());

/// The enclosed `T` of `config`.
pub fn get_config<T, C: ConfigPath<T>>(config: &C) -> &T {
    config.config()
}

pub fn get_config_mut<T, C: ConfigPath<T>>(config: &mut C) -> &mut T {
    config.config_mut()
}

/// First container named `name` in the enclosed pod spec.
pub fn find_container<'a, C>(config: &'a C, name: &str) -> Result<&'a ContainerConfig>
where
    C: ConfigPath<PodSpecConfig>,
{
    get_config::<PodSpecConfig, C>(config).find_container(name)
}

pub fn find_container_mut<'a, C>(config: &'a mut C, name: &str) -> Result<&'a mut ContainerConfig>
where
    C: ConfigPath<PodSpecConfig>,
{
    get_config_mut::<PodSpecConfig, C>(config).find_container_mut(name)
}

/// Merge flags into `program` of the named container.
pub fn with_container_command_args<C, I, A>(
    config: &mut C,
    container: &str,
    program: &str,
    args: I,
    on_duplicate: OnDuplicate,
) -> Result<()>
where
    C: ConfigPath<PodSpecConfig>,
    I: IntoIterator<Item = A>,
    A: Into<Arg>,
{
    get_config_mut::<PodSpecConfig, C>(config).with_container_command_args(
        container,
        program,
        args,
        on_duplicate,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::policy::Overwrite;
    use crate::workload::container::Image;

    fn group() -> StatefulGroupConfig {
        let mut waku = ContainerConfig::new("waku");
        waku.with_image(Image::new("wakuorg/nwaku", "v0.35.1"), Overwrite::Error)
            .unwrap();
        waku.command_mut()
            .insert_command("/usr/bin/wakunode", ["--relay=true"], false, None)
            .unwrap();
        let mut group = StatefulGroupConfig::new("nodes");
        get_config_mut::<PodSpecConfig, _>(&mut group)
            .add_container(waku, Overwrite::Error)
            .unwrap();
        group
    }

    #[test]
    fn test_walks_every_layer() {
        let mut group = group();
        get_config_mut::<StatefulGroupSpecConfig, _>(&mut group).with_replicas(4);
        get_config_mut::<PodTemplateSpecConfig, _>(&mut group)
            .with_app_label("nodes", Overwrite::Error)
            .unwrap();

        assert_eq!(group.spec().replicas(), 4);
        assert_eq!(group.spec().pod_template().app_label(), Some("nodes"));
        assert_eq!(
            get_config::<PodSpecConfig, _>(group.spec().pod_template())
                .containers()
                .len(),
            1
        );
    }

    #[test]
    fn test_find_container_through_layers() {
        let mut group = group();
        assert_eq!(find_container(&group, "waku").unwrap().name(), "waku");
        assert!(matches!(
            find_container(group.spec(), "postgres"),
            Err(ConfigError::ContainerNotFound { .. })
        ));

        with_container_command_args(
            &mut group,
            "waku",
            "/usr/bin/wakunode",
            ["--relay=false"],
            OnDuplicate::Replace,
        )
        .unwrap();
        let flags = find_container(&group, "waku")
            .unwrap()
            .command()
            .find_command("/usr/bin/wakunode")
            .unwrap()
            .flag_values("--relay");
        assert_eq!(flags, vec![Some("false")]);
    }
}
