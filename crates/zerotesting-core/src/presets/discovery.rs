//! Discovery sidecar: an init container resolves bootstrap identifiers into an
//! env file that the peer container sources before starting.

use crate::command::{Arg, CommandConfig};
use crate::error::{ConfigError, Result};
use crate::policy::{OnDuplicate, Overwrite};
use crate::presets::{require_container, NODE_CONTAINER, NODE_PROGRAM};
use crate::workload::{get_config_mut, ConfigPath, ContainerConfig, Image, PodSpecConfig};

/// Which identifiers the peer bootstraps from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryMode {
    /// discv5 records, passed as `--discv5-bootstrap-node`.
    Enr,
    /// Multiaddrs, passed as `--staticnode`.
    Addrs,
}

struct Layout {
    container: &'static str,
    image: &'static str,
    script: &'static str,
    volume: &'static str,
    mount: &'static str,
    env_file: &'static str,
    var: &'static str,
    label: &'static str,
    flag: &'static str,
}

impl DiscoveryMode {
    fn layout(self) -> Layout {
        match self {
            DiscoveryMode::Enr => Layout {
                container: "grabenr",
                image: "soutullostatus/getenr:v0.5.0",
                script: "/app/getenr.sh",
                volume: "enr-data",
                mount: "/etc/enr",
                env_file: "/etc/enr/enr.env",
                var: "ENR",
                label: "ENRs",
                flag: "--discv5-bootstrap-node",
            },
            DiscoveryMode::Addrs => Layout {
                container: "grabaddrs",
                image: "soutullostatus/getaddr:v0.1.0",
                script: "/app/getaddr.sh",
                volume: "addrs-data",
                mount: "/etc/addrs",
                env_file: "/etc/addrs/addrs.env",
                var: "addrs",
                label: "addrs",
                flag: "--staticnode",
            },
        }
    }

    pub fn init_container_name(self) -> &'static str {
        self.layout().container
    }

    pub fn env_file(self) -> &'static str {
        self.layout().env_file
    }
}

/// Wire `num` bootstrap identifiers from `service_names` into the peer.
pub fn discovery_sidecar<C>(
    config: &mut C,
    mode: DiscoveryMode,
    num: u32,
    service_names: &[&str],
) -> Result<()>
where
    C: ConfigPath<PodSpecConfig>,
{
    if num == 0 {
        return Err(ConfigError::Invalid {
            field: "discovery num".to_string(),
            reason: "at least one identifier is required".to_string(),
        });
    }
    let layout = mode.layout();
    let spec = get_config_mut::<PodSpecConfig, C>(config);
    require_container(spec, NODE_CONTAINER, "discovery preset")?;

    let mut args = vec![Arg::token(num.to_string())];
    args.extend(service_names.iter().map(|s| Arg::token(*s)));
    let mut init = ContainerConfig::new(layout.container);
    init.with_image(Image::parse(layout.image), Overwrite::Error)?
        .with_volume_mount(layout.volume, layout.mount, Overwrite::Error)?
        .with_command(CommandConfig::native(layout.script, args)?, Overwrite::Error)?;

    spec.add_init_container(init, Overwrite::Error)?
        .with_empty_dir_volume(layout.volume, Overwrite::Error)?;

    let vars: Vec<String> = (1..=num).map(|i| format!("${}{i}", layout.var)).collect();
    let node = spec.find_container_mut(NODE_CONTAINER)?;
    node.with_volume_mount(layout.volume, layout.mount, Overwrite::Error)?;

    let command = node.command_mut();
    command.insert_command(".", [Arg::token(layout.env_file)], false, Some(0))?;
    let mut echo = vec![Arg::token(layout.label), Arg::token("are")];
    echo.extend(vars.iter().map(|v| Arg::token(v.as_str())));
    command.insert_command("echo", echo, false, Some(1))?;
    command.add_args(
        NODE_PROGRAM,
        vars.iter().map(|v| Arg::flag(layout.flag, v.as_str())),
        OnDuplicate::Append,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::StatefulGroupBuilder;
    use crate::command::RenderedCommand;
    use crate::presets::{regression_node, NodeOptions};

    fn nodes() -> StatefulGroupBuilder {
        let mut b = StatefulGroupBuilder::new("nodes", "zerotesting").unwrap();
        b.apply(|c| regression_node(c, &NodeOptions::regression("zerotesting")))
            .unwrap();
        b
    }

    #[test]
    fn test_enr_sidecar_wiring() {
        let mut b = nodes();
        b.apply(|c| {
            discovery_sidecar(
                c,
                DiscoveryMode::Enr,
                3,
                &["zerotesting-bootstrap.zerotesting"],
            )
        })
        .unwrap();

        let spec = b.config().spec().pod_template().pod_spec();
        let volume = spec.volumes().iter().find(|v| v.name == "enr-data").unwrap();
        assert!(volume.empty_dir.is_some());

        let init = spec.find_init_container("grabenr").unwrap();
        let Some(RenderedCommand::Native { command, args }) = init.command().render() else {
            panic!("expected native command");
        };
        assert_eq!(
            [command, args].concat().join(" "),
            "/app/getenr.sh 3 zerotesting-bootstrap.zerotesting"
        );

        let Some(RenderedCommand::Script { script }) =
            spec.find_container("waku").unwrap().command().render()
        else {
            panic!("expected script");
        };
        let mut lines = script.lines();
        assert_eq!(lines.next(), Some(". /etc/enr/enr.env"));
        assert_eq!(lines.next(), Some("echo ENRs are $ENR1 $ENR2 $ENR3"));
        for i in 1..=3 {
            assert!(script.contains(&format!("--discv5-bootstrap-node=$ENR{i}")));
        }
    }

    #[test]
    fn test_addrs_mode_uses_static_nodes() {
        let mut b = nodes();
        b.apply(|c| discovery_sidecar(c, DiscoveryMode::Addrs, 2, &["zerotesting-bootstrap.zerotesting"]))
            .unwrap();
        let spec = b.config().spec().pod_template().pod_spec();
        assert!(spec.find_init_container("grabaddrs").is_ok());
        let cmd = spec
            .find_container("waku")
            .unwrap()
            .command()
            .find_command(NODE_PROGRAM)
            .unwrap();
        assert_eq!(
            cmd.flag_values("--staticnode"),
            vec![Some("$addrs1"), Some("$addrs2")]
        );
        b.build().unwrap();
    }

    #[test]
    fn test_requires_peer_container() {
        let mut spec = PodSpecConfig::new();
        let err = discovery_sidecar(&mut spec, DiscoveryMode::Enr, 3, &[]).unwrap_err();
        assert!(matches!(err, ConfigError::Precondition(_)));
    }

    #[test]
    fn test_zero_identifiers_rejected() {
        let mut b = nodes();
        let err = b
            .apply(|c| discovery_sidecar(c, DiscoveryMode::Enr, 0, &[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}
