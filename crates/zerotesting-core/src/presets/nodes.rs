//! Bootstrap and regression node roles.

use k8s_openapi::api::core::v1::{HTTPGetAction, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use crate::error::Result;
use crate::policy::{OnDuplicate, Overwrite};
use crate::presets::{
    BOOTSTRAP_APP, BOOTSTRAP_SERVICE, DEFAULT_CLUSTER_ID, DISCV5_PORT, METRICS_PORT,
    NODES_APP, NODES_SERVICE, NODE_CONTAINER, NODE_IMAGE_REPO, NODE_IMAGE_TAG, NODE_PROGRAM,
    P2P_PORT, REST_PORT,
};
use crate::workload::{
    env_field, get_config_mut, resources, ContainerConfig, Image, PodSpecConfig,
    PodTemplateSpecConfig, PullPolicy, StatefulGroupSpecConfig,
};
use crate::workload::ConfigPath;

/// Parameters shared by the node roles.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOptions {
    pub image: Image,
    pub namespace: String,
    pub app: String,
    pub service_name: String,
    pub cluster_id: u32,
    pub max_connections: u32,
    /// Shard subscribed by relay nodes.
    pub shard: Option<u32>,
}

impl NodeOptions {
    pub fn bootstrap(namespace: &str) -> Self {
        Self {
            image: Image::new(NODE_IMAGE_REPO, NODE_IMAGE_TAG),
            namespace: namespace.to_string(),
            app: BOOTSTRAP_APP.to_string(),
            service_name: BOOTSTRAP_SERVICE.to_string(),
            cluster_id: DEFAULT_CLUSTER_ID,
            max_connections: 1000,
            shard: None,
        }
    }

    pub fn regression(namespace: &str) -> Self {
        Self {
            image: Image::new(NODE_IMAGE_REPO, NODE_IMAGE_TAG),
            namespace: namespace.to_string(),
            app: NODES_APP.to_string(),
            service_name: NODES_SERVICE.to_string(),
            cluster_id: DEFAULT_CLUSTER_ID,
            max_connections: 200,
            shard: Some(0),
        }
    }

    fn fqdn(&self, service: &str) -> String {
        format!("{service}.{}", self.namespace)
    }
}

fn health_probe() -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some("/health".to_string()),
            port: IntOrString::Int(REST_PORT),
            ..Default::default()
        }),
        initial_delay_seconds: Some(1),
        period_seconds: Some(3),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

/// The peer container with ports, pod-IP env and a script-mode command.
pub fn node_container(opts: &NodeOptions, args: &[String]) -> Result<ContainerConfig> {
    let mut container = ContainerConfig::new(NODE_CONTAINER);
    container
        .with_image(opts.image.clone(), Overwrite::Error)?
        .with_pull_policy(PullPolicy::IfNotPresent, Overwrite::Error)?
        .with_port(REST_PORT, Some("rest"), None, Overwrite::Error)?
        .with_port(METRICS_PORT, Some("metrics"), None, Overwrite::Error)?
        .with_port(P2P_PORT, Some("libp2p"), None, Overwrite::Error)?
        .with_port(DISCV5_PORT, Some("discv5"), Some("UDP"), Overwrite::Error)?
        .with_env(env_field("IP", "status.podIP"), OnDuplicate::Error)?;
    // `$IP` has to be expanded by a shell.
    let command = container.command_mut();
    command.insert_command(NODE_PROGRAM, args.iter().map(String::as_str), true, None)?;
    command.use_single_command(false)?;
    Ok(container)
}

fn common_args(opts: &NodeOptions) -> Vec<String> {
    vec![
        "--rest=true".to_string(),
        "--rest-address=0.0.0.0".to_string(),
        format!("--max-connections={}", opts.max_connections),
        "--discv5-discovery=true".to_string(),
        "--discv5-enr-auto-update=True".to_string(),
        "--log-level=INFO".to_string(),
        "--metrics-server=True".to_string(),
        "--metrics-server-address=0.0.0.0".to_string(),
        "--nat=extip:$IP".to_string(),
        format!("--cluster-id={}", opts.cluster_id),
    ]
}

fn apply_role<C>(config: &mut C, opts: &NodeOptions, container: ContainerConfig, dns: &[String]) -> Result<()>
where
    C: ConfigPath<StatefulGroupSpecConfig>,
{
    let spec = get_config_mut::<StatefulGroupSpecConfig, C>(config);
    spec.with_service_name(&opts.service_name, Overwrite::Error)?;

    let template = get_config_mut::<PodTemplateSpecConfig, _>(spec);
    template.with_app_label(&opts.app, Overwrite::Error)?;

    let pod_spec = get_config_mut::<PodSpecConfig, _>(template);
    for service in dns {
        pod_spec.with_dns_service(service);
    }
    pod_spec.add_container(container, Overwrite::Error)?;
    Ok(())
}

/// Non-relaying discovery node.
pub fn bootstrap_node<C>(config: &mut C, opts: &NodeOptions) -> Result<()>
where
    C: ConfigPath<StatefulGroupSpecConfig>,
{
    let mut args = vec!["--relay=false".to_string()];
    args.extend(common_args(opts));

    let mut container = node_container(opts, &args)?;
    container
        .with_resources(
            resources(
                &[("memory", "64Mi"), ("cpu", "50m")],
                &[("memory", "768Mi"), ("cpu", "400m")],
            ),
            Overwrite::Error,
        )?
        .with_readiness_probe(health_probe(), Overwrite::Error)?;

    let dns = [opts.fqdn(&opts.service_name)];
    apply_role(config, opts, container, &dns)
}

/// Relaying peer node subscribed to one shard.
pub fn regression_node<C>(config: &mut C, opts: &NodeOptions) -> Result<()>
where
    C: ConfigPath<StatefulGroupSpecConfig>,
{
    let mut args = vec!["--relay=true".to_string()];
    args.extend(common_args(opts));
    args.push("--rest-admin=true".to_string());
    if let Some(shard) = opts.shard {
        args.push(format!("--shard={shard}"));
    }

    let mut container = node_container(opts, &args)?;
    container
        .with_resources(
            resources(
                &[("memory", "64Mi"), ("cpu", "150m")],
                &[("memory", "600Mi"), ("cpu", "400m")],
            ),
            Overwrite::Error,
        )?
        .with_readiness_probe(health_probe(), Overwrite::Error)?;

    let dns = [opts.fqdn(&opts.service_name), opts.fqdn(BOOTSTRAP_SERVICE)];
    apply_role(config, opts, container, &dns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builders::StatefulGroupBuilder;
    use crate::command::RenderedCommand;
    use crate::error::ConfigError;
    use zerotesting_cluster::Manifest;

    #[test]
    fn test_bootstrap_only_deploy() {
        let mut builder = StatefulGroupBuilder::new("bootstrap", "zerotesting").unwrap();
        builder
            .with_replicas(3)
            .apply(|c| bootstrap_node(c, &NodeOptions::bootstrap("zerotesting")))
            .unwrap();

        let Manifest::StatefulSet(sts) = builder.build().unwrap() else {
            panic!("expected stateful set");
        };
        let spec = sts.spec.unwrap();
        assert_eq!(spec.replicas, Some(3));
        assert_eq!(Some(spec.service_name.as_str()), Some("zerotesting-bootstrap"));

        let container = &spec.template.spec.unwrap().containers[0];
        let command = container.command.as_ref().unwrap();
        assert_eq!(command[..2], ["sh".to_string(), "-c".to_string()]);
        let script = &command[2];
        assert!(script.starts_with(NODE_PROGRAM));
        for flag in [
            "--relay=false",
            "--rest=true",
            "--cluster-id=2",
            "--max-connections=1000",
            "--nat=extip:$IP",
        ] {
            assert!(script.contains(flag), "missing {flag} in {script}");
        }
    }

    #[test]
    fn test_bootstrap_model_starts_with_program() {
        let mut builder = StatefulGroupBuilder::new("bootstrap", "zerotesting").unwrap();
        builder
            .apply(|c| bootstrap_node(c, &NodeOptions::bootstrap("zerotesting")))
            .unwrap();
        let pod_spec = builder.config().spec().pod_template().pod_spec();
        let container = pod_spec.find_container(NODE_CONTAINER).unwrap();
        assert_eq!(container.command().commands()[0].program, NODE_PROGRAM);
        assert_eq!(
            pod_spec.dns_searches(),
            &["zerotesting-bootstrap.zerotesting".to_string()]
        );
        assert!(matches!(
            container.command().render(),
            Some(RenderedCommand::Script { .. })
        ));
    }

    #[test]
    fn test_regression_node_relays_on_shard() {
        let mut builder = StatefulGroupBuilder::new("nodes", "zerotesting").unwrap();
        builder
            .apply(|c| regression_node(c, &NodeOptions::regression("zerotesting")))
            .unwrap();
        let config = builder.config();
        assert_eq!(config.spec().service_name(), Some(NODES_SERVICE));
        let cmd = config
            .spec()
            .pod_template()
            .pod_spec()
            .find_container(NODE_CONTAINER)
            .unwrap()
            .command()
            .find_command(NODE_PROGRAM)
            .unwrap()
            .clone();
        assert_eq!(cmd.flag_values("--relay"), vec![Some("true")]);
        assert_eq!(cmd.flag_values("--shard"), vec![Some("0")]);
        assert_eq!(cmd.flag_values("--max-connections"), vec![Some("200")]);
    }

    #[test]
    fn test_conflicting_roles() {
        let mut builder = StatefulGroupBuilder::new("nodes", "zerotesting").unwrap();
        let opts = NodeOptions::regression("zerotesting");
        builder.apply(|c| regression_node(c, &opts)).unwrap();
        builder.apply(|c| regression_node(c, &opts)).unwrap();
        let err = builder
            .apply(|c| bootstrap_node(c, &NodeOptions::bootstrap("zerotesting")))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Conflict { .. }));
    }
}
