//! Node-port address resolution for traffic injected from outside the cluster.

use tracing::debug;

use crate::client_traits::ClusterClient;
use crate::error::ClusterError;
use crate::ClusterResult;

/// Resolve `host:nodePort` for a service.
///
/// Reads the service's node port, picks the first pod matching the service
/// selector that is scheduled on a node, and returns that node's preferred
/// address.
pub async fn resolve_node_port(
    client: &dyn ClusterClient,
    namespace: &str,
    service: &str,
) -> ClusterResult<String> {
    let info = client.read_service(namespace, service).await?;
    let node_port = info
        .first_node_port()
        .ok_or_else(|| ClusterError::NoNodePort {
            service: service.to_string(),
        })?;

    let pods = client.list_pods(namespace).await?;
    let node_name = pods
        .iter()
        .filter(|pod| {
            info.selector
                .iter()
                .all(|(k, v)| pod.labels.get(k) == Some(v))
        })
        .find_map(|pod| pod.node_name.clone())
        .ok_or_else(|| ClusterError::NotFound {
            kind: "Pod".to_string(),
            namespace: namespace.to_string(),
            name: format!("scheduled pod behind service {service}"),
        })?;

    let node = client.read_node(&node_name).await?;
    let address = node
        .preferred_address()
        .ok_or_else(|| ClusterError::NoAddress {
            node: node_name.clone(),
        })?;
    debug!(service = %service, node = %node_name, address = %address, node_port, "resolved node port");
    Ok(format!("{address}:{node_port}"))
}
