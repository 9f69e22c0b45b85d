//! Target addressing: which peer pod receives message `i`.

use std::net::SocketAddr;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{InjectError, Result};

/// How the publisher picks a peer for each message.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum PeerSelection {
    /// Resolve a well-known service name; the cluster load-balances.
    Service,
    /// Address pod `message_index mod network_size` through a name template.
    #[default]
    Id,
}

impl std::fmt::Display for PeerSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerSelection::Service => f.write_str("service"),
            PeerSelection::Id => f.write_str("id"),
        }
    }
}

/// A set of peer pods that can receive messages.
///
/// `name_template` may contain `{index}` and `{namespace}`; `service` may
/// contain `{namespace}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    pub service: Option<String>,
    pub name_template: Option<String>,
    pub stateful_group: Option<String>,
    pub port: u16,
}

impl Target {
    /// Host name addressed for message `index`.
    pub fn host_for(
        &self,
        selection: PeerSelection,
        index: u64,
        network_size: u64,
        namespace: &str,
    ) -> Result<String> {
        let chosen = match selection {
            PeerSelection::Service => self
                .service
                .as_deref()
                .map(|service| service.to_string())
                .or_else(|| self.template_host(index, network_size)),
            PeerSelection::Id => self
                .template_host(index, network_size)
                .or_else(|| self.service.clone()),
        };
        chosen
            .map(|host| host.replace("{namespace}", namespace))
            .ok_or_else(|| InjectError::NoAddressing(self.name.clone()))
    }

    fn template_host(&self, index: u64, network_size: u64) -> Option<String> {
        let template = self.name_template.as_deref()?;
        let pod_index = index % network_size.max(1);
        Some(template.replace("{index}", &pod_index.to_string()))
    }
}

/// Resolves a host name to a socket address.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr>;
}

/// System DNS resolution through tokio.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

#[async_trait]
impl TargetResolver for DnsResolver {
    async fn resolve(&self, host: &str, port: u16) -> Result<SocketAddr> {
        let started = Instant::now();
        let mut addrs = tokio::net::lookup_host((host, port))
            .await
            .map_err(|e| InjectError::Resolution {
                host: host.to_string(),
                reason: e.to_string(),
            })?;
        let addr = addrs.next().ok_or_else(|| InjectError::Resolution {
            host: host.to_string(),
            reason: "no addresses".to_string(),
        })?;
        debug!(
            host = %host,
            addr = %addr,
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "resolved target"
        );
        Ok(addr)
    }
}
