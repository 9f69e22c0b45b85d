//! Runtime knobs shared by every experiment.

use std::time::Duration;

use zerotesting_cluster::ReadyCondition;

pub const NAMESPACE_ENV: &str = "ZEROTESTING_NAMESPACE";
pub const ROLLOUT_TIMEOUT_ENV: &str = "ZEROTESTING_ROLLOUT_TIMEOUT_SECS";
pub const POLL_INTERVAL_ENV: &str = "ZEROTESTING_POLL_INTERVAL_SECS";

pub const DEFAULT_NAMESPACE: &str = "zerotesting";
pub const DEFAULT_ROLLOUT_TIMEOUT: Duration = Duration::from_secs(600);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessConfig {
    pub namespace: String,
    pub rollout_timeout: Duration,
    pub poll_interval: Duration,
    pub ready_condition: ReadyCondition,
}

impl Default for HarnessConfig {
    /// Read overrides from the environment; unparsable values are ignored.
    fn default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }
}

impl HarnessConfig {
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let secs = |key: &str, fallback: Duration| {
            lookup(key)
                .and_then(|raw| raw.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(fallback)
        };
        Self {
            namespace: lookup(NAMESPACE_ENV)
                .filter(|ns| !ns.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            rollout_timeout: secs(ROLLOUT_TIMEOUT_ENV, DEFAULT_ROLLOUT_TIMEOUT),
            poll_interval: secs(POLL_INTERVAL_ENV, DEFAULT_POLL_INTERVAL),
            ready_condition: ReadyCondition::default(),
        }
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_rollout_timeout(mut self, timeout: Duration) -> Self {
        self.rollout_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
