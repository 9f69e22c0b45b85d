//! Synthetic traffic injection.
//!
//! Message `i` is scheduled at `i * delay` after the first dispatch. A pool of
//! workers pulls message indices from a channel, so a slow peer never holds
//! back the schedule of later messages (up to `max_in_flight` outstanding
//! requests). Outcomes flow to a single aggregator task that owns the
//! counters outright. There are no retries: a failure is a measurement.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::counters::{Outcome, TrafficCounters};
use crate::endpoint::{Endpoint, MessageSpec};
use crate::error::{InjectError, Result};
use crate::sender::{MessageSender, OutboundRequest};
use crate::target::{PeerSelection, Target, TargetResolver};

/// Default cap on concurrently outstanding requests.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 256;

/// What to send and how fast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InjectionPlan {
    pub count: u64,
    pub delay: Duration,
    pub message: MessageSpec,
    pub selection: PeerSelection,
    pub network_size: u64,
}

/// Drives a fixed number of messages against a target.
#[derive(Clone)]
pub struct TrafficInjector {
    resolver: Arc<dyn TargetResolver>,
    sender: Arc<dyn MessageSender>,
    max_in_flight: usize,
}

struct Dispatch {
    resolver: Arc<dyn TargetResolver>,
    sender: Arc<dyn MessageSender>,
    endpoints: Vec<Endpoint>,
    target: Target,
    plan: InjectionPlan,
    namespace: String,
}

impl TrafficInjector {
    pub fn new(resolver: Arc<dyn TargetResolver>, sender: Arc<dyn MessageSender>) -> Self {
        Self {
            resolver,
            sender,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Send `plan.count` messages to `target` through `endpoint`.
    pub async fn inject(
        &self,
        namespace: &str,
        endpoint: &Endpoint,
        target: &Target,
        plan: &InjectionPlan,
    ) -> TrafficCounters {
        self.inject_rotating(namespace, std::slice::from_ref(endpoint), target, plan)
            .await
    }

    /// Like [`inject`](Self::inject), message `i` using `endpoints[i % len]`.
    pub async fn inject_rotating(
        &self,
        namespace: &str,
        endpoints: &[Endpoint],
        target: &Target,
        plan: &InjectionPlan,
    ) -> TrafficCounters {
        if plan.count == 0 || endpoints.is_empty() {
            return TrafficCounters::default();
        }
        let workers = self.max_in_flight.min(plan.count as usize);
        let dispatch = Arc::new(Dispatch {
            resolver: Arc::clone(&self.resolver),
            sender: Arc::clone(&self.sender),
            endpoints: endpoints.to_vec(),
            target: target.clone(),
            plan: plan.clone(),
            namespace: namespace.to_string(),
        });

        let (index_tx, index_rx) = mpsc::channel::<u64>(workers);
        let index_rx = Arc::new(Mutex::new(index_rx));
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel::<(u64, Outcome)>();
        let aggregator = tokio::spawn(aggregate(outcome_rx));

        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let index_rx = Arc::clone(&index_rx);
            let outcome_tx = outcome_tx.clone();
            let dispatch = Arc::clone(&dispatch);
            pool.spawn(async move {
                loop {
                    let next = index_rx.lock().await.recv().await;
                    let Some(index) = next else { break };
                    let outcome = dispatch.run(index).await;
                    if outcome_tx.send((index, outcome)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(outcome_tx);

        info!(
            count = plan.count,
            delay_ms = plan.delay.as_millis() as u64,
            selection = %plan.selection,
            workers,
            "injecting messages"
        );
        let first_dispatch = Instant::now();
        for index in 0..plan.count {
            tokio::time::sleep_until(first_dispatch + plan.delay.mul_f64(index as f64)).await;
            if index_tx.send(index).await.is_err() {
                warn!(index, "worker pool closed early");
                break;
            }
        }
        drop(index_tx);
        debug!("all messages dispatched, awaiting outstanding requests");

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "injector worker aborted");
            }
        }
        let counters = aggregator.await.unwrap_or_default();
        info!(
            success = counters.success,
            failure = counters.failure,
            total = counters.total,
            rate = %counters.success_rate_display(),
            "injection finished"
        );
        counters
    }
}

async fn aggregate(mut outcomes: mpsc::UnboundedReceiver<(u64, Outcome)>) -> TrafficCounters {
    let mut counters = TrafficCounters::default();
    while let Some((index, outcome)) = outcomes.recv().await {
        counters.record(&outcome);
        let rate = counters.success_rate_display();
        match outcome {
            Outcome::Delivered { latency_ms } => info!(
                index,
                latency_ms,
                success = counters.success,
                failure = counters.failure,
                total = counters.total,
                rate = %rate,
                "message delivered"
            ),
            Outcome::Rejected { status, latency_ms } => info!(
                index,
                status,
                latency_ms,
                success = counters.success,
                failure = counters.failure,
                total = counters.total,
                rate = %rate,
                "message rejected"
            ),
            Outcome::Unreachable => info!(
                index,
                success = counters.success,
                failure = counters.failure,
                total = counters.total,
                rate = %rate,
                "message not delivered"
            ),
        }
    }
    counters
}

impl Dispatch {
    async fn run(&self, index: u64) -> Outcome {
        let endpoint = &self.endpoints[(index % self.endpoints.len() as u64) as usize];
        let host = match self.target.host_for(
            self.plan.selection,
            index,
            self.plan.network_size,
            &self.namespace,
        ) {
            Ok(host) => host,
            Err(e) => {
                warn!(index, error = %e, "cannot address target");
                return Outcome::Unreachable;
            }
        };

        let resolve_started = Instant::now();
        let addr = match self.resolver.resolve(&host, self.target.port).await {
            Ok(addr) => addr,
            Err(e) => {
                warn!(index, host = %host, error = %e, "target resolution failed");
                return Outcome::Unreachable;
            }
        };
        debug!(
            index,
            host = %host,
            elapsed_ms = resolve_started.elapsed().as_secs_f64() * 1000.0,
            "target resolved"
        );

        let payload = random_payload_b64(self.plan.message.size_bytes);
        let request = match endpoint.url(addr, &self.plan.message.url_vars()) {
            Ok(url) => OutboundRequest {
                method: endpoint.http_method,
                url,
                headers: endpoint.headers.clone(),
                body: endpoint.body(&self.plan.message, &payload),
            },
            Err(e) => {
                warn!(index, error = %e, "cannot build request");
                return Outcome::Unreachable;
            }
        };

        let sent = Instant::now();
        let result = self.sender.send(&request).await;
        let latency_ms = sent.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(200) => Outcome::Delivered { latency_ms },
            Ok(status) => {
                warn!(
                    index,
                    status,
                    url = %request.url,
                    headers = ?request.headers,
                    body = %request.body,
                    "peer rejected message"
                );
                Outcome::Rejected { status, latency_ms }
            }
            Err(e) => {
                warn!(
                    index,
                    error = %e,
                    url = %request.url,
                    headers = ?request.headers,
                    body = %request.body,
                    "message transport failed"
                );
                Outcome::Unreachable
            }
        }
    }
}

/// Base64 of `size` random bytes.
pub fn random_payload_b64(size: usize) -> String {
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Resolve the first target, retrying `attempts` times `interval` apart.
///
/// Used before the message loop so an unreachable network fails the driver
/// instead of silently counting every message as a failure.
pub async fn probe_first_target(
    resolver: &dyn TargetResolver,
    target: &Target,
    selection: PeerSelection,
    network_size: u64,
    namespace: &str,
    attempts: u32,
    interval: Duration,
) -> Result<std::net::SocketAddr> {
    let host = target.host_for(selection, 0, network_size, namespace)?;
    let attempts = attempts.max(1);
    let mut last_err = None;
    for attempt in 1..=attempts {
        match resolver.resolve(&host, target.port).await {
            Ok(addr) => return Ok(addr),
            Err(e) => {
                warn!(attempt, host = %host, error = %e, "startup resolution failed");
                last_err = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| InjectError::Resolution {
        host,
        reason: "no attempts made".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::net::SocketAddr;

    /// Resolves `nodes-<i>` to `127.0.0.1:<i>`.
    struct IndexResolver;

    #[async_trait]
    impl TargetResolver for IndexResolver {
        async fn resolve(&self, host: &str, _port: u16) -> Result<SocketAddr> {
            let index: u16 = host
                .trim_start_matches("nodes-")
                .parse()
                .map_err(|_| InjectError::Resolution {
                    host: host.to_string(),
                    reason: "unknown".to_string(),
                })?;
            Ok(SocketAddr::from(([127, 0, 0, 1], index + 1)))
        }
    }

    /// Answers by port: 1 and 3 → 200, 2 → 500, anything else → transport error.
    struct ScriptedSender;

    #[async_trait]
    impl MessageSender for ScriptedSender {
        async fn send(&self, request: &OutboundRequest) -> Result<u16> {
            match request.url.port() {
                Some(1) | Some(3) => Ok(200),
                Some(2) => Ok(500),
                _ => Err(InjectError::Http("connection refused".to_string())),
            }
        }
    }

    fn plan(count: u64, network_size: u64) -> InjectionPlan {
        InjectionPlan {
            count,
            delay: Duration::from_millis(10),
            message: MessageSpec {
                pubsub_topic: "/waku/2/rs/2/0".to_string(),
                content_topic: "/tester/1/light-pubsub-example/proto".to_string(),
                size_bytes: 32,
            },
            selection: PeerSelection::Id,
            network_size,
        }
    }

    fn target() -> Target {
        Target {
            name: "nodes".to_string(),
            service: None,
            name_template: Some("nodes-{index}".to_string()),
            stateful_group: None,
            port: 8645,
        }
    }

    #[tokio::test]
    async fn test_mixed_responses_settle_counters() {
        let injector = TrafficInjector::new(Arc::new(IndexResolver), Arc::new(ScriptedSender));
        let counters = injector
            .inject("zt", &Endpoint::relay(), &target(), &plan(4, 4))
            .await;
        assert_eq!(counters.success, 2);
        assert_eq!(counters.failure, 2);
        assert_eq!(counters.total, 4);
        assert_eq!(counters.rejected, 1);
        assert_eq!(counters.unreachable, 1);
        assert_eq!(counters.success_rate_display(), "50.00%");
    }

    #[tokio::test]
    async fn test_single_worker_still_sends_everything() {
        let injector = TrafficInjector::new(Arc::new(IndexResolver), Arc::new(ScriptedSender))
            .with_max_in_flight(1);
        let counters = injector
            .inject("zt", &Endpoint::relay(), &target(), &plan(9, 4))
            .await;
        assert_eq!(counters.total, 9);
        assert_eq!(counters.success + counters.failure, 9);
    }

    #[tokio::test]
    async fn test_unaddressable_target_counts_failures() {
        let injector = TrafficInjector::new(Arc::new(IndexResolver), Arc::new(ScriptedSender));
        let bad = Target {
            name_template: None,
            ..target()
        };
        let counters = injector
            .inject("zt", &Endpoint::relay(), &bad, &plan(3, 4))
            .await;
        assert_eq!(counters.unreachable, 3);
        assert_eq!(counters.success_rate(), 0.0);
    }

    #[tokio::test]
    async fn test_zero_messages_is_a_noop() {
        let injector = TrafficInjector::new(Arc::new(IndexResolver), Arc::new(ScriptedSender));
        let counters = injector
            .inject("zt", &Endpoint::relay(), &target(), &plan(0, 4))
            .await;
        assert_eq!(counters, TrafficCounters::default());
    }

    /// Records when each request went out, then stalls for `latency`.
    struct SlowSender {
        latency: Duration,
        sent_at: std::sync::Mutex<Vec<Instant>>,
    }

    impl SlowSender {
        fn new(latency: Duration) -> Self {
            Self {
                latency,
                sent_at: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn offsets_from(&self, start: Instant) -> Vec<Duration> {
            let mut offsets: Vec<_> = self
                .sent_at
                .lock()
                .unwrap()
                .iter()
                .map(|at| at.duration_since(start))
                .collect();
            offsets.sort();
            offsets
        }
    }

    #[async_trait]
    impl MessageSender for SlowSender {
        async fn send(&self, _request: &OutboundRequest) -> Result<u16> {
            self.sent_at.lock().unwrap().push(Instant::now());
            tokio::time::sleep(self.latency).await;
            Ok(200)
        }
    }

    fn paced(count: u64) -> InjectionPlan {
        InjectionPlan {
            delay: Duration::from_secs(1),
            ..plan(count, 4)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_peers_do_not_shift_the_schedule() {
        let sender = Arc::new(SlowSender::new(Duration::from_secs(60)));
        let injector = TrafficInjector::new(Arc::new(IndexResolver), sender.clone());
        let start = Instant::now();
        let counters = injector
            .inject("zt", &Endpoint::relay(), &target(), &paced(4))
            .await;

        assert_eq!(counters.success, 4);
        assert_eq!(
            sender.offsets_from(start),
            vec![
                Duration::ZERO,
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
            ]
        );
        assert_eq!(start.elapsed(), Duration::from_secs(63));
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_delays_dispatch() {
        let sender = Arc::new(SlowSender::new(Duration::from_secs(5)));
        let injector =
            TrafficInjector::new(Arc::new(IndexResolver), sender.clone()).with_max_in_flight(1);
        let start = Instant::now();
        injector
            .inject("zt", &Endpoint::relay(), &target(), &paced(3))
            .await;

        // One worker: each message waits for the previous request to finish.
        assert_eq!(
            sender.offsets_from(start),
            vec![
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(10),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_gives_up_after_attempts() {
        let unresolvable = Target {
            name_template: Some("elsewhere-{index}".to_string()),
            ..target()
        };
        let start = Instant::now();
        let err = probe_first_target(
            &IndexResolver,
            &unresolvable,
            PeerSelection::Id,
            4,
            "zt",
            3,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InjectError::Resolution { .. }));
        // Three attempts, two pauses between them.
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[test]
    fn test_payload_size() {
        let payload = random_payload_b64(30);
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(payload)
            .unwrap();
        assert_eq!(decoded.len(), 30);
    }
}
