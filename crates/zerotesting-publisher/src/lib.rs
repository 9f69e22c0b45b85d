//! Zerotesting-Publisher: synthetic traffic for peer nodes
//!
//! Issues HTTP messages to a rotating set of peer pods and counts outcomes.
//! Used in-process by the harness and as the `publisher` driver binary that
//! runs inside the publisher pod.

pub mod counters;
pub mod endpoint;
pub mod error;
pub mod injector;
pub mod sender;
pub mod target;

pub use counters::{Outcome, TrafficCounters};
pub use endpoint::{BodyShape, Endpoint, HttpMethod, MessageSpec, Protocol, MESSAGE_VERSION};
pub use error::{InjectError, Result};
pub use injector::{
    probe_first_target, random_payload_b64, InjectionPlan, TrafficInjector,
    DEFAULT_MAX_IN_FLIGHT,
};
pub use sender::{HttpSender, MessageSender, OutboundRequest, DEFAULT_REQUEST_TIMEOUT};
pub use target::{DnsResolver, PeerSelection, Target, TargetResolver};

/// Default pubsub topic of the cluster under test.
pub const DEFAULT_PUBSUB_TOPIC: &str = "/waku/2/rs/2/0";

/// Default content topic of injected messages.
pub const DEFAULT_CONTENT_TOPIC: &str = "/tester/1/light-pubsub-example/proto";

/// Default REST port of peer nodes.
pub const DEFAULT_REST_PORT: u16 = 8645;
