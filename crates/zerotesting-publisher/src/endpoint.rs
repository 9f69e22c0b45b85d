//! HTTP endpoints exposed by peer nodes and the request bodies they accept.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{InjectError, Result};

/// Protocol version carried in every message body.
pub const MESSAGE_VERSION: u32 = 1;

/// HTTP method of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

/// Shape of the JSON body an endpoint expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyShape {
    /// `{"payload", "contentTopic", "version"}`
    Relay,
    /// `{"pubsubTopic", "message": {"payload", "contentTopic", "version"}}`
    Lightpush,
    /// `{"topic", "msgSize", "version"}`
    Publish,
}

/// Protocols the publisher can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Relay,
    Lightpush,
    /// Alternate driver that lets the node generate the payload itself.
    Publish,
}

impl Protocol {
    /// Command-line spelling, as accepted by `--protocols`.
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Relay => "relay",
            Protocol::Lightpush => "lightpush",
            Protocol::Publish => "publish",
        }
    }

    pub fn endpoint(self) -> Endpoint {
        match self {
            Protocol::Relay => Endpoint::relay(),
            Protocol::Lightpush => Endpoint::lightpush(),
            Protocol::Publish => Endpoint::publish(),
        }
    }
}

/// An HTTP endpoint on a peer node.
///
/// `url_template` is a path whose `{name}` segments are substituted and
/// percent-encoded per segment, so topics containing `/` stay one segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub name: String,
    pub http_method: HttpMethod,
    pub url_template: String,
    pub headers: BTreeMap<String, String>,
    pub params: BTreeMap<String, String>,
    /// Listing endpoints that return pages; never set for message posts.
    pub paged: bool,
    pub body: BodyShape,
}

fn json_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

impl Endpoint {
    pub fn relay() -> Self {
        Self {
            name: "relay".to_string(),
            http_method: HttpMethod::Post,
            url_template: "/relay/v1/messages/{pubsub_topic}".to_string(),
            headers: json_headers(),
            params: BTreeMap::new(),
            paged: false,
            body: BodyShape::Relay,
        }
    }

    pub fn lightpush() -> Self {
        Self {
            name: "lightpush".to_string(),
            http_method: HttpMethod::Post,
            url_template: "/lightpush/v3/message".to_string(),
            headers: json_headers(),
            params: BTreeMap::new(),
            paged: false,
            body: BodyShape::Lightpush,
        }
    }

    pub fn publish() -> Self {
        Self {
            name: "publish".to_string(),
            http_method: HttpMethod::Post,
            url_template: "/publish".to_string(),
            headers: json_headers(),
            params: BTreeMap::new(),
            paged: false,
            body: BodyShape::Publish,
        }
    }

    /// Build the request URL for a resolved address.
    pub fn url(&self, addr: SocketAddr, vars: &BTreeMap<&str, String>) -> Result<Url> {
        let mut url = Url::parse(&format!("http://{addr}/"))
            .map_err(|e| InjectError::InvalidUrl(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InjectError::InvalidUrl(format!("{addr} cannot be a base")))?;
            segments.clear();
            for segment in self.url_template.split('/').filter(|s| !s.is_empty()) {
                let rendered = match segment
                    .strip_prefix('{')
                    .and_then(|s| s.strip_suffix('}'))
                {
                    Some(var) => vars.get(var).cloned().ok_or_else(|| {
                        InjectError::InvalidUrl(format!(
                            "no value for {{{var}}} in {}",
                            self.url_template
                        ))
                    })?,
                    None => segment.to_string(),
                };
                segments.push(&rendered);
            }
        }
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(self.params.iter());
        }
        Ok(url)
    }

    /// Build the JSON body for one message.
    pub fn body(&self, message: &MessageSpec, payload_b64: &str) -> Value {
        match self.body {
            BodyShape::Relay => json!({
                "payload": payload_b64,
                "contentTopic": message.content_topic,
                "version": MESSAGE_VERSION,
            }),
            BodyShape::Lightpush => json!({
                "pubsubTopic": message.pubsub_topic,
                "message": {
                    "payload": payload_b64,
                    "contentTopic": message.content_topic,
                    "version": MESSAGE_VERSION,
                },
            }),
            BodyShape::Publish => json!({
                "topic": message.pubsub_topic,
                "msgSize": message.size_bytes,
                "version": MESSAGE_VERSION,
            }),
        }
    }
}

/// Routing labels and size of every injected message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSpec {
    pub pubsub_topic: String,
    pub content_topic: String,
    pub size_bytes: usize,
}

impl MessageSpec {
    pub(crate) fn url_vars(&self) -> BTreeMap<&'static str, String> {
        BTreeMap::from([
            ("pubsub_topic", self.pubsub_topic.clone()),
            ("content_topic", self.content_topic.clone()),
        ])
    }
}
