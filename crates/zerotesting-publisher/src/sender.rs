//! Message transport.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use crate::endpoint::HttpMethod;
use crate::error::{InjectError, Result};

/// Per-request timeout used by [`HttpSender::new`].
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A fully built request to one peer.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

/// Sends one request and reports the HTTP status.
///
/// A returned status of any value means the peer answered; transport failures
/// are errors.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<u16>;
}

/// `reqwest`-backed sender.
#[derive(Debug, Clone)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new() -> Result<Self> {
        Self::with_timeout(DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("zerotesting-publisher/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MessageSender for HttpSender {
    async fn send(&self, request: &OutboundRequest) -> Result<u16> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(request.url.clone()),
            HttpMethod::Post => self.client.post(request.url.clone()).json(&request.body),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder
            .send()
            .await
            .map_err(|e| InjectError::Http(e.to_string()))?;
        Ok(response.status().as_u16())
    }
}
