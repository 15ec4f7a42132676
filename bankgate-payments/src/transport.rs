//! HTTP transport used to reach provider endpoints

use crate::error::{PaymentError, PaymentResult};
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::warn;

/// Default bound on a provider round-trip
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON-over-POST transport.
///
/// Implementations must turn timeouts into [`PaymentError::Timeout`] and
/// unreachable hosts into [`PaymentError::Connection`].
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// POST `body` as JSON and parse the response body as JSON, whatever its status code.
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> PaymentResult<Value>;
}

/// Transport backed by `reqwest`
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an already configured client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        body: &Value,
        headers: &[(&str, String)],
        timeout: Duration,
    ) -> PaymentResult<Value> {
        let mut request = self.client.post(url).timeout(timeout).json(body);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        let response = request.send().await.map_err(|e| {
            warn!(url, error = %e, "provider request failed");
            PaymentError::from(e)
        })?;

        let status = response.status();
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(url, status = %status, "provider returned a non-JSON body");
            PaymentError::Serialization(format!("{} (HTTP {})", e, status))
        })
    }
}
