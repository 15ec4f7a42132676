//! Bank gateway implementations

#[cfg(feature = "idpay")]
pub mod idpay;
#[cfg(feature = "sep")]
pub mod sep;

#[cfg(feature = "idpay")]
pub use idpay::IdPayProvider;
#[cfg(feature = "sep")]
pub use sep::SepProvider;

use crate::gateway::Verification;
use crate::resolver::Credentials;
use crate::transport::HttpTransport;
use tracing::warn;
use std::sync::Arc;
use std::time::Duration;

/// Everything a provider constructor needs
#[derive(Clone)]
pub struct ProviderContext {
    pub transport: Arc<dyn HttpTransport>,
    pub timeout: Duration,
}

impl ProviderContext {
    pub fn new(transport: Arc<dyn HttpTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }
}

impl std::fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderContext")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Endpoint override from credentials, falling back to the production URL
pub(crate) fn endpoint(credentials: &Credentials, key: &str, default: &str) -> String {
    credentials
        .get(key)
        .unwrap_or(default)
        .trim_end_matches('/')
        .to_string()
}

/// Render a JSON scalar from a provider response as text
pub(crate) fn text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Downgrade an approval whose echoed amount differs from the one requested.
///
/// Responses without an amount pass unchanged.
pub(crate) fn check_amount(
    verification: Verification,
    reported: &serde_json::Value,
    expected: i64,
    tracking_code: &str,
) -> Verification {
    let reported = reported
        .as_i64()
        .or_else(|| reported.as_str().and_then(|s| s.trim().parse().ok()));
    match reported {
        Some(amount) if verification.approved && amount != expected => {
            warn!(tracking_code, expected, reported = amount, "Verified amount mismatch");
            Verification {
                approved: false,
                response_text: Some(format!(
                    "amount mismatch: expected {}, reported {}",
                    expected, amount
                )),
            }
        }
        _ => verification,
    }
}
