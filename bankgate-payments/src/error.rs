//! Error types for payment orchestration

use crate::record::PaymentStatus;
use thiserror::Error;

/// Payment error types
///
/// Every failure is distinguishable by variant; [`PaymentError::disposition`]
/// collapses them into what the caller should show the user.
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Amount is not a positive integer, or cannot be expressed in the target unit
    #[error("Invalid amount: {0}")]
    AmountInvalid(String),

    /// Gateway amount is below the provider minimum
    #[error("Amount {amount} is below the gateway minimum of {minimum}")]
    AmountTooSmall { amount: i64, minimum: i64 },

    /// Currency code or conversion pair is not supported
    #[error("Currency not supported: {0}")]
    CurrencyUnsupported(String),

    /// A provider has no registered credentials, or a credential key is absent
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    /// No implementation is registered for a provider identifier
    #[error("No bank adapter registered for {0}")]
    AdapterNotFound(String),

    /// Out-of-order status transition
    #[error("Invalid state transition from {from:?} to {to:?}")]
    StateInvalid {
        from: Option<PaymentStatus>,
        to: PaymentStatus,
    },

    /// The user did not reach the bank within the redirect window
    #[error("Gateway token expired")]
    GatewayTokenExpired,

    /// The provider declined to initiate the payment
    #[error("Payment rejected by provider: {0}")]
    PaymentRejected(String),

    /// No transaction record exists for a tracking code
    #[error("Transaction record not found: {0}")]
    RecordNotFound(String),

    /// The client callback URL was changed after a record was created
    #[error("Callback URL cannot change once the transaction exists (status {0:?})")]
    InvalidStateForCallbackChange(PaymentStatus),

    /// Callback payload is missing required fields
    #[error("Invalid callback payload: {0}")]
    InvalidCallback(String),

    /// Provider request timed out
    #[error("Provider request timed out: {0}")]
    Timeout(String),

    /// Provider could not be reached
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persistence collaborator failed
    #[error("Store error: {0}")]
    Store(String),

    /// Every provider in the priority list failed its gateway check
    #[error("All bank gateways failed to connect: {0}")]
    AutoConnectionFailed(String),
}

impl PaymentError {
    /// Timeout and connection failures: recoverable by retrying the same step.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connection(_))
    }

    /// How the caller should react to this error.
    pub fn disposition(&self) -> Disposition {
        match self {
            Self::Timeout(_) | Self::Connection(_) | Self::Store(_) => Disposition::Retry,
            Self::GatewayTokenExpired | Self::PaymentRejected(_) | Self::AutoConnectionFailed(_) => {
                Disposition::Restart
            }
            _ => Disposition::Fail,
        }
    }
}

/// What the merchant should show after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Offer to retry the same step
    Retry,
    /// Show a failure; retrying will not help
    Fail,
    /// Send the user through a fresh payment attempt
    Restart,
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            PaymentError::Timeout(err.to_string())
        } else if err.is_decode() {
            PaymentError::Serialization(err.to_string())
        } else {
            PaymentError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(err: serde_json::Error) -> Self {
        PaymentError::Serialization(err.to_string())
    }
}

impl From<url::ParseError> for PaymentError {
    fn from(err: url::ParseError) -> Self {
        PaymentError::ConfigurationMissing(format!("invalid URL: {}", err))
    }
}

impl From<bankgate_config::ConfigError> for PaymentError {
    fn from(err: bankgate_config::ConfigError) -> Self {
        PaymentError::ConfigurationMissing(err.to_string())
    }
}

/// Result type for payment operations
pub type PaymentResult<T> = Result<T, PaymentError>;
