//! Transaction record and the payment status graph

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PaymentError;

/// Payment provider identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BankType {
    #[serde(rename = "SEP")]
    Sep,
    #[serde(rename = "IDPAY")]
    IdPay,
}

impl BankType {
    /// Every known identifier
    pub const ALL: [BankType; 2] = [BankType::Sep, BankType::IdPay];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sep => "SEP",
            Self::IdPay => "IDPAY",
        }
    }
}

impl fmt::Display for BankType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BankType {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "SEP" => Ok(Self::Sep),
            "IDPAY" => Ok(Self::IdPay),
            _ => Err(PaymentError::AdapterNotFound(s.to_string())),
        }
    }
}

/// Payment status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Waiting,
    RedirectToBank,
    ReturnFromBank,
    CancelByUser,
    ExpireGatewayToken,
    ExpireVerifyPayment,
    Complete,
    Error,
}

impl PaymentStatus {
    /// No transition leaves a terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Complete
                | Self::CancelByUser
                | Self::ExpireGatewayToken
                | Self::ExpireVerifyPayment
                | Self::Error
        )
    }

    /// Whether the status graph allows moving from `current` to `next`.
    ///
    /// `current` is `None` only while the record is being created.
    pub fn can_transition(current: Option<PaymentStatus>, next: PaymentStatus) -> bool {
        use PaymentStatus::*;

        let Some(current) = current else {
            return next == Waiting;
        };
        if current.is_terminal() {
            return false;
        }

        match next {
            Waiting => false,
            RedirectToBank | ExpireGatewayToken => matches!(current, Waiting | RedirectToBank),
            ReturnFromBank => current == RedirectToBank,
            Complete | ExpireVerifyPayment => current == ReturnFromBank,
            CancelByUser | Error => true,
        }
    }

    /// Human readable label
    pub fn label(&self) -> &'static str {
        match self {
            Self::Waiting => "Waiting",
            Self::RedirectToBank => "Redirect to bank",
            Self::ReturnFromBank => "Return from bank",
            Self::CancelByUser => "Cancel by user",
            Self::ExpireGatewayToken => "Expire gateway token",
            Self::ExpireVerifyPayment => "Expire verify payment",
            Self::Complete => "Complete",
            Self::Error => "Unknown error acquired",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fields SEP returns on its callback and needs again for verification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SepExtension {
    /// `RefNum`: the bank's receipt number, required by verification
    pub ref_num: Option<String>,
    pub token: Option<String>,
    pub trace_no: Option<String>,
    pub secure_pan: Option<String>,
}

/// Fields IDPay returns on its callback
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdPayExtension {
    /// Payment id echoed by the callback; must equal the record's reference number
    #[serde(default)]
    pub id: Option<String>,
    pub track_id: Option<String>,
    pub card_no: Option<String>,
    pub hashed_card_no: Option<String>,
}

/// Provider-specific data persisted next to the shared record fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProviderExtension {
    #[default]
    None,
    Sep(SepExtension),
    #[serde(rename = "IDPAY")]
    IdPay(IdPayExtension),
}

impl ProviderExtension {
    pub fn sep(&self) -> Option<&SepExtension> {
        match self {
            Self::Sep(ext) => Some(ext),
            _ => None,
        }
    }

    pub fn idpay(&self) -> Option<&IdPayExtension> {
        match self {
            Self::IdPay(ext) => Some(ext),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Merchant-side object a payment settles (e.g. an order or an invoice)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderContext {
    /// Collection or table the object lives in
    pub collection: String,
    /// Snapshot of whatever the merchant needs back after payment
    pub payload: serde_json::Value,
}

impl OrderContext {
    pub fn new(collection: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            collection: collection.into(),
            payload,
        }
    }
}

/// One payment attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Natural key, also sent to the bank as the correlation token
    pub tracking_code: String,
    pub bank_type: BankType,
    /// Amount in the merchant's settlement currency, before gateway conversion
    pub amount: i64,
    pub status: PaymentStatus,
    /// Provider session reference assigned at initiation
    pub reference_number: Option<String>,
    /// Latest provider message, diagnostic only
    pub response_text: Option<String>,
    /// Where the user is sent back after the bank flow
    pub callback_url: Option<String>,
    pub phone: Option<String>,
    #[serde(default)]
    pub extension: ProviderExtension,
    #[serde(default)]
    pub order: Option<OrderContext>,
    pub created_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// A freshly initiated record in `Waiting`
    pub fn new(
        tracking_code: impl Into<String>,
        bank_type: BankType,
        amount: i64,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tracking_code: tracking_code.into(),
            bank_type,
            amount,
            status: PaymentStatus::Waiting,
            reference_number: None,
            response_text: None,
            callback_url: None,
            phone: None,
            extension: ProviderExtension::None,
            order: None,
            created_at,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == PaymentStatus::Complete
    }

    /// Time since creation as seen at `now`, at full clock precision
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}
