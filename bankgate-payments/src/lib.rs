//! Bank payment gateway orchestration
//!
//! One payment workflow over several Iranian bank gateways. A merchant
//! initiates a payment, redirects the user to the bank, receives the bank's
//! callback and verifies the result, without caring which bank is behind it.
//!
//! ## Overview
//!
//! ```text
//!   SettingsReader ──► BankFactory ◄── ProviderRegistry
//!                          │
//!                          ▼
//!                    Bank (orchestrator) ──► TransactionStore
//!                          │                 Clock
//!                          ▼
//!                    BankProvider: SEP | IDPay
//!                          │
//!                          ▼
//!                    HttpTransport (reqwest)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bankgate_payments::{BankFactory, DefaultReader, GatewaySettings, InMemoryTransactionStore};
//! use std::sync::Arc;
//!
//! let settings = GatewaySettings::load("gateways.toml")?;
//! let factory = BankFactory::new(
//!     Arc::new(DefaultReader::new(settings)),
//!     Arc::new(InMemoryTransactionStore::new()),
//! );
//!
//! let mut bank = factory.create_default()?;
//! bank.set_amount(50_000)?;
//! bank.set_client_callback_url("https://shop.example/orders/42")?;
//! bank.ready(None).await?;
//! let url = bank.redirect_gateway().await?;
//!
//! // Later, in the callback handler:
//! let payload = CallbackPayload::from_form(&body)?;
//! let record = factory.create(Some(bank_type))?.verify_from_gateway(&payload).await?;
//! ```

pub mod clock;
pub mod currency;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod providers;
pub mod record;
pub mod resolver;
pub mod settings;
pub mod store;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use currency::{Currency, MINOR_PER_MAJOR, convert, convert_codes};
pub use error::{Disposition, PaymentError, PaymentResult};
pub use factory::{BankFactory, ProviderConstructor, ProviderRegistry};
pub use gateway::{
    Bank, BankProvider, CallbackOutcome, CallbackPayload, Initiation, PaymentRequest,
    Verification, VerifyRequest,
};
pub use providers::ProviderContext;
#[cfg(feature = "idpay")]
pub use providers::IdPayProvider;
#[cfg(feature = "sep")]
pub use providers::SepProvider;
pub use record::{
    BankType, IdPayExtension, OrderContext, PaymentStatus, ProviderExtension, SepExtension,
    TransactionRecord,
};
pub use resolver::{Credentials, DefaultReader, SettingsReader};
pub use settings::GatewaySettings;
pub use store::{InMemoryTransactionStore, Precondition, StoreError, StoreResult, TransactionStore};
pub use transport::{DEFAULT_TIMEOUT, HttpTransport, ReqwestTransport};

/// Smallest amount, in gateway minor units, a provider will be asked to charge
pub const MINIMUM_AMOUNT: i64 = 1000;

/// Seconds after record creation during which the user may still be sent to the bank
pub const GATEWAY_REDIRECT_WINDOW_SECS: i64 = 120;

/// Amount used by [`Bank::check_gateway`] when none is given
pub const CHECK_GATEWAY_AMOUNT: i64 = 10_000;
