// Bankgate - one payment workflow over Iranian bank gateways
//
// This library re-exports the workspace crates: the payment orchestrator and
// its providers, layered configuration loading, and logging setup.

// Re-export the payment core
pub use bankgate_payments::*;

// Re-export member crates
pub use bankgate_config;
pub use bankgate_payments;

#[cfg(feature = "log")]
pub use bankgate_log;

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        Bank,
        BankFactory,
        BankProvider,
        BankType,
        CallbackPayload,
        Currency,
        DefaultReader,
        Disposition,
        GatewaySettings,
        InMemoryTransactionStore,
        OrderContext,
        PaymentError,
        PaymentResult,
        PaymentStatus,
        SettingsReader,
        TransactionRecord,
        TransactionStore,
    };
}
