//! Provider registry and the bank factory

use crate::clock::{Clock, SystemClock};
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{Bank, BankProvider};
use crate::providers::ProviderContext;
use crate::record::BankType;
use crate::resolver::{Credentials, SettingsReader};
use crate::store::TransactionStore;
use crate::transport::{HttpTransport, ReqwestTransport};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds a provider from its credentials
pub type ProviderConstructor =
    fn(&Credentials, ProviderContext) -> PaymentResult<Box<dyn BankProvider>>;

/// Provider identifier to constructor mapping, filled at process start
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    constructors: HashMap<BankType, ProviderConstructor>,
}

impl ProviderRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Every provider compiled into this build
    pub fn builtin() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::new();
        #[cfg(feature = "sep")]
        registry.register(BankType::Sep, build_sep);
        #[cfg(feature = "idpay")]
        registry.register(BankType::IdPay, build_idpay);
        registry
    }

    pub fn register(&mut self, bank: BankType, constructor: ProviderConstructor) -> &mut Self {
        self.constructors.insert(bank, constructor);
        self
    }

    pub fn contains(&self, bank: BankType) -> bool {
        self.constructors.contains_key(&bank)
    }

    pub fn get(&self, bank: BankType) -> PaymentResult<ProviderConstructor> {
        self.constructors
            .get(&bank)
            .copied()
            .ok_or_else(|| PaymentError::AdapterNotFound(bank.to_string()))
    }

    /// Registered identifiers, in a stable order
    pub fn banks(&self) -> Vec<BankType> {
        let mut banks: Vec<BankType> = self.constructors.keys().copied().collect();
        banks.sort();
        banks
    }
}

#[cfg(feature = "sep")]
fn build_sep(credentials: &Credentials, context: ProviderContext) -> PaymentResult<Box<dyn BankProvider>> {
    Ok(Box::new(crate::providers::SepProvider::new(credentials, context)?))
}

#[cfg(feature = "idpay")]
fn build_idpay(credentials: &Credentials, context: ProviderContext) -> PaymentResult<Box<dyn BankProvider>> {
    Ok(Box::new(crate::providers::IdPayProvider::new(credentials, context)?))
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("banks", &self.banks())
            .finish()
    }
}

/// Creates ready-to-use [`Bank`] instances from configuration
pub struct BankFactory {
    reader: Arc<dyn SettingsReader>,
    store: Arc<dyn TransactionStore>,
    registry: ProviderRegistry,
    transport: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
}

impl BankFactory {
    /// Factory with the built-in providers and the `reqwest` transport
    pub fn new(reader: Arc<dyn SettingsReader>, store: Arc<dyn TransactionStore>) -> Self {
        Self {
            reader,
            store,
            registry: ProviderRegistry::builtin(),
            transport: Arc::new(ReqwestTransport::new()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn reader(&self) -> &dyn SettingsReader {
        self.reader.as_ref()
    }

    /// Build a bank for `bank`, or for the configured default when `None`
    pub fn create(&self, bank: Option<BankType>) -> PaymentResult<Bank> {
        let bank = bank.unwrap_or_else(|| self.reader.default_bank());
        let constructor = self.registry.get(bank)?;
        let credentials = self.reader.read(bank)?;

        let context = ProviderContext::new(self.transport.clone(), self.reader.timeout());
        let provider = constructor(&credentials, context)?;

        debug!(bank = %bank, currency = %self.reader.currency(), "Bank created");

        Ok(Bank::new(provider, self.store.clone())
            .with_clock(self.clock.clone())
            .with_currency(self.reader.currency())
            .with_gateway_callback_url(self.reader.callback_url())
            .with_tracking_code_query_param(self.reader.tracking_code_query_param()))
    }

    /// Build a bank from a textual identifier such as `"SEP"`
    pub fn create_from_identifier(&self, identifier: &str) -> PaymentResult<Bank> {
        self.create(Some(identifier.parse()?))
    }

    pub fn create_default(&self) -> PaymentResult<Bank> {
        self.create(None)
    }

    /// First provider, in priority order, whose gateway check succeeds
    pub async fn auto_create(&self, amount: Option<i64>) -> PaymentResult<Bank> {
        let mut failures = Vec::new();

        for bank_type in self.reader.priorities() {
            let outcome = match self.create(Some(bank_type)) {
                Ok(mut bank) => bank.check_gateway(amount).await.map(|_| bank),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(_) => {
                    info!(bank = %bank_type, "Gateway check passed");
                    // The probed instance already carries a tracking code and a callback URL.
                    return self.create(Some(bank_type));
                }
                Err(e) => {
                    warn!(bank = %bank_type, error = %e, "Gateway check failed");
                    failures.push(format!("{}: {}", bank_type, e));
                }
            }
        }

        Err(PaymentError::AutoConnectionFailed(failures.join("; ")))
    }
}

impl std::fmt::Debug for BankFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BankFactory")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
