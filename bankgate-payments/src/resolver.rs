//! Configuration resolution: credentials, default provider, priorities, currency

use crate::currency::Currency;
use crate::error::{PaymentError, PaymentResult};
use crate::record::BankType;
use crate::settings::GatewaySettings;
use secrecy::{ExposeSecret, SecretString};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

/// Credential bundle for one provider (merchant code, terminal code, ...)
#[derive(Default)]
pub struct Credentials {
    values: HashMap<String, SecretString>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values
            .insert(key.into(), SecretString::from(value.into()));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// A required value; absent or blank keys are a configuration error
    pub fn require(&self, key: &str) -> PaymentResult<&str> {
        self.get(key)
            .ok_or_else(|| PaymentError::ConfigurationMissing(format!("credential {}", key)))
    }

    /// Blank values read as absent
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(|v| v.expose_secret())
            .filter(|v| !v.trim().is_empty())
    }

    /// Interpret `1`, `true` and `yes` as set
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Credentials").field("keys", &keys).finish()
    }
}

/// Lookup over externally supplied gateway configuration.
///
/// Implementations are read-only at request time.
pub trait SettingsReader: Send + Sync {
    /// Credentials registered for `bank`
    fn read(&self, bank: BankType) -> PaymentResult<Credentials>;

    /// Provider used when none is requested
    fn default_bank(&self) -> BankType;

    /// Merchant settlement currency
    fn currency(&self) -> Currency;

    /// Default provider first, then the configured priorities, without duplicates
    fn priorities(&self) -> Vec<BankType>;

    /// URL the provider posts its callback to
    fn callback_url(&self) -> &str;

    /// Query parameter used to hand the tracking code back to the client
    fn tracking_code_query_param(&self) -> &str {
        "tc"
    }

    /// Bound on provider requests
    fn timeout(&self) -> Duration {
        crate::transport::DEFAULT_TIMEOUT
    }
}

/// Reader over a [`GatewaySettings`] snapshot
#[derive(Debug, Clone)]
pub struct DefaultReader {
    settings: GatewaySettings,
}

impl DefaultReader {
    pub fn new(settings: GatewaySettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }
}

impl SettingsReader for DefaultReader {
    fn read(&self, bank: BankType) -> PaymentResult<Credentials> {
        let raw = self
            .settings
            .bank_gateways
            .get(bank.as_str())
            .ok_or_else(|| PaymentError::ConfigurationMissing(format!("no credentials for {}", bank)))?;

        let mut credentials = Credentials::new();
        for (key, value) in raw {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                serde_json::Value::Null => continue,
                other => other.to_string(),
            };
            credentials.insert(key.clone(), value);
        }
        Ok(credentials)
    }

    fn default_bank(&self) -> BankType {
        self.settings.bank_default
    }

    fn currency(&self) -> Currency {
        self.settings.currency
    }

    fn priorities(&self) -> Vec<BankType> {
        let mut priorities = vec![self.default_bank()];
        for bank in &self.settings.bank_priorities {
            if !priorities.contains(bank) {
                priorities.push(*bank);
            }
        }
        priorities
    }

    fn callback_url(&self) -> &str {
        &self.settings.callback_namespace
    }

    fn tracking_code_query_param(&self) -> &str {
        &self.settings.tracking_code_query_param
    }

    fn timeout(&self) -> Duration {
        self.settings.timeout()
    }
}
