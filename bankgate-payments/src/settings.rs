//! Gateway settings as supplied by the configuration source

use crate::currency::Currency;
use crate::error::PaymentResult;
use crate::record::BankType;
use bankgate_config::ConfigBuilder;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Environment prefix for overrides, e.g. `BANKGATE_CURRENCY=IRR`
pub const ENV_PREFIX: &str = "BANKGATE";

/// Settings for every configured provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct GatewaySettings {
    /// Provider used when the caller does not name one
    #[serde(default = "default_bank")]
    pub bank_default: BankType,

    /// Merchant settlement currency
    #[serde(default)]
    pub currency: Currency,

    /// Preferred providers, tried in order after the default
    #[serde(default, deserialize_with = "list_or_csv")]
    pub bank_priorities: Vec<BankType>,

    /// Credential map per provider identifier
    #[serde(default)]
    pub bank_gateways: HashMap<String, HashMap<String, serde_json::Value>>,

    /// URL the bank posts its callback to
    #[serde(default)]
    pub callback_namespace: String,

    /// Query parameter carrying the tracking code back to the client
    #[serde(default = "default_tracking_param")]
    pub tracking_code_query_param: String,

    /// Bound on each provider request
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_bank() -> BankType {
    BankType::Sep
}

fn default_tracking_param() -> String {
    "tc".to_string()
}

fn default_timeout_secs() -> u64 {
    5
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            bank_default: default_bank(),
            currency: Currency::default(),
            bank_priorities: Vec::new(),
            bank_gateways: HashMap::new(),
            callback_namespace: String::new(),
            tracking_code_query_param: default_tracking_param(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl GatewaySettings {
    /// Load from `.env`, a settings file, then `BANKGATE_*` variables
    pub fn load(path: impl AsRef<Path>) -> PaymentResult<Self> {
        let settings = ConfigBuilder::new()
            .dotenv(None)
            .file(path.as_ref())
            .env_prefix(ENV_PREFIX)
            .build()?;
        Ok(settings)
    }

    /// Load from `.env` and `BANKGATE_*` variables only
    pub fn from_env() -> PaymentResult<Self> {
        let settings = ConfigBuilder::new()
            .dotenv(None)
            .env_prefix(ENV_PREFIX)
            .build()?;
        Ok(settings)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Register credentials for a provider
    pub fn with_gateway<K, V>(mut self, bank: BankType, credentials: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map = credentials
            .into_iter()
            .map(|(k, v)| (k.into(), serde_json::Value::String(v.into())))
            .collect();
        self.bank_gateways.insert(bank.as_str().to_string(), map);
        self
    }
}

fn list_or_csv<'de, D>(deserializer: D) -> Result<Vec<BankType>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<BankType>),
        Csv(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::List(list) => Ok(list),
        Raw::Csv(csv) => csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<BankType>().map_err(serde::de::Error::custom))
            .collect(),
    }
}
