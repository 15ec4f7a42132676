// Environment variable overlay

use crate::{ConfigError, Result};
use serde_json::Value;
use std::env;

/// Merges prefixed environment variables into a configuration tree.
///
/// With prefix `BANKGATE`, `BANKGATE_CURRENCY=IRR` sets `CURRENCY` and
/// `BANKGATE_BANK_GATEWAYS__SEP__MERCHANT_CODE=42` sets
/// `BANK_GATEWAYS.SEP.MERCHANT_CODE`. Keys keep their case.
#[derive(Debug, Clone)]
pub struct EnvOverlay {
    prefix: String,
    separator: String,
}

impl EnvOverlay {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            separator: "__".to_string(),
        }
    }

    /// Use a different nesting separator than `__`
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Apply the current process environment
    pub fn apply(&self, target: &mut Value) -> usize {
        self.apply_vars(target, env::vars())
    }

    /// Apply an explicit set of variables; returns how many matched the prefix
    pub fn apply_vars<I>(&self, target: &mut Value, vars: I) -> usize
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut applied = 0;
        for (key, value) in vars {
            let Some(path) = self.strip(&key) else {
                continue;
            };
            let segments: Vec<&str> = path.split(self.separator.as_str()).collect();
            if segments.iter().any(|s| s.is_empty()) {
                continue;
            }
            crate::insert_path(target, &segments, crate::scalar(&value));
            applied += 1;
        }
        applied
    }

    /// Read a single prefixed variable, e.g. `load_var("CURRENCY")`
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(format!("{}_{}", self.prefix, key)).map_err(ConfigError::EnvError)
    }

    fn strip<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())?
            .strip_prefix('_')
            .filter(|rest| !rest.is_empty())
    }
}
