//! Persistence port for transaction records

use crate::record::{PaymentStatus, TransactionRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Store failures. "Not found" is not an error: lookups return `Ok(None)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The stored record does not match the writer's precondition
    #[error("record {tracking_code} changed concurrently (expected {expected:?}, found {found:?})")]
    Conflict {
        tracking_code: String,
        expected: Precondition,
        found: Option<PaymentStatus>,
    },

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// What the stored record must look like for a write to go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    /// Write unconditionally
    Any,
    /// No record with this tracking code exists yet
    Absent,
    /// The stored record has exactly this status
    Status(PaymentStatus),
}

impl Precondition {
    pub fn holds(&self, found: Option<PaymentStatus>) -> bool {
        match self {
            Self::Any => true,
            Self::Absent => found.is_none(),
            Self::Status(expected) => found == Some(*expected),
        }
    }
}

/// Transaction record store.
///
/// Implement this trait for each database the merchant uses.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Point lookup by tracking code
    async fn find(&self, tracking_code: &str) -> StoreResult<Option<TransactionRecord>>;

    /// Write the full record, keyed by tracking code.
    ///
    /// The check against `expected` and the write are one atomic step; a
    /// failed check returns [`StoreError::Conflict`] and changes nothing.
    async fn upsert(&self, record: &TransactionRecord, expected: Precondition) -> StoreResult<()>;
}

/// In-process store
#[derive(Debug, Clone, Default)]
pub struct InMemoryTransactionStore {
    records: Arc<RwLock<HashMap<String, TransactionRecord>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Every record, for inspection
    pub async fn all(&self) -> Vec<TransactionRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn find(&self, tracking_code: &str) -> StoreResult<Option<TransactionRecord>> {
        Ok(self.records.read().await.get(tracking_code).cloned())
    }

    async fn upsert(&self, record: &TransactionRecord, expected: Precondition) -> StoreResult<()> {
        let mut records = self.records.write().await;

        let found = records.get(&record.tracking_code).map(|r| r.status);
        if !expected.holds(found) {
            return Err(StoreError::Conflict {
                tracking_code: record.tracking_code.clone(),
                expected,
                found,
            });
        }

        records.insert(record.tracking_code.clone(), record.clone());
        Ok(())
    }
}
