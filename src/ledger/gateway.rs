// Ledger Gateway - CRUD access to the off-chain transaction ledger

use super::{TransactionId, TransactionRecord, TransactionStatus, TransactionType};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// LEDGER ERROR
// ============================================================================

/// Errors surfaced by a ledger backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger request timed out")]
    Timeout,

    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger rejected request: {0}")]
    Rejected(String),

    #[error("Transaction not found: {0}")]
    NotFound(TransactionId),

    #[error("Malformed ledger response: {0}")]
    MalformedResponse(String),

    #[error("Ledger storage error: {0}")]
    Storage(String),
}

impl LedgerError {
    /// Whether the same request may succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::Timeout | LedgerError::Unavailable(_))
    }
}

// ============================================================================
// LEDGER GATEWAY TRAIT
// ============================================================================

/// Remote CRUD service over transaction records
#[async_trait]
pub trait LedgerGateway: Send + Sync {
    /// Store a new record and return it as persisted
    async fn create_transaction(&self, record: TransactionRecord) -> Result<TransactionRecord, LedgerError>;

    /// All records for a deed, oldest first
    async fn transactions_by_deed(&self, deed_id: &str) -> Result<Vec<TransactionRecord>, LedgerError>;

    /// Move a record to a new status
    async fn update_transaction_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> Result<TransactionRecord, LedgerError>;

    /// All records with a given type and status
    async fn transactions_by_type_and_status(
        &self,
        kind: TransactionType,
        status: TransactionStatus,
    ) -> Result<Vec<TransactionRecord>, LedgerError>;
}

// ============================================================================
// MOCK LEDGER GATEWAY
// ============================================================================

/// In-memory ledger for tests and simulations
pub struct MockLedgerGateway {
    records: Mutex<Vec<TransactionRecord>>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    reject_writes: AtomicBool,
    delay_ms: u64,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
}

impl MockLedgerGateway {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            reject_writes: AtomicBool::new(false),
            delay_ms: 0,
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Add a delay before responding
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Seed a record directly, bypassing call counters
    pub fn insert(&self, record: TransactionRecord) {
        self.lock().push(record);
    }

    /// Make every read fail as unavailable
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail as unavailable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every write fail as rejected
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Snapshot of all stored records
    pub fn records(&self) -> Vec<TransactionRecord> {
        self.lock().clone()
    }

    pub fn get(&self, id: &TransactionId) -> Option<TransactionRecord> {
        self.lock().iter().find(|r| &r.id == id).cloned()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TransactionRecord>> {
        // A poisoned lock only means a test panicked mid-write
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn before_call(&self, write: bool) -> Result<(), LedgerError> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        if write {
            if self.reject_writes.load(Ordering::SeqCst) {
                return Err(LedgerError::Rejected("mock rejection".into()));
            }
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(LedgerError::Unavailable("mock write failure".into()));
            }
        } else if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock read failure".into()));
        }
        Ok(())
    }
}

impl Default for MockLedgerGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerGateway for MockLedgerGateway {
    async fn create_transaction(&self, record: TransactionRecord) -> Result<TransactionRecord, LedgerError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call(true).await?;
        record
            .validate()
            .map_err(|e| LedgerError::Rejected(e.to_string()))?;

        let mut records = self.lock();
        if records.iter().any(|r| r.id == record.id) {
            return Err(LedgerError::Rejected(format!("duplicate id {}", record.id)));
        }
        records.push(record.clone());
        Ok(record)
    }

    async fn transactions_by_deed(&self, deed_id: &str) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.before_call(false).await?;
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.deed_id == deed_id)
            .cloned()
            .collect())
    }

    async fn update_transaction_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> Result<TransactionRecord, LedgerError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call(true).await?;

        let mut records = self.lock();
        let record = records
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        if record.status == status {
            return Ok(record.clone());
        }
        if !record.status.can_transition_to(status) {
            return Err(LedgerError::Rejected(format!(
                "cannot move {} from {} to {}",
                id, record.status, status
            )));
        }
        record.status = status;
        Ok(record.clone())
    }

    async fn transactions_by_type_and_status(
        &self,
        kind: TransactionType,
        status: TransactionStatus,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        self.before_call(false).await?;
        Ok(self
            .lock()
            .iter()
            .filter(|r| r.kind == kind && r.status == status)
            .cloned()
            .collect())
    }
}
