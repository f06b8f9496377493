// LedgerStore - Local transaction ledger persisted with sled
//
// Implements the ledger gateway for single-process deployments and the CLI:
// - Records stored as JSON under their id
// - Secondary index by deed id for per-deed listing

use crate::ledger::{
    LedgerError, LedgerGateway, TransactionId, TransactionRecord, TransactionStatus, TransactionType,
};
use async_trait::async_trait;
use std::path::Path;
use thiserror::Error;

/// Key prefixes for organizing data
mod keys {
    pub const RECORD_PREFIX: &[u8] = b"ledger:tx:";
    pub const DEED_INDEX_PREFIX: &[u8] = b"ledger:deed:";
}

fn record_key(id: &TransactionId) -> Vec<u8> {
    [keys::RECORD_PREFIX, id.as_str().as_bytes()].concat()
}

fn deed_prefix(deed_id: &str) -> Vec<u8> {
    [keys::DEED_INDEX_PREFIX, deed_id.as_bytes(), b":"].concat()
}

fn deed_key(deed_id: &str, id: &TransactionId) -> Vec<u8> {
    [deed_prefix(deed_id).as_slice(), id.as_str().as_bytes()].concat()
}

/// Errors from storage operations
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to open database: {0}")]
    OpenFailed(String),

    #[error("Database operation failed: {0}")]
    DatabaseError(String),

    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        StoreError::DatabaseError(err.to_string())
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DeserializationFailed(msg) => LedgerError::MalformedResponse(msg),
            other => LedgerError::Storage(other.to_string()),
        }
    }
}

/// Statistics about the storage
#[derive(Clone, Debug)]
pub struct StorageStats {
    /// Number of stored transaction records
    pub record_count: usize,
    /// Approximate disk size in bytes
    pub disk_size_bytes: u64,
}

/// Persistent transaction ledger
///
/// Uses sled for crash-safe, embedded storage.
/// All writes are atomic and durable after flush.
pub struct LedgerStore {
    db: sled::Db,
}

impl LedgerStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Open a throwaway store that lives only in memory
    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StoreError::OpenFailed(e.to_string()))?;
        Ok(Self { db })
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.db.is_empty())
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db
            .flush()
            .map_err(|e| StoreError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Get storage statistics
    pub fn stats(&self) -> Result<StorageStats, StoreError> {
        Ok(StorageStats {
            record_count: self.db.scan_prefix(keys::RECORD_PREFIX).count(),
            disk_size_bytes: self.db.size_on_disk().unwrap_or(0),
        })
    }

    // ========================================================================
    // RECORD PERSISTENCE
    // ========================================================================

    /// Save a record, replacing any record with the same id
    pub fn save_record(&self, record: &TransactionRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(|e| StoreError::SerializationFailed(e.to_string()))?;
        self.db.insert(record_key(&record.id), bytes)?;
        self.db.insert(deed_key(&record.deed_id, &record.id), record.id.as_str().as_bytes())?;
        Ok(())
    }

    /// Load a record by id
    pub fn load_record(&self, id: &TransactionId) -> Result<Option<TransactionRecord>, StoreError> {
        match self.db.get(record_key(id))? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    /// All records for a deed, oldest first
    pub fn records_for_deed(&self, deed_id: &str) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.db.scan_prefix(deed_prefix(deed_id)) {
            let (_, id_bytes) = entry?;
            let id = TransactionId::new(String::from_utf8_lossy(&id_bytes).into_owned());
            if let Some(record) = self.load_record(&id)? {
                records.push(record);
            }
        }
        records.sort_by_key(|r| r.date);
        Ok(records)
    }

    /// Every stored record, oldest first
    pub fn all_records(&self) -> Result<Vec<TransactionRecord>, StoreError> {
        let mut records = Vec::new();
        for entry in self.db.scan_prefix(keys::RECORD_PREFIX) {
            let (_, bytes) = entry?;
            records.push(decode(&bytes)?);
        }
        records.sort_by_key(|r| r.date);
        Ok(records)
    }
}

fn decode(bytes: &[u8]) -> Result<TransactionRecord, StoreError> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| StoreError::DeserializationFailed(e.to_string()))?;
    TransactionRecord::from_json(&value).map_err(|e| StoreError::DeserializationFailed(e.to_string()))
}

#[async_trait]
impl LedgerGateway for LedgerStore {
    async fn create_transaction(&self, record: TransactionRecord) -> Result<TransactionRecord, LedgerError> {
        record.validate().map_err(|e| LedgerError::Rejected(e.to_string()))?;
        if self.load_record(&record.id)?.is_some() {
            return Err(LedgerError::Rejected(format!("duplicate id {}", record.id)));
        }
        self.save_record(&record)?;
        self.flush()?;
        Ok(record)
    }

    async fn transactions_by_deed(&self, deed_id: &str) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self.records_for_deed(deed_id)?)
    }

    async fn update_transaction_status(
        &self,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> Result<TransactionRecord, LedgerError> {
        let mut record = self
            .load_record(id)?
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;
        if record.status == status {
            return Ok(record);
        }
        if !record.status.can_transition_to(status) {
            return Err(LedgerError::Rejected(format!(
                "cannot move {} from {} to {}",
                id, record.status, status
            )));
        }
        record.status = status;
        self.save_record(&record)?;
        self.flush()?;
        Ok(record)
    }

    async fn transactions_by_type_and_status(
        &self,
        kind: TransactionType,
        status: TransactionStatus,
    ) -> Result<Vec<TransactionRecord>, LedgerError> {
        Ok(self
            .all_records()?
            .into_iter()
            .filter(|r| r.kind == kind && r.status == status)
            .collect())
    }
}
