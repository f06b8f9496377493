// Storage module - PERSISTENCE
// Local sled-backed implementation of the ledger gateway

mod store;

pub use store::{LedgerStore, StorageStats, StoreError};
