// Ledger module - THE OFF-CHAIN RECORD
// Transaction records and the gateway to the service that stores them

mod gateway;
mod model;

pub use gateway::{LedgerError, LedgerGateway, MockLedgerGateway};
pub use model::{TransactionId, TransactionRecord, TransactionStatus, TransactionType};
