use super::PurchaseStep;
use crate::escrow::EscrowError;
use crate::fee::FeeError;
use crate::identity::Address;
use crate::ledger::LedgerError;
use crate::resolver::Role;
use thiserror::Error;

/// Errors returned by purchase commands and queries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PurchaseError {
    #[error("Illegal transition: requires {required}, observed {observed}")]
    IllegalTransition {
        required: PurchaseStep,
        observed: PurchaseStep,
    },

    #[error("Command requires the {required} role, acting as {actual}")]
    WrongRole { required: Role, actual: Role },

    #[error("Escrow mismatch: purchase is governed by {expected}, got {actual}")]
    EscrowMismatch { expected: Address, actual: Address },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid share: {0} (must be 1..=100)")]
    InvalidShare(u8),

    #[error("Gateway timed out: {0}")]
    GatewayTimeout(String),

    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Gateway rejected request: {0}")]
    GatewayRejected(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PurchaseError {
    /// Timeouts and network failures may succeed on retry; nothing else will
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PurchaseError::GatewayTimeout(_) | PurchaseError::GatewayUnavailable(_)
        )
    }
}

impl From<EscrowError> for PurchaseError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::Timeout => PurchaseError::GatewayTimeout("escrow gateway".into()),
            EscrowError::Unavailable(msg) => PurchaseError::GatewayUnavailable(msg),
            EscrowError::Rejected(msg) => PurchaseError::GatewayRejected(msg),
            EscrowError::NotFound(addr) => PurchaseError::GatewayRejected(format!("escrow {} not found", addr)),
            EscrowError::MalformedResponse(msg) => PurchaseError::MalformedResponse(msg),
        }
    }
}

impl From<LedgerError> for PurchaseError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Timeout => PurchaseError::GatewayTimeout("ledger gateway".into()),
            LedgerError::Unavailable(msg) | LedgerError::Storage(msg) => PurchaseError::GatewayUnavailable(msg),
            LedgerError::Rejected(msg) => PurchaseError::GatewayRejected(msg),
            LedgerError::NotFound(id) => PurchaseError::GatewayRejected(format!("transaction {} not found", id)),
            LedgerError::MalformedResponse(msg) => PurchaseError::MalformedResponse(msg),
        }
    }
}

impl From<FeeError> for PurchaseError {
    fn from(err: FeeError) -> Self {
        PurchaseError::InvalidAmount(err.to_string())
    }
}
