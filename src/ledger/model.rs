// Transaction Record - The off-chain ledger's view of a purchase
//
// Records are owned by the ledger service. The coordinator only reads them,
// creates intents, and moves pending records to a terminal status.

use crate::identity::Address;
use crate::ledger::LedgerError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ============================================================================
// TRANSACTION ID
// ============================================================================

/// Identifier assigned to a ledger record
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate a random transaction ID
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(hex::encode(bytes))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TRANSACTION TYPE / STATUS
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Gift,
    OpenMarket,
    DirectTransfer,
    Closed,
    Init,
    SaleTransfer,
    EscrowSale,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Gift => "gift",
            TransactionType::OpenMarket => "open_market",
            TransactionType::DirectTransfer => "direct_transfer",
            TransactionType::Closed => "closed",
            TransactionType::Init => "init",
            TransactionType::SaleTransfer => "sale_transfer",
            TransactionType::EscrowSale => "escrow_sale",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    /// Completed and failed records are never mutated again
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Failed)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// TRANSACTION RECORD
// ============================================================================

/// A ledger record as exchanged with the ledger service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub deed_id: String,
    pub from: Address,
    pub to: Address,
    pub amount: Decimal,
    pub share: u8,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub status: TransactionStatus,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub blockchain_identification: Option<Address>,
    pub date: DateTime<Utc>,
}

/// The ledger stores "no escrow" as an empty string
fn empty_as_none<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Address>, D::Error> {
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Address::parse(s).map(Some).map_err(serde::de::Error::custom),
    }
}

impl TransactionRecord {
    /// Create a new pending record with a fresh id and the current time
    pub fn new(
        deed_id: &str,
        from: Address,
        to: Address,
        amount: Decimal,
        share: u8,
        kind: TransactionType,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            deed_id: deed_id.to_string(),
            from,
            to,
            amount,
            share,
            kind,
            status: TransactionStatus::Pending,
            blockchain_identification: None,
            date: Utc::now(),
        }
    }

    /// A buyer's purchase intent: buyer -> seller, no escrow yet
    pub fn purchase_intent(deed_id: &str, buyer: Address, seller: Address, amount: Decimal, share: u8) -> Self {
        Self::new(deed_id, buyer, seller, amount, share, TransactionType::DirectTransfer)
    }

    /// A seller's escrow sale record: seller -> buyer, bound to an escrow contract
    pub fn escrow_sale(
        deed_id: &str,
        seller: Address,
        buyer: Address,
        amount: Decimal,
        share: u8,
        escrow: Address,
    ) -> Self {
        Self::new(deed_id, seller, buyer, amount, share, TransactionType::EscrowSale).with_escrow(escrow)
    }

    pub fn with_escrow(mut self, escrow: Address) -> Self {
        self.blockchain_identification = Some(escrow);
        self
    }

    pub fn with_status(mut self, status: TransactionStatus) -> Self {
        self.status = status;
        self
    }

    /// An `escrow_sale` record with a contract address
    pub fn is_materialized_escrow(&self) -> bool {
        self.kind == TransactionType::EscrowSale && self.blockchain_identification.is_some()
    }

    /// A `direct_transfer` record without a contract address
    pub fn is_purchase_intent(&self) -> bool {
        self.kind == TransactionType::DirectTransfer && self.blockchain_identification.is_none()
    }

    pub fn is_full_ownership(&self) -> bool {
        self.share == 100
    }

    /// Check the field invariants the coordinator relies on
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.deed_id.trim().is_empty() {
            return Err(LedgerError::MalformedResponse("empty deedId".into()));
        }
        if !(1..=100).contains(&self.share) {
            return Err(LedgerError::MalformedResponse(format!(
                "share {} outside 1..=100",
                self.share
            )));
        }
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(LedgerError::MalformedResponse(format!(
                "negative amount {}",
                self.amount
            )));
        }
        Ok(())
    }

    /// Parse and validate a raw ledger payload
    pub fn from_json(value: &serde_json::Value) -> Result<Self, LedgerError> {
        let record: TransactionRecord = serde_json::from_value(value.clone())
            .map_err(|e| LedgerError::MalformedResponse(e.to_string()))?;
        record.validate()?;
        Ok(record)
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}
