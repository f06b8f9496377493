// Resolver types - Which escrow governs a purchase, and where we found it

use crate::escrow::{EscrowError, EscrowSnapshot};
use crate::identity::Address;
use crate::ledger::{TransactionId, TransactionRecord, TransactionStatus, TransactionType};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Side of the purchase a party is on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Buyer,
    Seller,
}

impl Role {
    /// The address on this role's side of an escrow
    pub fn side_of(&self, snapshot: &EscrowSnapshot) -> Address {
        match self {
            Role::Buyer => snapshot.buyer,
            Role::Seller => snapshot.seller,
        }
    }

    /// The address on the other side of an escrow
    pub fn counterpart_of(&self, snapshot: &EscrowSnapshot) -> Address {
        match self {
            Role::Buyer => snapshot.seller,
            Role::Seller => snapshot.buyer,
        }
    }

    /// Escrow-sale records run seller -> buyer; returns (party side, counterpart side)
    pub fn sides_of_record(&self, record: &TransactionRecord) -> (Address, Address) {
        match self {
            Role::Buyer => (record.to, record.from),
            Role::Seller => (record.from, record.to),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Buyer => f.write_str("buyer"),
            Role::Seller => f.write_str("seller"),
        }
    }
}

/// The deed a purchase is about
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeedRef {
    /// Ledger key
    pub deed_id: String,
    /// Token id of the full deed
    pub token_id: String,
    /// Token id used for fractional shares of the deed, if any
    pub share_token_id: Option<String>,
}

impl DeedRef {
    pub fn new(deed_id: &str, token_id: &str) -> Self {
        Self {
            deed_id: deed_id.to_string(),
            token_id: token_id.to_string(),
            share_token_id: None,
        }
    }

    pub fn with_share_token(mut self, share_token_id: &str) -> Self {
        self.share_token_id = Some(share_token_id.to_string());
        self
    }

    /// Whether an escrow's token belongs to this deed
    pub fn matches_token(&self, token_id: &str) -> bool {
        self.token_id == token_id || self.share_token_id.as_deref() == Some(token_id)
    }
}

/// Where the record paired with an escrow came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordOrigin {
    /// An `escrow_sale` record stored in the ledger
    Ledger,
    /// Built from on-chain data; the ledger has no record for this escrow
    Synthetic,
}

/// An escrow snapshot paired with the record that introduced it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolvedEscrow {
    pub snapshot: EscrowSnapshot,
    pub record: TransactionRecord,
    pub origin: RecordOrigin,
}

impl ResolvedEscrow {
    pub fn from_ledger(snapshot: EscrowSnapshot, record: TransactionRecord) -> Self {
        Self {
            snapshot,
            record,
            origin: RecordOrigin::Ledger,
        }
    }

    /// Pair a snapshot with a record derived from its on-chain terms
    pub fn synthetic(snapshot: EscrowSnapshot, deed_id: Option<&str>) -> Self {
        let record = TransactionRecord {
            id: TransactionId::new(format!("synthetic:{}", snapshot.address)),
            deed_id: deed_id.unwrap_or(snapshot.token_id.as_str()).to_string(),
            from: snapshot.seller,
            to: snapshot.buyer,
            amount: snapshot.price,
            share: 100,
            kind: TransactionType::EscrowSale,
            status: TransactionStatus::Pending,
            blockchain_identification: Some(snapshot.address),
            date: Utc::now(),
        };
        Self {
            snapshot,
            record,
            origin: RecordOrigin::Synthetic,
        }
    }

    pub fn address(&self) -> Address {
        self.snapshot.address
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin == RecordOrigin::Synthetic
    }
}

/// Which discovery strategy produced a result
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// The escrow gateway's per-address index
    Direct,
    /// Pending `escrow_sale` records in the ledger
    LedgerFallback,
    /// Neither strategy found anything
    Nothing,
}

/// Outcome of one resolution, including what failed along the way
#[derive(Clone, Debug)]
pub struct ResolutionReport {
    pub escrows: Vec<ResolvedEscrow>,
    pub strategy: Strategy,
    /// Candidate escrows whose snapshots were fetched
    pub candidates: usize,
    /// Snapshot fetches that failed, excluded from `escrows`
    pub failures: Vec<(Address, EscrowError)>,
    pub index_failed: bool,
    pub ledger_failed: bool,
}

impl ResolutionReport {
    pub(crate) fn new() -> Self {
        Self {
            escrows: Vec::new(),
            strategy: Strategy::Nothing,
            candidates: 0,
            failures: Vec::new(),
            index_failed: false,
            ledger_failed: false,
        }
    }

    /// Some but not necessarily all reads failed
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty()
    }

    /// An empty result may not mean "no escrow": a snapshot read failed,
    /// or both discovery sources were unreachable
    pub fn is_degraded(&self) -> bool {
        self.is_partial() || (self.index_failed && self.ledger_failed)
    }
}
