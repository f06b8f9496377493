// Purchase Step - Where a purchase stands, derived from the latest snapshot

use crate::escrow::EscrowSnapshot;
use crate::resolver::Role;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol step of a purchase. Never stored, always derived.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStep {
    /// A snapshot refresh is in flight (or the last one failed)
    Checking,
    /// No escrow governs the purchase yet
    NoEscrow,
    /// Escrow exists, seller has not deposited the asset
    Ready,
    /// Seller deposited, waiting for the buyer's payment
    Deposit,
    /// Both deposited, waiting for finalization
    Finalize,
    /// Finalized on-chain
    Complete,
}

/// Classify a snapshot; `None` means no escrow
pub fn classify(snapshot: Option<&EscrowSnapshot>) -> PurchaseStep {
    match snapshot {
        None => PurchaseStep::NoEscrow,
        Some(s) if s.is_finalized => PurchaseStep::Complete,
        Some(s) if !s.is_seller_deposited => PurchaseStep::Ready,
        Some(s) if !s.is_buyer_deposited => PurchaseStep::Deposit,
        Some(_) => PurchaseStep::Finalize,
    }
}

impl PurchaseStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStep::Checking => "checking",
            PurchaseStep::NoEscrow => "no_escrow",
            PurchaseStep::Ready => "ready",
            PurchaseStep::Deposit => "deposit",
            PurchaseStep::Finalize => "finalize",
            PurchaseStep::Complete => "complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PurchaseStep::Complete)
    }

    /// Whether the given side has to act next
    pub fn awaits(&self, role: Role) -> bool {
        match (self, role) {
            (PurchaseStep::NoEscrow, Role::Buyer) => true,
            (PurchaseStep::Ready, Role::Seller) => true,
            (PurchaseStep::Deposit, Role::Buyer) => true,
            (PurchaseStep::Finalize, _) => true,
            _ => false,
        }
    }

    /// Human-readable status for one side of the purchase
    pub fn status_line(&self, role: Role) -> &'static str {
        match (self, role) {
            (PurchaseStep::Checking, _) => "checking escrow status",
            (PurchaseStep::NoEscrow, Role::Buyer) => "no escrow yet, send a purchase request",
            (PurchaseStep::NoEscrow, Role::Seller) => "no escrow yet",
            (PurchaseStep::Ready, Role::Buyer) => "waiting for the seller's deposit",
            (PurchaseStep::Ready, Role::Seller) => "waiting for your deposit",
            (PurchaseStep::Deposit, Role::Buyer) => "waiting for your deposit",
            (PurchaseStep::Deposit, Role::Seller) => "waiting for the buyer's payment",
            (PurchaseStep::Finalize, _) => "ready to finalize",
            (PurchaseStep::Complete, _) => "purchase complete",
        }
    }
}

impl fmt::Display for PurchaseStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
