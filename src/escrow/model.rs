// Escrow Model - Read-only views of a single on-chain escrow

use crate::identity::Address;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::EscrowError;

/// Immutable terms of an escrow
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowDetails {
    pub seller: Address,
    pub buyer: Address,
    pub price: Decimal,
    /// Deed token id, or the share-token identifier for fractional sales
    pub token_id: String,
}

/// Custody flags reported by the contract
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowStatusFlags {
    pub is_seller_deposited: bool,
    pub is_buyer_deposited: bool,
    pub is_finalized: bool,
}

impl EscrowStatusFlags {
    pub fn new(is_seller_deposited: bool, is_buyer_deposited: bool, is_finalized: bool) -> Self {
        Self {
            is_seller_deposited,
            is_buyer_deposited,
            is_finalized,
        }
    }

    /// A finalized escrow must have both deposits
    pub fn validate(&self) -> Result<(), EscrowError> {
        if self.is_finalized && !(self.is_seller_deposited && self.is_buyer_deposited) {
            return Err(EscrowError::MalformedResponse(
                "escrow reported finalized without both deposits".into(),
            ));
        }
        Ok(())
    }
}

/// Details and status of one escrow as read at one point in time
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowSnapshot {
    pub address: Address,
    pub seller: Address,
    pub buyer: Address,
    pub price: Decimal,
    pub token_id: String,
    pub is_seller_deposited: bool,
    pub is_buyer_deposited: bool,
    pub is_finalized: bool,
}

impl EscrowSnapshot {
    pub fn from_parts(address: Address, details: EscrowDetails, status: EscrowStatusFlags) -> Self {
        Self {
            address,
            seller: details.seller,
            buyer: details.buyer,
            price: details.price,
            token_id: details.token_id,
            is_seller_deposited: status.is_seller_deposited,
            is_buyer_deposited: status.is_buyer_deposited,
            is_finalized: status.is_finalized,
        }
    }

    pub fn status(&self) -> EscrowStatusFlags {
        EscrowStatusFlags::new(
            self.is_seller_deposited,
            self.is_buyer_deposited,
            self.is_finalized,
        )
    }
}

/// Result of a write accepted by the chain
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub tx_hash: String,
}

impl TxReceipt {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
        }
    }
}
