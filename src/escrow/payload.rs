// Payload validation - Turns raw RPC responses into typed escrow views
//
// Anything missing, mistyped, or contradicting the escrow invariants is
// rejected with MalformedResponse instead of flowing through as defaults.

use super::{EscrowDetails, EscrowError, EscrowStatusFlags, TxReceipt};
use crate::identity::Address;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value, EscrowError> {
    value
        .get(name)
        .filter(|v| !v.is_null())
        .ok_or_else(|| EscrowError::MalformedResponse(format!("missing field '{}'", name)))
}

fn address_field(value: &Value, name: &str) -> Result<Address, EscrowError> {
    let raw = field(value, name)?
        .as_str()
        .ok_or_else(|| EscrowError::MalformedResponse(format!("'{}' is not a string", name)))?;
    Address::parse(raw).map_err(|e| EscrowError::MalformedResponse(format!("'{}': {}", name, e)))
}

fn bool_field(value: &Value, name: &str) -> Result<bool, EscrowError> {
    field(value, name)?
        .as_bool()
        .ok_or_else(|| EscrowError::MalformedResponse(format!("'{}' is not a bool", name)))
}

/// Prices arrive either as decimal strings or as JSON numbers
fn decimal_field(value: &Value, name: &str) -> Result<Decimal, EscrowError> {
    let parsed = match field(value, name)? {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    };
    parsed.ok_or_else(|| EscrowError::MalformedResponse(format!("'{}' is not a decimal", name)))
}

/// Token ids arrive either as strings or as integers
fn token_field(value: &Value, name: &str) -> Result<String, EscrowError> {
    match field(value, name)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(EscrowError::MalformedResponse(format!(
            "'{}' is not a token id",
            name
        ))),
    }
}

impl EscrowDetails {
    /// Parse `{seller, buyer, price, tokenId}`
    pub fn from_json(value: &Value) -> Result<Self, EscrowError> {
        let details = Self {
            seller: address_field(value, "seller")?,
            buyer: address_field(value, "buyer")?,
            price: decimal_field(value, "price")?,
            token_id: token_field(value, "tokenId")?,
        };
        if details.price.is_sign_negative() && !details.price.is_zero() {
            return Err(EscrowError::MalformedResponse(format!(
                "negative price {}",
                details.price
            )));
        }
        Ok(details)
    }
}

impl EscrowStatusFlags {
    /// Parse `{isSellerDeposited, isBuyerDeposited, isFinalized}`
    pub fn from_json(value: &Value) -> Result<Self, EscrowError> {
        let flags = Self::new(
            bool_field(value, "isSellerDeposited")?,
            bool_field(value, "isBuyerDeposited")?,
            bool_field(value, "isFinalized")?,
        );
        flags.validate()?;
        Ok(flags)
    }
}

impl TxReceipt {
    /// Parse `{success: true, txHash}` or `{success: false, error}`
    pub fn from_json(value: &Value) -> Result<Self, EscrowError> {
        if bool_field(value, "success")? {
            let hash = field(value, "txHash")?
                .as_str()
                .ok_or_else(|| EscrowError::MalformedResponse("'txHash' is not a string".into()))?;
            Ok(TxReceipt::new(hash))
        } else {
            let reason = value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("transaction reverted");
            Err(EscrowError::Rejected(reason.to_string()))
        }
    }
}

/// Parse a list of escrow addresses
pub fn parse_address_list(value: &Value) -> Result<Vec<Address>, EscrowError> {
    let items = value
        .as_array()
        .ok_or_else(|| EscrowError::MalformedResponse("escrow list is not an array".into()))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| EscrowError::MalformedResponse("escrow address is not a string".into()))
                .and_then(|s| {
                    Address::parse(s).map_err(|e| EscrowError::MalformedResponse(e.to_string()))
                })
        })
        .collect()
}
