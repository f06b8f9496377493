// Escrow Gateway - Read/write access to on-chain escrow contracts
//
// The contract itself is opaque. Reads return typed views, writes return a
// receipt or the revert reason. Every call may time out or fail on the wire.

use super::payload::parse_address_list;
use super::{EscrowDetails, EscrowSnapshot, EscrowStatusFlags, TxReceipt};
use crate::identity::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ESCROW ERROR
// ============================================================================

/// Errors surfaced by escrow reads and writes
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EscrowError {
    #[error("Escrow call timed out")]
    Timeout,

    #[error("Escrow RPC unavailable: {0}")]
    Unavailable(String),

    #[error("Escrow transaction rejected: {0}")]
    Rejected(String),

    #[error("Escrow not found: {0}")]
    NotFound(Address),

    #[error("Malformed escrow response: {0}")]
    MalformedResponse(String),
}

impl EscrowError {
    /// Whether the same call may succeed if retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, EscrowError::Timeout | EscrowError::Unavailable(_))
    }
}

// ============================================================================
// ESCROW GATEWAY TRAIT
// ============================================================================

#[async_trait]
pub trait EscrowGateway: Send + Sync {
    /// Seller, buyer, price and token of an escrow
    async fn escrow_details(&self, escrow: &Address) -> Result<EscrowDetails, EscrowError>;

    /// Deposit and finalization flags of an escrow
    async fn escrow_status(&self, escrow: &Address) -> Result<EscrowStatusFlags, EscrowError>;

    /// Escrows in which a user is buyer or seller
    async fn user_escrows(&self, user: &Address) -> Result<Vec<Address>, EscrowError>;

    /// Submit the buyer's payment
    async fn buyer_deposit_payment(&self, escrow: &Address, price: Decimal) -> Result<TxReceipt, EscrowError>;

    /// Release custody to both sides
    async fn finalize_escrow(&self, escrow: &Address) -> Result<TxReceipt, EscrowError>;
}

/// Run a gateway call under a deadline
pub async fn with_timeout<T, F>(deadline: Duration, call: F) -> Result<T, EscrowError>
where
    F: Future<Output = Result<T, EscrowError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(EscrowError::Timeout),
    }
}

/// Fetch details and status concurrently and join them into a snapshot
pub async fn fetch_snapshot(
    gateway: &dyn EscrowGateway,
    escrow: &Address,
    deadline: Duration,
) -> Result<EscrowSnapshot, EscrowError> {
    let (details, status) = tokio::try_join!(
        with_timeout(deadline, gateway.escrow_details(escrow)),
        with_timeout(deadline, gateway.escrow_status(escrow)),
    )?;
    status.validate()?;
    Ok(EscrowSnapshot::from_parts(*escrow, details, status))
}

// ============================================================================
// JSON RPC ADAPTER
// ============================================================================

/// Raw contract access returning untyped JSON payloads
#[async_trait]
pub trait EscrowRpc: Send + Sync {
    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, EscrowError>;
}

/// Escrow gateway that validates every raw payload at the boundary
pub struct JsonEscrowGateway<R: EscrowRpc> {
    rpc: R,
}

impl<R: EscrowRpc> JsonEscrowGateway<R> {
    pub fn new(rpc: R) -> Self {
        Self { rpc }
    }

    pub fn rpc(&self) -> &R {
        &self.rpc
    }
}

#[async_trait]
impl<R: EscrowRpc> EscrowGateway for JsonEscrowGateway<R> {
    async fn escrow_details(&self, escrow: &Address) -> Result<EscrowDetails, EscrowError> {
        let raw = self
            .rpc
            .call("getEscrowDetails", vec![Value::String(escrow.to_string())])
            .await?;
        EscrowDetails::from_json(&raw)
    }

    async fn escrow_status(&self, escrow: &Address) -> Result<EscrowStatusFlags, EscrowError> {
        let raw = self
            .rpc
            .call("getEscrowStatus", vec![Value::String(escrow.to_string())])
            .await?;
        EscrowStatusFlags::from_json(&raw)
    }

    async fn user_escrows(&self, user: &Address) -> Result<Vec<Address>, EscrowError> {
        let raw = self
            .rpc
            .call("getUserEscrows", vec![Value::String(user.to_string())])
            .await?;
        parse_address_list(&raw)
    }

    async fn buyer_deposit_payment(&self, escrow: &Address, price: Decimal) -> Result<TxReceipt, EscrowError> {
        let raw = self
            .rpc
            .call(
                "buyerDepositPayment",
                vec![Value::String(escrow.to_string()), Value::String(price.to_string())],
            )
            .await?;
        TxReceipt::from_json(&raw)
    }

    async fn finalize_escrow(&self, escrow: &Address) -> Result<TxReceipt, EscrowError> {
        let raw = self
            .rpc
            .call("finalizeEscrow", vec![Value::String(escrow.to_string())])
            .await?;
        TxReceipt::from_json(&raw)
    }
}

// ============================================================================
// MOCK ESCROW GATEWAY
// ============================================================================

#[derive(Clone, Debug)]
struct MockEscrow {
    details: EscrowDetails,
    status: EscrowStatusFlags,
}

/// In-memory escrow chain for tests and simulations
pub struct MockEscrowGateway {
    escrows: Mutex<HashMap<Address, MockEscrow>>,
    /// Addresses whose reads fail
    failing: Mutex<HashSet<Address>>,
    /// Addresses whose reads stall past any sane deadline
    stalled: Mutex<HashSet<Address>>,
    index_available: AtomicBool,
    fail_writes: AtomicBool,
    delay_ms: u64,
    tx_counter: AtomicUsize,
    deposits: Mutex<Vec<(Address, Decimal)>>,
    finalize_calls: AtomicUsize,
}

impl MockEscrowGateway {
    pub fn new() -> Self {
        Self {
            escrows: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            stalled: Mutex::new(HashSet::new()),
            index_available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            delay_ms: 0,
            tx_counter: AtomicUsize::new(0),
            deposits: Mutex::new(Vec::new()),
            finalize_calls: AtomicUsize::new(0),
        }
    }

    /// Add a delay before every response
    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Deploy a new escrow and return its address
    pub fn create_escrow(&self, seller: Address, buyer: Address, price: Decimal, token_id: &str) -> Address {
        let address = Address::random();
        let escrow = MockEscrow {
            details: EscrowDetails {
                seller,
                buyer,
                price,
                token_id: token_id.to_string(),
            },
            status: EscrowStatusFlags::default(),
        };
        lock(&self.escrows).insert(address, escrow);
        address
    }

    /// Record the seller's asset deposit (done outside the coordinator)
    pub fn seller_deposit(&self, escrow: &Address) {
        if let Some(e) = lock(&self.escrows).get_mut(escrow) {
            e.status.is_seller_deposited = true;
        }
    }

    /// Overwrite an escrow's flags directly
    pub fn set_status(&self, escrow: &Address, status: EscrowStatusFlags) {
        if let Some(e) = lock(&self.escrows).get_mut(escrow) {
            e.status = status;
        }
    }

    pub fn set_price(&self, escrow: &Address, price: Decimal) {
        if let Some(e) = lock(&self.escrows).get_mut(escrow) {
            e.details.price = price;
        }
    }

    /// Make reads of one escrow fail
    pub fn fail_escrow(&self, escrow: Address) {
        lock(&self.failing).insert(escrow);
    }

    /// Make reads of one escrow hang
    pub fn stall_escrow(&self, escrow: Address) {
        lock(&self.stalled).insert(escrow);
    }

    pub fn heal_escrow(&self, escrow: &Address) {
        lock(&self.failing).remove(escrow);
        lock(&self.stalled).remove(escrow);
    }

    /// Toggle the per-user escrow index
    pub fn set_index_available(&self, available: bool) {
        self.index_available.store(available, Ordering::SeqCst);
    }

    /// Make writes fail as unavailable
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn status_of(&self, escrow: &Address) -> Option<EscrowStatusFlags> {
        lock(&self.escrows).get(escrow).map(|e| e.status)
    }

    /// Every (escrow, price) pair submitted as a buyer deposit
    pub fn deposits(&self) -> Vec<(Address, Decimal)> {
        lock(&self.deposits).clone()
    }

    pub fn finalize_calls(&self) -> usize {
        self.finalize_calls.load(Ordering::SeqCst)
    }

    async fn before_read(&self, escrow: &Address) -> Result<(), EscrowError> {
        self.delay().await;
        let failing = lock(&self.failing).contains(escrow);
        let stalled = lock(&self.stalled).contains(escrow);
        if failing {
            return Err(EscrowError::Unavailable(format!("mock failure for {}", escrow)));
        }
        if stalled {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn delay(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }

    fn next_tx(&self) -> TxReceipt {
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        TxReceipt::new(format!("0x{:064x}", n + 1))
    }
}

impl Default for MockEscrowGateway {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

#[async_trait]
impl EscrowGateway for MockEscrowGateway {
    async fn escrow_details(&self, escrow: &Address) -> Result<EscrowDetails, EscrowError> {
        self.before_read(escrow).await?;
        lock(&self.escrows)
            .get(escrow)
            .map(|e| e.details.clone())
            .ok_or(EscrowError::NotFound(*escrow))
    }

    async fn escrow_status(&self, escrow: &Address) -> Result<EscrowStatusFlags, EscrowError> {
        self.before_read(escrow).await?;
        lock(&self.escrows)
            .get(escrow)
            .map(|e| e.status)
            .ok_or(EscrowError::NotFound(*escrow))
    }

    async fn user_escrows(&self, user: &Address) -> Result<Vec<Address>, EscrowError> {
        self.delay().await;
        if !self.index_available.load(Ordering::SeqCst) {
            return Err(EscrowError::Unavailable("escrow index offline".into()));
        }
        let mut found: Vec<Address> = lock(&self.escrows)
            .iter()
            .filter(|(_, e)| &e.details.seller == user || &e.details.buyer == user)
            .map(|(addr, _)| *addr)
            .collect();
        found.sort();
        Ok(found)
    }

    async fn buyer_deposit_payment(&self, escrow: &Address, price: Decimal) -> Result<TxReceipt, EscrowError> {
        self.delay().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EscrowError::Unavailable("mock write failure".into()));
        }
        lock(&self.deposits).push((*escrow, price));

        let mut escrows = lock(&self.escrows);
        let e = escrows.get_mut(escrow).ok_or(EscrowError::NotFound(*escrow))?;
        if !e.status.is_seller_deposited {
            return Err(EscrowError::Rejected("seller has not deposited".into()));
        }
        if e.status.is_buyer_deposited {
            return Err(EscrowError::Rejected("buyer already deposited".into()));
        }
        if price != e.details.price {
            return Err(EscrowError::Rejected(format!(
                "incorrect payment: expected {}, got {}",
                e.details.price, price
            )));
        }
        e.status.is_buyer_deposited = true;
        drop(escrows);
        Ok(self.next_tx())
    }

    async fn finalize_escrow(&self, escrow: &Address) -> Result<TxReceipt, EscrowError> {
        self.finalize_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(EscrowError::Unavailable("mock write failure".into()));
        }

        let mut escrows = lock(&self.escrows);
        let e = escrows.get_mut(escrow).ok_or(EscrowError::NotFound(*escrow))?;
        if e.status.is_finalized {
            return Err(EscrowError::Rejected("already finalized".into()));
        }
        if !(e.status.is_seller_deposited && e.status.is_buyer_deposited) {
            return Err(EscrowError::Rejected("deposits incomplete".into()));
        }
        e.status.is_finalized = true;
        drop(escrows);
        Ok(self.next_tx())
    }
}
