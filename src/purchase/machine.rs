// Purchase Machine - Drives one (deed, seller, buyer) purchase through escrow
//
// The step is always re-derived from a fresh snapshot: before a command to
// check legality, and after it so callers never act on an optimistic guess.

use super::owner::{spawn_owner_update, BuyerProfile, OwnerRegistry, OwnerUpdate, OwnerUpdateHandle, OwnerUpdatePolicy};
use super::{classify, PurchaseError, PurchaseStep};
use crate::escrow::{with_timeout, TxReceipt};
use crate::identity::Address;
use crate::ledger::{TransactionRecord, TransactionStatus, TransactionType};
use crate::resolver::{ledger_call, DeedRef, EscrowFilter, EscrowResolver, ResolvedEscrow, Role};
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

// ============================================================================
// COORDINATOR CONFIG
// ============================================================================

/// Configuration for purchase commands
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    /// Deadline for each gateway call, in milliseconds
    pub call_timeout_ms: u64,
    /// Retries for the owner-of-record update after the first attempt
    pub owner_update_retries: u32,
    /// Delay between owner update attempts, in milliseconds
    pub owner_update_retry_delay_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 15_000,
            owner_update_retries: 3,
            owner_update_retry_delay_ms: 2_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    pub fn with_owner_update_retries(mut self, retries: u32) -> Self {
        self.owner_update_retries = retries;
        self
    }

    pub fn with_owner_update_retry_delay_ms(mut self, ms: u64) -> Self {
        self.owner_update_retry_delay_ms = ms;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), PurchaseError> {
        if self.call_timeout_ms == 0 {
            return Err(PurchaseError::InvalidConfig(
                "call_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    fn owner_policy(&self) -> OwnerUpdatePolicy {
        OwnerUpdatePolicy {
            max_retries: self.owner_update_retries,
            retry_delay: Duration::from_millis(self.owner_update_retry_delay_ms),
            timeout: self.call_timeout(),
        }
    }
}

// ============================================================================
// PURCHASE CONTEXT / VIEW / OUTCOMES
// ============================================================================

/// Who is buying what from whom, and which side is acting
#[derive(Clone, Debug)]
pub struct PurchaseContext {
    pub deed: DeedRef,
    pub seller: Address,
    pub buyer: Address,
    pub actor: Role,
    /// Needed for the owner-of-record update on full-deed sales
    pub buyer_profile: Option<BuyerProfile>,
}

impl PurchaseContext {
    pub fn new(deed: DeedRef, seller: Address, buyer: Address, actor: Role) -> Self {
        Self {
            deed,
            seller,
            buyer,
            actor,
            buyer_profile: None,
        }
    }

    pub fn with_buyer_profile(mut self, profile: BuyerProfile) -> Self {
        self.buyer_profile = Some(profile);
        self
    }

    /// Address of the acting party
    pub fn actor_address(&self) -> Address {
        match self.actor {
            Role::Buyer => self.buyer,
            Role::Seller => self.seller,
        }
    }

    fn is_own_intent(&self, record: &TransactionRecord) -> bool {
        record.is_purchase_intent()
            && record.status == TransactionStatus::Pending
            && record.deed_id == self.deed.deed_id
            && record.from == self.buyer
            && record.to == self.seller
    }

    fn is_own_escrow_sale(&self, record: &TransactionRecord, escrow: &Address) -> bool {
        record.kind == TransactionType::EscrowSale
            && record.blockchain_identification.as_ref() == Some(escrow)
            && record.from == self.seller
            && record.to == self.buyer
    }
}

/// The purchase as observed by one refresh
#[derive(Clone, Debug)]
pub struct PurchaseView {
    pub step: PurchaseStep,
    pub escrow: Option<ResolvedEscrow>,
    /// Pending purchase intent, tracked only while no escrow exists
    pub intent: Option<TransactionRecord>,
}

impl PurchaseView {
    pub fn intent_sent(&self) -> bool {
        self.intent.is_some()
    }

    pub fn escrow_address(&self) -> Option<Address> {
        self.escrow.as_ref().map(ResolvedEscrow::address)
    }
}

/// Result of `express_interest`
#[derive(Clone, Debug)]
pub struct InterestOutcome {
    pub record: TransactionRecord,
    /// False when a matching intent already existed
    pub created: bool,
    /// State after the call; `None` if the re-read failed
    pub view: Option<PurchaseView>,
}

/// Result of a successful on-chain write
#[derive(Clone, Debug)]
pub struct CommandOutcome {
    pub receipt: TxReceipt,
    /// State after the call; `None` if the re-read failed
    pub view: Option<PurchaseView>,
}

impl CommandOutcome {
    pub fn step(&self) -> PurchaseStep {
        self.view.as_ref().map_or(PurchaseStep::Checking, |v| v.step)
    }
}

/// Result of a successful finalize
#[derive(Debug)]
pub struct FinalizeOutcome {
    pub receipt: TxReceipt,
    pub view: Option<PurchaseView>,
    /// The ledger record was moved to `completed`
    pub ledger_updated: bool,
    /// Running owner-of-record update, for full-deed sales
    pub owner_update: Option<OwnerUpdateHandle>,
}

impl FinalizeOutcome {
    pub fn step(&self) -> PurchaseStep {
        self.view.as_ref().map_or(PurchaseStep::Checking, |v| v.step)
    }
}

// ============================================================================
// PURCHASE MACHINE
// ============================================================================

pub struct PurchaseMachine {
    context: PurchaseContext,
    resolver: Arc<EscrowResolver>,
    owners: Option<Arc<dyn OwnerRegistry>>,
    config: CoordinatorConfig,
    /// Last observed step
    observed: RwLock<PurchaseStep>,
    /// Escrow seen by an earlier refresh, kept to detect completion
    tracked: Mutex<Option<Address>>,
    /// One command at a time per purchase
    command_lock: tokio::sync::Mutex<()>,
}

impl PurchaseMachine {
    pub fn new(context: PurchaseContext, resolver: Arc<EscrowResolver>, config: CoordinatorConfig) -> Self {
        Self {
            context,
            resolver,
            owners: None,
            config,
            observed: RwLock::new(PurchaseStep::Checking),
            tracked: Mutex::new(None),
            command_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_owner_registry(mut self, owners: Arc<dyn OwnerRegistry>) -> Self {
        self.owners = Some(owners);
        self
    }

    pub fn context(&self) -> &PurchaseContext {
        &self.context
    }

    /// Step seen by the most recent refresh; `Checking` while one is in flight
    pub fn observed_step(&self) -> PurchaseStep {
        *self.observed.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_observed(&self, step: PurchaseStep) {
        *self.observed.write().unwrap_or_else(|e| e.into_inner()) = step;
    }

    fn tracked(&self) -> Option<Address> {
        *self.tracked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_tracked(&self, escrow: Address) {
        *self.tracked.lock().unwrap_or_else(|e| e.into_inner()) = Some(escrow);
    }

    // ========================================================================
    // QUERY
    // ========================================================================

    /// Re-read escrow and ledger state and classify the purchase
    ///
    /// On a failed read the observed step stays `Checking` and the error is
    /// returned for the caller to retry.
    pub async fn refresh(&self) -> Result<PurchaseView, PurchaseError> {
        self.set_observed(PurchaseStep::Checking);

        let filter = EscrowFilter::for_party(self.context.seller, Role::Seller)
            .with_deed(self.context.deed.clone())
            .with_counterpart(self.context.buyer);
        let report = self.resolver.resolve_with_report(&filter).await;

        if let Some(resolved) = report.escrows.first().cloned() {
            if report.escrows.len() > 1 {
                warn!(
                    deed = %self.context.deed.deed_id,
                    count = report.escrows.len(),
                    "multiple open escrows for one purchase, using the first"
                );
            }
            self.set_tracked(resolved.address());
            return Ok(self.observe(Some(resolved), None));
        }
        if report.index_failed && report.ledger_failed {
            return Err(PurchaseError::GatewayUnavailable(
                "escrow index and ledger both unavailable".into(),
            ));
        }

        // No open escrow: look for a settled one, or an intent
        let records = ledger_call(
            self.config.call_timeout(),
            self.resolver.ledger_gateway().transactions_by_deed(&self.context.deed.deed_id),
        )
        .await?;

        // The seller's index spans every deed; only failures this purchase
        // could own make the answer unknown
        if report.is_degraded() {
            let tracked = self.tracked();
            let blocking = report.failures.iter().find(|(escrow, _)| {
                tracked.as_ref() == Some(escrow)
                    || self
                        .sale_records(&records)
                        .any(|r| r.blockchain_identification.as_ref() == Some(escrow))
            });
            if let Some((escrow, e)) = blocking {
                return Err(PurchaseError::GatewayUnavailable(format!(
                    "escrow {} unreadable: {}",
                    escrow.short(),
                    e
                )));
            }
            debug!(
                deed = %self.context.deed.deed_id,
                ignored = report.failures.len(),
                "unreadable escrows belong to other purchases"
            );
        }

        // Finalized escrows drop out of resolution; any sale that did not
        // fail may have settled on-chain even if its record never caught up
        let mut candidates: Vec<Address> = Vec::new();
        let recorded = self
            .sale_records(&records)
            .rev()
            .filter_map(|r| r.blockchain_identification);
        for escrow in self.tracked().into_iter().chain(recorded) {
            if !candidates.contains(&escrow) {
                candidates.push(escrow);
            }
        }

        for escrow in candidates {
            let snapshot = self.resolver.snapshot(&escrow).await?;
            if !snapshot.is_finalized {
                continue;
            }
            let record = self
                .sale_records(&records)
                .rev()
                .find(|r| r.blockchain_identification == Some(escrow));
            let resolved = match record {
                Some(record) => ResolvedEscrow::from_ledger(snapshot, record.clone()),
                None => ResolvedEscrow::synthetic(snapshot, Some(&self.context.deed.deed_id)),
            };
            self.set_tracked(escrow);
            return Ok(self.observe(Some(resolved), None));
        }

        let intent = records
            .into_iter()
            .filter(|r| self.context.is_own_intent(r))
            .last();
        Ok(self.observe(None, intent))
    }

    /// This purchase's escrow_sale records that have not failed
    fn sale_records<'a>(
        &'a self,
        records: &'a [TransactionRecord],
    ) -> impl DoubleEndedIterator<Item = &'a TransactionRecord> + 'a {
        records.iter().filter(move |r| {
            r.status != TransactionStatus::Failed
                && r.blockchain_identification
                    .as_ref()
                    .is_some_and(|e| self.context.is_own_escrow_sale(r, e))
        })
    }

    fn observe(&self, escrow: Option<ResolvedEscrow>, intent: Option<TransactionRecord>) -> PurchaseView {
        let step = classify(escrow.as_ref().map(|e| &e.snapshot));
        let previous = self.observed_step();
        self.set_observed(step);
        debug!(deed = %self.context.deed.deed_id, %step, ?previous, "purchase classified");
        PurchaseView { step, escrow, intent }
    }

    /// Refresh after a successful write; a failed re-read is logged, not raised
    async fn settle_view(&self) -> Option<PurchaseView> {
        match self.refresh().await {
            Ok(view) => Some(view),
            Err(e) => {
                warn!(deed = %self.context.deed.deed_id, error = %e, "state re-read after command failed");
                None
            }
        }
    }

    fn require_role(&self, required: Role) -> Result<(), PurchaseError> {
        if self.context.actor != required {
            return Err(PurchaseError::WrongRole {
                required,
                actual: self.context.actor,
            });
        }
        Ok(())
    }

    fn require_step(view: &PurchaseView, required: PurchaseStep) -> Result<(), PurchaseError> {
        if view.step != required {
            return Err(PurchaseError::IllegalTransition {
                required,
                observed: view.step,
            });
        }
        Ok(())
    }

    /// The governing escrow, checked against the one the caller named
    fn governing_escrow<'a>(view: &'a PurchaseView, named: &Address) -> Result<&'a ResolvedEscrow, PurchaseError> {
        let resolved = view.escrow.as_ref().ok_or(PurchaseError::IllegalTransition {
            required: PurchaseStep::Ready,
            observed: view.step,
        })?;
        if &resolved.address() != named {
            return Err(PurchaseError::EscrowMismatch {
                expected: resolved.address(),
                actual: *named,
            });
        }
        Ok(resolved)
    }

    // ========================================================================
    // COMMANDS
    // ========================================================================

    /// Record the buyer's intent to purchase; a no-op if one already exists
    pub async fn express_interest(&self, amount: Decimal, share: u8) -> Result<InterestOutcome, PurchaseError> {
        let _guard = self.command_lock.lock().await;
        self.require_role(Role::Buyer)?;
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(PurchaseError::InvalidAmount(format!("{} is negative", amount)));
        }
        if !(1..=100).contains(&share) {
            return Err(PurchaseError::InvalidShare(share));
        }

        let view = self.refresh().await?;
        Self::require_step(&view, PurchaseStep::NoEscrow)?;

        if let Some(existing) = view.intent {
            if existing.amount != amount || existing.share != share {
                warn!(
                    deed = %self.context.deed.deed_id,
                    existing_amount = %existing.amount,
                    requested_amount = %amount,
                    "purchase intent already exists with different terms"
                );
            }
            debug!(deed = %self.context.deed.deed_id, id = %existing.id, "purchase intent already sent");
            let view = self.settle_view().await;
            return Ok(InterestOutcome {
                record: existing,
                created: false,
                view,
            });
        }

        let intent = TransactionRecord::purchase_intent(
            &self.context.deed.deed_id,
            self.context.buyer,
            self.context.seller,
            amount,
            share,
        );
        let record = ledger_call(
            self.config.call_timeout(),
            self.resolver.ledger_gateway().create_transaction(intent),
        )
        .await?;
        info!(deed = %self.context.deed.deed_id, id = %record.id, %amount, share, "purchase intent sent");

        let view = self.settle_view().await;
        Ok(InterestOutcome {
            record,
            created: true,
            view,
        })
    }

    /// Pay into the escrow at its current on-chain price
    ///
    /// `quoted_price` is what the caller displayed; it is never submitted.
    pub async fn deposit_payment(&self, escrow: &Address, quoted_price: Decimal) -> Result<CommandOutcome, PurchaseError> {
        let _guard = self.command_lock.lock().await;
        self.require_role(Role::Buyer)?;

        let view = self.refresh().await?;
        Self::require_step(&view, PurchaseStep::Deposit)?;
        let resolved = Self::governing_escrow(&view, escrow)?;
        let price = resolved.snapshot.price;
        if price != quoted_price {
            warn!(escrow = %escrow.short(), %quoted_price, on_chain = %price, "quoted price is stale, paying on-chain price");
        }

        let receipt = with_timeout(
            self.config.call_timeout(),
            self.resolver.escrow_gateway().buyer_deposit_payment(escrow, price),
        )
        .await
        .map_err(|e| {
            warn!(escrow = %escrow.short(), error = %e, "buyer deposit failed");
            PurchaseError::from(e)
        })?;
        info!(escrow = %escrow.short(), %price, tx = %receipt.tx_hash, "buyer deposit submitted");

        let view = self.settle_view().await;
        Ok(CommandOutcome { receipt, view })
    }

    /// Finalize the escrow, complete the ledger record, and for full-deed
    /// sales start the owner-of-record update
    pub async fn finalize(&self, escrow: &Address) -> Result<FinalizeOutcome, PurchaseError> {
        let _guard = self.command_lock.lock().await;

        let view = self.refresh().await?;
        Self::require_step(&view, PurchaseStep::Finalize)?;
        let resolved = Self::governing_escrow(&view, escrow)?.clone();

        let receipt = with_timeout(
            self.config.call_timeout(),
            self.resolver.escrow_gateway().finalize_escrow(escrow),
        )
        .await
        .map_err(|e| {
            warn!(escrow = %escrow.short(), error = %e, "finalize failed");
            PurchaseError::from(e)
        })?;
        info!(escrow = %escrow.short(), tx = %receipt.tx_hash, "escrow finalized");

        // The chain has settled; everything below is best-effort
        let record = self.ledger_record_for(&resolved).await;
        let ledger_updated = match &record {
            Some(record) => self.complete_record(record).await,
            None => {
                warn!(escrow = %escrow.short(), "no ledger record for finalized escrow");
                false
            }
        };

        let full_ownership = record.as_ref().unwrap_or(&resolved.record).is_full_ownership();
        let owner_update = if full_ownership {
            self.start_owner_update(&resolved)
        } else {
            None
        };

        let view = self.settle_view().await;
        Ok(FinalizeOutcome {
            receipt,
            view,
            ledger_updated,
            owner_update,
        })
    }

    async fn ledger_record_for(&self, resolved: &ResolvedEscrow) -> Option<TransactionRecord> {
        if !resolved.is_synthetic() {
            return Some(resolved.record.clone());
        }
        let escrow = resolved.address();
        let records = ledger_call(
            self.config.call_timeout(),
            self.resolver.ledger_gateway().transactions_by_deed(&self.context.deed.deed_id),
        )
        .await;
        match records {
            Ok(records) => records
                .into_iter()
                .find(|r| self.context.is_own_escrow_sale(r, &escrow)),
            Err(e) => {
                error!(escrow = %escrow.short(), error = %e, "ledger lookup after finalize failed");
                None
            }
        }
    }

    async fn complete_record(&self, record: &TransactionRecord) -> bool {
        if record.status == TransactionStatus::Completed {
            return true;
        }
        let result = ledger_call(
            self.config.call_timeout(),
            self.resolver
                .ledger_gateway()
                .update_transaction_status(&record.id, TransactionStatus::Completed),
        )
        .await;
        match result {
            Ok(_) => {
                info!(id = %record.id, "ledger record completed");
                true
            }
            Err(e) => {
                error!(id = %record.id, error = %e, "ledger update after finalize failed");
                false
            }
        }
    }

    fn start_owner_update(&self, resolved: &ResolvedEscrow) -> Option<OwnerUpdateHandle> {
        let registry = match &self.owners {
            Some(registry) => Arc::clone(registry),
            None => {
                debug!("no owner registry configured");
                return None;
            }
        };
        let profile = match &self.context.buyer_profile {
            Some(profile) => profile.clone(),
            None => {
                warn!(token = %resolved.snapshot.token_id, "buyer profile missing, owner of record not updated");
                return None;
            }
        };
        let update = OwnerUpdate {
            token_id: resolved.snapshot.token_id.clone(),
            new_owner: resolved.snapshot.buyer,
            profile,
        };
        Some(spawn_owner_update(registry, update, self.config.owner_policy()))
    }
}
