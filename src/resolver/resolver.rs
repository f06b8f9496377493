// Escrow Resolver - Finds the escrow(s) governing a party's purchase
//
// Two strategies, in priority order:
// - Direct: the escrow gateway's per-address index, checked against on-chain terms
// - Fallback: pending `escrow_sale` ledger records, each resolved on-chain
//
// Snapshot reads run concurrently and failures are isolated per escrow.

use super::{DeedRef, ResolutionReport, ResolvedEscrow, Role, Strategy};
use crate::escrow::{fetch_snapshot, with_timeout, EscrowError, EscrowGateway, EscrowSnapshot};
use crate::identity::Address;
use crate::ledger::{LedgerError, LedgerGateway, TransactionRecord, TransactionStatus, TransactionType};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

// ============================================================================
// RESOLVER CONFIG
// ============================================================================

/// Configuration for escrow resolution
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Deadline for each individual gateway call, in milliseconds
    pub call_timeout_ms: u64,
    /// Pair direct-strategy results with their ledger records
    pub link_ledger_records: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 8_000,
            link_ledger_records: true,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_call_timeout_ms(mut self, ms: u64) -> Self {
        self.call_timeout_ms = ms;
        self
    }

    pub fn with_link_ledger_records(mut self, link: bool) -> Self {
        self.link_ledger_records = link;
        self
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ResolverError> {
        if self.call_timeout_ms == 0 {
            return Err(ResolverError::InvalidConfig(
                "call_timeout_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolverError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

// ============================================================================
// ESCROW FILTER
// ============================================================================

/// What a resolution is looking for
#[derive(Clone, Debug)]
pub struct EscrowFilter {
    pub party: Address,
    pub role: Role,
    /// Restrict to one deed
    pub deed: Option<DeedRef>,
    /// Restrict to one counterparty
    pub counterpart: Option<Address>,
}

impl EscrowFilter {
    pub fn for_party(party: Address, role: Role) -> Self {
        Self {
            party,
            role,
            deed: None,
            counterpart: None,
        }
    }

    pub fn with_deed(mut self, deed: DeedRef) -> Self {
        self.deed = Some(deed);
        self
    }

    pub fn with_counterpart(mut self, counterpart: Address) -> Self {
        self.counterpart = Some(counterpart);
        self
    }

    /// On-chain terms match this filter
    pub fn matches_snapshot(&self, snapshot: &EscrowSnapshot) -> bool {
        self.role.side_of(snapshot) == self.party
            && self
                .counterpart
                .map_or(true, |c| self.role.counterpart_of(snapshot) == c)
            && self
                .deed
                .as_ref()
                .map_or(true, |d| d.matches_token(&snapshot.token_id))
    }

    /// A pending escrow-sale record for this filter
    pub fn matches_record(&self, record: &TransactionRecord) -> bool {
        let (party_side, counterpart_side) = self.role.sides_of_record(record);
        record.is_materialized_escrow()
            && record.status == TransactionStatus::Pending
            && party_side == self.party
            && self.counterpart.map_or(true, |c| counterpart_side == c)
            && self.deed.as_ref().map_or(true, |d| d.deed_id == record.deed_id)
    }
}

// ============================================================================
// ESCROW RESOLVER
// ============================================================================

/// Cross-references the ledger and the escrow gateway
pub struct EscrowResolver {
    escrow: Arc<dyn EscrowGateway>,
    ledger: Arc<dyn LedgerGateway>,
    config: ResolverConfig,
}

impl EscrowResolver {
    pub fn new(escrow: Arc<dyn EscrowGateway>, ledger: Arc<dyn LedgerGateway>, config: ResolverConfig) -> Self {
        Self { escrow, ledger, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn escrow_gateway(&self) -> &Arc<dyn EscrowGateway> {
        &self.escrow
    }

    pub fn ledger_gateway(&self) -> &Arc<dyn LedgerGateway> {
        &self.ledger
    }

    /// Unfinalized escrows for a party on one deed; empty when there are none
    pub async fn resolve_escrows_for_party(&self, deed: &DeedRef, party: &Address, role: Role) -> Vec<ResolvedEscrow> {
        let filter = EscrowFilter::for_party(*party, role).with_deed(deed.clone());
        self.resolve_with_report(&filter).await.escrows
    }

    /// Unfinalized escrows between one seller and one buyer on one deed
    pub async fn resolve_for_triple(&self, deed: &DeedRef, seller: &Address, buyer: &Address) -> Vec<ResolvedEscrow> {
        let filter = EscrowFilter::for_party(*seller, Role::Seller)
            .with_deed(deed.clone())
            .with_counterpart(*buyer);
        self.resolve_with_report(&filter).await.escrows
    }

    /// Unfinalized escrows for a party across all deeds
    pub async fn resolve_pending_for_party(&self, party: &Address, role: Role) -> Vec<ResolvedEscrow> {
        self.resolve_with_report(&EscrowFilter::for_party(*party, role))
            .await
            .escrows
    }

    /// Resolve and report which strategy answered and what failed
    pub async fn resolve_with_report(&self, filter: &EscrowFilter) -> ResolutionReport {
        let mut report = ResolutionReport::new();

        self.resolve_direct(filter, &mut report).await;
        if !report.escrows.is_empty() {
            report.strategy = Strategy::Direct;
        } else {
            self.resolve_from_ledger(filter, &mut report).await;
            if !report.escrows.is_empty() {
                report.strategy = Strategy::LedgerFallback;
            }
        }

        if report.is_partial() {
            warn!(
                party = %filter.party.short(),
                failed = report.failures.len(),
                resolved = report.escrows.len(),
                "partial resolution failure"
            );
        }
        debug!(
            party = %filter.party.short(),
            role = %filter.role,
            strategy = ?report.strategy,
            found = report.escrows.len(),
            "escrow resolution finished"
        );
        report
    }

    /// Fetch a single escrow's snapshot under the configured deadline
    pub async fn snapshot(&self, escrow: &Address) -> Result<EscrowSnapshot, EscrowError> {
        fetch_snapshot(self.escrow.as_ref(), escrow, self.config.call_timeout()).await
    }

    // ========================================================================
    // STRATEGIES
    // ========================================================================

    async fn resolve_direct(&self, filter: &EscrowFilter, report: &mut ResolutionReport) {
        let index = with_timeout(self.config.call_timeout(), self.escrow.user_escrows(&filter.party)).await;
        let addresses = match index {
            Ok(addresses) => addresses,
            Err(e) => {
                warn!(party = %filter.party.short(), error = %e, "escrow index unavailable, falling back to ledger");
                report.index_failed = true;
                return;
            }
        };

        let snapshots = self.fetch_all(dedup(addresses), report).await;
        let matching: Vec<EscrowSnapshot> = snapshots
            .into_iter()
            .filter(|s| !s.is_finalized && filter.matches_snapshot(s))
            .collect();
        if matching.is_empty() {
            return;
        }

        let linked = if self.config.link_ledger_records {
            self.ledger_records_for_linking(filter).await
        } else {
            HashMap::new()
        };
        let deed_id = filter.deed.as_ref().map(|d| d.deed_id.as_str());

        report.escrows = matching
            .into_iter()
            .map(|snapshot| match linked.get(&snapshot.address) {
                Some(record) => ResolvedEscrow::from_ledger(snapshot, record.clone()),
                None => ResolvedEscrow::synthetic(snapshot, deed_id),
            })
            .collect();
    }

    async fn resolve_from_ledger(&self, filter: &EscrowFilter, report: &mut ResolutionReport) {
        let records = match self.candidate_records(filter).await {
            Ok(records) => records,
            Err(e) => {
                warn!(party = %filter.party.short(), error = %e, "ledger fallback unavailable");
                report.ledger_failed = true;
                return;
            }
        };

        let mut by_escrow: HashMap<Address, TransactionRecord> = HashMap::new();
        for record in records.into_iter().filter(|r| filter.matches_record(r)) {
            if let Some(escrow) = record.blockchain_identification {
                // Keep the newest record per escrow
                let newer = by_escrow
                    .get(&escrow)
                    .map_or(true, |existing| record.date > existing.date);
                if newer {
                    by_escrow.insert(escrow, record);
                }
            }
        }
        if by_escrow.is_empty() {
            return;
        }

        let mut addresses: Vec<Address> = by_escrow.keys().copied().collect();
        addresses.sort();
        let snapshots = self.fetch_all(addresses, report).await;

        report.escrows = snapshots
            .into_iter()
            .filter(|s| !s.is_finalized)
            .filter(|s| {
                // On-chain terms win over what the ledger claims
                let agrees = filter.matches_snapshot(s);
                if !agrees {
                    warn!(escrow = %s.address.short(), "ledger record disagrees with on-chain parties, skipping");
                }
                agrees
            })
            .filter_map(|s| {
                let record = by_escrow.remove(&s.address)?;
                Some(ResolvedEscrow::from_ledger(s, record))
            })
            .collect();
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Fetch all snapshots concurrently; failures are recorded and dropped
    async fn fetch_all(&self, addresses: Vec<Address>, report: &mut ResolutionReport) -> Vec<EscrowSnapshot> {
        report.candidates += addresses.len();
        let deadline = self.config.call_timeout();
        let fetches = addresses.iter().map(|addr| async move {
            (*addr, fetch_snapshot(self.escrow.as_ref(), addr, deadline).await)
        });

        let mut snapshots = Vec::with_capacity(addresses.len());
        for (addr, result) in join_all(fetches).await {
            match result {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => {
                    warn!(escrow = %addr.short(), error = %e, "escrow snapshot fetch failed");
                    report.failures.push((addr, e));
                }
            }
        }
        snapshots
    }

    async fn candidate_records(&self, filter: &EscrowFilter) -> Result<Vec<TransactionRecord>, LedgerError> {
        let deadline = self.config.call_timeout();
        match &filter.deed {
            Some(deed) => ledger_call(deadline, self.ledger.transactions_by_deed(&deed.deed_id)).await,
            None => {
                ledger_call(
                    deadline,
                    self.ledger
                        .transactions_by_type_and_status(TransactionType::EscrowSale, TransactionStatus::Pending),
                )
                .await
            }
        }
    }

    async fn ledger_records_for_linking(&self, filter: &EscrowFilter) -> HashMap<Address, TransactionRecord> {
        match self.candidate_records(filter).await {
            Ok(records) => records
                .into_iter()
                .filter(|r| r.kind == TransactionType::EscrowSale)
                .filter_map(|r| r.blockchain_identification.map(|addr| (addr, r)))
                .collect(),
            Err(e) => {
                debug!(error = %e, "ledger linking skipped");
                HashMap::new()
            }
        }
    }
}

/// Run a ledger call under a deadline
pub async fn ledger_call<T, F>(deadline: Duration, call: F) -> Result<T, LedgerError>
where
    F: Future<Output = Result<T, LedgerError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(LedgerError::Timeout),
    }
}

fn dedup(addresses: Vec<Address>) -> Vec<Address> {
    let mut seen = HashSet::new();
    addresses.into_iter().filter(|a| seen.insert(*a)).collect()
}
