// Coordinator - Entry point wiring gateways, fee schedule, purchases and watches

use crate::escrow::EscrowGateway;
use crate::fee::{Category, FeeError, FeeSchedule, PaymentBreakdown};
use crate::identity::Address;
use crate::ledger::LedgerGateway;
use crate::purchase::{CoordinatorConfig, OwnerRegistry, PurchaseContext, PurchaseError, PurchaseMachine};
use crate::resolver::{DeedRef, EscrowResolver, ResolvedEscrow, ResolverConfig, Role};
use crate::watch::{PendingEscrowWatch, WatchConfig};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;

/// All tunables in one place
#[derive(Clone, Debug, Default)]
pub struct Settings {
    pub resolver: ResolverConfig,
    pub coordinator: CoordinatorConfig,
    pub watch: WatchConfig,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, resolver: ResolverConfig) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_coordinator(mut self, coordinator: CoordinatorConfig) -> Self {
        self.coordinator = coordinator;
        self
    }

    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        self.resolver
            .validate()
            .map_err(|e| SettingsError(e.to_string()))?;
        self.coordinator
            .validate()
            .map_err(|e| SettingsError(e.to_string()))?;
        self.watch.validate().map_err(|e| SettingsError(e.to_string()))?;
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid settings: {0}")]
pub struct SettingsError(pub String);

/// Hands out purchase machines and watches sharing one resolver
pub struct Coordinator {
    resolver: Arc<EscrowResolver>,
    owners: Option<Arc<dyn OwnerRegistry>>,
    fees: FeeSchedule,
    settings: Settings,
}

impl Coordinator {
    pub fn new(
        escrow: Arc<dyn EscrowGateway>,
        ledger: Arc<dyn LedgerGateway>,
        settings: Settings,
    ) -> Result<Self, SettingsError> {
        settings.validate()?;
        let resolver = Arc::new(EscrowResolver::new(escrow, ledger, settings.resolver.clone()));
        Ok(Self {
            resolver,
            owners: None,
            fees: FeeSchedule::standard(),
            settings,
        })
    }

    pub fn with_owner_registry(mut self, owners: Arc<dyn OwnerRegistry>) -> Self {
        self.owners = Some(owners);
        self
    }

    pub fn with_fee_schedule(mut self, fees: FeeSchedule) -> Self {
        self.fees = fees;
        self
    }

    pub fn resolver(&self) -> &Arc<EscrowResolver> {
        &self.resolver
    }

    pub fn fees(&self) -> &FeeSchedule {
        &self.fees
    }

    pub fn payment_breakdown(&self, total_price: Decimal, category: Category) -> Result<PaymentBreakdown, FeeError> {
        self.fees.payment_breakdown(total_price, category)
    }

    pub async fn resolve_escrows_for_party(&self, deed: &DeedRef, party: &Address, role: Role) -> Vec<ResolvedEscrow> {
        self.resolver.resolve_escrows_for_party(deed, party, role).await
    }

    /// State machine for one purchase
    pub fn purchase(&self, context: PurchaseContext) -> Result<PurchaseMachine, PurchaseError> {
        self.settings.coordinator.validate()?;
        let machine = PurchaseMachine::new(
            context,
            Arc::clone(&self.resolver),
            self.settings.coordinator.clone(),
        );
        Ok(match &self.owners {
            Some(owners) => machine.with_owner_registry(Arc::clone(owners)),
            None => machine,
        })
    }

    /// Pending-escrow watch for one connected party (not yet started)
    pub fn watch(&self, party: Address, role: Role) -> Arc<PendingEscrowWatch> {
        Arc::new(PendingEscrowWatch::new(
            party,
            role,
            Arc::clone(&self.resolver),
            self.settings.watch.clone(),
        ))
    }
}
