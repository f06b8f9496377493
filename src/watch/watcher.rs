// Pending-Escrow Watch - Polls for escrows needing a party's attention
//
// Each tick resolves first, then reconciles the notification map in one
// step. Ticks never overlap, and a stopped watch never creates notifications.

use super::{Notification, NotificationId, RetireReason};
use crate::identity::Address;
use crate::purchase::classify;
use crate::resolver::{EscrowFilter, EscrowResolver, ResolvedEscrow, Role};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

// ============================================================================
// WATCH CONFIG / ERRORS / STATS
// ============================================================================

/// Configuration for the pending-escrow watch
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Time between ticks, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 12_000,
        }
    }
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), WatchError> {
        if self.poll_interval_ms == 0 {
            return Err(WatchError::InvalidConfig(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WatchError {
    #[error("Watch has been stopped")]
    Stopped,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Watch is already running")]
    AlreadyRunning,
}

/// What one tick changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub created: usize,
    pub retired: usize,
    /// Entries whose step changed in place
    pub updated: usize,
    pub live: usize,
    /// Both discovery sources failed; the map was left untouched
    pub skipped: bool,
}

impl TickSummary {
    /// No notification was created or retired
    pub fn is_quiet(&self) -> bool {
        self.created == 0 && self.retired == 0
    }
}

#[derive(Clone, Debug, Default)]
pub struct WatchStats {
    pub ticks: u64,
    pub skipped_ticks: u64,
    pub notifications_created: u64,
    pub notifications_retired: u64,
    pub failed_fetches: u64,
}

// ============================================================================
// SUBSCRIBERS
// ============================================================================

pub type NotifyFn = Arc<dyn Fn(&Notification) + Send + Sync>;
pub type RetireFn = Arc<dyn Fn(&Notification, RetireReason) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(u64, NotifyFn, RetireFn)>,
}

/// Live subscription; call `unsubscribe` to stop receiving callbacks
pub struct Subscription {
    id: u64,
    subscribers: Arc<Mutex<Subscribers>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        lock(&self.subscribers).entries.retain(|(id, _, _)| *id != self.id);
    }
}

enum WatchEvent {
    Notify(Notification),
    Retire(Notification, RetireReason),
}

// ============================================================================
// WATCH SESSION STATE
// ============================================================================

#[derive(Default)]
struct SessionState {
    notifications: HashMap<Address, Notification>,
    dismissed: HashSet<Address>,
    stats: WatchStats,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// ============================================================================
// PENDING ESCROW WATCH
// ============================================================================

pub struct PendingEscrowWatch {
    party: Address,
    role: Role,
    resolver: Arc<EscrowResolver>,
    config: WatchConfig,
    state: Mutex<SessionState>,
    subscribers: Arc<Mutex<Subscribers>>,
    /// Serializes ticks and session resets
    tick_lock: tokio::sync::Mutex<()>,
    cancelled: AtomicBool,
    /// Set while a `WatchHandle` is live
    running: AtomicBool,
    next_notification: AtomicU64,
}

impl PendingEscrowWatch {
    pub fn new(party: Address, role: Role, resolver: Arc<EscrowResolver>, config: WatchConfig) -> Self {
        Self {
            party,
            role,
            resolver,
            config,
            state: Mutex::new(SessionState::default()),
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            tick_lock: tokio::sync::Mutex::new(()),
            cancelled: AtomicBool::new(false),
            running: AtomicBool::new(false),
            next_notification: AtomicU64::new(1),
        }
    }

    pub fn party(&self) -> Address {
        self.party
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Live notifications, ordered by escrow address
    pub fn notifications(&self) -> Vec<Notification> {
        let mut live: Vec<Notification> = lock(&self.state).notifications.values().cloned().collect();
        live.sort_by_key(|n| n.escrow);
        live
    }

    pub fn notification_for(&self, escrow: &Address) -> Option<Notification> {
        lock(&self.state).notifications.get(escrow).cloned()
    }

    pub fn is_dismissed(&self, escrow: &Address) -> bool {
        lock(&self.state).dismissed.contains(escrow)
    }

    pub fn stats(&self) -> WatchStats {
        lock(&self.state).stats.clone()
    }

    /// Register callbacks; live notifications are replayed to `on_notify`
    pub fn subscribe<N, R>(&self, on_notify: N, on_retire: R) -> Subscription
    where
        N: Fn(&Notification) + Send + Sync + 'static,
        R: Fn(&Notification, RetireReason) + Send + Sync + 'static,
    {
        let on_notify: NotifyFn = Arc::new(on_notify);
        let on_retire: RetireFn = Arc::new(on_retire);
        let id = {
            let mut subs = lock(&self.subscribers);
            subs.next_id += 1;
            let id = subs.next_id;
            subs.entries.push((id, Arc::clone(&on_notify), on_retire));
            id
        };

        for notification in self.notifications() {
            on_notify(&notification);
        }

        Subscription {
            id,
            subscribers: Arc::clone(&self.subscribers),
        }
    }

    // ========================================================================
    // TICK
    // ========================================================================

    /// Run one discovery-and-reconcile pass
    pub async fn tick(&self) -> Result<TickSummary, WatchError> {
        let _tick = self.tick_lock.lock().await;
        if self.is_cancelled() {
            return Err(WatchError::Stopped);
        }

        let filter = EscrowFilter::for_party(self.party, self.role);
        let report = self.resolver.resolve_with_report(&filter).await;

        let (summary, events) = {
            let mut state = lock(&self.state);
            // Results that arrive after teardown are dropped
            if self.is_cancelled() {
                return Err(WatchError::Stopped);
            }
            state.stats.ticks += 1;
            state.stats.failed_fetches += report.failures.len() as u64;

            if report.index_failed && report.ledger_failed {
                state.stats.skipped_ticks += 1;
                warn!(party = %self.party.short(), "escrow discovery unavailable, keeping notifications");
                let summary = TickSummary {
                    live: state.notifications.len(),
                    skipped: true,
                    ..TickSummary::default()
                };
                (summary, Vec::new())
            } else {
                let unknown: HashSet<Address> = report.failures.iter().map(|(addr, _)| *addr).collect();
                self.reconcile(&mut state, &report.escrows, &unknown)
            }
        };

        self.dispatch(events);
        if !summary.is_quiet() {
            info!(
                party = %self.party.short(),
                created = summary.created,
                retired = summary.retired,
                live = summary.live,
                "pending escrow notifications changed"
            );
        }
        Ok(summary)
    }

    /// Bring the map in line with this tick's escrows
    ///
    /// Escrows whose fetch failed this tick are unknown, not gone, so their
    /// notifications stay until a tick can see them again.
    fn reconcile(
        &self,
        state: &mut SessionState,
        escrows: &[ResolvedEscrow],
        unknown: &HashSet<Address>,
    ) -> (TickSummary, Vec<WatchEvent>) {
        let mut summary = TickSummary::default();
        let mut events = Vec::new();

        let current: HashMap<Address, &ResolvedEscrow> = escrows
            .iter()
            .filter(|e| !e.snapshot.is_finalized)
            .filter(|e| !state.dismissed.contains(&e.address()))
            .map(|e| (e.address(), e))
            .collect();

        let stale: Vec<Address> = state
            .notifications
            .keys()
            .filter(|addr| !current.contains_key(*addr))
            .filter(|addr| !unknown.contains(*addr) || state.dismissed.contains(*addr))
            .copied()
            .collect();
        for addr in stale {
            if let Some(notification) = state.notifications.remove(&addr) {
                debug!(escrow = %addr.short(), "retiring notification");
                summary.retired += 1;
                events.push(WatchEvent::Retire(notification, RetireReason::Auto));
            }
        }

        let mut addresses: Vec<&Address> = current.keys().collect();
        addresses.sort();
        for addr in addresses {
            let resolved = current[addr];
            let step = classify(Some(&resolved.snapshot));
            match state.notifications.get_mut(addr) {
                Some(existing) => {
                    if existing.step != step {
                        existing.step = step;
                        existing.message = step.status_line(self.role).to_string();
                        existing.action_required = step.awaits(self.role);
                        summary.updated += 1;
                    }
                }
                None => {
                    let id = NotificationId::new(self.next_notification.fetch_add(1, Ordering::SeqCst));
                    let notification = Notification::for_escrow(id, resolved, step, self.role);
                    debug!(escrow = %addr.short(), %step, "creating notification");
                    state.notifications.insert(*addr, notification.clone());
                    summary.created += 1;
                    events.push(WatchEvent::Notify(notification));
                }
            }
        }

        state.stats.notifications_created += summary.created as u64;
        state.stats.notifications_retired += summary.retired as u64;
        summary.live = state.notifications.len();
        (summary, events)
    }

    fn dispatch(&self, events: Vec<WatchEvent>) {
        if events.is_empty() {
            return;
        }
        let subscribers: Vec<(NotifyFn, RetireFn)> = lock(&self.subscribers)
            .entries
            .iter()
            .map(|(_, n, r)| (Arc::clone(n), Arc::clone(r)))
            .collect();

        for event in &events {
            for (on_notify, on_retire) in &subscribers {
                match event {
                    WatchEvent::Notify(n) => on_notify(n),
                    WatchEvent::Retire(n, reason) => on_retire(n, *reason),
                }
            }
        }
    }

    // ========================================================================
    // USER ACTIONS / SESSION
    // ========================================================================

    /// Manually dismiss an escrow's notification for the rest of the session
    ///
    /// Returns true if a live notification was removed.
    pub fn dismiss(&self, escrow: &Address) -> bool {
        let removed = {
            let mut state = lock(&self.state);
            state.dismissed.insert(*escrow);
            let removed = state.notifications.remove(escrow);
            if removed.is_some() {
                state.stats.notifications_retired += 1;
            }
            removed
        };

        match removed {
            Some(notification) => {
                info!(escrow = %escrow.short(), "notification dismissed");
                self.dispatch(vec![WatchEvent::Retire(notification, RetireReason::Manual)]);
                true
            }
            None => false,
        }
    }

    /// Party disconnected: retire every notification and forget dismissals
    pub async fn reset_session(&self) {
        let _tick = self.tick_lock.lock().await;
        let events = self.clear_all();
        lock(&self.state).dismissed.clear();
        self.dispatch(events);
        debug!(party = %self.party.short(), "watch session reset");
    }

    fn clear_all(&self) -> Vec<WatchEvent> {
        let mut state = lock(&self.state);
        let mut retired: Vec<Notification> = state.notifications.drain().map(|(_, n)| n).collect();
        retired.sort_by_key(|n| n.escrow);
        state.stats.notifications_retired += retired.len() as u64;
        retired
            .into_iter()
            .map(|n| WatchEvent::Retire(n, RetireReason::Auto))
            .collect()
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Start polling on a background task; one loop per watch
    pub fn start(self: &Arc<Self>) -> Result<WatchHandle, WatchError> {
        self.config.validate()?;
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WatchError::AlreadyRunning);
        }
        self.cancelled.store(false, Ordering::SeqCst);

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let watcher = Arc::clone(self);
        let period = self.config.poll_interval();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(party = %watcher.party.short(), role = %watcher.role, "pending escrow watch started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match watcher.tick().await {
                            Ok(_) => {}
                            Err(WatchError::Stopped) => break,
                            Err(e) => warn!(error = %e, "watch tick failed"),
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(party = %watcher.party.short(), "pending escrow watch loop exited");
        });

        Ok(WatchHandle {
            watcher: Arc::clone(self),
            shutdown: shutdown_tx,
            task: Some(task),
        })
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Running watch; `stop` ends polling and releases every notification
pub struct WatchHandle {
    watcher: Arc<PendingEscrowWatch>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl WatchHandle {
    pub fn watcher(&self) -> &Arc<PendingEscrowWatch> {
        &self.watcher
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Stop the loop, wait for it, and retire all notifications
    pub async fn stop(mut self) {
        self.watcher.cancel();
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "watch task ended abnormally");
            }
        }
        let events = self.watcher.clear_all();
        self.watcher.dispatch(events);
        self.watcher.running.store(false, Ordering::SeqCst);
        info!(party = %self.watcher.party.short(), "pending escrow watch stopped");
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.watcher.cancel();
            let _ = self.shutdown.send(true);
            task.abort();
            self.watcher.running.store(false, Ordering::SeqCst);
        }
    }
}
