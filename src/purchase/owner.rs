// Owner-of-record update - Best-effort side effect after a full-deed sale
//
// Runs on its own task with its own retries. The chain has already settled
// by the time this runs, so nothing here can undo a finalize.

use crate::identity::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OwnerUpdateError {
    #[error("Owner update timed out")]
    Timeout,

    #[error("Owner update failed: {0}")]
    Failed(String),
}

/// Identity recorded for the new owner
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerProfile {
    pub name: String,
    pub nic: String,
}

impl BuyerProfile {
    pub fn new(name: &str, nic: &str) -> Self {
        Self {
            name: name.to_string(),
            nic: nic.to_string(),
        }
    }
}

/// One owner-of-record change
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnerUpdate {
    pub token_id: String,
    pub new_owner: Address,
    pub profile: BuyerProfile,
}

/// External registry of deed owners
#[async_trait]
pub trait OwnerRegistry: Send + Sync {
    async fn update_full_owner(&self, update: &OwnerUpdate) -> Result<(), OwnerUpdateError>;
}

/// Retry policy for the owner update task
#[derive(Clone, Debug)]
pub struct OwnerUpdatePolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

/// Handle to a running owner update; dropping it detaches the task
#[derive(Debug)]
pub struct OwnerUpdateHandle {
    update: OwnerUpdate,
    handle: JoinHandle<Result<u32, OwnerUpdateError>>,
}

impl OwnerUpdateHandle {
    pub fn update(&self) -> &OwnerUpdate {
        &self.update
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the task; returns the number of attempts it took
    pub async fn wait(self) -> Result<u32, OwnerUpdateError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(OwnerUpdateError::Failed(format!("owner update task aborted: {}", e))),
        }
    }
}

/// Spawn the owner update with bounded retries
pub fn spawn_owner_update(
    registry: Arc<dyn OwnerRegistry>,
    update: OwnerUpdate,
    policy: OwnerUpdatePolicy,
) -> OwnerUpdateHandle {
    let task_update = update.clone();
    let handle = tokio::spawn(async move {
        let mut attempts = 0u32;

        let last_error = loop {
            attempts += 1;
            let call = registry.update_full_owner(&task_update);
            let err = match tokio::time::timeout(policy.timeout, call).await {
                Ok(Ok(())) => {
                    info!(
                        token = %task_update.token_id,
                        owner = %task_update.new_owner.short(),
                        attempts,
                        "owner of record updated"
                    );
                    return Ok(attempts);
                }
                Ok(Err(e)) => e,
                Err(_) => OwnerUpdateError::Timeout,
            };

            if attempts > policy.max_retries {
                break err;
            }
            warn!(token = %task_update.token_id, attempt = attempts, error = %err, "owner update failed, retrying");
            if !policy.retry_delay.is_zero() {
                tokio::time::sleep(policy.retry_delay).await;
            }
        };

        error!(
            token = %task_update.token_id,
            owner = %task_update.new_owner.short(),
            attempts,
            error = %last_error,
            "owner of record update abandoned"
        );
        Err(last_error)
    });

    OwnerUpdateHandle { update, handle }
}

// ============================================================================
// MOCK OWNER REGISTRY
// ============================================================================

/// Owner registry double that records calls and can fail N times first
pub struct MockOwnerRegistry {
    updates: Mutex<Vec<OwnerUpdate>>,
    failures_before_success: AtomicUsize,
    always_fail: bool,
    call_count: AtomicUsize,
}

impl MockOwnerRegistry {
    pub fn new() -> Self {
        Self {
            updates: Mutex::new(Vec::new()),
            failures_before_success: AtomicUsize::new(0),
            always_fail: false,
            call_count: AtomicUsize::new(0),
        }
    }

    /// Fail N times, then succeed
    pub fn with_failures_then_success(mut self, failures: usize) -> Self {
        self.failures_before_success = AtomicUsize::new(failures);
        self
    }

    pub fn with_always_fail(mut self) -> Self {
        self.always_fail = true;
        self
    }

    /// Successful updates, in order
    pub fn updates(&self) -> Vec<OwnerUpdate> {
        self.updates.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl Default for MockOwnerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OwnerRegistry for MockOwnerRegistry {
    async fn update_full_owner(&self, update: &OwnerUpdate) -> Result<(), OwnerUpdateError> {
        let call_num = self.call_count.fetch_add(1, Ordering::SeqCst);
        if self.always_fail || call_num < self.failures_before_success.load(Ordering::SeqCst) {
            return Err(OwnerUpdateError::Failed("mock registry failure".into()));
        }
        self.updates
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(update.clone());
        Ok(())
    }
}
