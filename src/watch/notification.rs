// Notifications - One live entry per escrow awaiting attention

use crate::identity::Address;
use crate::purchase::PurchaseStep;
use crate::resolver::{ResolvedEscrow, Role};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle identifying one live notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NotificationId(u64);

impl NotificationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "notification:{}", self.0)
    }
}

/// Why a notification went away
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    /// The escrow no longer needs attention, or the session ended
    Auto,
    /// The user dismissed it
    Manual,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub escrow: Address,
    pub deed_id: String,
    pub token_id: String,
    pub price: Decimal,
    pub step: PurchaseStep,
    pub message: String,
    /// The watching party is the one expected to act next
    pub action_required: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub(crate) fn for_escrow(id: NotificationId, resolved: &ResolvedEscrow, step: PurchaseStep, role: Role) -> Self {
        Self {
            id,
            escrow: resolved.address(),
            deed_id: resolved.record.deed_id.clone(),
            token_id: resolved.snapshot.token_id.clone(),
            price: resolved.snapshot.price,
            step,
            message: step.status_line(role).to_string(),
            action_required: step.awaits(role),
            created_at: Utc::now(),
        }
    }
}
