// Watch module - WHAT NEEDS ATTENTION
// Background reconciliation of pending escrows into deduplicated notifications

mod notification;
mod watcher;

pub use notification::{Notification, NotificationId, RetireReason};
pub use watcher::{
    NotifyFn, PendingEscrowWatch, RetireFn, Subscription, TickSummary, WatchConfig, WatchError,
    WatchHandle, WatchStats,
};
