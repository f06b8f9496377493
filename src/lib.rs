// Deed Escrow - Purchase coordinator for tokenized property deeds
//
// Keeps an off-chain transaction ledger in step with on-chain escrows:
// - fee: stamp-fee tiers and the payment split
// - escrow / ledger: gateways to the chain and to the ledger service
// - resolver: which escrow governs a purchase
// - purchase: the step classifier and the commands that advance it
// - watch: polling reconciliation of pending escrows into notifications

pub mod coordinator;
pub mod escrow;
pub mod fee;
pub mod identity;
pub mod ledger;
pub mod purchase;
pub mod resolver;
pub mod storage;
pub mod watch;

pub use coordinator::{Coordinator, Settings, SettingsError};
