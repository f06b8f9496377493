// Purchase module - THE PROTOCOL
// Step classification and the commands that move a purchase forward

mod error;
mod machine;
mod owner;
mod step;

pub use error::PurchaseError;
pub use machine::{
    CommandOutcome, CoordinatorConfig, FinalizeOutcome, InterestOutcome, PurchaseContext,
    PurchaseMachine, PurchaseView,
};
pub use owner::{
    spawn_owner_update, BuyerProfile, MockOwnerRegistry, OwnerRegistry, OwnerUpdate,
    OwnerUpdateError, OwnerUpdateHandle, OwnerUpdatePolicy,
};
pub use step::{classify, PurchaseStep};
