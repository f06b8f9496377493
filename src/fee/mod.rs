// Fee module - WHAT THE STATE TAKES
// Tiered stamp-fee lookup and the payment split for a sale

mod breakdown;
mod schedule;

pub use breakdown::{payment_breakdown, stamp_percentage, PaymentBreakdown, TOKEN_DECIMALS};
pub use schedule::{Category, FeeError, FeeSchedule, FeeTier, FALLBACK_PERCENTAGE};
