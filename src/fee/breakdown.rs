// Payment Breakdown - Splits a sale price into stamp fee and seller proceeds

use super::{Category, FeeError, FeeSchedule};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Fractional digits kept for token amounts
pub const TOKEN_DECIMALS: u32 = 6;

/// How a sale price is split between the stamp fee and the seller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentBreakdown {
    pub total_price: Decimal,
    pub stamp_fee_percentage: Decimal,
    pub stamp_fee: Decimal,
    pub seller_amount: Decimal,
}

impl FeeSchedule {
    /// Compute the payment split for a total price
    ///
    /// The stamp fee is rounded to token precision and the seller amount is
    /// the exact remainder, so `stamp_fee + seller_amount == total_price`.
    pub fn payment_breakdown(
        &self,
        total_price: Decimal,
        category: Category,
    ) -> Result<PaymentBreakdown, FeeError> {
        let stamp_fee_percentage = self.stamp_percentage(total_price, category)?;
        let stamp_fee = (total_price * stamp_fee_percentage / Decimal::ONE_HUNDRED)
            .round_dp_with_strategy(TOKEN_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
            .normalize();
        let seller_amount = (total_price - stamp_fee).normalize();

        Ok(PaymentBreakdown {
            total_price,
            stamp_fee_percentage,
            stamp_fee,
            seller_amount,
        })
    }
}

/// Stamp-fee percentage under the standard schedule
pub fn stamp_percentage(amount: Decimal, category: Category) -> Result<Decimal, FeeError> {
    FeeSchedule::standard().stamp_percentage(amount, category)
}

/// Payment breakdown under the standard schedule
pub fn payment_breakdown(total_price: Decimal, category: Category) -> Result<PaymentBreakdown, FeeError> {
    FeeSchedule::standard().payment_breakdown(total_price, category)
}
