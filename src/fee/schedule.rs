// Fee Schedule - Tiered stamp-fee tables per transaction category
//
// Each category owns an ordered, contiguous partition of [0, inf) into
// left-closed, right-open tiers. Unknown categories use the default table.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Percentage returned when no tier covers an amount
pub const FALLBACK_PERCENTAGE: Decimal = Decimal::TWO;

// ============================================================================
// FEE ERROR
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    #[error("Invalid amount: {0} is negative")]
    InvalidAmount(Decimal),

    #[error("Invalid fee schedule: {0}")]
    InvalidSchedule(String),
}

// ============================================================================
// CATEGORY
// ============================================================================

/// Transaction category a stamp fee is charged under
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Sale,
    Gift,
    Transfer,
    Exchange,
    Lease,
    Mortgage,
    /// Any category without a dedicated table
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Sale,
        Category::Gift,
        Category::Transfer,
        Category::Exchange,
        Category::Lease,
        Category::Mortgage,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Sale => "Sale",
            Category::Gift => "Gift",
            Category::Transfer => "Transfer",
            Category::Exchange => "Exchange",
            Category::Lease => "Lease",
            Category::Mortgage => "Mortgage",
            Category::Other => "Other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = std::convert::Infallible;

    /// Never fails: unrecognized names fall into `Other`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let category = match s.trim().to_ascii_lowercase().as_str() {
            "sale" => Category::Sale,
            "gift" => Category::Gift,
            "transfer" => Category::Transfer,
            "exchange" => Category::Exchange,
            "lease" => Category::Lease,
            "mortgage" => Category::Mortgage,
            _ => Category::Other,
        };
        Ok(category)
    }
}

// ============================================================================
// FEE TIER
// ============================================================================

/// One band of a fee table: `min <= amount < max` (max `None` = unbounded)
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeTier {
    min: Decimal,
    max: Option<Decimal>,
    percentage: Decimal,
}

impl FeeTier {
    pub fn new(min: Decimal, max: Option<Decimal>, percentage: Decimal) -> Self {
        Self { min, max, percentage }
    }

    pub fn min(&self) -> Decimal {
        self.min
    }

    pub fn max(&self) -> Option<Decimal> {
        self.max
    }

    pub fn percentage(&self) -> Decimal {
        self.percentage
    }

    /// Check whether the tier covers an amount
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min && self.max.map_or(true, |max| amount < max)
    }
}

/// Build a table from (min, max, percent) triples; `max` of `None` ends the table
fn table(rows: &[(i64, Option<i64>, Decimal)]) -> Vec<FeeTier> {
    rows.iter()
        .map(|(min, max, pct)| FeeTier::new(Decimal::from(*min), max.map(Decimal::from), *pct))
        .collect()
}

fn pct(units: i64, scale: u32) -> Decimal {
    Decimal::new(units, scale)
}

// ============================================================================
// FEE SCHEDULE
// ============================================================================

/// Fee tables keyed by category, plus the default table
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FeeSchedule {
    tables: HashMap<Category, Vec<FeeTier>>,
    default_table: Vec<FeeTier>,
}

impl FeeSchedule {
    /// The statutory tables
    pub fn standard() -> Self {
        let mut tables = HashMap::new();
        tables.insert(
            Category::Sale,
            table(&[
                (0, Some(1), pct(2, 0)),
                (1, Some(2), pct(3, 0)),
                (2, Some(5), pct(4, 0)),
                (5, Some(10), pct(5, 0)),
                (10, None, pct(6, 0)),
            ]),
        );
        tables.insert(
            Category::Gift,
            table(&[
                (0, Some(1), pct(1, 0)),
                (1, Some(5), pct(15, 1)),
                (5, None, pct(2, 0)),
            ]),
        );
        tables.insert(
            Category::Transfer,
            table(&[
                (0, Some(1), pct(15, 1)),
                (1, Some(5), pct(25, 1)),
                (5, None, pct(35, 1)),
            ]),
        );
        tables.insert(
            Category::Exchange,
            table(&[
                (0, Some(2), pct(2, 0)),
                (2, Some(10), pct(3, 0)),
                (10, None, pct(4, 0)),
            ]),
        );
        tables.insert(
            Category::Lease,
            table(&[
                (0, Some(1), pct(5, 1)),
                (1, Some(5), pct(1, 0)),
                (5, None, pct(15, 1)),
            ]),
        );
        tables.insert(
            Category::Mortgage,
            table(&[(0, Some(5), pct(1, 0)), (5, None, pct(2, 0))]),
        );

        Self {
            tables,
            default_table: table(&[
                (0, Some(1), pct(2, 0)),
                (1, Some(5), pct(3, 0)),
                (5, None, pct(4, 0)),
            ]),
        }
    }

    /// Create a schedule holding only a default table
    pub fn with_default_table(default_table: Vec<FeeTier>) -> Result<Self, FeeError> {
        Self::validate_table(&default_table)?;
        Ok(Self {
            tables: HashMap::new(),
            default_table,
        })
    }

    /// Replace the table for one category
    pub fn with_table(mut self, category: Category, tiers: Vec<FeeTier>) -> Result<Self, FeeError> {
        Self::validate_table(&tiers)?;
        self.tables.insert(category, tiers);
        Ok(self)
    }

    /// Get the tiers that apply to a category
    pub fn tiers(&self, category: Category) -> &[FeeTier] {
        self.tables
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_table)
    }

    /// A table must start at 0, be contiguous, and end unbounded
    pub fn validate_table(tiers: &[FeeTier]) -> Result<(), FeeError> {
        let first = tiers
            .first()
            .ok_or_else(|| FeeError::InvalidSchedule("table has no tiers".into()))?;
        if !first.min.is_zero() {
            return Err(FeeError::InvalidSchedule(format!(
                "first tier starts at {} instead of 0",
                first.min
            )));
        }

        for pair in tiers.windows(2) {
            match pair[0].max {
                Some(max) if max == pair[1].min && max > pair[0].min => {}
                Some(max) => {
                    return Err(FeeError::InvalidSchedule(format!(
                        "gap or overlap between {} and {}",
                        max, pair[1].min
                    )))
                }
                None => {
                    return Err(FeeError::InvalidSchedule(
                        "unbounded tier must be last".into(),
                    ))
                }
            }
        }

        if tiers.last().and_then(|t| t.max).is_some() {
            return Err(FeeError::InvalidSchedule("last tier must be unbounded".into()));
        }

        if tiers.iter().any(|t| t.percentage.is_sign_negative()) {
            return Err(FeeError::InvalidSchedule("negative percentage".into()));
        }

        Ok(())
    }

    /// Stamp-fee percentage for an amount under a category
    pub fn stamp_percentage(&self, amount: Decimal, category: Category) -> Result<Decimal, FeeError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(FeeError::InvalidAmount(amount));
        }

        let found = self
            .tiers(category)
            .iter()
            .find(|tier| tier.contains(amount))
            .map(FeeTier::percentage);

        match found {
            Some(percentage) => Ok(percentage),
            None => {
                tracing::warn!(%amount, %category, "no fee tier matched, using fallback");
                Ok(FALLBACK_PERCENTAGE)
            }
        }
    }
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self::standard()
    }
}
