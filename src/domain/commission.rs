use rust_decimal::{Decimal, RoundingStrategy};

use crate::domain::Error;

/// Built-in fallback rate (percent) when no configuration exists at all.
pub const DEFAULT_RATE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommissionKind {
    /// `value` is a percentage of the escrow amount.
    Percentage,
    /// `value` is a flat fee per release.
    Fixed,
}

#[derive(Debug, Clone)]
pub struct CategoryRate {
    pub category: String,
    pub rate: Decimal,
}

/// Platform commission table: a global rate plus optional per-category
/// overrides. Validated when written, trusted when read.
#[derive(Debug, Clone)]
pub struct CommissionConfig {
    pub kind: CommissionKind,
    pub global_rate: Decimal,
    pub category_rates: Vec<CategoryRate>,
}

impl CommissionConfig {
    pub fn percentage(global_rate: Decimal) -> Self {
        Self {
            kind: CommissionKind::Percentage,
            global_rate,
            category_rates: Vec::new(),
        }
    }

    /// Rejects malformed rates. Called on every config update so `resolve`
    /// never has to re-validate.
    pub fn validate(&self) -> Result<(), Error> {
        if self.global_rate < Decimal::ZERO {
            return Err(Error::Validation(format!(
                "commission value must be non-negative, got {}",
                self.global_rate
            )));
        }
        if self.kind == CommissionKind::Percentage && self.global_rate > Decimal::ONE_HUNDRED {
            return Err(Error::Validation(format!(
                "percentage commission cannot exceed 100, got {}",
                self.global_rate
            )));
        }
        for cr in &self.category_rates {
            if cr.rate < Decimal::ZERO
                || (self.kind == CommissionKind::Percentage && cr.rate > Decimal::ONE_HUNDRED)
            {
                return Err(Error::Validation(format!(
                    "invalid rate {} for category {}",
                    cr.rate, cr.category
                )));
            }
        }
        Ok(())
    }

    fn rate_for(&self, category: Option<&str>) -> Decimal {
        category
            .and_then(|c| {
                self.category_rates
                    .iter()
                    .find(|cr| cr.category == c)
                    .map(|cr| cr.rate)
            })
            .unwrap_or(self.global_rate)
    }
}

/// Commission split for one release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Breakdown {
    pub commission: Decimal,
    pub payout: Decimal,
}

/// Compute the platform's cut of `amount`.
///
/// Resolution order: category-specific rate, then the configured global rate,
/// then the hardcoded default when no configuration exists. Pure with respect
/// to its inputs; rounds the commission to minor-unit precision (2 decimals,
/// half to even) and derives the payout by subtraction so the two always sum
/// back to `amount`.
pub fn resolve(
    amount: Decimal,
    category: Option<&str>,
    config: Option<&CommissionConfig>,
) -> Breakdown {
    let commission = match config {
        Some(cfg) => match cfg.kind {
            CommissionKind::Percentage => amount * cfg.rate_for(category) / Decimal::ONE_HUNDRED,
            CommissionKind::Fixed => cfg.rate_for(category),
        },
        None => amount * DEFAULT_RATE / Decimal::ONE_HUNDRED,
    };
    let commission = commission
        .round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
        .min(amount)
        .max(Decimal::ZERO);
    Breakdown {
        commission,
        payout: amount - commission,
    }
}
