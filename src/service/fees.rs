use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;

/// Amounts of a purchase, produced once at initiation and carried onto the
/// transaction unchanged. Always satisfies
/// `total_amount == platform_fee + vendor_amount`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeeBreakdown {
    pub total_amount: Decimal,
    pub platform_fee: Decimal,
    pub vendor_amount: Decimal,
}

/// Platform fee arithmetic.
///
/// Policy: the fee is additive. It is charged to the buyer on top of the
/// sale price and the vendor keeps the full price. The rate is
/// configuration (`PLATFORM_FEE_RATE`); the policy is not.
#[derive(Debug, Clone, Copy)]
pub struct FeeSchedule {
    rate: Decimal,
}

impl FeeSchedule {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    pub fn rate(&self) -> Decimal {
        self.rate
    }

    /// Quotes a sale. The fee is rounded half-up to 2 decimals exactly once;
    /// total and vendor net derive from the rounded fee so the invariant
    /// holds to the cent.
    pub fn quote(&self, sale_price: Decimal) -> FeeBreakdown {
        let platform_fee = (sale_price * self.rate)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        FeeBreakdown {
            total_amount: sale_price + platform_fee,
            platform_fee,
            vendor_amount: sale_price,
        }
    }
}

/// Converts a decimal amount to integer minor units (cents) for the
/// gateway. Amounts reaching this point are already rounded to 2 decimals.
pub fn to_minor_units(amount: Decimal) -> i64 {
    (amount * Decimal::new(100, 0))
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(i64::MAX)
}
