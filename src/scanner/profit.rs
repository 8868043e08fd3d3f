//! Profit estimation for a candidate opportunity.

use rust_decimal::Decimal;

use super::types::TradingPair;
use crate::fee::FeeQuote;
use crate::utils::u256_to_decimal;

/// Everything a profit policy may look at.
#[derive(Debug, Clone, Copy)]
pub struct ProfitInputs<'a> {
    /// Pair being evaluated.
    pub pair: &'a TradingPair,
    /// Price on the cheaper venue.
    pub price_buy: Decimal,
    /// Trade size in base-token units.
    pub trade_size: Decimal,
    /// `|a - b| / min(a, b)`.
    pub spread_ratio: Decimal,
    /// Fee quote the settlement would be submitted with.
    pub fee: &'a FeeQuote,
    /// Per-swap venue fee as a fraction.
    pub venue_fee_rate: Decimal,
}

/// Estimates profit in quote-token units. A result `<= 0` means "do not trade".
pub trait ProfitPolicy: Send + Sync {
    fn estimate(&self, inputs: &ProfitInputs<'_>) -> Decimal;
}

impl<F> ProfitPolicy for F
where
    F: Fn(&ProfitInputs<'_>) -> Decimal + Send + Sync,
{
    fn estimate(&self, inputs: &ProfitInputs<'_>) -> Decimal {
        self(inputs)
    }
}

/// Default policy: spread on the traded notional, less two venue fees and the
/// transaction cost.
///
/// ```text
/// notional   = trade_size * price_buy
/// gross      = notional * spread_ratio
/// venue_fees = notional * venue_fee_rate * 2
/// tx_cost    = fee.amount * fee_cost_factor
/// profit     = gross - venue_fees - tx_cost
/// ```
#[derive(Debug, Clone, Copy)]
pub struct NotionalSpreadPolicy {
    /// Quote units per unit of fee amount.
    pub fee_cost_factor: Decimal,
}

impl NotionalSpreadPolicy {
    pub fn new(fee_cost_factor: Decimal) -> Self {
        Self { fee_cost_factor }
    }

    fn checked_estimate(&self, inputs: &ProfitInputs<'_>) -> Option<Decimal> {
        let notional = inputs.trade_size.checked_mul(inputs.price_buy)?;
        let gross = notional.checked_mul(inputs.spread_ratio)?;
        let venue_fees = notional
            .checked_mul(inputs.venue_fee_rate)?
            .checked_mul(Decimal::TWO)?;
        let fee = u256_to_decimal(inputs.fee.amount)?;
        let tx_cost = fee.checked_mul(self.fee_cost_factor)?;
        gross.checked_sub(venue_fees)?.checked_sub(tx_cost)
    }
}

impl ProfitPolicy for NotionalSpreadPolicy {
    fn estimate(&self, inputs: &ProfitInputs<'_>) -> Decimal {
        // Anything that overflows Decimal is out of range for a real trade.
        self.checked_estimate(inputs).unwrap_or(Decimal::MIN)
    }
}
