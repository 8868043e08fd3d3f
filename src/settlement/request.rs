//! Settlement request construction.

use alloy::primitives::U256;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::executor::ExecutorSettings;
use crate::fee::FeeQuote;
use crate::scanner::{Opportunity, TradingPair, Venue};

/// One settlement, ready to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementRequest {
    /// Pair being settled.
    pub pair: TradingPair,
    /// Venue to buy on.
    pub venue_buy: Venue,
    /// Venue to sell on.
    pub venue_sell: Venue,
    /// Amount of base token to trade.
    pub trade_size: Decimal,
    /// Least base token the round trip may return.
    pub min_output: Decimal,
    /// Absolute deadline after which the settlement must not execute.
    pub deadline: OffsetDateTime,
    /// Fee bid per unit of gas.
    pub max_fee: U256,
    /// Gas limit after the safety multiplier.
    pub gas_limit: u64,
    /// Quote the fee bid came from.
    pub fee: FeeQuote,
}

impl SettlementRequest {
    /// Build a request for `opportunity` priced with `fee`.
    ///
    /// `min_output = trade_size * (1 + spread_ratio - slippage_tolerance)`,
    /// never below zero.
    pub fn build(
        opportunity: &Opportunity,
        fee: FeeQuote,
        settings: &ExecutorSettings,
        now: OffsetDateTime,
    ) -> Self {
        let trade_size = settings.trade_size;
        let min_output = (trade_size
            * (Decimal::ONE + opportunity.spread_ratio - settings.slippage_tolerance))
            .max(Decimal::ZERO);

        Self {
            pair: opportunity.pair.clone(),
            venue_buy: opportunity.venue_buy.clone(),
            venue_sell: opportunity.venue_sell.clone(),
            trade_size,
            min_output,
            deadline: now + settings.deadline_horizon,
            max_fee: fee.amount,
            gas_limit: scaled_gas_limit(settings.gas_limit, settings.gas_limit_multiplier),
            fee,
        }
    }
}

/// `gas_limit * multiplier`, rounded up, saturating at `u64::MAX`.
fn scaled_gas_limit(gas_limit: u64, multiplier: Decimal) -> u64 {
    Decimal::from(gas_limit)
        .checked_mul(multiplier)
        .and_then(|v| v.ceil().to_u64())
        .unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fee::{FeeSource, Urgency};
    use crate::scanner::types::fixtures;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn opportunity(spread: Decimal) -> Opportunity {
        Opportunity {
            pair: fixtures::pair(),
            venue_buy: fixtures::venue("quickswap", 0xa1),
            venue_sell: fixtures::venue("sushiswap", 0xa2),
            price_buy: dec!(100),
            price_sell: dec!(100) * (Decimal::ONE + spread),
            spread_ratio: spread,
            estimated_profit: dec!(0.5),
            observed_at: OffsetDateTime::now_utc(),
        }
    }

    fn fee() -> FeeQuote {
        FeeQuote {
            amount: U256::from(36_000_000_000u64),
            sampled_at: OffsetDateTime::now_utc(),
            urgency: Urgency::High,
            source: FeeSource::Cached,
        }
    }

    #[test]
    fn min_output_subtracts_slippage_from_spread() {
        let settings = ExecutorSettings {
            trade_size: dec!(2),
            slippage_tolerance: dec!(0.002),
            ..ExecutorSettings::default()
        };
        let now = OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap();
        let request = SettlementRequest::build(&opportunity(dec!(0.015)), fee(), &settings, now);

        assert_eq!(request.min_output, dec!(2.026));
        assert_eq!(request.deadline, now + Duration::from_secs(300));
        assert_eq!(request.max_fee, U256::from(36_000_000_000u64));
        assert_eq!(request.gas_limit, 600_000);
    }

    #[test]
    fn min_output_never_negative() {
        let settings = ExecutorSettings {
            slippage_tolerance: dec!(0.999),
            ..ExecutorSettings::default()
        };
        let request = SettlementRequest::build(
            &opportunity(dec!(-1.5)),
            fee(),
            &settings,
            OffsetDateTime::now_utc(),
        );
        assert_eq!(request.min_output, Decimal::ZERO);
    }

    #[test]
    fn gas_limit_rounds_up() {
        assert_eq!(scaled_gas_limit(100_001, dec!(1.5)), 150_002);
        assert_eq!(scaled_gas_limit(21_000, Decimal::ONE), 21_000);
        assert_eq!(scaled_gas_limit(u64::MAX, dec!(2)), u64::MAX);
    }
}
