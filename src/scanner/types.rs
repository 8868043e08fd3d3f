//! Trading pair, venue and opportunity types.

use std::fmt;

use alloy::primitives::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use time::OffsetDateTime;

/// An ERC-20 token known to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Ticker symbol (e.g., "WETH").
    pub symbol: String,
    /// Contract address.
    pub address: Address,
    /// Decimal places of the token's base unit.
    pub decimals: u8,
}

/// A monitored base/quote pair. Prices are quoted as quote per one base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TradingPair {
    /// Token being bought and sold.
    pub base: Token,
    /// Token prices are expressed in.
    pub quote: Token,
}

impl TradingPair {
    /// Create a pair.
    pub fn new(base: Token, quote: Token) -> Self {
        Self { base, quote }
    }

    /// Symbol in `BASE/QUOTE` form.
    pub fn symbol(&self) -> String {
        format!("{}/{}", self.base.symbol, self.quote.symbol)
    }
}

impl fmt::Display for TradingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base.symbol, self.quote.symbol)
    }
}

/// A swap venue (router contract).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Venue {
    /// Venue name (e.g., "quickswap").
    pub name: String,
    /// Router contract address.
    pub router: Address,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Cache key for a price observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    /// Pair symbol.
    pub pair: String,
    /// Venue name.
    pub venue: String,
}

impl PriceKey {
    /// Key for a pair on a venue.
    pub fn new(pair: &TradingPair, venue: &Venue) -> Self {
        Self {
            pair: pair.symbol(),
            venue: venue.name.clone(),
        }
    }
}

/// One observed price.
#[derive(Debug, Clone, PartialEq)]
pub struct PricePoint {
    /// Pair symbol.
    pub pair: String,
    /// Venue name.
    pub venue: String,
    /// Quote tokens per one base token.
    pub price: Decimal,
    /// When the price was read.
    pub observed_at: OffsetDateTime,
}

/// A qualifying cross-venue price discrepancy.
///
/// Any instance handed out by the scanner has `spread_ratio >= min_spread`
/// and `estimated_profit > 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Opportunity {
    /// Pair being arbitraged.
    pub pair: TradingPair,
    /// Venue with the lower price.
    pub venue_buy: Venue,
    /// Venue with the higher price.
    pub venue_sell: Venue,
    /// Price on the buy venue.
    pub price_buy: Decimal,
    /// Price on the sell venue.
    pub price_sell: Decimal,
    /// `|sell - buy| / min(buy, sell)`.
    pub spread_ratio: Decimal,
    /// Profit after venue fees and transaction cost, in quote units.
    pub estimated_profit: Decimal,
    /// Observation time of the older of the two prices.
    pub observed_at: OffsetDateTime,
}

impl Opportunity {
    /// Compact serializable form.
    pub fn summary(&self) -> OpportunitySummary {
        OpportunitySummary {
            pair: self.pair.symbol(),
            venue_buy: self.venue_buy.name.clone(),
            venue_sell: self.venue_sell.name.clone(),
            price_buy: self.price_buy.to_string(),
            price_sell: self.price_sell.to_string(),
            spread_ratio: self.spread_ratio.to_string(),
            estimated_profit: self.estimated_profit.to_string(),
            observed_at: self.observed_at.unix_timestamp(),
        }
    }
}

/// Serializable view of an [`Opportunity`] for status and outcome records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpportunitySummary {
    /// Pair symbol.
    pub pair: String,
    /// Buy venue name.
    pub venue_buy: String,
    /// Sell venue name.
    pub venue_sell: String,
    /// Buy price.
    pub price_buy: String,
    /// Sell price.
    pub price_sell: String,
    /// Spread ratio.
    pub spread_ratio: String,
    /// Estimated profit.
    pub estimated_profit: String,
    /// Observation time (unix seconds).
    pub observed_at: i64,
}

/// `|a - b| / min(a, b)`, or `None` when either price is not positive.
pub fn spread_ratio(a: Decimal, b: Decimal) -> Option<Decimal> {
    if a <= Decimal::ZERO || b <= Decimal::ZERO {
        return None;
    }
    (a - b).abs().checked_div(a.min(b))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn weth() -> Token {
        Token {
            symbol: "WETH".to_string(),
            address: Address::repeat_byte(0x11),
            decimals: 18,
        }
    }

    pub fn usdc() -> Token {
        Token {
            symbol: "USDC".to_string(),
            address: Address::repeat_byte(0x22),
            decimals: 6,
        }
    }

    pub fn pair() -> TradingPair {
        TradingPair::new(weth(), usdc())
    }

    pub fn venue(name: &str, byte: u8) -> Venue {
        Venue {
            name: name.to_string(),
            router: Address::repeat_byte(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn spread_uses_the_lower_price() {
        assert_eq!(spread_ratio(dec!(100), dec!(101.5)), Some(dec!(0.015)));
        assert_eq!(spread_ratio(dec!(101.5), dec!(100)), Some(dec!(0.015)));
        assert_eq!(spread_ratio(dec!(100), dec!(100.2)), Some(dec!(0.002)));
    }

    #[test]
    fn spread_rejects_non_positive_prices() {
        assert_eq!(spread_ratio(Decimal::ZERO, dec!(1)), None);
        assert_eq!(spread_ratio(dec!(1), dec!(-1)), None);
    }

    #[test]
    fn pair_symbol() {
        assert_eq!(fixtures::pair().symbol(), "WETH/USDC");
        assert_eq!(fixtures::pair().to_string(), "WETH/USDC");
    }
}
