//! Cross-venue opportunity detection.
//!
//! One `detect` pass prices every configured pair on every venue, compares
//! each venue pair, and returns the qualifying opportunities ranked by
//! estimated profit. Prices are reused from the cache while younger than the
//! sampling interval.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::profit::{ProfitInputs, ProfitPolicy};
use super::types::{spread_ratio, Opportunity, PriceKey, PricePoint, TradingPair, Venue};
use crate::cache::TtlCache;
use crate::error::{ScanError, SourceError};
use crate::fee::{FeeOracle, Urgency};
use crate::metrics;
use crate::network::EndpointManager;

/// Scanner settings.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Minimum spread ratio to report.
    pub min_spread: Decimal,
    /// Minimum estimated profit to report, in quote units.
    pub min_profit: Decimal,
    /// Trade size in base-token units.
    pub trade_size: Decimal,
    /// Per-swap venue fee as a fraction.
    pub venue_fee_rate: Decimal,
    /// Price cache TTL.
    pub sampling_interval: Duration,
    /// Timeout for one price query.
    pub request_timeout: Duration,
}

/// A spread that cleared `min_spread` and still needs pricing against fees.
struct Candidate<'a> {
    pair: &'a TradingPair,
    buy: (&'a Venue, &'a PricePoint),
    sell: (&'a Venue, &'a PricePoint),
    spread_ratio: Decimal,
}

/// Scans configured pairs across venues.
pub struct OpportunityScanner {
    manager: Arc<EndpointManager>,
    oracle: Arc<FeeOracle>,
    pairs: Vec<TradingPair>,
    venues: Vec<Venue>,
    settings: ScanSettings,
    policy: Arc<dyn ProfitPolicy>,
    prices: TtlCache<PriceKey, PricePoint>,
}

impl OpportunityScanner {
    /// Create a scanner.
    pub fn new(
        manager: Arc<EndpointManager>,
        oracle: Arc<FeeOracle>,
        pairs: Vec<TradingPair>,
        venues: Vec<Venue>,
        settings: ScanSettings,
        policy: Arc<dyn ProfitPolicy>,
    ) -> Self {
        Self {
            manager,
            oracle,
            pairs,
            venues,
            settings,
            policy,
            prices: TtlCache::new(),
        }
    }

    /// Monitored pairs.
    pub fn pairs(&self) -> &[TradingPair] {
        &self.pairs
    }

    /// Cached price points, including expired ones not yet evicted.
    pub fn cache_len(&self) -> usize {
        self.prices.len()
    }

    /// Run one detection pass.
    ///
    /// Per-pair query failures are logged and skipped. Fails only when the
    /// endpoint pool is unavailable, or when every pair was skipped.
    #[instrument(skip(self), fields(pairs = self.pairs.len(), venues = self.venues.len()))]
    pub async fn detect(&self) -> Result<Vec<Opportunity>, ScanError> {
        let _timer = metrics::timer_opportunity_detection();
        if self.pairs.is_empty() {
            return Ok(Vec::new());
        }

        let mut priced = join_all(self.pairs.iter().map(|pair| self.price_pair(pair))).await;
        if let Some(pos) = priced.iter().position(|r| matches!(r, Err(e) if e.is_fatal())) {
            if let Err(e) = priced.swap_remove(pos) {
                return Err(e);
            }
        }

        let mut skipped = 0;
        let mut candidates = Vec::new();
        for (pair, result) in self.pairs.iter().zip(priced.iter()) {
            match result {
                Ok(points) => candidates.extend(self.candidates(pair, points)),
                Err(e) => {
                    skipped += 1;
                    warn!(pair = %pair, error = %e, "Pair skipped");
                }
            }
        }

        if skipped == self.pairs.len() {
            return Err(ScanError::AllPairsSkipped { pairs: skipped });
        }
        if candidates.is_empty() {
            debug!("No spread above threshold");
            return Ok(Vec::new());
        }

        // Priced at the urgency the executor will submit with.
        let fee = self.oracle.quote(Urgency::High).await;
        let floor = self.settings.min_profit.max(Decimal::ZERO);

        let mut opportunities: Vec<Opportunity> = candidates
            .into_iter()
            .filter_map(|c| {
                let estimated_profit = self.policy.estimate(&ProfitInputs {
                    pair: c.pair,
                    price_buy: c.buy.1.price,
                    trade_size: self.settings.trade_size,
                    spread_ratio: c.spread_ratio,
                    fee: &fee,
                    venue_fee_rate: self.settings.venue_fee_rate,
                });
                if estimated_profit <= Decimal::ZERO || estimated_profit < floor {
                    debug!(
                        pair = %c.pair,
                        spread = %c.spread_ratio,
                        profit = %estimated_profit,
                        "Spread does not cover costs"
                    );
                    return None;
                }
                Some(Opportunity {
                    pair: c.pair.clone(),
                    venue_buy: c.buy.0.clone(),
                    venue_sell: c.sell.0.clone(),
                    price_buy: c.buy.1.price,
                    price_sell: c.sell.1.price,
                    spread_ratio: c.spread_ratio,
                    estimated_profit,
                    observed_at: c.buy.1.observed_at.min(c.sell.1.observed_at),
                })
            })
            .collect();

        opportunities.sort_by(|a, b| b.estimated_profit.cmp(&a.estimated_profit));

        if let Some(best) = opportunities.first() {
            metrics::inc_opportunities_detected(opportunities.len() as u64);
            info!(
                count = opportunities.len(),
                pair = %best.pair,
                buy = %best.venue_buy,
                sell = %best.venue_sell,
                spread = %best.spread_ratio,
                profit = %best.estimated_profit,
                "Opportunities detected"
            );
        }
        Ok(opportunities)
    }

    /// Price `pair` on every venue. Venues that fail are dropped; the pair is
    /// skipped when fewer than two remain.
    async fn price_pair(&self, pair: &TradingPair) -> Result<Vec<(usize, PricePoint)>, ScanError> {
        let results = join_all(self.venues.iter().map(|venue| self.price_point(pair, venue))).await;

        let mut points = Vec::with_capacity(results.len());
        let mut last_skip = None;
        for (idx, result) in results.into_iter().enumerate() {
            match result {
                Ok(point) => points.push((idx, point)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(error = %e, "Price query skipped");
                    last_skip = Some(e);
                }
            }
        }

        if points.len() < 2 {
            return Err(last_skip.unwrap_or_else(|| ScanError::QuerySkipped {
                pair: pair.symbol(),
                venue: "*".to_string(),
                reason: "fewer than two venues priced".to_string(),
            }));
        }
        Ok(points)
    }

    async fn price_point(&self, pair: &TradingPair, venue: &Venue) -> Result<PricePoint, ScanError> {
        let key = PriceKey::new(pair, venue);
        if let Some(point) = self.prices.get(&key) {
            metrics::inc_price_cache_hits();
            return Ok(point);
        }

        let handle = self.manager.get_connection().await?;
        let skipped = |reason: String| {
            metrics::inc_price_queries_skipped(&venue.name);
            ScanError::QuerySkipped {
                pair: pair.symbol(),
                venue: venue.name.clone(),
                reason,
            }
        };

        let result = match tokio::time::timeout(
            self.settings.request_timeout,
            handle.client.get_price(pair, venue),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                operation: "get_price",
                after_ms: self.settings.request_timeout.as_millis() as u64,
            }),
        };

        match result {
            Ok(price) if price > Decimal::ZERO => {
                let point = PricePoint {
                    pair: key.pair.clone(),
                    venue: key.venue.clone(),
                    price,
                    observed_at: OffsetDateTime::now_utc(),
                };
                self.prices.set(key, point.clone(), self.settings.sampling_interval);
                Ok(point)
            }
            Ok(price) => Err(skipped(format!("non-positive price {}", price))),
            Err(e) => {
                if e.is_transport() {
                    self.manager.report_failure(&handle, &e);
                }
                Err(skipped(e.to_string()))
            }
        }
    }

    fn candidates<'a>(
        &'a self,
        pair: &'a TradingPair,
        points: &'a [(usize, PricePoint)],
    ) -> Vec<Candidate<'a>> {
        let mut out = Vec::new();
        for (i, (a_idx, a)) in points.iter().enumerate() {
            for (b_idx, b) in &points[i + 1..] {
                let Some(ratio) = spread_ratio(a.price, b.price) else {
                    continue;
                };
                if ratio < self.settings.min_spread {
                    continue;
                }
                let (a, b) = ((&self.venues[*a_idx], a), (&self.venues[*b_idx], b));
                let (buy, sell) = if a.1.price <= b.1.price { (a, b) } else { (b, a) };
                out.push(Candidate {
                    pair,
                    buy,
                    sell,
                    spread_ratio: ratio,
                });
            }
        }
        out
    }
}
