//! Fee oracle.
//!
//! This module handles:
//! - Sampling the base fee through the active endpoint, reused for a refresh interval
//! - Falling back to a configured default when sampling fails
//! - Urgency tiers, bounded randomization and the hard ceiling
//!
//! `quote` never fails. All arithmetic is integer basis points on `U256`.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use rand::Rng;
use serde::Serialize;
use strum::{AsRefStr, Display, EnumIter, EnumString};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};

use crate::cache::TtlCache;
use crate::error::FeeError;
use crate::metrics;
use crate::network::EndpointManager;

const BPS: u64 = 10_000;
const SAMPLE_KEY: &str = "base_fee";

/// Caller preference trading cost for confirmation speed.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display, AsRefStr, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Urgency {
    /// Cheapest; slowest.
    Low,
    /// Market rate.
    #[default]
    Normal,
    /// Above market.
    High,
    /// Well above market.
    Urgent,
}

impl Urgency {
    /// Parse a tier name; anything unrecognized is treated as `Normal`.
    pub fn parse_lossy(raw: &str) -> Self {
        raw.trim().parse().unwrap_or_else(|_| {
            debug!(urgency = raw, "Unknown urgency, using normal");
            Urgency::Normal
        })
    }

    fn index(self) -> usize {
        match self {
            Urgency::Low => 0,
            Urgency::Normal => 1,
            Urgency::High => 2,
            Urgency::Urgent => 3,
        }
    }
}

/// Where a quote's base fee came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FeeSource {
    /// Fresh sample from the endpoint.
    Network,
    /// Sample reused within the refresh interval.
    Cached,
    /// Configured default.
    Fallback,
}

/// A recommended fee. Immutable; each call produces a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeeQuote {
    /// Fee after urgency, randomization and ceiling.
    pub amount: U256,
    /// When the underlying base fee was sampled.
    pub sampled_at: OffsetDateTime,
    /// Tier this quote was produced for.
    pub urgency: Urgency,
    /// Origin of the base fee.
    pub source: FeeSource,
}

/// Fee oracle settings.
#[derive(Debug, Clone)]
pub struct FeeSettings {
    /// How long a sample is reused.
    pub refresh_interval: Duration,
    /// Timeout for the fee query.
    pub request_timeout: Duration,
    /// Base fee used when sampling fails.
    pub default_fee: U256,
    /// No quote exceeds this.
    pub ceiling: U256,
    /// Randomization band, ± basis points.
    pub jitter_bps: u32,
    /// Multipliers for low, normal, high, urgent in basis points.
    pub multipliers_bps: [u32; 4],
}

impl Default for FeeSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(15),
            request_timeout: Duration::from_secs(10),
            default_fee: U256::from(30_000_000_000u64),
            ceiling: U256::from(500_000_000_000u64),
            jitter_bps: 500,
            multipliers_bps: [9_000, 10_000, 12_000, 15_000],
        }
    }
}

impl FeeSettings {
    fn multiplier_bps(&self, urgency: Urgency) -> u32 {
        self.multipliers_bps[urgency.index()]
    }
}

#[derive(Debug, Clone, Copy)]
struct FeeSample {
    base_fee: U256,
    sampled_at: OffsetDateTime,
}

/// Produces fee quotes from the active endpoint.
pub struct FeeOracle {
    manager: Arc<EndpointManager>,
    settings: FeeSettings,
    samples: TtlCache<&'static str, FeeSample>,
}

impl FeeOracle {
    /// Create an oracle.
    pub fn new(manager: Arc<EndpointManager>, settings: FeeSettings) -> Self {
        Self {
            manager,
            settings,
            samples: TtlCache::new(),
        }
    }

    /// Fee ceiling.
    pub fn ceiling(&self) -> U256 {
        self.settings.ceiling
    }

    /// Recommended fee for `urgency`. Never fails.
    #[instrument(skip(self))]
    pub async fn quote(&self, urgency: Urgency) -> FeeQuote {
        let (sample, source) = match self.samples.get(&SAMPLE_KEY) {
            Some(sample) => (sample, FeeSource::Cached),
            None => match self.sample().await {
                Ok(sample) => {
                    self.samples.set(SAMPLE_KEY, sample, self.settings.refresh_interval);
                    (sample, FeeSource::Network)
                }
                Err(e) => {
                    metrics::inc_fee_fallbacks();
                    warn!(error = %e, default_fee = %self.settings.default_fee, "Using default fee");
                    let sample = FeeSample {
                        base_fee: self.settings.default_fee,
                        sampled_at: OffsetDateTime::now_utc(),
                    };
                    (sample, FeeSource::Fallback)
                }
            },
        };

        let amount = apply_tier(&self.settings, sample.base_fee, urgency, &mut rand::thread_rng());
        debug!(
            urgency = %urgency,
            base_fee = %sample.base_fee,
            amount = %amount,
            source = %source,
            "Fee quote"
        );

        FeeQuote {
            amount,
            sampled_at: sample.sampled_at,
            urgency,
            source,
        }
    }

    async fn sample(&self) -> Result<FeeSample, FeeError> {
        let timer = metrics::timer_fee_query();
        let handle = self
            .manager
            .get_connection()
            .await
            .map_err(|e| FeeError::FeeUnavailable(e.to_string()))?;

        let result = tokio::time::timeout(self.settings.request_timeout, handle.client.get_fee_estimate()).await;
        drop(timer);

        match result {
            Ok(Ok(data)) => Ok(FeeSample {
                base_fee: data.base_fee,
                sampled_at: OffsetDateTime::now_utc(),
            }),
            Ok(Err(e)) => {
                if e.is_transport() {
                    self.manager.report_failure(&handle, &e);
                }
                Err(FeeError::FeeUnavailable(e.to_string()))
            }
            Err(_) => Err(FeeError::FeeUnavailable(format!(
                "fee query timed out after {}ms",
                self.settings.request_timeout.as_millis()
            ))),
        }
    }
}

/// `min(base * multiplier * (1 ± jitter), ceiling)`.
fn apply_tier<R: Rng>(settings: &FeeSettings, base_fee: U256, urgency: Urgency, rng: &mut R) -> U256 {
    let bps = U256::from(BPS);
    let tiered = base_fee.saturating_mul(U256::from(settings.multiplier_bps(urgency))) / bps;

    let jitter = i64::from(settings.jitter_bps);
    let offset = if jitter == 0 { 0 } else { rng.gen_range(-jitter..=jitter) };
    // jitter_bps is validated to at most 1000, so the factor stays positive.
    let factor = (BPS as i64 + offset).max(0) as u64;
    let jittered = tiered.saturating_mul(U256::from(factor)) / bps;

    jittered.min(settings.ceiling)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::{MockChain, MockConnector};
    use crate::network::{Endpoint, EndpointSettings};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use strum::IntoEnumIterator;
    use url::Url;

    fn gwei(n: u64) -> U256 {
        U256::from(n * 1_000_000_000)
    }

    fn oracle_with(chain: Option<MockChain>, settings: FeeSettings) -> FeeOracle {
        let connector = Arc::new(MockConnector::new());
        if let Some(chain) = chain {
            connector.accept("endpoint-0", chain);
        }
        let endpoint = Endpoint::new("endpoint-0", Url::parse("http://node.local").unwrap(), 0);
        let mut endpoint_settings = EndpointSettings::default();
        endpoint_settings.backoff.max_attempts = 1;
        let manager = Arc::new(EndpointManager::new(vec![endpoint], connector, endpoint_settings).unwrap());
        FeeOracle::new(manager, settings)
    }

    fn no_jitter() -> FeeSettings {
        FeeSettings {
            jitter_bps: 0,
            ..FeeSettings::default()
        }
    }

    #[test]
    fn unknown_urgency_is_normal() {
        assert_eq!(Urgency::parse_lossy("urgent"), Urgency::Urgent);
        assert_eq!(Urgency::parse_lossy("HIGH"), Urgency::High);
        assert_eq!(Urgency::parse_lossy("asap"), Urgency::Normal);
        assert_eq!(Urgency::parse_lossy(""), Urgency::Normal);
    }

    #[test]
    fn tiers_scale_base_fee() {
        let settings = no_jitter();
        let mut rng = StdRng::seed_from_u64(7);
        let base = gwei(100);
        assert_eq!(apply_tier(&settings, base, Urgency::Low, &mut rng), gwei(90));
        assert_eq!(apply_tier(&settings, base, Urgency::Normal, &mut rng), gwei(100));
        assert_eq!(apply_tier(&settings, base, Urgency::High, &mut rng), gwei(120));
        assert_eq!(apply_tier(&settings, base, Urgency::Urgent, &mut rng), gwei(150));
    }

    #[test]
    fn jitter_stays_within_band() {
        let settings = FeeSettings::default();
        let mut rng = StdRng::seed_from_u64(42);
        let base = gwei(100);
        for _ in 0..1_000 {
            let amount = apply_tier(&settings, base, Urgency::Normal, &mut rng);
            assert!(amount >= gwei(95) && amount <= gwei(105), "{amount}");
        }
    }

    #[test]
    fn never_exceeds_ceiling() {
        let settings = FeeSettings {
            ceiling: gwei(50),
            jitter_bps: 1_000,
            ..FeeSettings::default()
        };
        let mut rng = StdRng::seed_from_u64(1);
        for urgency in Urgency::iter() {
            for base in [gwei(1), gwei(45), gwei(50), gwei(10_000)] {
                for _ in 0..200 {
                    assert!(apply_tier(&settings, base, urgency, &mut rng) <= settings.ceiling);
                }
            }
        }
        assert_eq!(apply_tier(&settings, U256::MAX, Urgency::Urgent, &mut rng), gwei(50));
    }

    #[test]
    fn urgent_outbids_low_on_average() {
        let settings = FeeSettings::default();
        let mut rng = StdRng::seed_from_u64(99);
        let base = gwei(40);
        let total = |u: Urgency, rng: &mut StdRng| {
            (0..500).fold(U256::ZERO, |acc, _| acc + apply_tier(&settings, base, u, rng))
        };
        let low = total(Urgency::Low, &mut rng);
        let urgent = total(Urgency::Urgent, &mut rng);
        assert!(urgent > low);
    }

    #[tokio::test(start_paused = true)]
    async fn sample_is_reused_within_refresh_interval() {
        let chain = MockChain::new();
        chain.set_fee(Some(gwei(40)));
        let oracle = oracle_with(Some(chain.clone()), no_jitter());

        let first = oracle.quote(Urgency::Normal).await;
        assert_eq!(first.source, FeeSource::Network);
        assert_eq!(first.amount, gwei(40));

        tokio::time::advance(Duration::from_secs(10)).await;
        let second = oracle.quote(Urgency::High).await;
        assert_eq!(second.source, FeeSource::Cached);
        assert_eq!(second.amount, gwei(48));
        assert_eq!(chain.fee_calls(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let third = oracle.quote(Urgency::Normal).await;
        assert_eq!(third.source, FeeSource::Network);
        assert_eq!(chain.fee_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fee_query_falls_back_to_default() {
        let chain = MockChain::new();
        chain.set_fee(None);
        let oracle = oracle_with(Some(chain.clone()), no_jitter());

        let quote = oracle.quote(Urgency::Normal).await;
        assert_eq!(quote.source, FeeSource::Fallback);
        assert_eq!(quote.amount, FeeSettings::default().default_fee);

        // Fallbacks are not cached; the next call asks again.
        chain.set_fee(Some(gwei(33)));
        let quote = oracle.quote(Urgency::Normal).await;
        assert_eq!(quote.source, FeeSource::Network);
        assert_eq!(quote.amount, gwei(33));
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_network_still_yields_a_quote() {
        let oracle = oracle_with(None, no_jitter());
        let quote = oracle.quote(Urgency::Urgent).await;
        assert_eq!(quote.source, FeeSource::Fallback);
        assert_eq!(quote.amount, gwei(45));
    }

    #[tokio::test(start_paused = true)]
    async fn upstream_spike_is_clamped() {
        let chain = MockChain::new();
        chain.set_fee(Some(gwei(5_000)));
        let oracle = oracle_with(Some(chain), FeeSettings::default());
        for urgency in Urgency::iter() {
            assert!(oracle.quote(urgency).await.amount <= oracle.ceiling());
        }
    }
}
