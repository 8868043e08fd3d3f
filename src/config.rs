//! Application configuration loaded from environment variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use alloy::primitives::{Address, U256};
use rust_decimal::Decimal;
use serde::Deserialize;
use strum::{Display, EnumString};
use url::Url;

use crate::error::ConfigError;
use crate::fee::FeeSettings;
use crate::network::{BackoffPolicy, Endpoint, EndpointSettings, RpcSettings};
use crate::signing::address_from_private_key;
use crate::orchestrator::LoopSettings;
use crate::scanner::{ScanSettings, Token, TradingPair, Venue};
use crate::settlement::ExecutorSettings;

/// How settlement transactions reach the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SubmissionPath {
    /// Through the active endpoint.
    Direct,
    /// Through the signed private relay.
    Protected,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // === Endpoints ===
    /// RPC endpoint URLs, highest priority first.
    pub rpc_urls: Vec<String>,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Connection rounds before the network is declared unavailable.
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// First backoff delay in milliseconds.
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Backoff cap in milliseconds.
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,

    /// Seconds between health probes of the active endpoint.
    #[serde(default = "default_health_probe_interval_s")]
    pub health_probe_interval_s: u64,

    // === Market ===
    /// Tokens as `SYMBOL:address:decimals`.
    pub tokens: Vec<String>,

    /// Monitored pairs as `BASE/QUOTE`.
    pub pairs: Vec<String>,

    /// Venues as `name:router_address`.
    pub venues: Vec<String>,

    // === Detection ===
    /// Minimum spread ratio to qualify (0.005 = 0.5%).
    #[serde(default = "default_min_spread")]
    pub min_spread: Decimal,

    /// Minimum estimated profit in quote units.
    #[serde(default)]
    pub min_profit: Decimal,

    /// Trade size in base-token units.
    #[serde(default = "default_trade_size")]
    pub trade_size: Decimal,

    /// Per-swap venue fee rate (0.003 = 0.3%).
    #[serde(default = "default_venue_fee_rate")]
    pub venue_fee_rate: Decimal,

    /// Quote units charged per fee unit of the settlement transaction.
    #[serde(default = "default_fee_cost_factor")]
    pub fee_cost_factor: Decimal,

    /// How long a sampled price is reused, in milliseconds.
    #[serde(default = "default_sampling_interval_ms")]
    pub sampling_interval_ms: u64,

    // === Fees ===
    /// Hard upper bound for any fee quote.
    #[serde(default = "default_fee_ceiling")]
    pub fee_ceiling: u64,

    /// Fee used when the endpoint cannot provide one.
    #[serde(default = "default_fee")]
    pub default_fee: u64,

    /// How long a fee sample is reused, in milliseconds.
    #[serde(default = "default_fee_refresh_ms")]
    pub fee_refresh_ms: u64,

    /// Randomization band in basis points (500 = ±5%).
    #[serde(default = "default_fee_jitter_bps")]
    pub fee_jitter_bps: u32,

    /// Low urgency multiplier in basis points.
    #[serde(default = "default_urgency_low_bps")]
    pub urgency_low_bps: u32,

    /// Normal urgency multiplier in basis points.
    #[serde(default = "default_urgency_normal_bps")]
    pub urgency_normal_bps: u32,

    /// High urgency multiplier in basis points.
    #[serde(default = "default_urgency_high_bps")]
    pub urgency_high_bps: u32,

    /// Urgent multiplier in basis points.
    #[serde(default = "default_urgency_urgent_bps")]
    pub urgency_urgent_bps: u32,

    // === Settlement ===
    /// Settlement contract address.
    pub settlement_contract: String,

    /// `direct` or `protected`.
    #[serde(default = "default_submission_path")]
    pub submission_path: SubmissionPath,

    /// Relay URL for the protected path.
    #[serde(default)]
    pub protected_relay_url: Option<String>,

    /// Key used to sign relay requests (hex, starts with 0x).
    #[serde(default)]
    pub private_key: Option<String>,

    /// Maximum opportunity age at execution time, in milliseconds.
    #[serde(default = "default_max_staleness_ms")]
    pub max_staleness_ms: u64,

    /// Allowed shortfall below the expected output (0.002 = 0.2%).
    #[serde(default = "default_slippage_tolerance")]
    pub slippage_tolerance: Decimal,

    /// Settlement deadline horizon in seconds.
    #[serde(default = "default_deadline_horizon_s")]
    pub deadline_horizon_s: u64,

    /// How long to await confirmation, in seconds.
    #[serde(default = "default_confirmation_timeout_s")]
    pub confirmation_timeout_s: u64,

    /// Receipt polling interval in milliseconds.
    #[serde(default = "default_confirmation_poll_ms")]
    pub confirmation_poll_ms: u64,

    /// Base gas limit of the settlement transaction.
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,

    /// Safety multiplier applied to the gas limit.
    #[serde(default = "default_gas_limit_multiplier")]
    pub gas_limit_multiplier: Decimal,

    /// Optional JSON-lines file receiving every outcome.
    #[serde(default)]
    pub outcome_log_path: Option<String>,

    // === Loop ===
    /// Milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Pause after a failed tick, in milliseconds.
    #[serde(default = "default_recovery_delay_ms")]
    pub recovery_delay_ms: u64,

    /// Log a statistics summary every N ticks.
    #[serde(default = "default_stats_every_ticks")]
    pub stats_every_ticks: u64,

    // === Server Configuration ===
    /// HTTP server port for health/status/metrics endpoints.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub rust_log: String,

    /// Emit logs as JSON.
    #[serde(default)]
    pub log_json: bool,

    /// Enable verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_health_probe_interval_s() -> u64 {
    30
}

fn default_min_spread() -> Decimal {
    Decimal::new(5, 3) // 0.5%
}

fn default_trade_size() -> Decimal {
    Decimal::ONE
}

fn default_venue_fee_rate() -> Decimal {
    Decimal::new(3, 3) // 0.3%
}

fn default_fee_cost_factor() -> Decimal {
    Decimal::new(1, 10)
}

fn default_sampling_interval_ms() -> u64 {
    5_000
}

fn default_fee_ceiling() -> u64 {
    500_000_000_000 // 500 gwei
}

fn default_fee() -> u64 {
    30_000_000_000 // 30 gwei
}

fn default_fee_refresh_ms() -> u64 {
    15_000
}

fn default_fee_jitter_bps() -> u32 {
    500
}

fn default_urgency_low_bps() -> u32 {
    9_000
}

fn default_urgency_normal_bps() -> u32 {
    10_000
}

fn default_urgency_high_bps() -> u32 {
    12_000
}

fn default_urgency_urgent_bps() -> u32 {
    15_000
}

fn default_submission_path() -> SubmissionPath {
    SubmissionPath::Direct
}

fn default_max_staleness_ms() -> u64 {
    30_000
}

fn default_slippage_tolerance() -> Decimal {
    Decimal::new(2, 3) // 0.2%
}

fn default_deadline_horizon_s() -> u64 {
    300
}

fn default_confirmation_timeout_s() -> u64 {
    300
}

fn default_confirmation_poll_ms() -> u64 {
    2_000
}

fn default_gas_limit() -> u64 {
    500_000
}

fn default_gas_limit_multiplier() -> Decimal {
    Decimal::new(12, 1) // 1.2
}

fn default_tick_interval_ms() -> u64 {
    5_000
}

fn default_recovery_delay_ms() -> u64 {
    5_000
}

fn default_stats_every_ticks() -> u64 {
    10
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from environment, reading .env file first.
    pub fn load() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    /// Check if the configuration is valid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rpc_urls.is_empty() {
            return Err(invalid("RPC_URLS must list at least one endpoint"));
        }
        self.endpoints()?;

        if self.venues()?.len() < 2 {
            return Err(invalid("VENUES must list at least two venues"));
        }
        if self.pairs()?.is_empty() {
            return Err(invalid("PAIRS must list at least one pair"));
        }
        parse_address("SETTLEMENT_CONTRACT", &self.settlement_contract)?;

        if self.min_spread <= Decimal::ZERO {
            return Err(invalid("MIN_SPREAD must be positive"));
        }
        if self.trade_size <= Decimal::ZERO {
            return Err(invalid("TRADE_SIZE must be positive"));
        }
        if self.min_profit < Decimal::ZERO {
            return Err(invalid("MIN_PROFIT must not be negative"));
        }
        if self.slippage_tolerance < Decimal::ZERO || self.slippage_tolerance >= Decimal::ONE {
            return Err(invalid("SLIPPAGE_TOLERANCE must be in [0, 1)"));
        }

        let tiers = [
            self.urgency_low_bps,
            self.urgency_normal_bps,
            self.urgency_high_bps,
            self.urgency_urgent_bps,
        ];
        if tiers.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid(
                "URGENCY_*_BPS must be strictly increasing from low to urgent",
            ));
        }
        if self.fee_jitter_bps > 1_000 {
            return Err(invalid("FEE_JITTER_BPS must be at most 1000 (10%)"));
        }
        if self.default_fee > self.fee_ceiling {
            return Err(invalid("DEFAULT_FEE must not exceed FEE_CEILING"));
        }

        if self.max_reconnect_attempts == 0 {
            return Err(invalid("MAX_RECONNECT_ATTEMPTS must be at least 1"));
        }
        if self.reconnect_base_delay_ms > self.reconnect_max_delay_ms {
            return Err(invalid(
                "RECONNECT_BASE_DELAY_MS must not exceed RECONNECT_MAX_DELAY_MS",
            ));
        }
        if self.tick_interval_ms == 0
            || self.sampling_interval_ms == 0
            || self.health_probe_interval_s == 0
        {
            return Err(invalid(
                "TICK_INTERVAL_MS, SAMPLING_INTERVAL_MS and HEALTH_PROBE_INTERVAL_S must be positive",
            ));
        }
        if self.gas_limit_multiplier < Decimal::ONE {
            return Err(invalid("GAS_LIMIT_MULTIPLIER must be at least 1.0"));
        }

        if self.submission_path == SubmissionPath::Protected {
            match &self.protected_relay_url {
                Some(url) => {
                    Url::parse(url).map_err(|e| ConfigError::Parse {
                        field: "PROTECTED_RELAY_URL",
                        value: url.clone(),
                        reason: e.to_string(),
                    })?;
                }
                None => return Err(invalid("PROTECTED_RELAY_URL is required for the protected path")),
            }
            match &self.private_key {
                Some(key) if key.starts_with("0x") => {}
                Some(_) => return Err(invalid("PRIVATE_KEY must start with 0x")),
                None => return Err(invalid("PRIVATE_KEY is required for the protected path")),
            }
        }

        Ok(())
    }

    /// Ranked endpoints built from `RPC_URLS`.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, ConfigError> {
        self.rpc_urls
            .iter()
            .map(|raw| raw.trim())
            .filter(|raw| !raw.is_empty())
            .enumerate()
            .map(|(priority, raw)| {
                let url = Url::parse(raw).map_err(|e| ConfigError::Parse {
                    field: "RPC_URLS",
                    value: raw.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Endpoint::new(format!("endpoint-{}", priority), url, priority))
            })
            .collect()
    }

    /// Token registry keyed by symbol.
    pub fn tokens(&self) -> Result<HashMap<String, Token>, ConfigError> {
        let mut tokens = HashMap::new();
        for raw in self.tokens.iter().map(|t| t.trim()).filter(|t| !t.is_empty()) {
            let token = parse_token(raw)?;
            tokens.insert(token.symbol.clone(), token);
        }
        Ok(tokens)
    }

    /// Monitored pairs, resolved against the token registry.
    pub fn pairs(&self) -> Result<Vec<TradingPair>, ConfigError> {
        let tokens = self.tokens()?;
        self.pairs
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(|raw| {
                let parse_err = |reason: &str| ConfigError::Parse {
                    field: "PAIRS",
                    value: raw.to_string(),
                    reason: reason.to_string(),
                };
                let (base, quote) = raw.split_once('/').ok_or_else(|| parse_err("expected BASE/QUOTE"))?;
                let base = tokens.get(base.trim()).ok_or_else(|| parse_err("unknown base token"))?;
                let quote = tokens.get(quote.trim()).ok_or_else(|| parse_err("unknown quote token"))?;
                if base.symbol == quote.symbol {
                    return Err(parse_err("base and quote must differ"));
                }
                Ok(TradingPair::new(base.clone(), quote.clone()))
            })
            .collect()
    }

    /// Venues built from `VENUES`.
    pub fn venues(&self) -> Result<Vec<Venue>, ConfigError> {
        let venues = self
            .venues
            .iter()
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(|raw| {
                let (name, router) = raw.split_once(':').ok_or_else(|| ConfigError::Parse {
                    field: "VENUES",
                    value: raw.to_string(),
                    reason: "expected name:router_address".to_string(),
                })?;
                Ok(Venue {
                    name: name.trim().to_string(),
                    router: parse_address("VENUES", router.trim())?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        let mut names: Vec<&str> = venues.iter().map(|v| v.name.as_str()).collect();
        names.sort_unstable();
        if names.windows(2).any(|w| w[0] == w[1]) {
            return Err(invalid("VENUES must have unique names"));
        }
        Ok(venues)
    }

    /// Settlement contract address.
    pub fn settlement_contract(&self) -> Result<Address, ConfigError> {
        parse_address("SETTLEMENT_CONTRACT", &self.settlement_contract)
    }

    /// JSON-RPC client settings. The sender is the private key's address when
    /// one is configured; otherwise the node picks its default account.
    pub fn rpc_settings(&self) -> Result<RpcSettings, ConfigError> {
        let from = match &self.private_key {
            Some(key) => {
                let address = address_from_private_key(key).map_err(|e| ConfigError::Parse {
                    field: "PRIVATE_KEY",
                    value: "<redacted>".to_string(),
                    reason: e.to_string(),
                })?;
                Some(parse_address("PRIVATE_KEY", &address)?)
            }
            None => None,
        };
        Ok(RpcSettings {
            settlement_contract: self.settlement_contract()?,
            from,
            poll_interval: Duration::from_millis(self.confirmation_poll_ms),
        })
    }

    /// Endpoint manager settings.
    pub fn endpoint_settings(&self) -> EndpointSettings {
        EndpointSettings {
            backoff: BackoffPolicy {
                base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
                max_attempts: self.max_reconnect_attempts,
            },
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            health_probe_interval: Duration::from_secs(self.health_probe_interval_s),
        }
    }

    /// Fee oracle settings.
    pub fn fee_settings(&self) -> FeeSettings {
        FeeSettings {
            refresh_interval: Duration::from_millis(self.fee_refresh_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            default_fee: U256::from(self.default_fee),
            ceiling: U256::from(self.fee_ceiling),
            jitter_bps: self.fee_jitter_bps,
            multipliers_bps: [
                self.urgency_low_bps,
                self.urgency_normal_bps,
                self.urgency_high_bps,
                self.urgency_urgent_bps,
            ],
        }
    }

    /// Scanner settings.
    pub fn scan_settings(&self) -> ScanSettings {
        ScanSettings {
            min_spread: self.min_spread,
            min_profit: self.min_profit,
            trade_size: self.trade_size,
            venue_fee_rate: self.venue_fee_rate,
            sampling_interval: Duration::from_millis(self.sampling_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    /// Executor settings.
    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            max_staleness: Duration::from_millis(self.max_staleness_ms),
            min_spread: self.min_spread,
            trade_size: self.trade_size,
            slippage_tolerance: self.slippage_tolerance,
            deadline_horizon: Duration::from_secs(self.deadline_horizon_s),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_s),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            gas_limit: self.gas_limit,
            gas_limit_multiplier: self.gas_limit_multiplier,
        }
    }

    /// Orchestrator loop settings.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            recovery_delay: Duration::from_millis(self.recovery_delay_ms),
            stats_every_ticks: self.stats_every_ticks.max(1),
            health_probe_interval: Duration::from_secs(self.health_probe_interval_s),
        }
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

fn parse_address(field: &'static str, raw: &str) -> Result<Address, ConfigError> {
    Address::from_str(raw).map_err(|e| ConfigError::Parse {
        field,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_token(raw: &str) -> Result<Token, ConfigError> {
    let parse_err = |reason: String| ConfigError::Parse {
        field: "TOKENS",
        value: raw.to_string(),
        reason,
    };
    let mut parts = raw.split(':');
    let (Some(symbol), Some(address), Some(decimals), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(parse_err("expected SYMBOL:address:decimals".to_string()));
    };
    let decimals: u8 = decimals
        .trim()
        .parse()
        .map_err(|e: std::num::ParseIntError| parse_err(e.to_string()))?;
    if decimals > 18 {
        return Err(parse_err("decimals must be at most 18".to_string()));
    }
    Ok(Token {
        symbol: symbol.trim().to_string(),
        address: parse_address("TOKENS", address.trim())?,
        decimals,
    })
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        rpc_urls: vec![
            "https://polygon-rpc.com".to_string(),
            "https://rpc.backup.example/key123".to_string(),
        ],
        request_timeout_ms: default_request_timeout_ms(),
        max_reconnect_attempts: default_max_reconnect_attempts(),
        reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
        reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
        health_probe_interval_s: default_health_probe_interval_s(),
        tokens: vec![
            "WETH:0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619:18".to_string(),
            "USDC:0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174:6".to_string(),
        ],
        pairs: vec!["WETH/USDC".to_string()],
        venues: vec![
            "quickswap:0xa5E0829CaCEd8fFDD4De3c43696c57F7D7A678ff".to_string(),
            "sushiswap:0x1b02dA8Cb0d097eB8D57A175b88c7D8b47997506".to_string(),
        ],
        min_spread: default_min_spread(),
        min_profit: Decimal::ZERO,
        trade_size: default_trade_size(),
        venue_fee_rate: default_venue_fee_rate(),
        fee_cost_factor: default_fee_cost_factor(),
        sampling_interval_ms: default_sampling_interval_ms(),
        fee_ceiling: default_fee_ceiling(),
        default_fee: default_fee(),
        fee_refresh_ms: default_fee_refresh_ms(),
        fee_jitter_bps: default_fee_jitter_bps(),
        urgency_low_bps: default_urgency_low_bps(),
        urgency_normal_bps: default_urgency_normal_bps(),
        urgency_high_bps: default_urgency_high_bps(),
        urgency_urgent_bps: default_urgency_urgent_bps(),
        settlement_contract: "0x00000000000000000000000000000000000000aa".to_string(),
        submission_path: SubmissionPath::Direct,
        protected_relay_url: None,
        private_key: None,
        max_staleness_ms: default_max_staleness_ms(),
        slippage_tolerance: default_slippage_tolerance(),
        deadline_horizon_s: default_deadline_horizon_s(),
        confirmation_timeout_s: default_confirmation_timeout_s(),
        confirmation_poll_ms: default_confirmation_poll_ms(),
        gas_limit: default_gas_limit(),
        gas_limit_multiplier: default_gas_limit_multiplier(),
        outcome_log_path: None,
        tick_interval_ms: default_tick_interval_ms(),
        recovery_delay_ms: default_recovery_delay_ms(),
        stats_every_ticks: default_stats_every_ticks(),
        port: default_port(),
        rust_log: default_log_level(),
        log_json: false,
        verbose: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    #[test]
    fn default_values_are_sensible() {
        assert_eq!(default_min_spread(), dec!(0.005));
        assert_eq!(default_gas_limit_multiplier(), dec!(1.2));
        assert!(default_fee() < default_fee_ceiling());
        assert!(default_urgency_low_bps() < default_urgency_urgent_bps());
    }

    #[test]
    fn test_config_is_valid() {
        assert_eq!(test_config().validate(), Ok(()));
    }

    #[test]
    fn endpoints_keep_listed_priority() {
        let endpoints = test_config().endpoints().unwrap();
        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].id, "endpoint-0");
        assert_eq!(endpoints[0].priority, 0);
        assert_eq!(endpoints[1].priority, 1);
    }

    #[test]
    fn pairs_resolve_tokens() {
        let pairs = test_config().pairs().unwrap();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].symbol(), "WETH/USDC");
        assert_eq!(pairs[0].base.decimals, 18);
        assert_eq!(pairs[0].quote.decimals, 6);
    }

    #[test]
    fn validate_rejects_unknown_pair_token() {
        let mut config = test_config();
        config.pairs = vec!["WBTC/USDC".to_string()];
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Parse { field: "PAIRS", .. })
        ));
    }

    #[test]
    fn validate_rejects_single_venue() {
        let mut config = test_config();
        config.venues.truncate(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_increasing_urgency() {
        let mut config = test_config();
        config.urgency_high_bps = config.urgency_urgent_bps;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_default_fee_above_ceiling() {
        let mut config = test_config();
        config.default_fee = config.fee_ceiling + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_endpoint_list() {
        let mut config = test_config();
        config.rpc_urls.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn protected_path_requires_relay_and_key() {
        let mut config = test_config();
        config.submission_path = SubmissionPath::Protected;
        assert!(config.validate().is_err());

        config.protected_relay_url = Some("https://relay.example".to_string());
        assert!(config.validate().is_err());

        config.private_key = Some(
            "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string(),
        );
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn token_parse_errors() {
        assert!(parse_token("WETH:0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619").is_err());
        assert!(parse_token("WETH:not-an-address:18").is_err());
        assert!(parse_token("WETH:0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619:77").is_err());
    }

    #[test]
    fn rpc_settings_derive_sender_from_key() {
        let mut config = test_config();
        let settings = config.rpc_settings().unwrap();
        assert_eq!(settings.from, None);
        assert_eq!(settings.settlement_contract, config.settlement_contract().unwrap());
        assert_eq!(settings.poll_interval, Duration::from_millis(2_000));

        config.private_key = Some(
            "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string(),
        );
        assert!(config.rpc_settings().unwrap().from.is_some());

        config.private_key = Some("0xnot-a-key".to_string());
        assert!(config.rpc_settings().is_err());
    }

    #[test]
    fn submission_path_parses_case_insensitively() {
        assert_eq!(SubmissionPath::from_str("Protected"), Ok(SubmissionPath::Protected));
        assert_eq!(SubmissionPath::Direct.to_string(), "direct");
    }
}
