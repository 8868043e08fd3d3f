//! In-memory chain and connector for tests.
//!
//! `MockChain` serves scripted prices, fees and confirmations and counts
//! every call, so tests can assert that an operation made no network calls.
//! `MockConnector` hands out `MockChain` clients per endpoint id and records
//! when each connection attempt happened.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::time::Instant;

use super::endpoint::Endpoint;
use super::source::{ChainClient, Confirmation, Connector, FeeData, Receipt, SettlementTransport};
use crate::error::SourceError;
use crate::scanner::{TradingPair, Venue};
use crate::settlement::SettlementRequest;

/// How the mock answers `await_confirmation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockConfirmation {
    /// Confirm with this cost.
    Confirm(U256),
    /// Revert with this reason.
    Revert(String),
    /// Never confirm; the caller's timeout decides.
    Never,
}

#[derive(Debug)]
struct MockChainState {
    prices: HashMap<(String, String), Decimal>,
    failing_pairs: HashSet<String>,
    fee: Option<U256>,
    block_height: u64,
    probe_ok: bool,
    submit_error: Option<SourceError>,
    confirmation: MockConfirmation,
    confirmation_delay: Duration,
    submitted: Vec<SettlementRequest>,
}

#[derive(Debug, Default)]
struct CallCounters {
    price: AtomicU64,
    fee: AtomicU64,
    probe: AtomicU64,
    submit: AtomicU64,
    confirm: AtomicU64,
}

/// Scripted chain for tests.
#[derive(Debug, Clone)]
pub struct MockChain {
    state: Arc<Mutex<MockChainState>>,
    calls: Arc<CallCounters>,
    label: String,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// A healthy chain: probe succeeds, fee is 30 gwei, settlements confirm
    /// immediately at zero cost. No prices are set.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockChainState {
                prices: HashMap::new(),
                failing_pairs: HashSet::new(),
                fee: Some(U256::from(30_000_000_000u64)),
                block_height: 1,
                probe_ok: true,
                submit_error: None,
                confirmation: MockConfirmation::Confirm(U256::ZERO),
                confirmation_delay: Duration::ZERO,
                submitted: Vec::new(),
            })),
            calls: Arc::new(CallCounters::default()),
            label: "mock".to_string(),
        }
    }

    /// Same chain reported under another label (used as a relay double).
    pub fn labelled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the price of `pair` (e.g. "WETH/USDC") on `venue`.
    pub fn set_price(&self, pair: &str, venue: &str, price: Decimal) {
        self.state()
            .prices
            .insert((pair.to_string(), venue.to_string()), price);
    }

    /// Make every price query for `pair` fail.
    pub fn fail_pair(&self, pair: &str) {
        self.state().failing_pairs.insert(pair.to_string());
    }

    /// Set the fee estimate; `None` makes fee queries fail.
    pub fn set_fee(&self, fee: Option<U256>) {
        self.state().fee = fee;
    }

    /// Make block-height probes succeed or fail.
    pub fn set_probe_ok(&self, ok: bool) {
        self.state().probe_ok = ok;
    }

    /// Make submissions fail with `error`.
    pub fn fail_submit(&self, error: SourceError) {
        self.state().submit_error = Some(error);
    }

    /// Set how confirmations resolve.
    pub fn set_confirmation(&self, confirmation: MockConfirmation) {
        self.state().confirmation = confirmation;
    }

    /// Delay before a confirmation resolves.
    pub fn set_confirmation_delay(&self, delay: Duration) {
        self.state().confirmation_delay = delay;
    }

    /// Requests received by `submit`, in order.
    pub fn submitted(&self) -> Vec<SettlementRequest> {
        self.state().submitted.clone()
    }

    /// Number of price queries.
    pub fn price_calls(&self) -> u64 {
        self.calls.price.load(Ordering::SeqCst)
    }

    /// Number of fee queries.
    pub fn fee_calls(&self) -> u64 {
        self.calls.fee.load(Ordering::SeqCst)
    }

    /// Number of block-height probes.
    pub fn probe_calls(&self) -> u64 {
        self.calls.probe.load(Ordering::SeqCst)
    }

    /// Number of submissions.
    pub fn submit_calls(&self) -> u64 {
        self.calls.submit.load(Ordering::SeqCst)
    }

    /// Number of confirmation waits.
    pub fn confirm_calls(&self) -> u64 {
        self.calls.confirm.load(Ordering::SeqCst)
    }

    /// Every call of every kind.
    pub fn total_calls(&self) -> u64 {
        self.price_calls()
            + self.fee_calls()
            + self.probe_calls()
            + self.submit_calls()
            + self.confirm_calls()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_price(&self, pair: &TradingPair, venue: &Venue) -> Result<Decimal, SourceError> {
        self.calls.price.fetch_add(1, Ordering::SeqCst);
        let symbol = pair.symbol();
        let state = self.state();
        if state.failing_pairs.contains(&symbol) {
            return Err(SourceError::Transport(format!("price feed for {} down", symbol)));
        }
        state
            .prices
            .get(&(symbol.clone(), venue.name.clone()))
            .copied()
            .ok_or_else(|| SourceError::Rpc {
                code: -32000,
                message: format!("no liquidity for {} on {}", symbol, venue.name),
            })
    }

    async fn get_fee_estimate(&self) -> Result<FeeData, SourceError> {
        self.calls.fee.fetch_add(1, Ordering::SeqCst);
        self.state()
            .fee
            .map(|base_fee| FeeData { base_fee })
            .ok_or_else(|| SourceError::Transport("eth_gasPrice unavailable".to_string()))
    }

    async fn get_block_height(&self) -> Result<u64, SourceError> {
        self.calls.probe.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state();
        if !state.probe_ok {
            return Err(SourceError::Transport("probe failed".to_string()));
        }
        state.block_height += 1;
        Ok(state.block_height)
    }

    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError> {
        let n = self.calls.submit.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state();
        if let Some(err) = state.submit_error.clone() {
            return Err(err);
        }
        state.submitted.push(request.clone());
        Ok(Receipt {
            id: format!("0x{:064x}", n),
            submitted_at: OffsetDateTime::now_utc(),
        })
    }

    async fn await_confirmation(
        &self,
        _receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError> {
        self.calls.confirm.fetch_add(1, Ordering::SeqCst);
        let (confirmation, delay) = {
            let state = self.state();
            (state.confirmation.clone(), state.confirmation_delay)
        };

        let resolved = async move {
            tokio::time::sleep(delay).await;
            match confirmation {
                MockConfirmation::Confirm(cost) => Confirmation::Confirmed { cost: Some(cost) },
                MockConfirmation::Revert(reason) => Confirmation::Reverted { reason },
                MockConfirmation::Never => std::future::pending().await,
            }
        };

        tokio::time::timeout(timeout, resolved)
            .await
            .map_err(|_| SourceError::Timeout {
                operation: "await_confirmation",
                after_ms: timeout.as_millis() as u64,
            })
    }
}

#[async_trait]
impl SettlementTransport for MockChain {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError> {
        ChainClient::submit(self, request).await
    }

    async fn await_confirmation(
        &self,
        receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError> {
        ChainClient::await_confirmation(self, receipt, timeout).await
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    live: HashMap<String, MockChain>,
    attempts: HashMap<String, Vec<Instant>>,
}

/// Connector with per-endpoint accept/refuse behavior.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl MockConnector {
    /// A connector that refuses every endpoint until told otherwise.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ConnectorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept connections to `endpoint_id`, serving `chain`.
    pub fn accept(&self, endpoint_id: &str, chain: MockChain) {
        self.state().live.insert(endpoint_id.to_string(), chain);
    }

    /// Refuse connections to `endpoint_id`.
    pub fn refuse(&self, endpoint_id: &str) {
        self.state().live.remove(endpoint_id);
    }

    /// Connection attempts made against `endpoint_id`.
    pub fn attempts(&self, endpoint_id: &str) -> usize {
        self.state().attempts.get(endpoint_id).map_or(0, Vec::len)
    }

    /// Time between consecutive attempts against `endpoint_id`.
    pub fn round_gaps(&self, endpoint_id: &str) -> Vec<Duration> {
        self.state()
            .attempts
            .get(endpoint_id)
            .map(|times| times.windows(2).map(|w| w[1] - w[0]).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainClient>, SourceError> {
        let mut state = self.state();
        state
            .attempts
            .entry(endpoint.id.clone())
            .or_default()
            .push(Instant::now());

        match state.live.get(&endpoint.id) {
            // A fresh Arc per connection, so handles from different
            // connections are distinguishable.
            Some(chain) => Ok(Arc::new(chain.clone())),
            None => Err(SourceError::Refused {
                endpoint: endpoint.id.clone(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}
