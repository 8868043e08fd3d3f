//! Fixed-interval detect/execute loop.
//!
//! Each tick runs one detection pass and hands the best opportunity to the
//! executor. Settlement runs as its own task so detection keeps its cadence
//! while a confirmation is pending; the executor's single-flight guard turns
//! any overlapping attempt into a busy skip.
//!
//! The loop ends on `stop` or when the endpoint pool is exhausted. Either way
//! it waits for an in-flight settlement to finish before returning.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{watch, Mutex};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, instrument, warn};

use super::state::{OrchestratorState, StatusSnapshot};
use crate::error::{NetworkError, ScanError};
use crate::metrics;
use crate::network::EndpointManager;
use crate::scanner::OpportunityScanner;
use crate::settlement::{ExecutionResult, SettlementExecutor};

/// Loop settings.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Pause after a failed tick.
    pub recovery_delay: Duration,
    /// Log a statistics summary every this many ticks.
    pub stats_every_ticks: u64,
    /// Interval of the endpoint health probe.
    pub health_probe_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            recovery_delay: Duration::from_secs(5),
            stats_every_ticks: 10,
            health_probe_interval: Duration::from_secs(30),
        }
    }
}

/// Why the loop returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// `stop` was called.
    Stopped,
    /// Every endpoint failed past the attempt ceiling. Terminal for the run.
    NetworkUnavailable(NetworkError),
}

type Settled = Result<Result<ExecutionResult, NetworkError>, JoinError>;

struct RunControl {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<LoopExit>,
}

/// Drives scanner and executor on a fixed interval.
pub struct Orchestrator {
    scanner: Arc<OpportunityScanner>,
    executor: Arc<SettlementExecutor>,
    manager: Arc<EndpointManager>,
    state: Arc<OrchestratorState>,
    settings: LoopSettings,
    control: Mutex<Option<RunControl>>,
    exit_tx: watch::Sender<Option<LoopExit>>,
}

impl Orchestrator {
    /// Create an orchestrator. The executor must have been built with
    /// `state.flight()` so status reports the guard it actually uses.
    pub fn new(
        scanner: Arc<OpportunityScanner>,
        executor: Arc<SettlementExecutor>,
        manager: Arc<EndpointManager>,
        state: Arc<OrchestratorState>,
        settings: LoopSettings,
    ) -> Self {
        let (exit_tx, _) = watch::channel(None);
        Self {
            scanner,
            executor,
            manager,
            state,
            settings,
            control: Mutex::new(None),
            exit_tx,
        }
    }

    /// Shared state.
    pub fn state(&self) -> &Arc<OrchestratorState> {
        &self.state
    }

    /// Current status.
    pub fn status(&self) -> StatusSnapshot {
        self.state.snapshot()
    }

    /// Start the loop. Returns `false` if it is already running or the run
    /// has reached its terminal state.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut control = self.control.lock().await;
        if control.as_ref().is_some_and(|c| !c.task.is_finished()) {
            return false;
        }
        if self.manager.is_exhausted() {
            warn!("Endpoints exhausted; refusing to start");
            return false;
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        self.exit_tx.send_replace(None);
        self.state.set_running(true);
        let task = tokio::spawn(Arc::clone(self).run_loop(stop_rx));
        *control = Some(RunControl { stop_tx, task });
        info!("Orchestrator started");
        true
    }

    /// Stop the loop and wait for it, including any in-flight settlement.
    /// Returns `None` if it was not running.
    pub async fn stop(&self) -> Option<LoopExit> {
        let control = self.control.lock().await.take()?;
        let _ = control.stop_tx.send(true);
        match control.task.await {
            Ok(exit) => Some(exit),
            Err(e) => {
                error!(error = %e, "Loop task failed");
                self.state.set_running(false);
                Some(LoopExit::Stopped)
            }
        }
    }

    /// Resolves once the loop exits because the network is unavailable.
    pub async fn wait_terminal(&self) -> LoopExit {
        let mut rx = self.exit_tx.subscribe();
        let exit = rx
            .wait_for(|exit| matches!(exit, Some(LoopExit::NetworkUnavailable(_))))
            .await
            .map(|exit| exit.clone());
        match exit {
            Ok(exit) => exit.unwrap_or(LoopExit::Stopped),
            // The sender lives as long as `self`.
            Err(_) => LoopExit::Stopped,
        }
    }

    async fn run_loop(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>) -> LoopExit {
        let (probe_stop_tx, probe_stop_rx) = watch::channel(false);
        let probe = self
            .manager
            .spawn_health_probe(self.settings.health_probe_interval, probe_stop_rx);

        let mut ticker = tokio::time::interval(self.settings.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut executions: JoinSet<Result<ExecutionResult, NetworkError>> = JoinSet::new();

        let mut exit = loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break LoopExit::Stopped,
                Some(settled) = executions.join_next(), if !executions.is_empty() => {
                    if let Some(exit) = self.settle(settled) {
                        break exit;
                    }
                }
                _ = ticker.tick() => {
                    if let Some(exit) = self.tick(&mut stop_rx, &mut executions).await {
                        break exit;
                    }
                }
            }
        };

        if !executions.is_empty() {
            info!(pending = executions.len(), "Waiting for in-flight settlement");
        }
        while let Some(settled) = executions.join_next().await {
            if let Some(fatal) = self.settle(settled) {
                exit = fatal;
            }
        }

        let _ = probe_stop_tx.send(true);
        let _ = probe.await;

        if let LoopExit::NetworkUnavailable(e) = &exit {
            let reason = e.to_string();
            error!(reason = %reason, "Loop halted");
            self.state.set_terminal(reason.clone());
            self.state.record_error(reason);
        }
        self.state.set_running(false);
        self.log_stats();
        info!(exit = ?exit, "Orchestrator stopped");
        self.exit_tx.send_replace(Some(exit.clone()));
        exit
    }

    /// One detection pass. Returns an exit reason when the loop must end.
    #[instrument(skip_all, fields(tick = tracing::field::Empty))]
    async fn tick(
        &self,
        stop_rx: &mut watch::Receiver<bool>,
        executions: &mut JoinSet<Result<ExecutionResult, NetworkError>>,
    ) -> Option<LoopExit> {
        let tick = self.state.record_tick();
        tracing::Span::current().record("tick", tick);

        let detected = tokio::select! {
            biased;
            _ = stop_rx.changed() => return Some(LoopExit::Stopped),
            detected = AssertUnwindSafe(self.scanner.detect()).catch_unwind() => detected,
        };

        let failure = match detected {
            Ok(Ok(opportunities)) => {
                self.state.record_found(&opportunities);
                if let Some(best) = opportunities.into_iter().next() {
                    let executor = Arc::clone(&self.executor);
                    executions.spawn(async move { executor.execute(&best).await });
                }
                None
            }
            Ok(Err(ScanError::Network(e))) if e.is_fatal() => {
                return Some(LoopExit::NetworkUnavailable(e));
            }
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(format!("detection panicked: {}", panic_message(&*panic))),
        };

        if tick % self.settings.stats_every_ticks.max(1) == 0 {
            self.log_stats();
        }

        if let Some(reason) = failure {
            metrics::inc_loop_errors();
            warn!(tick, error = %reason, "Tick failed");
            self.state.record_error(reason);
            tokio::select! {
                biased;
                _ = stop_rx.changed() => return Some(LoopExit::Stopped),
                _ = tokio::time::sleep(self.settings.recovery_delay) => {}
            }
        }
        None
    }

    /// Record a finished settlement task.
    fn settle(&self, settled: Settled) -> Option<LoopExit> {
        match settled {
            Ok(Ok(result)) => {
                self.state.record_result(&result);
                None
            }
            Ok(Err(e)) if e.is_fatal() => Some(LoopExit::NetworkUnavailable(e)),
            Ok(Err(e)) => {
                metrics::inc_loop_errors();
                warn!(error = %e, "Settlement aborted");
                self.state.record_error(e);
                None
            }
            Err(e) => {
                metrics::inc_loop_errors();
                error!(error = %e, "Settlement task failed");
                self.state.record_error(format!("settlement task failed: {}", e));
                None
            }
        }
    }

    fn log_stats(&self) {
        let s = self.state.snapshot();
        info!(
            uptime_s = s.uptime_s.unwrap_or(0),
            ticks = s.ticks,
            found = s.opportunities_found,
            executed = s.opportunities_executed,
            success_rate = %format_args!("{:.1}%", s.success_rate()),
            busy = s.busy_skips,
            errors = s.errors,
            cached_prices = self.scanner.cache_len(),
            connection = %self.manager.state(),
            "Statistics"
        );
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::fee::{FeeOracle, FeeSettings};
    use crate::network::mock::{MockChain, MockConnector};
    use crate::network::{Endpoint, EndpointSettings};
    use crate::scanner::types::fixtures;
    use crate::scanner::{NotionalSpreadPolicy, ScanSettings};
    use crate::settlement::{ExecutorSettings, MemorySink, OutcomeSink, SubmissionRoute};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use url::Url;

    /// Orchestrator wired to one mock endpoint.
    pub struct Stack {
        pub chain: MockChain,
        pub manager: Arc<EndpointManager>,
        pub orchestrator: Arc<Orchestrator>,
        pub sink: Arc<MemorySink>,
    }

    pub fn stack(connector: Arc<MockConnector>, chain: MockChain, max_attempts: u32) -> Stack {
        let endpoint = Endpoint::new("endpoint-0", Url::parse("http://node.local").unwrap(), 0);
        let mut endpoint_settings = EndpointSettings::default();
        endpoint_settings.backoff.max_attempts = max_attempts;
        let manager = Arc::new(EndpointManager::new(vec![endpoint], connector, endpoint_settings).unwrap());
        let oracle = Arc::new(FeeOracle::new(
            manager.clone(),
            FeeSettings {
                jitter_bps: 0,
                ..FeeSettings::default()
            },
        ));
        let scanner = Arc::new(OpportunityScanner::new(
            manager.clone(),
            oracle.clone(),
            vec![fixtures::pair()],
            vec![fixtures::venue("quickswap", 0xa1), fixtures::venue("sushiswap", 0xa2)],
            ScanSettings {
                min_spread: dec!(0.005),
                min_profit: Decimal::ZERO,
                trade_size: dec!(1),
                venue_fee_rate: dec!(0.003),
                sampling_interval: Duration::from_secs(5),
                request_timeout: Duration::from_secs(2),
            },
            Arc::new(NotionalSpreadPolicy::new(dec!(0.00000000001))),
        ));
        let state = Arc::new(OrchestratorState::new());
        let sink = Arc::new(MemorySink::new());
        let executor = Arc::new(SettlementExecutor::new(
            manager.clone(),
            oracle,
            state.flight().clone(),
            SubmissionRoute::Direct,
            ExecutorSettings::default(),
            vec![sink.clone() as Arc<dyn OutcomeSink>],
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            scanner,
            executor,
            manager.clone(),
            state,
            LoopSettings {
                tick_interval: Duration::from_secs(5),
                recovery_delay: Duration::from_secs(1),
                stats_every_ticks: 3,
                health_probe_interval: Duration::from_secs(30),
            },
        ));
        Stack {
            chain,
            manager,
            orchestrator,
            sink,
        }
    }

    pub fn healthy() -> Stack {
        let chain = MockChain::new();
        let connector = Arc::new(MockConnector::new());
        connector.accept("endpoint-0", chain.clone());
        stack(connector, chain, 3)
    }
}
