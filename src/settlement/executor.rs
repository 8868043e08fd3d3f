//! Settlement execution.
//!
//! This module handles:
//! - The single-flight guard: at most one settlement in progress
//! - Re-validating an opportunity before it costs anything
//! - Submitting through the direct or protected path
//! - Bounded confirmation waits with three terminal outcomes
//!
//! Nothing here retries. A failed or timed-out settlement is final; the next
//! detection pass may surface a fresh opportunity instead.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::outcome::{ExecutionOutcome, ExecutionStatus, OutcomeSink};
use super::request::SettlementRequest;
use crate::error::{NetworkError, SettlementError, SourceError};
use crate::fee::{FeeOracle, Urgency};
use crate::metrics;
use crate::network::{Confirmation, ConnectionHandle, EndpointManager, Receipt, SettlementTransport};
use crate::scanner::Opportunity;

/// Executor settings.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Oldest opportunity that may still be settled.
    pub max_staleness: Duration,
    /// Spread the opportunity must still clear.
    pub min_spread: Decimal,
    /// Trade size in base-token units.
    pub trade_size: Decimal,
    /// Fraction subtracted from the spread when computing minimum output.
    pub slippage_tolerance: Decimal,
    /// Settlement deadline, relative to submission.
    pub deadline_horizon: Duration,
    /// How long to wait for confirmation.
    pub confirmation_timeout: Duration,
    /// Timeout for the submit call.
    pub request_timeout: Duration,
    /// Base gas limit.
    pub gas_limit: u64,
    /// Multiplier applied to `gas_limit`.
    pub gas_limit_multiplier: Decimal,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            max_staleness: Duration::from_secs(30),
            min_spread: Decimal::new(5, 3),
            trade_size: Decimal::ONE,
            slippage_tolerance: Decimal::new(2, 3),
            deadline_horizon: Duration::from_secs(300),
            confirmation_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
            gas_limit: 500_000,
            gas_limit_multiplier: Decimal::new(12, 1),
        }
    }
}

/// Shared single-flight flag.
///
/// Cloning shares the flag, so the orchestrator and the executor observe the
/// same state.
#[derive(Debug, Clone, Default)]
pub struct SingleFlight {
    held: Arc<AtomicBool>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the flag, or `None` if it is already held.
    pub fn try_acquire(&self) -> Option<FlightGuard> {
        self.held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                held: Arc::clone(&self.held),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::Acquire)
    }
}

/// Releases the single-flight flag on drop, including on early return and panic.
#[derive(Debug)]
pub struct FlightGuard {
    held: Arc<AtomicBool>,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.held.store(false, Ordering::Release);
    }
}

/// Result of `execute`.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionResult {
    /// Another settlement was in flight. Nothing was done.
    Busy,
    /// Opportunity failed re-validation. Nothing was sent.
    Invalid {
        /// Why it was rejected.
        reason: String,
    },
    /// A settlement was attempted and reached a terminal status.
    Completed(ExecutionOutcome),
}

/// Where settlements are submitted.
#[derive(Clone)]
pub enum SubmissionRoute {
    /// Through the active endpoint.
    Direct,
    /// Through a separate transport with the same contract.
    Protected(Arc<dyn SettlementTransport>),
}

impl std::fmt::Debug for SubmissionRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubmissionRoute::Direct => f.write_str("Direct"),
            SubmissionRoute::Protected(t) => write!(f, "Protected({})", t.label()),
        }
    }
}

/// Settles opportunities one at a time.
pub struct SettlementExecutor {
    manager: Arc<EndpointManager>,
    oracle: Arc<FeeOracle>,
    flight: SingleFlight,
    route: SubmissionRoute,
    settings: ExecutorSettings,
    sinks: Vec<Arc<dyn OutcomeSink>>,
}

impl SettlementExecutor {
    /// Create an executor. Every outcome is appended to each of `sinks`.
    pub fn new(
        manager: Arc<EndpointManager>,
        oracle: Arc<FeeOracle>,
        flight: SingleFlight,
        route: SubmissionRoute,
        settings: ExecutorSettings,
        sinks: Vec<Arc<dyn OutcomeSink>>,
    ) -> Self {
        Self {
            manager,
            oracle,
            flight,
            route,
            settings,
            sinks,
        }
    }

    /// Whether a settlement is in flight.
    pub fn is_busy(&self) -> bool {
        self.flight.is_held()
    }

    /// Settle `opportunity`.
    ///
    /// Returns `Busy` immediately if a settlement is in flight and `Invalid`
    /// without touching the network if re-validation fails. Fails only when
    /// the endpoint pool is unavailable for a direct submission.
    #[instrument(
        skip(self, opportunity),
        fields(pair = %opportunity.pair, buy = %opportunity.venue_buy, sell = %opportunity.venue_sell)
    )]
    pub async fn execute(&self, opportunity: &Opportunity) -> Result<ExecutionResult, NetworkError> {
        let Some(_guard) = self.flight.try_acquire() else {
            metrics::inc_executor_busy();
            info!("Settlement in flight, skipping");
            return Ok(ExecutionResult::Busy);
        };

        if let Err(e) = self.validate(opportunity, OffsetDateTime::now_utc()) {
            metrics::inc_opportunities_invalid();
            info!(reason = %e, "Opportunity discarded");
            return Ok(ExecutionResult::Invalid { reason: e.to_string() });
        }

        let fee = self.oracle.quote(Urgency::High).await;
        let request = SettlementRequest::build(opportunity, fee, &self.settings, OffsetDateTime::now_utc());

        let (transport, direct): (Arc<dyn SettlementTransport>, Option<ConnectionHandle>) = match &self.route {
            SubmissionRoute::Direct => {
                let handle = self.manager.get_connection().await?;
                (Arc::new(handle.clone()), Some(handle))
            }
            SubmissionRoute::Protected(transport) => (Arc::clone(transport), None),
        };

        let outcome = self
            .settle(opportunity, &request, transport.as_ref(), direct.as_ref())
            .await;

        metrics::inc_settlements(outcome.status.as_ref());
        let record = outcome.record();
        for sink in &self.sinks {
            if let Err(e) = sink.append(&record).await {
                warn!(error = %e, "Failed to append outcome");
            }
        }

        Ok(ExecutionResult::Completed(outcome))
    }

    /// Staleness, threshold and completeness checks.
    fn validate(&self, opportunity: &Opportunity, now: OffsetDateTime) -> Result<(), SettlementError> {
        let invalid = |msg: String| Err(SettlementError::InvalidOpportunity(msg));

        let age = now - opportunity.observed_at;
        if age > self.settings.max_staleness {
            return invalid(format!(
                "stale: observed {}s ago, limit {}s",
                age.whole_seconds(),
                self.settings.max_staleness.as_secs()
            ));
        }
        if opportunity.spread_ratio < self.settings.min_spread {
            return invalid(format!(
                "spread {} below {}",
                opportunity.spread_ratio, self.settings.min_spread
            ));
        }
        if opportunity.estimated_profit <= Decimal::ZERO {
            return invalid(format!("estimated profit {} not positive", opportunity.estimated_profit));
        }
        if opportunity.price_buy <= Decimal::ZERO || opportunity.price_sell <= opportunity.price_buy {
            return invalid(format!(
                "prices out of order: buy {} sell {}",
                opportunity.price_buy, opportunity.price_sell
            ));
        }
        if opportunity.venue_buy.name == opportunity.venue_sell.name {
            return invalid(format!("same venue on both legs: {}", opportunity.venue_buy));
        }
        Ok(())
    }

    async fn settle(
        &self,
        opportunity: &Opportunity,
        request: &SettlementRequest,
        transport: &dyn SettlementTransport,
        direct: Option<&ConnectionHandle>,
    ) -> ExecutionOutcome {
        let _timer = metrics::timer_settlement();
        let route = transport.label();
        let finish = |status, cost: Option<U256>, detail: Option<String>, receipt_id: Option<String>| {
            ExecutionOutcome {
                opportunity: opportunity.clone(),
                status,
                cost,
                error_detail: detail,
                receipt_id,
                route: route.clone(),
                completed_at: OffsetDateTime::now_utc(),
            }
        };

        info!(
            route = %route,
            trade_size = %request.trade_size,
            min_output = %request.min_output,
            max_fee = %request.max_fee,
            gas_limit = request.gas_limit,
            "Submitting settlement"
        );

        let submitted = match tokio::time::timeout(self.settings.request_timeout, transport.submit(request)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                operation: "submit",
                after_ms: self.settings.request_timeout.as_millis() as u64,
            }),
        };

        let receipt: Receipt = match submitted {
            Ok(receipt) => receipt,
            Err(e) => {
                self.report(direct, &e);
                // An unanswered submit may still have landed.
                let status = match e {
                    SourceError::Timeout { .. } => ExecutionStatus::Timeout,
                    _ => ExecutionStatus::Failed,
                };
                let detail = SettlementError::SettlementFailed { reason: e.to_string() };
                return finish(status, None, Some(detail.to_string()), None);
            }
        };
        metrics::inc_opportunities_executed();
        debug!(receipt = %receipt.id, "Awaiting confirmation");

        let wait = self.settings.confirmation_timeout;
        let confirmation = match tokio::time::timeout(wait, transport.await_confirmation(&receipt, wait)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                operation: "await_confirmation",
                after_ms: wait.as_millis() as u64,
            }),
        };

        let receipt_id = Some(receipt.id.clone());
        match confirmation {
            Ok(Confirmation::Confirmed { cost }) => finish(ExecutionStatus::Success, cost, None, receipt_id),
            Ok(Confirmation::Reverted { reason }) => {
                let detail = SettlementError::SettlementFailed { reason };
                finish(ExecutionStatus::Failed, None, Some(detail.to_string()), receipt_id)
            }
            Err(e) => {
                self.report(direct, &e);
                // Lost track of the settlement: the result is unknown either way.
                let detail = match e {
                    SourceError::Timeout { .. } => SettlementError::SettlementTimeout {
                        receipt_id: receipt.id.clone(),
                        waited_s: wait.as_secs(),
                    }
                    .to_string(),
                    other => format!("confirmation lost for {}: {}", receipt.id, other),
                };
                finish(ExecutionStatus::Timeout, None, Some(detail), receipt_id)
            }
        }
    }

    fn report(&self, direct: Option<&ConnectionHandle>, error: &SourceError) {
        // Confirmation timeouts say nothing about endpoint health.
        let endpoint_fault = error.is_transport() && !matches!(error, SourceError::Timeout { .. });
        if let (Some(handle), true) = (direct, endpoint_fault) {
            self.manager.report_failure(handle, error);
        }
    }
}
