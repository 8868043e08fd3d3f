//! Shared orchestrator state and the status snapshot built from it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use serde::Serialize;
use time::OffsetDateTime;

use crate::scanner::{Opportunity, OpportunitySummary};
use crate::settlement::{ExecutionResult, ExecutionStatus, OutcomeRecord, SingleFlight};

/// Run flag, cumulative counters and the single-flight guard.
///
/// One instance lives for the whole process and is shared by the loop, the
/// executor and the status API.
#[derive(Debug, Default)]
pub struct OrchestratorState {
    running: AtomicBool,
    ticks: AtomicU64,
    found: AtomicU64,
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    busy: AtomicU64,
    invalid: AtomicU64,
    errors: AtomicU64,
    last_opportunity: RwLock<Option<OpportunitySummary>>,
    last_outcome: RwLock<Option<OutcomeRecord>>,
    last_error: RwLock<Option<String>>,
    terminal: RwLock<Option<String>>,
    started_at: RwLock<Option<OffsetDateTime>>,
    flight: SingleFlight,
}

/// Read-only view for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub running: bool,
    /// Why the loop can no longer run, once it can't.
    pub terminal: Option<String>,
    pub in_flight: bool,
    pub ticks: u64,
    pub opportunities_found: u64,
    pub opportunities_executed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub busy_skips: u64,
    pub invalid: u64,
    pub errors: u64,
    pub last_opportunity: Option<OpportunitySummary>,
    pub last_outcome: Option<OutcomeRecord>,
    pub last_error: Option<String>,
    /// Seconds since the last start, while running.
    pub uptime_s: Option<i64>,
}

impl StatusSnapshot {
    /// Successful settlements as a percentage of attempted ones.
    pub fn success_rate(&self) -> f64 {
        if self.opportunities_executed == 0 {
            0.0
        } else {
            self.succeeded as f64 / self.opportunities_executed as f64 * 100.0
        }
    }
}

impl OrchestratorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Guard shared with the executor.
    pub fn flight(&self) -> &SingleFlight {
        &self.flight
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        *write(&self.started_at) = running.then(OffsetDateTime::now_utc);
    }

    pub fn terminal(&self) -> Option<String> {
        read(&self.terminal).clone()
    }

    pub(crate) fn set_terminal(&self, reason: String) {
        *write(&self.terminal) = Some(reason);
    }

    pub(crate) fn record_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count a detection pass. `opportunities` is ranked; the first is kept.
    pub(crate) fn record_found(&self, opportunities: &[Opportunity]) {
        if let Some(best) = opportunities.first() {
            self.found.fetch_add(opportunities.len() as u64, Ordering::Relaxed);
            *write(&self.last_opportunity) = Some(best.summary());
        }
    }

    pub(crate) fn record_result(&self, result: &ExecutionResult) {
        match result {
            ExecutionResult::Busy => {
                self.busy.fetch_add(1, Ordering::Relaxed);
            }
            ExecutionResult::Invalid { .. } => {
                self.invalid.fetch_add(1, Ordering::Relaxed);
            }
            ExecutionResult::Completed(outcome) => {
                self.executed.fetch_add(1, Ordering::Relaxed);
                let counter = match outcome.status {
                    ExecutionStatus::Success => &self.succeeded,
                    ExecutionStatus::Failed => &self.failed,
                    ExecutionStatus::Timeout => &self.timeouts,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                *write(&self.last_outcome) = Some(outcome.record());
            }
        }
    }

    pub(crate) fn record_error(&self, error: impl ToString) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        *write(&self.last_error) = Some(error.to_string());
    }

    /// Consistent-enough snapshot; counters are read individually.
    pub fn snapshot(&self) -> StatusSnapshot {
        let running = self.is_running();
        let uptime_s = (*read(&self.started_at))
            .filter(|_| running)
            .map(|at| (OffsetDateTime::now_utc() - at).whole_seconds());

        StatusSnapshot {
            running,
            terminal: self.terminal(),
            in_flight: self.flight.is_held(),
            ticks: self.ticks.load(Ordering::Relaxed),
            opportunities_found: self.found.load(Ordering::Relaxed),
            opportunities_executed: self.executed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            busy_skips: self.busy.load(Ordering::Relaxed),
            invalid: self.invalid.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_opportunity: read(&self.last_opportunity).clone(),
            last_outcome: read(&self.last_outcome).clone(),
            last_error: read(&self.last_error).clone(),
            uptime_s,
        }
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}
