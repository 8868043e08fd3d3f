//! Single-flight settlement of detected opportunities.

pub mod executor;
pub mod outcome;
pub mod request;

pub use executor::{
    ExecutionResult, ExecutorSettings, FlightGuard, SettlementExecutor, SingleFlight, SubmissionRoute,
};
pub use outcome::{
    ExecutionOutcome, ExecutionStatus, JsonLinesSink, MemorySink, OutcomeRecord, OutcomeSink, TracingSink,
};
pub use request::SettlementRequest;
