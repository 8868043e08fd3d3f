//! Cross-venue DEX arbitrage agent.
//!
//! Watches swap prices for configured pairs across venues, detects spreads
//! that remain profitable after venue fees and transaction cost, and settles
//! at most one of them at a time.
//!
//! # Flow
//!
//! ```text
//! Orchestrator tick
//!   └─ OpportunityScanner::detect   (cached prices, fee quote, ranking)
//!        └─ SettlementExecutor::execute(best)   (single-flight, spawned)
//!             └─ ExecutionOutcome -> outcome sinks
//! ```
//!
//! Both the scanner and the executor reach the chain through the
//! [`network::EndpointManager`], which fails over between ranked endpoints
//! and gives up for good after a configured number of backoff rounds.
//!
//! # Modules
//!
//! - [`config`]: Configuration loading from environment
//! - [`error`]: Unified error types
//! - [`cache`]: TTL cache with lazy eviction
//! - [`network`]: Endpoint failover, JSON-RPC client, protected relay
//! - [`fee`]: Fee oracle with urgency tiers
//! - [`scanner`]: Price sampling and opportunity detection
//! - [`settlement`]: Single-flight settlement and outcome sinks
//! - [`orchestrator`]: The fixed-interval loop and its status
//! - [`api`]: HTTP API for health, status, control and metrics
//! - [`metrics`]: Prometheus metrics
//! - [`signing`]: Relay request signing
//! - [`utils`]: Utility functions

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod fee;
pub mod metrics;
pub mod network;
pub mod orchestrator;
pub mod scanner;
pub mod settlement;
pub mod signing;
pub mod utils;

pub use config::Config;
pub use error::{BotError, Result};
