//! Unified error types for the arbitrage agent.

use thiserror::Error;

/// Unified error type for the arbitrage agent.
#[derive(Error, Debug)]
pub enum BotError {
    /// Configuration loading error.
    #[error("configuration error: {0}")]
    Config(#[from] envy::Error),

    /// Configuration values present but unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    /// Endpoint pool error.
    #[error("network error: {0}")]
    Network(#[from] NetworkError),

    /// Single remote call failure.
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    /// Detection error.
    #[error("scan error: {0}")]
    Scan(#[from] ScanError),

    /// Settlement error.
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),

    /// Signing error.
    #[error("signing error: {0}")]
    Signing(#[from] SigningError),

    /// HTTP request error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration parsing and validation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A list entry could not be parsed.
    #[error("{field}: cannot parse entry '{value}': {reason}")]
    Parse {
        /// Environment variable name.
        field: &'static str,
        /// Offending entry.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A value is out of its allowed range or inconsistent with another.
    #[error("{0}")]
    Invalid(String),
}

/// Endpoint pool errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkError {
    /// Every endpoint was tried for the configured number of rounds.
    #[error("network unavailable: all endpoints exhausted after {attempts} attempts")]
    NetworkUnavailable {
        /// Connection rounds made before giving up.
        attempts: u32,
    },

    /// The manager was built without any endpoints.
    #[error("no endpoints configured")]
    NoEndpoints,
}

impl NetworkError {
    /// Whether this error ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NetworkUnavailable { .. } | Self::NoEndpoints)
    }
}

/// Failure of a single request against one endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// No response within the caller-supplied timeout.
    #[error("{operation} timed out after {after_ms}ms")]
    Timeout {
        /// Name of the timed-out call.
        operation: &'static str,
        /// Timeout that elapsed.
        after_ms: u64,
    },

    /// Transport-level failure (connection refused, reset, TLS).
    #[error("transport failure: {0}")]
    Transport(String),

    /// Endpoint refused the connection attempt.
    #[error("endpoint {endpoint} refused connection: {reason}")]
    Refused {
        /// Endpoint identifier.
        endpoint: String,
        /// Reason reported by the connector.
        reason: String,
    },

    /// JSON-RPC error object returned by the node.
    #[error("rpc error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code.
        code: i64,
        /// JSON-RPC error message.
        message: String,
    },

    /// Response could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Signing the outbound request failed.
    #[error("request signing failed: {0}")]
    Signing(#[from] SigningError),
}

impl SourceError {
    /// Whether the failure points at the endpoint itself rather than the request.
    ///
    /// Only these failures should cause the active connection to be dropped.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport(_) | Self::Refused { .. }
        )
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Opportunity detection errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// Price query for one pair failed; the pair is skipped this tick.
    #[error("query skipped for {pair} on {venue}: {reason}")]
    QuerySkipped {
        /// Pair symbol.
        pair: String,
        /// Venue name.
        venue: String,
        /// Underlying failure.
        reason: String,
    },

    /// Every configured pair was skipped in one pass.
    #[error("all {pairs} pairs skipped this pass")]
    AllPairsSkipped {
        /// Number of pairs attempted.
        pairs: usize,
    },

    /// Endpoint pool failure.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

impl ScanError {
    /// Whether this error ends the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Network(e) if e.is_fatal())
    }
}

/// Fee estimation errors. Never surfaced to callers of the oracle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeeError {
    /// Fee estimate could not be obtained; the configured default is used.
    #[error("fee unavailable: {0}")]
    FeeUnavailable(String),
}

/// Settlement errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// Opportunity is stale, below threshold or incomplete.
    #[error("invalid opportunity: {0}")]
    InvalidOpportunity(String),

    /// Settlement was explicitly rejected or reverted.
    #[error("settlement failed: {reason}")]
    SettlementFailed {
        /// Rejection or revert reason.
        reason: String,
    },

    /// No confirmation within the horizon. Outcome unknown.
    #[error("settlement {receipt_id} not confirmed within {waited_s}s")]
    SettlementTimeout {
        /// Receipt identifier that was awaited.
        receipt_id: String,
        /// Seconds waited.
        waited_s: u64,
    },

    /// Another settlement is in flight.
    #[error("executor busy")]
    ExecutorBusy,

    /// Endpoint pool failure while settling.
    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Signing and key handling errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    /// Private key is not valid hex or has the wrong length.
    #[error("invalid private key: {0}")]
    InvalidKey(String),

    /// Signer failed to produce a signature.
    #[error("failed to sign: {0}")]
    SignFailed(String),

    /// Signer cache lock was poisoned.
    #[error("signer cache unavailable: {0}")]
    Cache(String),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, BotError>;
