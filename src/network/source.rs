//! Interfaces to the chain.
//!
//! The rest of the agent only talks to the chain through these traits, so the
//! JSON-RPC client and the in-memory test chain are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::U256;
use async_trait::async_trait;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use super::endpoint::Endpoint;
use crate::error::SourceError;
use crate::scanner::{TradingPair, Venue};
use crate::settlement::SettlementRequest;

/// Base fee estimate returned by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeData {
    /// Fee per unit of execution, in the chain's smallest unit.
    pub base_fee: U256,
}

/// Acknowledgement of a submitted settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    /// Transaction hash or relay bundle id.
    pub id: String,
    /// When the submission was acknowledged.
    pub submitted_at: OffsetDateTime,
}

/// Terminal state of a submitted settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    /// Included and succeeded.
    Confirmed {
        /// Total fee paid, if reported.
        cost: Option<U256>,
    },
    /// Included and reverted, or explicitly dropped.
    Reverted {
        /// Reason reported by the chain.
        reason: String,
    },
}

/// Price, fee and settlement calls against one endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Quote-token price of one base token on `venue`.
    async fn get_price(&self, pair: &TradingPair, venue: &Venue) -> Result<Decimal, SourceError>;

    /// Current base fee estimate.
    async fn get_fee_estimate(&self) -> Result<FeeData, SourceError>;

    /// Latest block height. Used as the liveness probe.
    async fn get_block_height(&self) -> Result<u64, SourceError>;

    /// Submit a settlement request.
    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError>;

    /// Wait up to `timeout` for the settlement to reach a terminal state.
    async fn await_confirmation(
        &self,
        receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError>;
}

/// Opens clients for endpoints.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Create a client bound to `endpoint`. The caller verifies liveness.
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainClient>, SourceError>;
}

/// Submission path for settlements.
///
/// Direct submission goes through the active endpoint; the protected relay
/// implements the same contract.
#[async_trait]
pub trait SettlementTransport: Send + Sync {
    /// Name for logs.
    fn label(&self) -> String;

    /// Submit a settlement request.
    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError>;

    /// Wait up to `timeout` for the settlement to reach a terminal state.
    async fn await_confirmation(
        &self,
        receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError>;
}

/// Handle to the active endpoint's client.
///
/// Cloning is cheap. A handle stays usable after the manager switches
/// endpoints; the manager only hands out handles that were live when issued.
#[derive(Clone)]
pub struct ConnectionHandle {
    /// Endpoint the client is bound to.
    pub endpoint_id: String,
    /// Client.
    pub client: Arc<dyn ChainClient>,
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("endpoint_id", &self.endpoint_id)
            .finish_non_exhaustive()
    }
}

impl ConnectionHandle {
    /// Whether both handles point at the same client instance.
    pub fn same_as(&self, other: &ConnectionHandle) -> bool {
        Arc::ptr_eq(&self.client, &other.client)
    }
}

#[async_trait]
impl SettlementTransport for ConnectionHandle {
    fn label(&self) -> String {
        format!("direct:{}", self.endpoint_id)
    }

    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError> {
        self.client.submit(request).await
    }

    async fn await_confirmation(
        &self,
        receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError> {
        self.client.await_confirmation(receipt, timeout).await
    }
}
