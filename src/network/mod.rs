//! Remote endpoints: failover, JSON-RPC transport and the protected relay.

pub mod backoff;
pub mod endpoint;
pub mod manager;
pub mod mock;
pub mod relay;
pub mod rpc;
pub mod source;

pub use backoff::BackoffPolicy;
pub use endpoint::{Endpoint, EndpointHealth, EndpointSnapshot};
pub use manager::{ConnectionState, EndpointManager, EndpointSettings};
pub use relay::ProtectedRelay;
pub use rpc::{JsonRpcClient, RpcConnector, RpcSettings};
pub use source::{
    ChainClient, Confirmation, ConnectionHandle, Connector, FeeData, Receipt, SettlementTransport,
};
