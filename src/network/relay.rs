//! Protected submission through a private relay.
//!
//! The relay speaks the same JSON-RPC dialect as a public endpoint; every
//! request body is signed so the relay can attribute it. Whatever the relay
//! does to keep the transaction private is its own business.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use url::Url;

use super::rpc::{JsonRpcClient, RpcSettings};
use super::source::{ChainClient, Confirmation, Receipt, SettlementTransport};
use crate::error::SourceError;
use crate::settlement::SettlementRequest;

/// Settlement transport that submits and confirms through a signed relay.
#[derive(Debug)]
pub struct ProtectedRelay {
    client: JsonRpcClient,
}

impl ProtectedRelay {
    /// Relay at `url`, signing with `private_key`.
    pub fn new(http: reqwest::Client, url: Url, private_key: String, settings: RpcSettings) -> Self {
        let label = format!("relay:{}", url.host_str().unwrap_or("unknown"));
        Self {
            client: JsonRpcClient::new(http, url, label, settings).with_signing_key(private_key),
        }
    }
}

#[async_trait]
impl SettlementTransport for ProtectedRelay {
    fn label(&self) -> String {
        self.client.label().to_string()
    }

    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError> {
        let receipt = self.client.submit(request).await?;
        info!(relay = %self.client.label(), receipt = %receipt.id, "Settlement handed to relay");
        Ok(receipt)
    }

    async fn await_confirmation(
        &self,
        receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError> {
        self.client.await_confirmation(receipt, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::Address;

    #[test]
    fn label_names_relay_host() {
        let relay = ProtectedRelay::new(
            reqwest::Client::new(),
            Url::parse("https://relay.example.org/rpc").unwrap(),
            "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef".to_string(),
            RpcSettings {
                settlement_contract: Address::ZERO,
                from: None,
                poll_interval: Duration::from_secs(1),
            },
        );
        assert_eq!(relay.label(), "relay:relay.example.org");
    }
}
