//! Ethereum JSON-RPC client.
//!
//! Prices come from `getAmountsOut` on each venue's router, fees from
//! `eth_gasPrice`, liveness from `eth_blockNumber`. Settlements are sent to
//! the settlement contract with `eth_sendTransaction` and confirmed by
//! polling `eth_getTransactionReceipt`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use time::OffsetDateTime;
use tracing::{debug, instrument, warn};
use url::Url;

use super::endpoint::Endpoint;
use super::source::{ChainClient, Confirmation, Connector, FeeData, Receipt};
use crate::error::SourceError;
use crate::metrics;
use crate::scanner::{TradingPair, Venue};
use crate::settlement::SettlementRequest;
use crate::signing::{self, RELAY_SIGNATURE_HEADER};
use crate::utils::{from_base_units, parse_hex_u256, parse_hex_u64, to_base_units};

sol! {
    function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts);

    function executeArbitrage(
        address base,
        address quote,
        address buyRouter,
        address sellRouter,
        uint256 amount,
        uint256 minAmountOut,
        uint256 deadline
    ) external;
}

fn hex_data(data: &[u8]) -> String {
    format!("0x{}", hex::encode(data))
}

/// Static settings shared by every client a connector creates.
#[derive(Debug, Clone)]
pub struct RpcSettings {
    /// Settlement contract receiving `executeArbitrage`.
    pub settlement_contract: Address,
    /// Sender account for `eth_sendTransaction`, if the node manages it.
    pub from: Option<Address>,
    /// Receipt polling interval.
    pub poll_interval: Duration,
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    status: Option<String>,
    gas_used: Option<String>,
    effective_gas_price: Option<String>,
}

/// JSON-RPC client bound to one URL.
#[derive(Debug)]
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: Url,
    label: String,
    settings: RpcSettings,
    /// Key signing every request body; set for the protected relay.
    signing_key: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    /// Client for `url`.
    pub fn new(http: reqwest::Client, url: Url, label: String, settings: RpcSettings) -> Self {
        Self {
            http,
            url,
            label,
            settings,
            signing_key: None,
            next_id: AtomicU64::new(1),
        }
    }

    /// Sign every request body with `private_key`.
    pub fn with_signing_key(mut self, private_key: String) -> Self {
        self.signing_key = Some(private_key);
        self
    }

    /// Label used in logs and metrics.
    pub fn label(&self) -> &str {
        &self.label
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<Option<T>, SourceError> {
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };
        let body = serde_json::to_vec(&request).map_err(|e| SourceError::Decode(e.to_string()))?;

        let mut builder = self
            .http
            .post(self.url.clone())
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(key) = &self.signing_key {
            let signature = signing::relay_signature_header(key, &body).await?;
            builder = builder.header(RELAY_SIGNATURE_HEADER, signature);
        }

        let start = Instant::now();
        let response = builder.body(body).send().await?;
        metrics::record_rpc_latency(start, method);

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Transport(format!("{} returned HTTP {}", method, status)));
        }

        let parsed: RpcResponse<T> = response.json().await?;
        if let Some(err) = parsed.error {
            return Err(SourceError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        Ok(parsed.result)
    }

    async fn call_required<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SourceError> {
        self.call(method, params)
            .await?
            .ok_or_else(|| SourceError::Decode(format!("{} returned no result", method)))
    }

    async fn eth_call(&self, to: Address, data: Vec<u8>) -> Result<Vec<u8>, SourceError> {
        let raw: String = self
            .call_required(
                "eth_call",
                json!([{ "to": to.to_string(), "data": hex_data(&data) }, "latest"]),
            )
            .await?;
        hex::decode(raw.trim_start_matches("0x")).map_err(|e| SourceError::Decode(e.to_string()))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, SourceError> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    fn settlement_calldata(request: &SettlementRequest) -> Result<Vec<u8>, SourceError> {
        let decimals = request.pair.base.decimals;
        let amount = to_base_units(request.trade_size, decimals)
            .ok_or_else(|| SourceError::Decode(format!("trade size {} out of range", request.trade_size)))?;
        let min_out = to_base_units(request.min_output, decimals)
            .ok_or_else(|| SourceError::Decode(format!("min output {} out of range", request.min_output)))?;
        let deadline = U256::from(request.deadline.unix_timestamp().max(0) as u64);

        Ok(executeArbitrageCall {
            base: request.pair.base.address,
            quote: request.pair.quote.address,
            buyRouter: request.venue_buy.router,
            sellRouter: request.venue_sell.router,
            amount,
            minAmountOut: min_out,
            deadline,
        }
        .abi_encode())
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    #[instrument(skip(self), fields(endpoint = %self.label))]
    async fn get_price(&self, pair: &TradingPair, venue: &Venue) -> Result<Decimal, SourceError> {
        let one_base = to_base_units(Decimal::ONE, pair.base.decimals)
            .ok_or_else(|| SourceError::Decode("base decimals out of range".to_string()))?;
        let call = getAmountsOutCall {
            amountIn: one_base,
            path: vec![pair.base.address, pair.quote.address],
        };

        let raw = self.eth_call(venue.router, call.abi_encode()).await?;
        let amounts = getAmountsOutCall::abi_decode_returns(&raw)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let out = amounts
            .last()
            .copied()
            .ok_or_else(|| SourceError::Decode("empty getAmountsOut result".to_string()))?;

        let price = from_base_units(out, pair.quote.decimals)
            .ok_or_else(|| SourceError::Decode(format!("price {} out of range", out)))?;
        debug!(pair = %pair, venue = %venue, price = %price, "Price read");
        Ok(price)
    }

    async fn get_fee_estimate(&self) -> Result<FeeData, SourceError> {
        let raw: String = self.call_required("eth_gasPrice", json!([])).await?;
        let base_fee = parse_hex_u256(&raw)
            .ok_or_else(|| SourceError::Decode(format!("bad gas price {}", raw)))?;
        Ok(FeeData { base_fee })
    }

    async fn get_block_height(&self) -> Result<u64, SourceError> {
        let raw: String = self.call_required("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&raw).ok_or_else(|| SourceError::Decode(format!("bad block number {}", raw)))
    }

    #[instrument(skip(self, request), fields(endpoint = %self.label, pair = %request.pair))]
    async fn submit(&self, request: &SettlementRequest) -> Result<Receipt, SourceError> {
        let data = Self::settlement_calldata(request)?;

        let mut tx = json!({
            "to": self.settings.settlement_contract.to_string(),
            "data": hex_data(&data),
            "gas": format!("{:#x}", request.gas_limit),
            "gasPrice": format!("{:#x}", request.max_fee),
        });
        if let Some(from) = self.settings.from {
            tx["from"] = json!(from.to_string());
        }

        let tx_hash: String = self.call_required("eth_sendTransaction", json!([tx])).await?;
        debug!(tx_hash = %tx_hash, "Settlement submitted");
        Ok(Receipt {
            id: tx_hash,
            submitted_at: OffsetDateTime::now_utc(),
        })
    }

    async fn await_confirmation(
        &self,
        receipt: &Receipt,
        timeout: Duration,
    ) -> Result<Confirmation, SourceError> {
        let poll_interval = self.settings.poll_interval;

        let poll = async {
            loop {
                match self.receipt(&receipt.id).await {
                    Ok(Some(tx)) => return Ok(tx),
                    Ok(None) => {}
                    // A flaky poll is not a verdict on the settlement.
                    Err(e) if e.is_transport() => {
                        warn!(tx_hash = %receipt.id, error = %e, "Receipt poll failed");
                    }
                    Err(e) => return Err(e),
                }
                tokio::time::sleep(poll_interval).await;
            }
        };

        let tx = tokio::time::timeout(timeout, poll)
            .await
            .map_err(|_| SourceError::Timeout {
                operation: "await_confirmation",
                after_ms: timeout.as_millis() as u64,
            })??;

        match tx.status.as_deref().and_then(parse_hex_u64) {
            Some(1) => {
                let cost = match (tx.gas_used.as_deref(), tx.effective_gas_price.as_deref()) {
                    (Some(used), Some(price)) => parse_hex_u256(used)
                        .zip(parse_hex_u256(price))
                        .map(|(used, price)| used.saturating_mul(price)),
                    _ => None,
                };
                Ok(Confirmation::Confirmed { cost })
            }
            Some(_) => Ok(Confirmation::Reverted {
                reason: "transaction reverted (status 0)".to_string(),
            }),
            None => Err(SourceError::Decode("receipt without status".to_string())),
        }
    }
}

/// Creates [`JsonRpcClient`]s sharing one HTTP connection pool.
#[derive(Debug, Clone)]
pub struct RpcConnector {
    http: reqwest::Client,
    settings: RpcSettings,
}

impl RpcConnector {
    /// Connector with a pooled HTTP client using `request_timeout`.
    pub fn new(request_timeout: Duration, settings: RpcSettings) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .pool_max_idle_per_host(4)
            .build()?;
        Ok(Self { http, settings })
    }

    /// Shared HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Shared client settings.
    pub fn settings(&self) -> &RpcSettings {
        &self.settings
    }
}

#[async_trait]
impl Connector for RpcConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn ChainClient>, SourceError> {
        Ok(Arc::new(JsonRpcClient::new(
            self.http.clone(),
            endpoint.url.clone(),
            endpoint.id.clone(),
            self.settings.clone(),
        )))
    }
}
