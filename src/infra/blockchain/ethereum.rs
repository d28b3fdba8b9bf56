//! Ethereum JSON-RPC client.
//!
//! Confirmations are derived from the receipt: `eth_blockNumber` minus the
//! receipt's block number, zero while the transaction is still pending.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::domain::{AppError, BlockchainError, ChainClient, ChainTransaction, TxLog};

use super::{DEFAULT_HTTP_TIMEOUT, build_http_client, map_request_error, map_status_error};

/// Configuration for [`EthereumClient`]
#[derive(Debug, Clone)]
pub struct EthereumClientConfig {
    pub rpc_url: String,
    pub timeout: Duration,
}

impl EthereumClientConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<T: Serialize> {
    jsonrpc: &'static str,
    id: u64,
    method: &'static str,
    params: T,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcTransaction {
    hash: String,
    #[serde(default)]
    to: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    block_number: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    contract_address: Option<String>,
    #[serde(default)]
    logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
struct RpcLog {
    address: String,
}

/// Parse a JSON-RPC hex quantity such as `0x1b4`
pub fn parse_quantity(value: &str) -> Result<u64, AppError> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .ok_or_else(|| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!(
                "quantity without 0x prefix: {value}"
            )))
        })?;
    u64::from_str_radix(digits, 16).map_err(|e| {
        AppError::Blockchain(BlockchainError::InvalidResponse(format!(
            "bad quantity {value}: {e}"
        )))
    })
}

/// Read-only Ethereum client
pub struct EthereumClient {
    http_client: Client,
    rpc_url: String,
}

impl EthereumClient {
    pub fn new(config: EthereumClientConfig) -> Result<Self, AppError> {
        Ok(Self {
            http_client: build_http_client(config.timeout)?,
            rpc_url: config.rpc_url,
        })
    }

    /// A `null` result comes back as `None`
    async fn call<P: Serialize + Send + Sync, T: DeserializeOwned>(
        &self,
        method: &'static str,
        params: P,
    ) -> Result<Option<T>, AppError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 1,
            method,
            params,
        };
        debug!(method, "Sending JSON-RPC request");

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, method, body));
        }

        let rpc_response: JsonRpcResponse<T> = response.json().await.map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!("{method}: {e}")))
        })?;

        if let Some(error) = rpc_response.error {
            return Err(AppError::Blockchain(BlockchainError::RpcError(format!(
                "{}: {}",
                error.code, error.message
            ))));
        }
        Ok(rpc_response.result)
    }

    async fn block_number(&self) -> Result<u64, AppError> {
        let hex: String = self
            .call("eth_blockNumber", Vec::<String>::new())
            .await?
            .ok_or_else(|| {
                AppError::Blockchain(BlockchainError::InvalidResponse(
                    "eth_blockNumber returned null".to_string(),
                ))
            })?;
        parse_quantity(&hex)
    }
}

#[async_trait]
impl ChainClient for EthereumClient {
    fn chain(&self) -> &'static str {
        "ethereum"
    }

    #[instrument(skip(self))]
    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<ChainTransaction, AppError> {
        let tx: RpcTransaction = self
            .call("eth_getTransactionByHash", [tx_hash])
            .await?
            .ok_or_else(|| AppError::Blockchain(BlockchainError::NotFound(tx_hash.to_string())))?;

        let receipt: Option<RpcReceipt> = self.call("eth_getTransactionReceipt", [tx_hash]).await?;
        let Some(receipt) = receipt.filter(|r| r.block_number.is_some()) else {
            debug!("Transaction not mined yet");
            return Ok(ChainTransaction {
                hash: tx.hash,
                to: tx.to,
                ..Default::default()
            });
        };

        let mined_at = parse_quantity(receipt.block_number.as_deref().unwrap_or("0x0"))?;
        let current = self.block_number().await?;
        let logs: Vec<TxLog> = receipt
            .logs
            .into_iter()
            .map(|log| TxLog {
                address: log.address,
            })
            .collect();

        Ok(ChainTransaction {
            hash: tx.hash,
            confirmations: current.saturating_sub(mined_at),
            lock_time: None,
            to: tx.to,
            receipt_status: Some(receipt.status.as_deref() == Some("0x1")),
            logs,
            asset: receipt.contract_address,
        })
    }

    async fn current_block_height(&self) -> Result<u64, AppError> {
        self.block_number().await
    }

    /// Hex addresses are compared case-insensitively (EIP-55 checksums vary case)
    fn addresses_match(&self, expected: &str, actual: &str) -> bool {
        expected.eq_ignore_ascii_case(actual)
    }
}
