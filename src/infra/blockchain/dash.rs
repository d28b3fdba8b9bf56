//! Dash client backed by the ChainRider REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::domain::{
    AppError, BlockchainError, ChainClient, ChainTransaction, ForwardedTransaction,
    PaymentForwardSource,
};

use super::{DEFAULT_HTTP_TIMEOUT, build_http_client, map_request_error, map_status_error};

/// ChainRider Dash testnet endpoint
pub const DEFAULT_DASH_API_URL: &str = "https://api.chainrider.io/v1/dash/testnet";

/// Configuration for [`DashClient`]
#[derive(Debug)]
pub struct DashClientConfig {
    pub base_url: String,
    pub token: SecretString,
    pub timeout: Duration,
}

impl DashClientConfig {
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    txid: String,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    locktime: u64,
    #[serde(default)]
    vout: Vec<TxOutput>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxOutput {
    #[serde(default)]
    script_pub_key: Option<ScriptPubKey>,
}

#[derive(Debug, Deserialize)]
struct ScriptPubKey {
    #[serde(default)]
    addresses: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LastBlockHashResponse {
    lastblockhash: String,
}

#[derive(Debug, Deserialize)]
struct BlockResponse {
    height: u64,
}

#[derive(Debug, Deserialize)]
struct PaymentForwardResponse {
    #[serde(default)]
    processed_txs: Vec<ProcessedTx>,
}

#[derive(Debug, Deserialize)]
struct ProcessedTx {
    transaction_hash: String,
    received_amount_duffs: u64,
}

/// Read-only Dash client
pub struct DashClient {
    http_client: Client,
    base_url: String,
    token: SecretString,
}

impl DashClient {
    pub fn new(config: DashClientConfig) -> Result<Self, AppError> {
        Ok(Self {
            http_client: build_http_client(config.timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        what: &str,
    ) -> Result<T, AppError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Calling ChainRider");

        let response = self
            .http_client
            .get(&url)
            .query(&[("token", self.token.expose_secret())])
            .query(query)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status_error(status, what, body));
        }

        response.json::<T>().await.map_err(|e| {
            AppError::Blockchain(BlockchainError::InvalidResponse(format!("{what}: {e}")))
        })
    }
}

#[async_trait]
impl ChainClient for DashClient {
    fn chain(&self) -> &'static str {
        "dash"
    }

    #[instrument(skip(self))]
    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<ChainTransaction, AppError> {
        let tx: TxResponse = self
            .get(&format!("/tx/{tx_hash}"), &[], &format!("transaction {tx_hash}"))
            .await?;

        let to = tx
            .vout
            .iter()
            .filter_map(|out| out.script_pub_key.as_ref())
            .flat_map(|script| script.addresses.iter())
            .next()
            .cloned();

        Ok(ChainTransaction {
            hash: tx.txid,
            confirmations: tx.confirmations,
            lock_time: Some(tx.locktime),
            to,
            ..Default::default()
        })
    }

    /// Height of the block behind the last block hash
    async fn current_block_height(&self) -> Result<u64, AppError> {
        let last: LastBlockHashResponse = self
            .get("/status", &[("q", "getLastBlockHash")], "last block hash")
            .await?;
        let block: BlockResponse = self
            .get(
                &format!("/block/{}", last.lastblockhash),
                &[],
                &format!("block {}", last.lastblockhash),
            )
            .await?;
        Ok(block.height)
    }
}

#[async_trait]
impl PaymentForwardSource for DashClient {
    #[instrument(skip(self))]
    async fn forwarded_transactions(
        &self,
        payment_forward_id: &str,
    ) -> Result<Vec<ForwardedTransaction>, AppError> {
        let forward: PaymentForwardResponse = self
            .get(
                &format!("/paymentforward/{payment_forward_id}"),
                &[],
                &format!("payment forward {payment_forward_id}"),
            )
            .await?;

        Ok(forward
            .processed_txs
            .into_iter()
            .map(|tx| ForwardedTransaction {
                tx_hash: tx.transaction_hash,
                amount_duffs: tx.received_amount_duffs,
            })
            .collect())
    }
}
