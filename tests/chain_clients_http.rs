//! HTTP-based integration tests for the Dash and Ethereum chain clients.
//!
//! Uses `wiremock` to stand in for the ChainRider API and a JSON-RPC node.

use std::sync::Arc;

use secrecy::SecretString;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use payment_watcher::app::{ChainWatcher, WatcherConfig};
use payment_watcher::domain::{
    AppError, BlockchainError, ChainClient, ConfirmRequest, ConfirmationStatus,
    PaymentForwardSource, ValidationError,
};
use payment_watcher::infra::{DashClient, DashClientConfig, EthereumClient, EthereumClientConfig};

// ============================================================================
// DASH (CHAINRIDER)
// ============================================================================

mod dash_client_tests {
    use super::*;

    fn client(server: &MockServer) -> DashClient {
        DashClient::new(DashClientConfig::new(
            server.uri(),
            SecretString::from("test-token"),
        ))
        .unwrap()
    }

    #[tokio::test]
    async fn test_transaction_by_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tx/abc"))
            .and(query_param("token", "test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "txid": "abc",
                "confirmations": 4,
                "locktime": 0,
                "vout": [
                    { "value": "1.5", "scriptPubKey": { "addresses": ["yDest"] } }
                ]
            })))
            .mount(&server)
            .await;

        let tx = client(&server).transaction_by_hash("abc").await.unwrap();
        assert_eq!(tx.hash, "abc");
        assert_eq!(tx.confirmations, 4);
        assert_eq!(tx.lock_time, Some(0));
        assert_eq!(tx.to.as_deref(), Some("yDest"));
        assert_eq!(tx.receipt_status, None);
    }

    #[tokio::test]
    async fn test_block_height_follows_last_block_hash() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/status"))
            .and(query_param("q", "getLastBlockHash"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "syncTipHash": "tip",
                "lastblockhash": "tip"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/block/tip"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "hash": "tip", "height": 4242 })),
            )
            .mount(&server)
            .await;

        assert_eq!(client(&server).current_block_height().await.unwrap(), 4242);
    }

    #[tokio::test]
    async fn test_payment_forward_transactions() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paymentforward/pf-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "paymentforward_id": "pf-1",
                "processed_txs": [
                    { "input_transaction_hash": "in1", "transaction_hash": "tx1", "received_amount_duffs": 150000000 },
                    { "input_transaction_hash": "in2", "transaction_hash": "tx2", "received_amount_duffs": 50000000 }
                ]
            })))
            .mount(&server)
            .await;

        let txs = client(&server).forwarded_transactions("pf-1").await.unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].tx_hash, "tx1");
        assert_eq!(txs[0].amount_duffs, 150_000_000);
    }

    #[tokio::test]
    async fn test_empty_payment_forward() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/paymentforward/pf-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "paymentforward_id": "pf-2" })),
            )
            .mount(&server)
            .await;

        assert!(
            client(&server)
                .forwarded_transactions("pf-2")
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_http_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tx/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/tx/busy"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .mount(&server)
            .await;

        let client = client(&server);
        let err = client.transaction_by_hash("missing").await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::NotFound(_))
        ));

        let err = client.transaction_by_hash("busy").await.unwrap_err();
        assert!(err.is_transient());
    }
}

// ============================================================================
// ETHEREUM (JSON-RPC)
// ============================================================================

mod ethereum_client_tests {
    use super::*;

    const CONTRACT: &str = "0x5fbdb2315678afecb367f032d93f642f64180aa3";
    const TOKEN: &str = "0xE7f1725E7734CE288F8367e1Bb143E90bb3F0512";

    fn client(server: &MockServer) -> EthereumClient {
        EthereumClient::new(EthereumClientConfig::new(server.uri())).unwrap()
    }

    async fn mount_rpc(server: &MockServer, rpc_method: &str, result: serde_json::Value) {
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": rpc_method })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": result
            })))
            .mount(server)
            .await;
    }

    async fn mount_mined_transfer(server: &MockServer, log_addresses: &[&str]) {
        let logs: Vec<_> = log_addresses
            .iter()
            .map(|address| json!({ "address": address }))
            .collect();
        mount_rpc(
            server,
            "eth_getTransactionByHash",
            json!({ "hash": "0xabc", "to": CONTRACT, "blockNumber": "0x64" }),
        )
        .await;
        mount_rpc(
            server,
            "eth_getTransactionReceipt",
            json!({
                "blockNumber": "0x64",
                "status": "0x1",
                "contractAddress": null,
                "logs": logs
            }),
        )
        .await;
        mount_rpc(server, "eth_blockNumber", json!("0x6e")).await;
    }

    #[tokio::test]
    async fn test_pending_transaction_has_no_confirmations() {
        let server = MockServer::start().await;
        mount_rpc(
            &server,
            "eth_getTransactionByHash",
            json!({ "hash": "0xabc", "to": CONTRACT, "blockNumber": null }),
        )
        .await;
        mount_rpc(&server, "eth_getTransactionReceipt", json!(null)).await;

        let tx = client(&server).transaction_by_hash("0xabc").await.unwrap();
        assert_eq!(tx.confirmations, 0);
        assert_eq!(tx.receipt_status, None);
        assert_eq!(tx.to.as_deref(), Some(CONTRACT));
    }

    #[tokio::test]
    async fn test_mined_transaction_confirmations_and_asset() {
        let server = MockServer::start().await;
        mount_mined_transfer(&server, &[TOKEN]).await;

        let tx = client(&server).transaction_by_hash("0xabc").await.unwrap();
        assert_eq!(tx.confirmations, 10);
        assert_eq!(tx.receipt_status, Some(true));
        assert_eq!(tx.logs.len(), 1);
        assert_eq!(tx.logs[0].address, TOKEN);
        assert_eq!(tx.asset, None);
    }

    #[tokio::test]
    async fn test_unknown_transaction() {
        let server = MockServer::start().await;
        mount_rpc(&server, "eth_getTransactionByHash", json!(null)).await;

        let err = client(&server)
            .transaction_by_hash("0xdead")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rpc_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": -32000, "message": "header not found" }
            })))
            .mount(&server)
            .await;

        let err = client(&server).current_block_height().await.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("header not found"));
    }

    #[tokio::test]
    async fn test_watcher_confirms_token_payment_ignoring_address_case() {
        let server = MockServer::start().await;
        mount_mined_transfer(&server, &[TOKEN]).await;

        let watcher = ChainWatcher::new(Arc::new(client(&server)), WatcherConfig::ethereum(false));
        let request = ConfirmRequest::new("0xabc")
            .with_destination(CONTRACT.to_uppercase().replacen("0X", "0x", 1))
            .with_expected_asset(TOKEN.to_lowercase());

        let state = watcher
            .confirm(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.status, ConfirmationStatus::Confirmed);
        assert_eq!(state.confirmations, 10);
    }

    #[tokio::test]
    async fn test_watcher_finds_token_log_behind_contract_event() {
        let server = MockServer::start().await;
        mount_mined_transfer(&server, &[CONTRACT, TOKEN]).await;

        let watcher = ChainWatcher::new(Arc::new(client(&server)), WatcherConfig::ethereum(false));
        let request = ConfirmRequest::new("0xabc")
            .with_destination(CONTRACT)
            .with_expected_asset(TOKEN);

        let state = watcher
            .confirm(&request, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(state.status, ConfirmationStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_watcher_rejects_wrong_token() {
        let server = MockServer::start().await;
        mount_mined_transfer(&server, &["0x0000000000000000000000000000000000000bad"]).await;

        let watcher = ChainWatcher::new(Arc::new(client(&server)), WatcherConfig::ethereum(false));
        let request = ConfirmRequest::new("0xabc")
            .with_destination(CONTRACT)
            .with_expected_asset(TOKEN);

        let err = watcher
            .confirm(&request, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::WrongAsset { .. })
        ));
    }
}
