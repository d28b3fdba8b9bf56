//! Chain client implementations.
//!
//! Thin HTTP adapters: the Dash client talks to the ChainRider REST API, the
//! Ethereum client speaks JSON-RPC. Polling, thresholds and validation live in
//! the application layer.

pub mod dash;
pub mod ethereum;

use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::domain::{AppError, BlockchainError};

pub use dash::{DEFAULT_DASH_API_URL, DashClient, DashClientConfig};
pub use ethereum::{EthereumClient, EthereumClientConfig, parse_quantity};

/// Default HTTP timeout for chain API calls
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, AppError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Blockchain(BlockchainError::Connection(e.to_string())))
}

pub(crate) fn map_request_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::Blockchain(BlockchainError::Timeout(err.to_string()))
    } else if err.is_connect() {
        AppError::Blockchain(BlockchainError::Connection(err.to_string()))
    } else {
        AppError::Blockchain(BlockchainError::RpcError(err.to_string()))
    }
}

/// Classify a non-success HTTP status. Server-side and rate-limit errors are retryable.
pub(crate) fn map_status_error(status: StatusCode, what: &str, body: String) -> AppError {
    let message = format!("{what}: HTTP {status}: {body}");
    if status == StatusCode::NOT_FOUND {
        AppError::Blockchain(BlockchainError::NotFound(what.to_string()))
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        AppError::Blockchain(BlockchainError::RpcError(message))
    } else {
        AppError::Blockchain(BlockchainError::InvalidResponse(message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let err = map_status_error(StatusCode::NOT_FOUND, "tx 0xa", String::new());
        assert!(matches!(
            err,
            AppError::Blockchain(BlockchainError::NotFound(_))
        ));

        let err = map_status_error(StatusCode::BAD_GATEWAY, "tx 0xa", "down".into());
        assert!(err.is_transient());

        let err = map_status_error(StatusCode::TOO_MANY_REQUESTS, "tx 0xa", String::new());
        assert!(err.is_transient());

        let err = map_status_error(StatusCode::UNAUTHORIZED, "tx 0xa", "bad token".into());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("bad token"));
    }
}
