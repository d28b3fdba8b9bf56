//! Error taxonomy shared by every layer of the watcher.

use thiserror::Error;

/// Top-level application error
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Blockchain error: {0}")]
    Blockchain(#[from] BlockchainError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Malformed job payload: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unsupported job kind '{kind}' on queue {queue}")]
    UnsupportedJobKind { kind: String, queue: String },

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Errors worth retrying: the remote side may answer on the next attempt.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Blockchain(e) => e.is_transient(),
            Self::Broker(e) => !matches!(e, BrokerError::ConnectionLost(_)),
            Self::Database(DatabaseError::Connection(_)) => true,
            _ => false,
        }
    }

    /// The broker connection is gone and the consume loop must be rebuilt.
    #[must_use]
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, Self::Broker(BrokerError::ConnectionLost(_)))
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Chain RPC / API failures
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("RPC error: {0}")]
    RpcError(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transaction not found: {0}")]
    NotFound(String),

    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    #[error("Gave up waiting for {0}")]
    WaitExceeded(String),
}

impl BlockchainError {
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::RpcError(_) | Self::Timeout(_)
        )
    }
}

/// Message broker failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("Queue declare failed for {queue}: {message}")]
    Declare { queue: String, message: String },

    #[error("Consume failed: {0}")]
    Consume(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Settle(String),

    #[error("Connection lost, reconnect required: {0}")]
    ConnectionLost(String),
}

/// Post-confirmation validation failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Lock time {lock_time} not reached at height {height}")]
    LockTimeNotReached { lock_time: u64, height: u64 },

    #[error("Wrong destination: expected {expected}, got {actual}")]
    WrongDestination { expected: String, actual: String },

    #[error("Wrong asset: expected {expected}, got {actual}")]
    WrongAsset { expected: String, actual: String },

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Transaction emitted no logs: {0}")]
    MissingLogs(String),

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },
}

/// User/account storage failures
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Configuration failures
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(AppError::Blockchain(BlockchainError::Timeout("t".into())).is_transient());
        assert!(AppError::Blockchain(BlockchainError::Connection("c".into())).is_transient());
        assert!(!AppError::Blockchain(BlockchainError::NotFound("n".into())).is_transient());
        assert!(AppError::Broker(BrokerError::Publish("p".into())).is_transient());
        assert!(!AppError::Broker(BrokerError::ConnectionLost("l".into())).is_transient());
        assert!(
            !AppError::Validation(ValidationError::MissingLogs("0xabc".into())).is_transient()
        );
        assert!(!AppError::Decode("bad".into()).is_transient());
    }

    #[test]
    fn test_connection_lost() {
        let err = AppError::Broker(BrokerError::ConnectionLost("reset".into()));
        assert!(err.is_connection_lost());
        assert!(!AppError::Cancelled.is_connection_lost());
    }

    #[test]
    fn test_lock_time_message() {
        let err = ValidationError::LockTimeNotReached {
            lock_time: 1000,
            height: 900,
        };
        assert_eq!(err.to_string(), "Lock time 1000 not reached at height 900");
    }
}
