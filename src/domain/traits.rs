//! Domain traits defining contracts for external systems.

use async_trait::async_trait;

use super::error::AppError;
use super::types::{ChainTransaction, ForwardedTransaction, Job, QueueName, User};

/// Read-only chain capability consumed by the confirmation watcher
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Short chain identifier used in logs
    fn chain(&self) -> &'static str;

    /// Look up a transaction with its current confirmation count
    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<ChainTransaction, AppError>;

    /// Height of the current chain tip
    async fn current_block_height(&self) -> Result<u64, AppError>;

    /// Address comparison rules differ per chain
    fn addresses_match(&self, expected: &str, actual: &str) -> bool {
        expected == actual
    }
}

/// Source of the transactions credited to a payment forward
#[async_trait]
pub trait PaymentForwardSource: Send + Sync {
    async fn forwarded_transactions(
        &self,
        payment_forward_id: &str,
    ) -> Result<Vec<ForwardedTransaction>, AppError>;
}

/// Chain writes that must be serialized per signing account
#[async_trait]
pub trait ChainWriter: Send + Sync {
    /// Register `name` under the service's parent name. Returns the transaction hash.
    async fn register_sub_domain(&self, name: &str) -> Result<String, AppError>;

    /// Point `name` at a new content hash. Returns the transaction hash.
    async fn update_content_hash(&self, name: &str, content_hash: &str)
    -> Result<String, AppError>;
}

/// User/account lookups
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_by_user_name(&self, user_name: &str) -> Result<User, AppError>;
}

/// Publishes jobs onto a queue
#[async_trait]
pub trait JobPublisher: Send + Sync {
    async fn publish(&self, queue: QueueName, job: &Job) -> Result<(), AppError>;
}

/// Broker-side handle for a single delivery
#[async_trait]
pub trait DeliveryHandle: Send + Sync {
    async fn ack(&self) -> Result<(), AppError>;

    async fn reject(&self, requeue: bool) -> Result<(), AppError>;
}
