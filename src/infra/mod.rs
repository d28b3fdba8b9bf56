//! Infrastructure layer implementations.

pub mod blockchain;
pub mod broker;
pub mod database;

pub use blockchain::{DashClient, DashClientConfig, EthereumClient, EthereumClientConfig};
pub use broker::{BrokerConfig, BrokerConnection, QueueManager};
pub use database::{PostgresConfig, PostgresUserDirectory, UnavailableUserDirectory};
