//! RabbitMQ broker access over AMQP 0-9-1.

pub mod connection;
pub mod queue;

pub use connection::{BrokerConfig, BrokerConnection};
pub use queue::{DELIVERY_COUNT_HEADER, QueueManager, delivery_attempt, work_queue_arguments};
