//! Queue-driven confirmation watcher for Dash and Ethereum payments.
//!
//! Jobs arrive on RabbitMQ queues, are confirmed against the chain, and every
//! terminal outcome is reported to the user through an email job.

pub mod app;
pub mod domain;
pub mod infra;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
