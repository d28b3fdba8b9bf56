//! Application layer: confirmation logic, job handlers and the consume loop.

pub mod aggregator;
pub mod dispatcher;
pub mod handlers;
pub mod notifier;
pub mod sequencer;
pub mod watcher;

pub use aggregator::{AggregatorConfig, PaymentAggregator};
pub use dispatcher::{DispatchSummary, DispatcherConfig, JobDispatcher, Settlement};
pub use handlers::{DashPaymentHandler, EnsRequestHandler, EthPaymentHandler, JobHandler};
pub use notifier::{NotificationOutcome, OutcomeNotifier};
pub use sequencer::{TxSequencer, WriteCommand};
pub use watcher::{ChainWatcher, WatcherConfig};
