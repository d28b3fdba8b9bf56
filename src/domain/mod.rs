//! Domain layer containing core job types, traits, and error definitions.

pub mod error;
pub mod traits;
pub mod types;

pub use error::{
    AppError, BlockchainError, BrokerError, ConfigError, DatabaseError, ValidationError,
};
pub use traits::{
    ChainClient, ChainWriter, DeliveryHandle, JobPublisher, PaymentForwardSource, UserDirectory,
};
pub use types::{
    ChainTransaction, ConfirmRequest, ConfirmationState, ConfirmationStatus,
    DashPaymentConfirmation, DUFFS_PER_DASH, EmailSend, EnsRequest, EnsRequestType,
    EthPaymentConfirmation, ForwardedTransaction, Job, JobDelivery, JobKind, JobReport,
    PaymentForward, QueueName, TxLog, User, dash_to_duffs, decode_job,
};
