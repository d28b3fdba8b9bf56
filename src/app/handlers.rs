//! Per-queue job handlers.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use crate::domain::{
    AppError, ConfirmRequest, EnsRequestType, Job, JobReport, QueueName, ValidationError,
};

use super::aggregator::PaymentAggregator;
use super::sequencer::{TxSequencer, WriteCommand};
use super::watcher::ChainWatcher;

/// Processes the jobs of a single queue
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The queue this handler serves
    fn queue(&self) -> QueueName;

    /// Run a job to completion. `shutdown` is checked between polls.
    async fn handle(&self, job: Job, shutdown: &CancellationToken) -> Result<JobReport, AppError>;
}

fn unsupported(job: &Job, queue: QueueName) -> AppError {
    AppError::UnsupportedJobKind {
        kind: job.kind().to_string(),
        queue: queue.to_string(),
    }
}

/// Confirms Dash payments made through a payment forward
pub struct DashPaymentHandler {
    aggregator: PaymentAggregator,
}

impl DashPaymentHandler {
    #[must_use]
    pub fn new(aggregator: PaymentAggregator) -> Self {
        Self { aggregator }
    }
}

#[async_trait]
impl JobHandler for DashPaymentHandler {
    fn queue(&self) -> QueueName {
        QueueName::DashPaymentConfirmation
    }

    async fn handle(&self, job: Job, shutdown: &CancellationToken) -> Result<JobReport, AppError> {
        let payment = match job {
            Job::DashPaymentConfirmation(payment) => payment,
            other => return Err(unsupported(&other, self.queue())),
        };
        let forward = self
            .aggregator
            .reconcile(&payment.payment_forward_id, payment.charge_amount, shutdown)
            .await?;
        Ok(JobReport::new(format!(
            "payment {} of {} DASH confirmed across {} transaction(s)",
            payment.payment_number,
            payment.charge_amount,
            forward.processed().len()
        )))
    }
}

/// Confirms Ethereum token payments sent to the payment contract
pub struct EthPaymentHandler {
    watcher: Arc<ChainWatcher>,
    payment_contract: String,
    token_address: Option<String>,
}

impl EthPaymentHandler {
    #[must_use]
    pub fn new(
        watcher: Arc<ChainWatcher>,
        payment_contract: impl Into<String>,
        token_address: Option<String>,
    ) -> Self {
        Self {
            watcher,
            payment_contract: payment_contract.into(),
            token_address,
        }
    }
}

#[async_trait]
impl JobHandler for EthPaymentHandler {
    fn queue(&self) -> QueueName {
        QueueName::EthPaymentConfirmation
    }

    async fn handle(&self, job: Job, shutdown: &CancellationToken) -> Result<JobReport, AppError> {
        let payment = match job {
            Job::EthPaymentConfirmation(payment) => payment,
            other => return Err(unsupported(&other, self.queue())),
        };
        let mut request = ConfirmRequest::new(&payment.transaction_hash)
            .with_destination(&self.payment_contract);
        if let Some(token) = &self.token_address {
            request = request.with_expected_asset(token);
        }
        let state = self.watcher.confirm(&request, shutdown).await?;
        Ok(JobReport::new(format!(
            "payment {} confirmed in transaction {} ({} confirmations)",
            payment.payment_number, state.tx_hash, state.confirmations
        )))
    }
}

/// Name-service writes, broadcast through the sequencer and then confirmed
pub struct EnsRequestHandler {
    sequencer: TxSequencer,
    watcher: Arc<ChainWatcher>,
}

impl EnsRequestHandler {
    #[must_use]
    pub fn new(sequencer: TxSequencer, watcher: Arc<ChainWatcher>) -> Self {
        Self { sequencer, watcher }
    }
}

#[async_trait]
impl JobHandler for EnsRequestHandler {
    fn queue(&self) -> QueueName {
        QueueName::EnsRequest
    }

    #[instrument(skip(self, job, shutdown))]
    async fn handle(&self, job: Job, shutdown: &CancellationToken) -> Result<JobReport, AppError> {
        let request = match job {
            Job::EnsRequest(request) => request,
            other => return Err(unsupported(&other, self.queue())),
        };

        let command = match request.request_type {
            EnsRequestType::RegisterSubName => WriteCommand::RegisterSubDomain {
                name: request.user_name.clone(),
            },
            EnsRequestType::UpdateContentHash => {
                let content_hash = request.content_hash.clone().ok_or_else(|| {
                    ValidationError::InvalidField {
                        field: "contentHash".to_string(),
                        message: "required for content hash updates".to_string(),
                    }
                })?;
                WriteCommand::UpdateContentHash {
                    name: request.user_name.clone(),
                    content_hash,
                }
            }
            EnsRequestType::RegisterName => {
                return Err(AppError::NotSupported("register_name".to_string()));
            }
        };

        let tx_hash = self.sequencer.submit(command).await?;
        info!(user = %request.user_name, tx = %tx_hash, "Name write broadcast, waiting for confirmation");
        self.watcher
            .confirm(&ConfirmRequest::new(&tx_hash), shutdown)
            .await?;
        Ok(JobReport::new(format!("name request confirmed in {tx_hash}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::aggregator::AggregatorConfig;
    use crate::app::watcher::WatcherConfig;
    use crate::domain::{
        DashPaymentConfirmation, EnsRequest, EthPaymentConfirmation, ForwardedTransaction,
    };
    use crate::test_utils::{
        MockChainClient, MockChainWriter, MockPaymentForwardSource, mock_tx,
    };

    fn watcher(chain: Arc<MockChainClient>) -> Arc<ChainWatcher> {
        Arc::new(ChainWatcher::new(
            chain,
            WatcherConfig {
                required_confirmations: 3,
                ..Default::default()
            },
        ))
    }

    fn eth_job(hash: &str) -> Job {
        Job::EthPaymentConfirmation(EthPaymentConfirmation {
            user_name: "alice".into(),
            transaction_hash: hash.into(),
            payment_number: 1,
            charge_amount: 1.0,
        })
    }

    #[tokio::test]
    async fn test_eth_payment_confirmed() {
        let chain = Arc::new(MockChainClient::new());
        let mut tx = mock_tx("0xa", 4).with_to("0xcontract").with_receipt(true);
        tx.logs = vec![crate::domain::TxLog {
            address: "0xtoken".into(),
        }];
        tx.asset = Some("0xtoken".into());
        chain.set_transaction("0xa", tx);
        let handler =
            EthPaymentHandler::new(watcher(chain), "0xcontract", Some("0xtoken".into()));

        let report = handler
            .handle(eth_job("0xa"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.detail.contains("0xa"));
    }

    #[tokio::test]
    async fn test_eth_payment_to_wrong_contract() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_transaction("0xa", mock_tx("0xa", 4).with_to("0xattacker"));
        let handler = EthPaymentHandler::new(watcher(chain), "0xcontract", None);

        let err = handler
            .handle(eth_job("0xa"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::WrongDestination { .. })
        ));
    }

    #[tokio::test]
    async fn test_handler_rejects_foreign_kind() {
        let chain = Arc::new(MockChainClient::new());
        let handler = EthPaymentHandler::new(watcher(chain), "0xcontract", None);
        let job = Job::EnsRequest(EnsRequest {
            user_name: "alice".into(),
            request_type: EnsRequestType::RegisterSubName,
            content_hash: None,
        });

        let err = handler
            .handle(job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedJobKind { .. }));
    }

    #[tokio::test]
    async fn test_dash_payment_confirmed() {
        let chain = Arc::new(MockChainClient::new());
        chain.set_transaction("tx1", mock_tx("tx1", 6));
        let source = Arc::new(MockPaymentForwardSource::new());
        source.set_transactions(
            "pf",
            vec![ForwardedTransaction {
                tx_hash: "tx1".into(),
                amount_duffs: 250_000_000,
            }],
        );
        let aggregator =
            PaymentAggregator::new(source, watcher(chain), AggregatorConfig::default());
        let handler = DashPaymentHandler::new(aggregator);
        let job = Job::DashPaymentConfirmation(DashPaymentConfirmation {
            user_name: "alice".into(),
            payment_forward_id: "pf".into(),
            payment_number: 3,
            charge_amount: 2.5,
        });

        let report = handler
            .handle(job, &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.detail.contains("1 transaction"));
    }

    #[tokio::test]
    async fn test_ens_sub_name_is_written_then_confirmed() {
        let writer = Arc::new(MockChainWriter::new());
        let (sequencer, _handle) = TxSequencer::spawn(Arc::clone(&writer) as _, 4);
        let chain = Arc::new(MockChainClient::new());
        // MockChainWriter returns "0xwrite-<n>" hashes
        chain.set_transaction("0xwrite-1", mock_tx("0xwrite-1", 3).with_receipt(true));
        let handler = EnsRequestHandler::new(sequencer, watcher(chain));

        let job = Job::EnsRequest(EnsRequest {
            user_name: "alice".into(),
            request_type: EnsRequestType::RegisterSubName,
            content_hash: None,
        });
        let report = handler
            .handle(job, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.detail.contains("0xwrite-1"));
        assert_eq!(
            writer.writes(),
            vec![WriteCommand::RegisterSubDomain {
                name: "alice".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_ens_register_name_unsupported() {
        let writer = Arc::new(MockChainWriter::new());
        let (sequencer, _handle) = TxSequencer::spawn(Arc::clone(&writer) as _, 4);
        let handler =
            EnsRequestHandler::new(sequencer, watcher(Arc::new(MockChainClient::new())));

        let job = Job::EnsRequest(EnsRequest {
            user_name: "alice".into(),
            request_type: EnsRequestType::RegisterName,
            content_hash: None,
        });
        let err = handler
            .handle(job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotSupported(_)));
        assert!(writer.writes().is_empty());
    }

    #[tokio::test]
    async fn test_ens_content_hash_required() {
        let writer = Arc::new(MockChainWriter::new());
        let (sequencer, _handle) = TxSequencer::spawn(Arc::clone(&writer) as _, 4);
        let handler =
            EnsRequestHandler::new(sequencer, watcher(Arc::new(MockChainClient::new())));

        let job = Job::EnsRequest(EnsRequest {
            user_name: "alice".into(),
            request_type: EnsRequestType::UpdateContentHash,
            content_hash: None,
        });
        let err = handler
            .handle(job, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AppError::Validation(ValidationError::InvalidField { .. })
        ));
    }
}
