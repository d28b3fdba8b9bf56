//! Mock implementations for testing.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::app::handlers::JobHandler;
use crate::app::sequencer::WriteCommand;
use crate::domain::{
    AppError, BlockchainError, BrokerError, ChainClient, ChainTransaction, ChainWriter,
    DatabaseError, DeliveryHandle, ForwardedTransaction, Job, JobDelivery, JobPublisher,
    JobReport, PaymentForwardSource, QueueName, User, UserDirectory, ValidationError,
};

/// Configuration for mock behavior
#[derive(Debug, Clone, Default)]
pub struct MockConfig {
    pub should_fail: bool,
    pub error_message: Option<String>,
}

impl MockConfig {
    #[must_use]
    pub fn success() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            should_fail: true,
            error_message: Some(message.into()),
        }
    }

    fn failure_message(&self) -> Option<String> {
        self.should_fail.then(|| {
            self.error_message
                .clone()
                .unwrap_or_else(|| "Mock error".to_string())
        })
    }
}

/// Build a chain transaction with the given confirmation count
#[must_use]
pub fn mock_tx(hash: &str, confirmations: u64) -> ChainTransaction {
    ChainTransaction::new(hash, confirmations)
}

/// Operator account used as the notification fallback
#[must_use]
pub fn operator_user() -> User {
    User {
        user_name: "operator".to_string(),
        email_address: "operator@example.com".to_string(),
        email_enabled: true,
    }
}

/// One scripted answer from [`MockChainClient`]
#[derive(Debug, Clone)]
pub enum ScriptedLookup {
    Found(ChainTransaction),
    /// Connection-level failure, retryable
    Transient,
    Missing,
}

/// Mock chain client for testing
///
/// Scripts are consumed front to back; the last entry repeats forever.
pub struct MockChainClient {
    transactions: Mutex<HashMap<String, ChainTransaction>>,
    scripts: Mutex<HashMap<String, VecDeque<ScriptedLookup>>>,
    lookups_by_hash: Mutex<HashMap<String, usize>>,
    height: AtomicU64,
    lookups: AtomicUsize,
    height_lookups: AtomicUsize,
}

impl MockChainClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            transactions: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashMap::new()),
            lookups_by_hash: Mutex::new(HashMap::new()),
            height: AtomicU64::new(1_000_000),
            lookups: AtomicUsize::new(0),
            height_lookups: AtomicUsize::new(0),
        }
    }

    pub fn set_transaction(&self, hash: &str, tx: ChainTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(hash.to_string(), tx);
    }

    pub fn script(&self, hash: &str, answers: Vec<ScriptedLookup>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(hash.to_string(), answers.into());
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    /// Total transaction lookups
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn lookups_for(&self, hash: &str) -> usize {
        self.lookups_by_hash
            .lock()
            .unwrap()
            .get(hash)
            .copied()
            .unwrap_or(0)
    }

    pub fn height_lookups(&self) -> usize {
        self.height_lookups.load(Ordering::SeqCst)
    }

    fn next_scripted(&self, hash: &str) -> Option<ScriptedLookup> {
        let mut scripts = self.scripts.lock().unwrap();
        let script = scripts.get_mut(hash)?;
        if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        }
    }
}

impl Default for MockChainClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    fn chain(&self) -> &'static str {
        "mock"
    }

    async fn transaction_by_hash(&self, tx_hash: &str) -> Result<ChainTransaction, AppError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        *self
            .lookups_by_hash
            .lock()
            .unwrap()
            .entry(tx_hash.to_string())
            .or_default() += 1;

        let answer = match self.next_scripted(tx_hash) {
            Some(answer) => answer,
            None => match self.transactions.lock().unwrap().get(tx_hash) {
                Some(tx) => ScriptedLookup::Found(tx.clone()),
                None => ScriptedLookup::Missing,
            },
        };

        match answer {
            ScriptedLookup::Found(tx) => Ok(tx),
            ScriptedLookup::Transient => Err(AppError::Blockchain(BlockchainError::Connection(
                "mock connection reset".to_string(),
            ))),
            ScriptedLookup::Missing => Err(AppError::Blockchain(BlockchainError::NotFound(
                tx_hash.to_string(),
            ))),
        }
    }

    async fn current_block_height(&self) -> Result<u64, AppError> {
        self.height_lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.height.load(Ordering::SeqCst))
    }
}

/// Mock payment forward source for testing
pub struct MockPaymentForwardSource {
    forwards: Mutex<HashMap<String, Vec<ForwardedTransaction>>>,
    fetches: AtomicUsize,
}

impl MockPaymentForwardSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            forwards: Mutex::new(HashMap::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_transactions(&self, payment_forward_id: &str, txs: Vec<ForwardedTransaction>) {
        self.forwards
            .lock()
            .unwrap()
            .insert(payment_forward_id.to_string(), txs);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl Default for MockPaymentForwardSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentForwardSource for MockPaymentForwardSource {
    async fn forwarded_transactions(
        &self,
        payment_forward_id: &str,
    ) -> Result<Vec<ForwardedTransaction>, AppError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .forwards
            .lock()
            .unwrap()
            .get(payment_forward_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Mock user directory for testing
pub struct MockUserDirectory {
    users: Mutex<HashMap<String, User>>,
    config: MockConfig,
}

impl MockUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn insert(&self, user: User) {
        self.users
            .lock()
            .unwrap()
            .insert(user.user_name.clone(), user);
    }
}

impl Default for MockUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MockUserDirectory {
    async fn find_by_user_name(&self, user_name: &str) -> Result<User, AppError> {
        if let Some(msg) = self.config.failure_message() {
            return Err(AppError::Database(DatabaseError::Connection(msg)));
        }
        self.users
            .lock()
            .unwrap()
            .get(user_name)
            .cloned()
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(user_name.to_string())))
    }
}

/// Mock job publisher that records every published job
pub struct MockJobPublisher {
    published: Mutex<Vec<(QueueName, Job)>>,
    config: MockConfig,
}

impl MockJobPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            published: Mutex::new(Vec::new()),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn published(&self) -> Vec<(QueueName, Job)> {
        self.published.lock().unwrap().clone()
    }
}

impl Default for MockJobPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobPublisher for MockJobPublisher {
    async fn publish(&self, queue: QueueName, job: &Job) -> Result<(), AppError> {
        if let Some(msg) = self.config.failure_message() {
            return Err(AppError::Broker(BrokerError::Publish(msg)));
        }
        self.published.lock().unwrap().push((queue, job.clone()));
        Ok(())
    }
}

/// Mock chain writer that tracks how many writes overlap
pub struct MockChainWriter {
    writes: Mutex<Vec<WriteCommand>>,
    in_flight: AtomicUsize,
    max_concurrent: AtomicUsize,
    config: MockConfig,
}

impl MockChainWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(MockConfig::success())
    }

    #[must_use]
    pub fn with_config(config: MockConfig) -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            config,
        }
    }

    #[must_use]
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_config(MockConfig::failure(message))
    }

    pub fn writes(&self) -> Vec<WriteCommand> {
        self.writes.lock().unwrap().clone()
    }

    /// Highest number of writes observed in progress at once
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    async fn write(&self, command: WriteCommand) -> Result<String, AppError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        // Give other submitters a chance to overlap
        tokio::time::sleep(Duration::from_millis(2)).await;

        let result = match self.config.failure_message() {
            Some(msg) => Err(AppError::Blockchain(BlockchainError::RpcError(msg))),
            None => {
                let mut writes = self.writes.lock().unwrap();
                writes.push(command);
                Ok(format!("0xwrite-{}", writes.len()))
            }
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl Default for MockChainWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainWriter for MockChainWriter {
    async fn register_sub_domain(&self, name: &str) -> Result<String, AppError> {
        self.write(WriteCommand::RegisterSubDomain {
            name: name.to_string(),
        })
        .await
    }

    async fn update_content_hash(
        &self,
        name: &str,
        content_hash: &str,
    ) -> Result<String, AppError> {
        self.write(WriteCommand::UpdateContentHash {
            name: name.to_string(),
            content_hash: content_hash.to_string(),
        })
        .await
    }
}

/// A settlement recorded by [`MockDeliveryHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Acked,
    Rejected { requeue: bool },
}

/// Shared record of what happened to a mock delivery
#[derive(Debug, Default)]
pub struct DeliveryLog {
    settlements: Mutex<Vec<Settled>>,
}

impl DeliveryLog {
    pub fn settlements(&self) -> Vec<Settled> {
        self.settlements.lock().unwrap().clone()
    }

    pub fn acks(&self) -> usize {
        self.count(|s| matches!(s, Settled::Acked))
    }

    pub fn rejects(&self) -> usize {
        self.count(|s| matches!(s, Settled::Rejected { .. }))
    }

    pub fn is_unsettled(&self) -> bool {
        self.settlements.lock().unwrap().is_empty()
    }

    fn count(&self, pred: impl Fn(&Settled) -> bool) -> usize {
        self.settlements
            .lock()
            .unwrap()
            .iter()
            .filter(|s| pred(s))
            .count()
    }
}

/// Delivery handle that records settlements instead of talking to a broker
pub struct MockDeliveryHandle {
    log: Arc<DeliveryLog>,
    config: MockConfig,
}

#[async_trait]
impl DeliveryHandle for MockDeliveryHandle {
    async fn ack(&self) -> Result<(), AppError> {
        if let Some(msg) = self.config.failure_message() {
            return Err(AppError::Broker(BrokerError::Settle(msg)));
        }
        self.log.settlements.lock().unwrap().push(Settled::Acked);
        Ok(())
    }

    async fn reject(&self, requeue: bool) -> Result<(), AppError> {
        if let Some(msg) = self.config.failure_message() {
            return Err(AppError::Broker(BrokerError::Settle(msg)));
        }
        self.log
            .settlements
            .lock()
            .unwrap()
            .push(Settled::Rejected { requeue });
        Ok(())
    }
}

/// Build a delivery whose settlements are recorded in the returned log
#[must_use]
pub fn mock_delivery(payload: &[u8], attempt: u32) -> (JobDelivery, Arc<DeliveryLog>) {
    let log = Arc::new(DeliveryLog::default());
    let handle = MockDeliveryHandle {
        log: Arc::clone(&log),
        config: MockConfig::success(),
    };
    (
        JobDelivery::new(payload.to_vec(), attempt, Box::new(handle)),
        log,
    )
}

/// Like [`mock_delivery`] but every ack/reject fails
#[must_use]
pub fn failing_delivery(payload: &[u8], attempt: u32) -> (JobDelivery, Arc<DeliveryLog>) {
    let log = Arc::new(DeliveryLog::default());
    let handle = MockDeliveryHandle {
        log: Arc::clone(&log),
        config: MockConfig::failure("channel closed"),
    };
    (
        JobDelivery::new(payload.to_vec(), attempt, Box::new(handle)),
        log,
    )
}

/// What a [`ScriptedHandler`] does with every job
#[derive(Debug, Clone, Copy)]
pub enum HandlerBehavior {
    Succeed,
    FailValidation,
    FailTransient,
    /// Sleep, then succeed
    Delay(Duration),
    /// Wait for shutdown, then report cancellation
    WaitForShutdown,
    /// Never finish, ignoring shutdown
    Hang,
}

/// Job handler with fixed behavior, for dispatcher tests
#[derive(Clone)]
pub struct ScriptedHandler {
    queue: QueueName,
    behavior: HandlerBehavior,
    calls: Arc<AtomicUsize>,
}

impl ScriptedHandler {
    #[must_use]
    pub fn new(queue: QueueName, behavior: HandlerBehavior) -> Self {
        Self {
            queue,
            behavior,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn succeeding(queue: QueueName) -> Self {
        Self::new(queue, HandlerBehavior::Succeed)
    }

    #[must_use]
    pub fn failing_validation(queue: QueueName) -> Self {
        Self::new(queue, HandlerBehavior::FailValidation)
    }

    #[must_use]
    pub fn failing_transient(queue: QueueName) -> Self {
        Self::new(queue, HandlerBehavior::FailTransient)
    }

    /// Jobs that reached the handler
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobHandler for ScriptedHandler {
    fn queue(&self) -> QueueName {
        self.queue
    }

    async fn handle(&self, _job: Job, shutdown: &CancellationToken) -> Result<JobReport, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            HandlerBehavior::Succeed => Ok(JobReport::new("done")),
            HandlerBehavior::FailValidation => Err(AppError::Validation(
                ValidationError::TransactionReverted("0xdead".to_string()),
            )),
            HandlerBehavior::FailTransient => Err(AppError::Blockchain(
                BlockchainError::Timeout("mock timeout".to_string()),
            )),
            HandlerBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(JobReport::new("done after delay"))
            }
            HandlerBehavior::WaitForShutdown => {
                shutdown.cancelled().await;
                Err(AppError::Cancelled)
            }
            HandlerBehavior::Hang => std::future::pending().await,
        }
    }
}
