//! Domain types: wire-format jobs, queue names, and per-job watch state.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::error::{AppError, ValidationError};
use super::traits::DeliveryHandle;

/// Number of duffs in one DASH
pub const DUFFS_PER_DASH: u64 = 100_000_000;

/// Convert a DASH amount to duffs, rejecting negative or non-finite input
pub fn dash_to_duffs(amount: f64) -> Result<u64, ValidationError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ValidationError::InvalidField {
            field: "chargeAmount".to_string(),
            message: format!("{amount} is not a valid DASH amount"),
        });
    }
    Ok((amount * DUFFS_PER_DASH as f64).round() as u64)
}

/// Well-known durable queues, one per job category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueName {
    DashPaymentConfirmation,
    EthPaymentConfirmation,
    EnsRequest,
    EmailSend,
}

impl QueueName {
    pub const ALL: [QueueName; 4] = [
        Self::DashPaymentConfirmation,
        Self::EthPaymentConfirmation,
        Self::EnsRequest,
        Self::EmailSend,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DashPaymentConfirmation => "dash-payment-confirmation-queue",
            Self::EthPaymentConfirmation => "eth-payment-confirmation-queue",
            Self::EnsRequest => "ens-request-queue",
            Self::EmailSend => "email-send-queue",
        }
    }

    /// Queue receiving messages rejected without requeue
    pub fn dead_letter(&self) -> String {
        format!("{}.dead-letter", self.as_str())
    }
}

impl std::str::FromStr for QueueName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|q| q.as_str() == s || q.as_str().trim_end_matches("-queue") == s)
            .ok_or_else(|| format!("Invalid queue name: {}", s))
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job kind tag, mirrors the `kind` field on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    DashPaymentConfirmation,
    EthPaymentConfirmation,
    EnsRequest,
    EmailSend,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DashPaymentConfirmation => "dash_payment_confirmation",
            Self::EthPaymentConfirmation => "eth_payment_confirmation",
            Self::EnsRequest => "ens_request",
            Self::EmailSend => "email_send",
        }
    }

    /// The queue this kind of job is published to
    pub fn queue(&self) -> QueueName {
        match self {
            Self::DashPaymentConfirmation => QueueName::DashPaymentConfirmation,
            Self::EthPaymentConfirmation => QueueName::EthPaymentConfirmation,
            Self::EnsRequest => QueueName::EnsRequest,
            Self::EmailSend => QueueName::EmailSend,
        }
    }

    /// Human readable label used in notification subjects
    pub fn label(&self) -> &'static str {
        match self {
            Self::DashPaymentConfirmation => "Dash Payment",
            Self::EthPaymentConfirmation => "Ethereum Payment",
            Self::EnsRequest => "ENS Request",
            Self::EmailSend => "Email",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of work taken off a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Job {
    DashPaymentConfirmation(DashPaymentConfirmation),
    EthPaymentConfirmation(EthPaymentConfirmation),
    EnsRequest(EnsRequest),
    EmailSend(EmailSend),
}

impl Job {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::DashPaymentConfirmation(_) => JobKind::DashPaymentConfirmation,
            Self::EthPaymentConfirmation(_) => JobKind::EthPaymentConfirmation,
            Self::EnsRequest(_) => JobKind::EnsRequest,
            Self::EmailSend(_) => JobKind::EmailSend,
        }
    }

    /// The account the job was submitted for, if any
    pub fn user_name(&self) -> Option<&str> {
        match self {
            Self::DashPaymentConfirmation(j) => Some(&j.user_name),
            Self::EthPaymentConfirmation(j) => Some(&j.user_name),
            Self::EnsRequest(j) => Some(&j.user_name),
            Self::EmailSend(j) => j.user_names.first().map(String::as_str),
        }
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let result = match self {
            Self::DashPaymentConfirmation(j) => j.validate(),
            Self::EthPaymentConfirmation(j) => j.validate(),
            Self::EnsRequest(j) => j.validate(),
            Self::EmailSend(j) => j.validate(),
        };
        result.map_err(|e| AppError::Decode(e.to_string()))
    }
}

/// Decode and validate a raw queue payload
pub fn decode_job(payload: &[u8]) -> Result<Job, AppError> {
    let job: Job = serde_json::from_slice(payload)?;
    job.validate()?;
    Ok(job)
}

/// Dash payment made through a ChainRider payment forward
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct DashPaymentConfirmation {
    #[validate(length(min = 1, message = "User name cannot be empty"))]
    pub user_name: String,
    #[serde(rename = "paymentForwardID")]
    #[validate(length(min = 1, message = "Payment forward id cannot be empty"))]
    pub payment_forward_id: String,
    #[serde(default)]
    pub payment_number: i64,
    /// Amount owed, in DASH
    #[validate(range(exclusive_min = 0.0, message = "Charge amount must be positive"))]
    pub charge_amount: f64,
}

/// Ethereum payment made to the payment contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EthPaymentConfirmation {
    #[validate(length(min = 1, message = "User name cannot be empty"))]
    pub user_name: String,
    #[validate(length(min = 1, message = "Transaction hash cannot be empty"))]
    pub transaction_hash: String,
    #[serde(default)]
    pub payment_number: i64,
    #[serde(default)]
    pub charge_amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsRequestType {
    RegisterName,
    RegisterSubName,
    UpdateContentHash,
}

/// Name-service write request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EnsRequest {
    #[validate(length(min = 1, message = "User name cannot be empty"))]
    pub user_name: String,
    pub request_type: EnsRequestType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

/// Outgoing notification, consumed by the external mailer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct EmailSend {
    #[validate(length(min = 1))]
    pub subject: String,
    pub content: String,
    pub content_type: String,
    pub user_names: Vec<String>,
    #[validate(length(min = 1, message = "At least one recipient is required"))]
    pub emails: Vec<String>,
}

/// Successful job result, forwarded to the notifier
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub detail: String,
}

impl JobReport {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Resolved status of a watched transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    #[default]
    Pending,
    Confirmed,
    /// Confirmed on chain but rejected by post-confirmation validation
    Invalid,
    /// Lookup failed or the wait was abandoned
    Failed,
}

impl ConfirmationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Invalid => "invalid",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What to confirm and which post-confirmation checks to run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfirmRequest {
    pub tx_hash: String,
    /// Overrides the lock time embedded in the transaction
    pub lock_time: Option<u64>,
    pub destination: Option<String>,
    /// Token contract a transfer must have moved
    pub expected_asset: Option<String>,
}

impl ConfirmRequest {
    pub fn new(tx_hash: impl Into<String>) -> Self {
        Self {
            tx_hash: tx_hash.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_lock_time(mut self, lock_time: u64) -> Self {
        self.lock_time = Some(lock_time);
        self
    }

    #[must_use]
    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    #[must_use]
    pub fn with_expected_asset(mut self, asset: impl Into<String>) -> Self {
        self.expected_asset = Some(asset.into());
        self
    }
}

/// Per-transaction watch state, lives only as long as the job
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmationState {
    pub tx_hash: String,
    required_confirmations: u64,
    pub confirmations: u64,
    pub lock_time: Option<u64>,
    pub destination: Option<String>,
    pub status: ConfirmationStatus,
    pub polls: u32,
    pub started_at: DateTime<Utc>,
}

impl ConfirmationState {
    pub fn new(request: &ConfirmRequest, required_confirmations: u64) -> Self {
        Self {
            tx_hash: request.tx_hash.clone(),
            required_confirmations,
            confirmations: 0,
            lock_time: request.lock_time,
            destination: request.destination.clone(),
            status: ConfirmationStatus::Pending,
            polls: 0,
            started_at: Utc::now(),
        }
    }

    /// Threshold fixed when the watch started
    pub fn required_confirmations(&self) -> u64 {
        self.required_confirmations
    }

    pub fn threshold_reached(&self) -> bool {
        self.confirmations >= self.required_confirmations
    }
}

/// Event log entry attached to a transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLog {
    pub address: String,
}

/// Chain-agnostic view of a transaction as returned by a chain client
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    pub confirmations: u64,
    /// Embedded lock time; `None` when the transaction carries none
    pub lock_time: Option<u64>,
    pub to: Option<String>,
    /// Receipt status where the chain has one (`None` for UTXO chains or pending receipts)
    pub receipt_status: Option<bool>,
    pub logs: Vec<TxLog>,
    /// Token contract moved by this transaction, if it is a token transfer
    pub asset: Option<String>,
}

impl ChainTransaction {
    pub fn new(hash: impl Into<String>, confirmations: u64) -> Self {
        Self {
            hash: hash.into(),
            confirmations,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_lock_time(mut self, lock_time: u64) -> Self {
        self.lock_time = Some(lock_time);
        self
    }

    #[must_use]
    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    #[must_use]
    pub fn with_receipt(mut self, success: bool) -> Self {
        self.receipt_status = Some(success);
        self
    }
}

/// Underlying transaction credited to a payment forward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardedTransaction {
    pub tx_hash: String,
    pub amount_duffs: u64,
}

/// Logical multi-transaction payment being reconciled
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentForward {
    pub id: String,
    pub charge_duffs: u64,
    credited_duffs: u64,
    processed: BTreeSet<String>,
}

impl PaymentForward {
    pub fn new(id: impl Into<String>, charge_duffs: u64) -> Self {
        Self {
            id: id.into(),
            charge_duffs,
            credited_duffs: 0,
            processed: BTreeSet::new(),
        }
    }

    pub fn credited_duffs(&self) -> u64 {
        self.credited_duffs
    }

    pub fn processed(&self) -> &BTreeSet<String> {
        &self.processed
    }

    pub fn is_processed(&self, tx_hash: &str) -> bool {
        self.processed.contains(tx_hash)
    }

    /// Credit a transaction once. Returns `false` if it was already counted.
    pub fn credit(&mut self, tx_hash: &str, amount_duffs: u64) -> bool {
        if !self.processed.insert(tx_hash.to_string()) {
            return false;
        }
        self.credited_duffs = self.credited_duffs.saturating_add(amount_duffs);
        true
    }

    /// Overpayment counts as complete
    pub fn is_complete(&self) -> bool {
        self.credited_duffs >= self.charge_duffs
    }
}

/// Account record used for notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user_name: String,
    pub email_address: String,
    pub email_enabled: bool,
}

/// A delivered message, settled exactly once through its handle
pub struct JobDelivery {
    pub payload: Vec<u8>,
    /// 0 on first delivery
    pub attempt: u32,
    handle: Box<dyn DeliveryHandle>,
}

impl JobDelivery {
    pub fn new(payload: Vec<u8>, attempt: u32, handle: Box<dyn DeliveryHandle>) -> Self {
        Self {
            payload,
            attempt,
            handle,
        }
    }

    pub async fn ack(self) -> Result<(), AppError> {
        self.handle.ack().await
    }

    pub async fn reject(self, requeue: bool) -> Result<(), AppError> {
        self.handle.reject(requeue).await
    }
}

impl fmt::Debug for JobDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobDelivery")
            .field("payload_len", &self.payload.len())
            .field("attempt", &self.attempt)
            .finish()
    }
}
