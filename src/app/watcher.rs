//! Confirmation watcher: polls a chain client until a transaction is final, then
//! runs the one-time post-confirmation checks.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::{
    AppError, BlockchainError, ChainClient, ChainTransaction, ConfirmRequest, ConfirmationState,
    ConfirmationStatus, ValidationError,
};

/// Dash confirmations required on testnet
pub const DASH_TESTNET_CONFIRMATIONS: u64 = 3;
/// Dash confirmations required on mainnet
pub const DASH_MAINNET_CONFIRMATIONS: u64 = 6;
/// Ethereum confirmations required on dev networks
pub const ETH_DEV_CONFIRMATIONS: u64 = 3;
/// Ethereum confirmations required on mainnet
pub const ETH_MAINNET_CONFIRMATIONS: u64 = 30;

/// Configuration for the confirmation watcher
#[derive(Debug, Clone)]
pub struct WatcherConfig {
    pub required_confirmations: u64,
    /// Delay between polls while confirmations keep arriving
    pub poll_interval: Duration,
    /// Cap for the delay when consecutive polls see no progress
    pub max_idle_interval: Duration,
    /// Transient lookup failures tolerated in a row before giving up
    pub max_consecutive_errors: u32,
    /// Upper bound on the whole wait
    pub max_wait: Option<Duration>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            required_confirmations: DASH_TESTNET_CONFIRMATIONS,
            poll_interval: Duration::from_secs(120),
            max_idle_interval: Duration::from_secs(600),
            max_consecutive_errors: 5,
            max_wait: Some(Duration::from_secs(24 * 60 * 60)),
        }
    }
}

impl WatcherConfig {
    /// Dash blocks are slow, poll every two minutes
    #[must_use]
    pub fn dash(mainnet: bool) -> Self {
        Self {
            required_confirmations: if mainnet {
                DASH_MAINNET_CONFIRMATIONS
            } else {
                DASH_TESTNET_CONFIRMATIONS
            },
            ..Default::default()
        }
    }

    #[must_use]
    pub fn ethereum(mainnet: bool) -> Self {
        Self {
            required_confirmations: if mainnet {
                ETH_MAINNET_CONFIRMATIONS
            } else {
                ETH_DEV_CONFIRMATIONS
            },
            poll_interval: Duration::from_secs(15),
            max_idle_interval: Duration::from_secs(120),
            ..Default::default()
        }
    }
}

/// Sleep unless the shutdown token fires first
pub(crate) async fn sleep_or_cancel(
    duration: Duration,
    shutdown: &CancellationToken,
) -> Result<(), AppError> {
    tokio::select! {
        _ = tokio::time::sleep(duration) => Ok(()),
        _ = shutdown.cancelled() => Err(AppError::Cancelled),
    }
}

/// Drives a [`ChainClient`] until a transaction is confirmed or rejected
pub struct ChainWatcher {
    client: Arc<dyn ChainClient>,
    config: WatcherConfig,
}

impl ChainWatcher {
    #[must_use]
    pub fn new(client: Arc<dyn ChainClient>, config: WatcherConfig) -> Self {
        Self { client, config }
    }

    pub fn required_confirmations(&self) -> u64 {
        self.config.required_confirmations
    }

    pub fn chain(&self) -> &'static str {
        self.client.chain()
    }

    /// Begin watching a transaction. The threshold is captured here and never changes.
    pub fn start(&self, request: &ConfirmRequest) -> ConfirmationState {
        ConfirmationState::new(request, self.config.required_confirmations)
    }

    /// One lookup. Below the threshold nothing is validated and the state stays pending.
    #[instrument(skip(self, state, request), fields(chain = self.client.chain(), tx = %state.tx_hash))]
    pub async fn poll(
        &self,
        state: &mut ConfirmationState,
        request: &ConfirmRequest,
    ) -> Result<ConfirmationStatus, AppError> {
        let tx = self.client.transaction_by_hash(&state.tx_hash).await?;
        state.polls += 1;
        state.confirmations = tx.confirmations;

        if !state.threshold_reached() {
            debug!(
                confirmations = state.confirmations,
                required = state.required_confirmations(),
                "Transaction not yet final"
            );
            state.status = ConfirmationStatus::Pending;
            return Ok(state.status);
        }

        match self.validate(state, &tx, request).await {
            Ok(()) => {
                state.status = ConfirmationStatus::Confirmed;
                info!(confirmations = state.confirmations, "Transaction confirmed");
                Ok(state.status)
            }
            Err(e @ AppError::Validation(_)) => {
                state.status = ConfirmationStatus::Invalid;
                warn!(error = %e, "Transaction failed post-confirmation validation");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until confirmed, invalid, failed, cancelled, or out of time.
    #[instrument(skip(self, request, shutdown), fields(chain = self.client.chain(), tx = %request.tx_hash))]
    pub async fn confirm(
        &self,
        request: &ConfirmRequest,
        shutdown: &CancellationToken,
    ) -> Result<ConfirmationState, AppError> {
        let mut state = self.start(request);
        let deadline = self
            .config
            .max_wait
            .and_then(|wait| Instant::now().checked_add(wait));
        let mut delay = self.config.poll_interval;
        let mut last_seen: Option<u64> = None;
        let mut consecutive_errors = 0u32;

        loop {
            if shutdown.is_cancelled() {
                return Err(AppError::Cancelled);
            }

            match self.poll(&mut state, request).await {
                Ok(status) if status.is_terminal() => return Ok(state),
                Ok(_) => {
                    consecutive_errors = 0;
                    // Same view of the chain as last time: back off, never below the base interval
                    delay = if last_seen == Some(state.confirmations) {
                        delay
                            .saturating_mul(2)
                            .min(self.config.max_idle_interval)
                            .max(self.config.poll_interval)
                    } else {
                        self.config.poll_interval
                    };
                    last_seen = Some(state.confirmations);
                }
                Err(e) if e.is_transient() && consecutive_errors < self.config.max_consecutive_errors => {
                    consecutive_errors += 1;
                    warn!(error = %e, attempt = consecutive_errors, "Transient lookup failure, retrying");
                    delay = self.config.poll_interval;
                }
                Err(e) => {
                    if state.status == ConfirmationStatus::Pending {
                        state.status = ConfirmationStatus::Failed;
                    }
                    return Err(e);
                }
            }

            if let Some(deadline) = deadline {
                if Instant::now()
                    .checked_add(delay)
                    .is_none_or(|next| next > deadline)
                {
                    state.status = ConfirmationStatus::Failed;
                    warn!(polls = state.polls, "Confirmation wait exceeded");
                    return Err(AppError::Blockchain(BlockchainError::WaitExceeded(
                        state.tx_hash.clone(),
                    )));
                }
            }

            sleep_or_cancel(delay, shutdown).await?;
        }
    }

    /// Post-confirmation checks, strictly in order: receipt, lock time, destination, asset
    async fn validate(
        &self,
        state: &mut ConfirmationState,
        tx: &ChainTransaction,
        request: &ConfirmRequest,
    ) -> Result<(), AppError> {
        if tx.receipt_status == Some(false) {
            return Err(ValidationError::TransactionReverted(tx.hash.clone()).into());
        }

        let lock_time = request.lock_time.or(tx.lock_time.filter(|lt| *lt > 0));
        state.lock_time = lock_time;
        if let Some(lock_time) = lock_time {
            let height = self.client.current_block_height().await?;
            if lock_time > height {
                return Err(ValidationError::LockTimeNotReached { lock_time, height }.into());
            }
        }

        if let Some(expected) = &request.destination {
            let actual = tx.to.clone().unwrap_or_default();
            if !self.client.addresses_match(expected, &actual) {
                return Err(ValidationError::WrongDestination {
                    expected: expected.clone(),
                    actual,
                }
                .into());
            }
        }

        if let Some(expected) = &request.expected_asset {
            if tx.receipt_status.is_some() && tx.logs.is_empty() {
                return Err(ValidationError::MissingLogs(tx.hash.clone()).into());
            }
            // A created contract or any emitted log may carry the asset
            let mut candidates = tx
                .asset
                .iter()
                .chain(tx.logs.iter().map(|log| &log.address))
                .peekable();
            if let Some(first) = candidates.peek().map(|c| c.to_string()) {
                if !candidates.any(|actual| self.client.addresses_match(expected, actual)) {
                    return Err(ValidationError::WrongAsset {
                        expected: expected.clone(),
                        actual: first,
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}
