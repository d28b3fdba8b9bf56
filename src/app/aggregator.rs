//! Payment forward reconciliation.
//!
//! A payment forward collects one or more on-chain transactions towards a
//! single charge. Each newly seen transaction is confirmed with the
//! [`ChainWatcher`] and credited exactly once.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, BlockchainError, ConfirmRequest, PaymentForward, PaymentForwardSource,
    dash_to_duffs,
};

use super::watcher::{ChainWatcher, sleep_or_cancel};

/// Configuration for payment forward reconciliation
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Delay between checks of the forward's transaction list
    pub poll_interval: Duration,
    pub max_wait: Option<Duration>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(120),
            max_wait: Some(Duration::from_secs(48 * 60 * 60)),
        }
    }
}

/// Reconciles payment forwards against their charge amount
pub struct PaymentAggregator {
    source: Arc<dyn PaymentForwardSource>,
    watcher: Arc<ChainWatcher>,
    config: AggregatorConfig,
}

impl PaymentAggregator {
    #[must_use]
    pub fn new(
        source: Arc<dyn PaymentForwardSource>,
        watcher: Arc<ChainWatcher>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            source,
            watcher,
            config,
        }
    }

    /// Single reconciliation pass. Confirms and credits every transaction not yet
    /// in the processed set, then reports whether the charge is covered.
    #[instrument(skip(self, forward, shutdown), fields(forward = %forward.id))]
    pub async fn reconcile_once(
        &self,
        forward: &mut PaymentForward,
        shutdown: &CancellationToken,
    ) -> Result<bool, AppError> {
        let transactions = self.source.forwarded_transactions(&forward.id).await?;
        if transactions.is_empty() {
            debug!("No transactions credited to forward yet");
            return Ok(forward.is_complete());
        }

        for tx in transactions {
            if forward.is_processed(&tx.tx_hash) {
                continue;
            }
            self.watcher
                .confirm(&ConfirmRequest::new(&tx.tx_hash), shutdown)
                .await?;
            if forward.credit(&tx.tx_hash, tx.amount_duffs) {
                info!(
                    tx = %tx.tx_hash,
                    amount_duffs = tx.amount_duffs,
                    credited_duffs = forward.credited_duffs(),
                    charge_duffs = forward.charge_duffs,
                    "Credited transaction to payment forward"
                );
            }
        }

        Ok(forward.is_complete())
    }

    /// Reconcile until the credited total covers `charge_amount` (in DASH).
    /// An empty forward is waited on, never treated as a failure.
    #[instrument(skip(self, shutdown))]
    pub async fn reconcile(
        &self,
        payment_forward_id: &str,
        charge_amount: f64,
        shutdown: &CancellationToken,
    ) -> Result<PaymentForward, AppError> {
        let charge_duffs = dash_to_duffs(charge_amount)?;
        let mut forward = PaymentForward::new(payment_forward_id, charge_duffs);
        let deadline = self
            .config
            .max_wait
            .and_then(|wait| Instant::now().checked_add(wait));

        loop {
            if self.reconcile_once(&mut forward, shutdown).await? {
                info!(
                    credited_duffs = forward.credited_duffs(),
                    transactions = forward.processed().len(),
                    "Payment forward complete"
                );
                return Ok(forward);
            }

            if let Some(deadline) = deadline {
                if Instant::now()
                    .checked_add(self.config.poll_interval)
                    .is_none_or(|next| next > deadline)
                {
                    return Err(AppError::Blockchain(BlockchainError::WaitExceeded(format!(
                        "payment forward {}",
                        forward.id
                    ))));
                }
            }
            sleep_or_cancel(self.config.poll_interval, shutdown).await?;
        }
    }
}
