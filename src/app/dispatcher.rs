//! Job dispatcher: one consume loop per queue, one worker per delivery.
//!
//! Every delivery is settled exactly once: acknowledged on success, requeued
//! while a transient failure still has retry budget, otherwise rejected
//! without requeue so the broker dead-letters it. When the broker connection
//! drops, in-flight workers are abandoned unsettled and the broker redelivers
//! their messages.

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{AppError, BrokerError, JobDelivery, QueueName, decode_job};

use super::handlers::JobHandler;
use super::notifier::OutcomeNotifier;

/// Configuration for a dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Redeliveries allowed for transient failures before dead-lettering
    pub max_redeliveries: u32,
    /// How long to wait for in-flight workers on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_redeliveries: 3,
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    Requeued,
    DeadLettered,
    /// The broker refused the ack/reject, it will redeliver
    SettleFailed,
}

/// Counters for one run of the consume loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub received: usize,
    pub acked: usize,
    pub requeued: usize,
    pub dead_lettered: usize,
    pub settle_failures: usize,
    /// Workers stopped before settling; left to broker redelivery
    pub abandoned: usize,
}

impl DispatchSummary {
    fn record(&mut self, joined: Result<Settlement, JoinError>) {
        match joined {
            Ok(Settlement::Acked) => self.acked += 1,
            Ok(Settlement::Requeued) => self.requeued += 1,
            Ok(Settlement::DeadLettered) => self.dead_lettered += 1,
            Ok(Settlement::SettleFailed) => self.settle_failures += 1,
            Err(e) if e.is_cancelled() => self.abandoned += 1,
            Err(e) => {
                error!(error = %e, "Job worker panicked");
                self.abandoned += 1;
            }
        }
    }
}

/// Decodes deliveries and fans them out to a [`JobHandler`]
pub struct JobDispatcher {
    handler: Arc<dyn JobHandler>,
    notifier: Arc<OutcomeNotifier>,
    config: DispatcherConfig,
}

impl JobDispatcher {
    #[must_use]
    pub fn new(
        handler: Arc<dyn JobHandler>,
        notifier: Arc<OutcomeNotifier>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            handler,
            notifier,
            config,
        }
    }

    pub fn queue(&self) -> QueueName {
        self.handler.queue()
    }

    /// Consume until `shutdown` fires (returns the summary) or the broker
    /// connection is lost (returns [`BrokerError::ConnectionLost`]).
    #[instrument(skip_all, fields(queue = %self.handler.queue()))]
    pub async fn run<S>(
        &self,
        mut deliveries: S,
        mut closed: oneshot::Receiver<BrokerError>,
        shutdown: CancellationToken,
    ) -> Result<DispatchSummary, AppError>
    where
        S: Stream<Item = Result<JobDelivery, AppError>> + Unpin + Send,
    {
        let mut workers: JoinSet<Settlement> = JoinSet::new();
        let mut summary = DispatchSummary::default();
        let mut closed_armed = true;

        info!("Dispatching jobs");
        let lost = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested, no longer accepting jobs");
                    break None;
                }
                res = &mut closed, if closed_armed => match res {
                    Ok(err) => break Some(err),
                    // Notifier went away without firing
                    Err(_) => closed_armed = false,
                },
                Some(joined) = workers.join_next(), if !workers.is_empty() => {
                    summary.record(joined);
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        summary.received += 1;
                        debug!(attempt = delivery.attempt, in_flight = workers.len(), "Job received");
                        let handler = Arc::clone(&self.handler);
                        let notifier = Arc::clone(&self.notifier);
                        let config = self.config.clone();
                        let token = shutdown.clone();
                        workers.spawn(async move {
                            process_delivery(handler.as_ref(), notifier.as_ref(), &config, delivery, &token)
                                .await
                        });
                    }
                    Some(Err(AppError::Broker(err @ BrokerError::ConnectionLost(_)))) => break Some(err),
                    Some(Err(e)) => break Some(BrokerError::ConnectionLost(e.to_string())),
                    None => break Some(BrokerError::ConnectionLost("delivery stream closed".to_string())),
                },
            }
        };

        if let Some(err) = lost {
            error!(
                error = %err,
                in_flight = workers.len(),
                "Broker connection lost, leaving in-flight jobs to redelivery"
            );
            workers.abort_all();
            drain(&mut workers, &mut summary).await;
            return Err(AppError::Broker(err));
        }

        info!(in_flight = workers.len(), "Waiting for in-flight jobs");
        if tokio::time::timeout(
            self.config.shutdown_timeout,
            drain(&mut workers, &mut summary),
        )
        .await
        .is_err()
        {
            warn!(
                remaining = workers.len(),
                "Shutdown timeout reached, abandoning remaining jobs"
            );
            workers.abort_all();
            drain(&mut workers, &mut summary).await;
        }
        info!(?summary, "Dispatcher stopped");
        Ok(summary)
    }
}

async fn drain(workers: &mut JoinSet<Settlement>, summary: &mut DispatchSummary) {
    while let Some(joined) = workers.join_next().await {
        summary.record(joined);
    }
}

fn settle(result: Result<(), AppError>, settlement: Settlement) -> Settlement {
    match result {
        Ok(()) => settlement,
        Err(e) => {
            error!(error = %e, ?settlement, "Failed to settle delivery");
            Settlement::SettleFailed
        }
    }
}

/// Run one delivery through decode, handler, notifier and settlement
async fn process_delivery(
    handler: &dyn JobHandler,
    notifier: &OutcomeNotifier,
    config: &DispatcherConfig,
    delivery: JobDelivery,
    shutdown: &CancellationToken,
) -> Settlement {
    let job = match decode_job(&delivery.payload) {
        Ok(job) => job,
        Err(e) => {
            warn!(error = %e, "Dropping malformed job payload");
            return settle(delivery.reject(false).await, Settlement::DeadLettered);
        }
    };

    let kind = job.kind();
    let user_name = job.user_name().unwrap_or_default().to_string();
    let outcome = if kind.queue() == handler.queue() {
        handler.handle(job, shutdown).await
    } else {
        Err(AppError::UnsupportedJobKind {
            kind: kind.to_string(),
            queue: handler.queue().to_string(),
        })
    };

    match &outcome {
        Err(e) if e.is_cancelled() => {
            info!(kind = %kind, "Job interrupted by shutdown, returning it to the queue");
            return settle(delivery.reject(true).await, Settlement::Requeued);
        }
        Err(e) if e.is_transient() && delivery.attempt < config.max_redeliveries => {
            warn!(
                kind = %kind,
                error = %e,
                attempt = delivery.attempt,
                "Transient failure, requeueing job"
            );
            return settle(delivery.reject(true).await, Settlement::Requeued);
        }
        _ => {}
    }

    notifier.notify(&user_name, kind, &outcome).await;

    match outcome {
        Ok(_) => settle(delivery.ack().await, Settlement::Acked),
        Err(_) => settle(delivery.reject(false).await, Settlement::DeadLettered),
    }
}
