//! Serializes outgoing chain writes so only one transaction from this process
//! is being signed and broadcast at a time.
//!
//! A single task owns the [`ChainWriter`]; callers send commands over a channel
//! and get the broadcast transaction hash back. Waiting for the transaction to
//! be mined happens outside the sequencer.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{AppError, ChainWriter};

/// A write to broadcast through the sequencer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCommand {
    RegisterSubDomain { name: String },
    UpdateContentHash { name: String, content_hash: String },
}

type Reply = oneshot::Sender<Result<String, AppError>>;

/// Cloneable handle to the sequencer task
#[derive(Clone)]
pub struct TxSequencer {
    commands: mpsc::Sender<(WriteCommand, Reply)>,
}

impl TxSequencer {
    /// Spawn the sequencer task. It exits once every handle is dropped.
    pub fn spawn(writer: Arc<dyn ChainWriter>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(WriteCommand, Reply)>(capacity.max(1));

        let handle = tokio::spawn(async move {
            info!("Transaction sequencer started");
            while let Some((command, reply)) = rx.recv().await {
                debug!(?command, "Broadcasting write");
                let result = match &command {
                    WriteCommand::RegisterSubDomain { name } => {
                        writer.register_sub_domain(name).await
                    }
                    WriteCommand::UpdateContentHash { name, content_hash } => {
                        writer.update_content_hash(name, content_hash).await
                    }
                };
                if let Err(e) = &result {
                    warn!(?command, error = %e, "Chain write failed");
                }
                // Caller may have gone away; the write already happened either way
                let _ = reply.send(result);
            }
            info!("Transaction sequencer stopped");
        });

        (Self { commands: tx }, handle)
    }

    /// Queue a write and wait for its transaction hash
    pub async fn submit(&self, command: WriteCommand) -> Result<String, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send((command, reply_tx))
            .await
            .map_err(|_| AppError::Internal("transaction sequencer stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| AppError::Internal("transaction sequencer dropped reply".to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockChainWriter;

    #[tokio::test]
    async fn test_writes_are_serialized() {
        let writer = Arc::new(MockChainWriter::new());
        let (sequencer, _handle) = TxSequencer::spawn(Arc::clone(&writer) as _, 16);

        let mut tasks = Vec::new();
        for i in 0..8 {
            let sequencer = sequencer.clone();
            tasks.push(tokio::spawn(async move {
                sequencer
                    .submit(WriteCommand::RegisterSubDomain {
                        name: format!("user{i}"),
                    })
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(writer.writes().len(), 8);
        assert_eq!(writer.max_concurrent(), 1);
    }

    #[tokio::test]
    async fn test_write_error_is_returned_to_caller() {
        let writer = Arc::new(MockChainWriter::failing("nonce too low"));
        let (sequencer, _handle) = TxSequencer::spawn(writer, 4);

        let err = sequencer
            .submit(WriteCommand::UpdateContentHash {
                name: "alice".into(),
                content_hash: "QmHash".into(),
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nonce too low"));
    }

    #[tokio::test]
    async fn test_task_exits_when_handles_dropped() {
        let writer = Arc::new(MockChainWriter::new());
        let (sequencer, handle) = TxSequencer::spawn(writer, 4);
        drop(sequencer);
        handle.await.unwrap();
    }
}
