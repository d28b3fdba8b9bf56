//! AMQP connection with close notification.

use std::sync::{Arc, Mutex, PoisonError};

use lapin::options::BasicQosOptions;
use lapin::{Channel, Connection, ConnectionProperties};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::domain::{AppError, BrokerError};

/// Broker session configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Unacknowledged deliveries per channel, bounds worker concurrency
    pub prefetch_count: u16,
    /// Shown in the broker's management UI
    pub connection_name: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            prefetch_count: 10,
            connection_name: "payment-watcher".to_string(),
        }
    }
}

#[derive(Default)]
struct CloseState {
    error: Option<BrokerError>,
    waiters: Vec<oneshot::Sender<BrokerError>>,
}

type SharedCloseState = Arc<Mutex<CloseState>>;

/// Record the first close and wake every waiter. Later errors are ignored.
fn fire_closed(state: &SharedCloseState, err: BrokerError) {
    let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.error.is_some() {
        return;
    }
    warn!(error = %err, "Broker connection closed");
    state.error = Some(err.clone());
    for waiter in state.waiters.drain(..) {
        let _ = waiter.send(err.clone());
    }
}

/// An open broker connection
pub struct BrokerConnection {
    connection: Connection,
    config: BrokerConfig,
    close_state: SharedCloseState,
}

impl BrokerConnection {
    pub async fn connect(uri: &str, config: BrokerConfig) -> Result<Self, AppError> {
        info!(name = %config.connection_name, "Connecting to broker...");
        let properties = ConnectionProperties::default()
            .with_connection_name(config.connection_name.clone().into());
        let connection = Connection::connect(uri, properties)
            .await
            .map_err(|e| AppError::Broker(BrokerError::Connection(e.to_string())))?;

        let close_state = SharedCloseState::default();
        let state = Arc::clone(&close_state);
        connection.on_error(move |err| {
            fire_closed(&state, BrokerError::ConnectionLost(err.to_string()));
        });

        info!("Connected to broker");
        Ok(Self {
            connection,
            config,
            close_state,
        })
    }

    /// Open a channel with the configured prefetch. A channel-level error is
    /// reported the same way as a connection loss.
    pub async fn open_channel(&self) -> Result<Channel, AppError> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| AppError::Broker(BrokerError::Channel(e.to_string())))?;
        channel
            .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
            .await
            .map_err(|e| AppError::Broker(BrokerError::Channel(e.to_string())))?;

        let state = Arc::clone(&self.close_state);
        channel.on_error(move |err| {
            fire_closed(
                &state,
                BrokerError::ConnectionLost(format!("channel closed: {err}")),
            );
        });
        Ok(channel)
    }

    /// Resolves once with the error that closed the connection. Fires
    /// immediately if the connection is already gone.
    pub fn notify_closed(&self) -> oneshot::Receiver<BrokerError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self
            .close_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match &state.error {
            Some(err) => {
                let _ = tx.send(err.clone());
            }
            None => state.waiters.push(tx),
        }
        rx
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }

    pub async fn close(&self) -> Result<(), AppError> {
        if !self.is_connected() {
            return Ok(());
        }
        info!("Closing broker connection");
        self.connection
            .close(200, "shutdown")
            .await
            .map_err(|e| AppError::Broker(BrokerError::Connection(e.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_close_fires_every_waiter_once() {
        let state = SharedCloseState::default();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        state.lock().unwrap().waiters.extend([tx1, tx2]);

        fire_closed(&state, BrokerError::ConnectionLost("reset".into()));
        fire_closed(&state, BrokerError::ConnectionLost("second".into()));

        assert_eq!(
            rx1.await.unwrap(),
            BrokerError::ConnectionLost("reset".into())
        );
        assert_eq!(
            rx2.await.unwrap(),
            BrokerError::ConnectionLost("reset".into())
        );
        assert_eq!(
            state.lock().unwrap().error,
            Some(BrokerError::ConnectionLost("reset".into()))
        );
    }

    #[test]
    fn test_broker_config_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.prefetch_count, 10);
    }
}
