//! Queue declaration, consumption and publishing.

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use lapin::acker::Acker;
use lapin::message::Delivery;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicPublishOptions, BasicRejectOptions,
    ConfirmSelectOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use tracing::{debug, info, instrument};

use crate::domain::{
    AppError, BrokerError, DeliveryHandle, Job, JobDelivery, JobPublisher, QueueName,
};

/// Header set by quorum queues on redelivery
pub const DELIVERY_COUNT_HEADER: &str = "x-delivery-count";

const PERSISTENT: u8 = 2;

/// Arguments for a work queue: quorum type (so the broker counts deliveries)
/// and a dead-letter route to `<name>.dead-letter` on the default exchange.
pub fn work_queue_arguments(queue: QueueName) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert(
        "x-queue-type".into(),
        AMQPValue::LongString("quorum".into()),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString("".into()),
    );
    args.insert(
        "x-dead-letter-routing-key".into(),
        AMQPValue::LongString(queue.dead_letter().into()),
    );
    args
}

/// Delivery attempt, zero-based: the broker's delivery count when present,
/// otherwise one if the message was redelivered.
pub fn delivery_attempt(headers: Option<&FieldTable>, redelivered: bool) -> u32 {
    headers
        .and_then(|headers| {
            headers
                .inner()
                .iter()
                .find(|(key, _)| key.as_str() == DELIVERY_COUNT_HEADER)
                .and_then(|(_, value)| amqp_to_u32(value))
        })
        .unwrap_or(u32::from(redelivered))
}

fn amqp_to_u32(value: &AMQPValue) -> Option<u32> {
    match value {
        AMQPValue::ShortShortUInt(n) => Some(u32::from(*n)),
        AMQPValue::ShortUInt(n) => Some(u32::from(*n)),
        AMQPValue::LongUInt(n) => Some(*n),
        AMQPValue::ShortShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::ShortInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongInt(n) => u32::try_from(*n).ok(),
        AMQPValue::LongLongInt(n) => u32::try_from(*n).ok(),
        _ => None,
    }
}

/// Settles a lapin delivery
struct AmqpDeliveryHandle {
    acker: Acker,
}

#[async_trait]
impl DeliveryHandle for AmqpDeliveryHandle {
    async fn ack(&self) -> Result<(), AppError> {
        self.acker
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| AppError::Broker(BrokerError::Settle(e.to_string())))
    }

    async fn reject(&self, requeue: bool) -> Result<(), AppError> {
        self.acker
            .reject(BasicRejectOptions { requeue })
            .await
            .map(|_| ())
            .map_err(|e| AppError::Broker(BrokerError::Settle(e.to_string())))
    }
}

fn into_job_delivery(delivery: Result<Delivery, lapin::Error>) -> Result<JobDelivery, AppError> {
    let delivery =
        delivery.map_err(|e| AppError::Broker(BrokerError::ConnectionLost(e.to_string())))?;
    let attempt = delivery_attempt(
        delivery.properties.headers().as_ref(),
        delivery.redelivered,
    );
    Ok(JobDelivery::new(
        delivery.data,
        attempt,
        Box::new(AmqpDeliveryHandle {
            acker: delivery.acker,
        }),
    ))
}

/// Declares, consumes and publishes over one channel
pub struct QueueManager {
    channel: Channel,
}

impl QueueManager {
    /// Wrap a channel and switch it to publisher-confirm mode
    pub async fn open(channel: Channel) -> Result<Self, AppError> {
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| AppError::Broker(BrokerError::Channel(e.to_string())))?;
        Ok(Self { channel })
    }

    /// Declare a durable work queue and its dead-letter queue
    #[instrument(skip(self))]
    pub async fn declare_queue(&self, queue: QueueName) -> Result<(), AppError> {
        let options = || QueueDeclareOptions {
            durable: true,
            exclusive: false,
            auto_delete: false,
            ..Default::default()
        };
        let dead_letter = queue.dead_letter();

        self.channel
            .queue_declare(&dead_letter, options(), FieldTable::default())
            .await
            .map_err(|e| {
                AppError::Broker(BrokerError::Declare {
                    queue: dead_letter.clone(),
                    message: e.to_string(),
                })
            })?;
        self.channel
            .queue_declare(queue.as_str(), options(), work_queue_arguments(queue))
            .await
            .map_err(|e| {
                AppError::Broker(BrokerError::Declare {
                    queue: queue.to_string(),
                    message: e.to_string(),
                })
            })?;

        info!(dead_letter = %dead_letter, "Queue declared");
        Ok(())
    }

    /// Declare a queue owned by another service, which only gets published to.
    /// Plain durable with no arguments, so it matches the owner's declaration.
    #[instrument(skip(self))]
    pub async fn declare_outbound(&self, queue: QueueName) -> Result<(), AppError> {
        self.channel
            .queue_declare(
                queue.as_str(),
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| {
                AppError::Broker(BrokerError::Declare {
                    queue: queue.to_string(),
                    message: e.to_string(),
                })
            })?;
        debug!("Outbound queue declared");
        Ok(())
    }

    /// Start consuming with manual acknowledgement
    pub async fn consume(
        &self,
        queue: QueueName,
        consumer_tag: &str,
    ) -> Result<impl Stream<Item = Result<JobDelivery, AppError>> + Unpin + Send + use<>, AppError>
    {
        let consumer = self
            .channel
            .basic_consume(
                queue.as_str(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| AppError::Broker(BrokerError::Consume(e.to_string())))?;
        info!(queue = %queue, consumer_tag, "Consuming");
        Ok(consumer.map(into_job_delivery))
    }

    /// Publish a raw persistent message to `queue`
    pub async fn publish_bytes(&self, queue: QueueName, payload: &[u8]) -> Result<(), AppError> {
        let properties = BasicProperties::default()
            .with_delivery_mode(PERSISTENT)
            .with_content_type("application/json".into());

        let confirmation = self
            .channel
            .basic_publish(
                "",
                queue.as_str(),
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await
            .map_err(|e| AppError::Broker(BrokerError::Publish(e.to_string())))?
            .await
            .map_err(|e| AppError::Broker(BrokerError::Publish(e.to_string())))?;

        if confirmation.is_nack() {
            return Err(AppError::Broker(BrokerError::Publish(format!(
                "broker rejected message for {queue}"
            ))));
        }
        debug!(queue = %queue, bytes = payload.len(), "Published");
        Ok(())
    }
}

#[async_trait]
impl JobPublisher for QueueManager {
    async fn publish(&self, queue: QueueName, job: &Job) -> Result<(), AppError> {
        let payload =
            serde_json::to_vec(job).map_err(|e| AppError::Internal(e.to_string()))?;
        self.publish_bytes(queue, &payload).await
    }
}
