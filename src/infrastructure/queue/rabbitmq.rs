use anyhow::{Result, anyhow};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, acker::Acker, options::*,
    types::FieldTable,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::{Acknowledge, Delivery, JobQueue, QueueError};
use crate::modules::jobs::events::DispatchMessage;

/// RabbitMQ-backed job queue. Messages are persistent and acknowledged
/// manually; anything unacknowledged when a consumer's channel closes goes
/// back to the queue.
///
/// Every reconnect bumps `generation`. A consumer created on an older
/// generation is replaced on the next receive.
#[derive(Clone)]
pub struct RabbitMqQueue {
    url: String,
    queue: String,
    prefetch: u16,
    conn: Arc<Mutex<Connection>>,
    channel: Arc<Mutex<Channel>>,
    generation: Arc<AtomicU64>,
    consumer: Arc<Mutex<Option<ActiveConsumer>>>,
}

struct ActiveConsumer {
    generation: u64,
    consumer: Consumer,
}

impl RabbitMqQueue {
    async fn connect(url: &str) -> Result<(Connection, Channel)> {
        info!("Connecting to RabbitMQ at {}", url);
        let conn = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| anyhow!("Failed to connect to RabbitMQ: {}", e))?;

        let channel = conn
            .create_channel()
            .await
            .map_err(|e| anyhow!("Failed to create channel: {}", e))?;

        info!("Connected to RabbitMQ");
        Ok((conn, channel))
    }

    /// `prefetch` bounds the unacknowledged deliveries held by this process and
    /// should match the number of workers sharing it.
    pub async fn new(url: &str, queue: &str, prefetch: u16) -> Result<Self> {
        let (conn, channel) = Self::connect(url).await?;
        Self::declare(&channel, queue).await?;

        Ok(Self {
            url: url.to_string(),
            queue: queue.to_string(),
            prefetch: prefetch.max(1),
            conn: Arc::new(Mutex::new(conn)),
            channel: Arc::new(Mutex::new(channel)),
            generation: Arc::new(AtomicU64::new(0)),
            consumer: Arc::new(Mutex::new(None)),
        })
    }

    async fn declare(channel: &Channel, queue: &str) -> Result<()> {
        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to declare queue: {}", e))?;
        Ok(())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replaces the connection, unless someone already did since `seen`.
    /// Never touches the consumer slot, which a receiver may hold while it
    /// waits for a message.
    async fn reconnect(&self, seen: u64) -> Result<()> {
        let mut channel = self.channel.lock().await;
        if self.generation() != seen {
            return Ok(());
        }

        warn!("RabbitMQ connection dropped, reconnecting...");
        let (conn, fresh) = Self::connect(&self.url).await?;
        Self::declare(&fresh, &self.queue).await?;
        *self.conn.lock().await = conn;
        *channel = fresh;
        self.generation.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    async fn recover(&self, seen: u64) {
        if let Err(e) = self.reconnect(seen).await {
            error!("❌ RabbitMQ reconnect failed: {}", e);
        }
    }

    async fn publish_internal(&self, payload: &[u8]) -> Result<()> {
        let channel = self.channel.lock().await;

        channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_delivery_mode(2), // Persistent
            )
            .await
            .map_err(|e| anyhow!("Failed to publish message: {}", e))?
            .await
            .map_err(|e| anyhow!("Failed to confirm publication: {}", e))?;

        Ok(())
    }

    pub async fn publish(&self, payload: &[u8]) -> Result<()> {
        let seen = self.generation();
        if let Err(e) = self.publish_internal(payload).await {
            warn!("RabbitMQ publish failed: {}. Retrying after reconnect.", e);
            self.reconnect(seen).await?;
            self.publish_internal(payload).await?;
        }

        Ok(())
    }

    async fn create_consumer(&self) -> Result<ActiveConsumer> {
        let channel = self.channel.lock().await;
        let generation = self.generation();

        channel
            .basic_qos(self.prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| anyhow!("Failed to set prefetch: {}", e))?;

        let consumer = channel
            .basic_consume(
                &self.queue,
                &format!("encode_sweep_worker_{}", Uuid::new_v4().simple()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| anyhow!("Failed to create consumer: {}", e))?;

        info!("Consuming from '{}' (prefetch {})", self.queue, self.prefetch);
        Ok(ActiveConsumer { generation, consumer })
    }
}

struct AmqpAcker(Acker);

#[async_trait]
impl Acknowledge for AmqpAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Broker(e.to_string()))
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..BasicNackOptions::default()
            })
            .await
            .map(|_| ())
            .map_err(|e| QueueError::Broker(e.to_string()))
    }
}

#[async_trait]
impl JobQueue for RabbitMqQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(&DispatchMessage { job_id })?;
        self.publish(&payload)
            .await
            .map_err(|e| QueueError::Broker(e.to_string()))
    }

    /// A broken consumer stream is a broker error, never [`QueueError::Closed`]:
    /// the connection is rebuilt and the next call consumes from it.
    async fn receive(&self) -> Result<Delivery, QueueError> {
        let mut slot = self.consumer.lock().await;

        loop {
            let current = self.generation();
            if slot.as_ref().is_none_or(|active| active.generation != current) {
                match self.create_consumer().await {
                    Ok(active) => *slot = Some(active),
                    Err(e) => {
                        *slot = None;
                        drop(slot);
                        self.recover(current).await;
                        return Err(QueueError::Broker(e.to_string()));
                    }
                }
            }
            let Some(active) = slot.as_mut() else {
                continue;
            };
            let seen = active.generation;

            let failure = match active.consumer.next().await {
                Some(Ok(delivery)) => {
                    match serde_json::from_slice::<DispatchMessage>(&delivery.data) {
                        Ok(message) => {
                            return Ok(Delivery::new(message.job_id, AmqpAcker(delivery.acker)));
                        }
                        Err(e) => {
                            // Unparseable messages would be redelivered forever.
                            error!("❌ Dropping malformed dispatch message: {}", e);
                            if let Err(e) = delivery.acker.ack(BasicAckOptions::default()).await {
                                error!("Failed to ack message: {}", e);
                            }
                            continue;
                        }
                    }
                }
                Some(Err(e)) => e.to_string(),
                None => "consumer stream ended".to_string(),
            };

            *slot = None;
            drop(slot);
            self.recover(seen).await;
            return Err(QueueError::Broker(failure));
        }
    }
}
