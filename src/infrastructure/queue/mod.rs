//! At-least-once delivery of job ids to workers.
//!
//! A delivery may repeat a job that another worker already holds or resolved;
//! consumers deduplicate through the job store's claim, never through the queue.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

pub mod memory;
pub mod rabbitmq;

pub use memory::InMemoryQueue;
pub use rabbitmq::RabbitMqQueue;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue will never deliver again. Consumers stop on it.
    #[error("queue is closed")]
    Closed,
    /// Transient; the same call may succeed later.
    #[error("broker error: {0}")]
    Broker(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;
    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}

/// One received message. Dropping it without acknowledging leaves it to the
/// broker's redelivery.
pub struct Delivery {
    pub job_id: Uuid,
    acker: Box<dyn Acknowledge>,
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery").field("job_id", &self.job_id).finish()
    }
}

impl Delivery {
    pub fn new(job_id: Uuid, acker: impl Acknowledge + 'static) -> Self {
        Self {
            job_id,
            acker: Box::new(acker),
        }
    }

    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.acker.nack(requeue).await
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Waits for the next message.
    async fn receive(&self) -> Result<Delivery, QueueError>;
}
