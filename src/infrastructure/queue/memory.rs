use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_channel::{Receiver, Sender};
use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use super::{Acknowledge, Delivery, JobQueue, QueueError};

/// In-process queue with broker-like semantics: a received message that is
/// not acknowledged within the visibility timeout is delivered again.
#[derive(Clone)]
pub struct InMemoryQueue {
    sender: Sender<Uuid>,
    receiver: Receiver<Uuid>,
    visibility_timeout: Duration,
}

impl InMemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        let (sender, receiver) = async_channel::unbounded();
        Self {
            sender,
            receiver,
            visibility_timeout,
        }
    }

    /// Messages waiting to be received.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn close(&self) {
        self.sender.close();
    }
}

struct MemoryAcker {
    job_id: Uuid,
    settled: Arc<AtomicBool>,
    sender: Sender<Uuid>,
}

#[async_trait]
impl Acknowledge for MemoryAcker {
    async fn ack(&self) -> Result<(), QueueError> {
        self.settled.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn nack(&self, requeue: bool) -> Result<(), QueueError> {
        if !self.settled.swap(true, Ordering::SeqCst) && requeue {
            self.sender
                .send(self.job_id)
                .await
                .map_err(|_| QueueError::Closed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl JobQueue for InMemoryQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.sender
            .send(job_id)
            .await
            .map_err(|_| QueueError::Closed)
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        let job_id = self.receiver.recv().await.map_err(|_| QueueError::Closed)?;

        let settled = Arc::new(AtomicBool::new(false));
        let redeliver = settled.clone();
        let sender = self.sender.clone();
        let timeout = self.visibility_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if !redeliver.swap(true, Ordering::SeqCst) {
                debug!(job.id = %job_id, "Visibility timeout expired, redelivering");
                let _ = sender.send(job_id).await;
            }
        });

        Ok(Delivery::new(
            job_id,
            MemoryAcker {
                job_id,
                settled,
                sender: self.sender.clone(),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_delivery() {
        let queue = InMemoryQueue::new(Duration::from_secs(60));
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();

        let first = queue.receive().await.unwrap();
        let second = queue.receive().await.unwrap();
        assert_eq!(first.job_id, a);
        assert_eq!(second.job_id, b);
        first.ack().await.unwrap();
        second.ack().await.unwrap();
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_unacked_message_is_redelivered() {
        let queue = InMemoryQueue::new(Duration::from_millis(20));
        let id = Uuid::new_v4();
        queue.enqueue(id).await.unwrap();

        let delivery = queue.receive().await.unwrap();
        drop(delivery);

        let again = tokio::time::timeout(Duration::from_secs(1), queue.receive())
            .await
            .expect("message should come back after the visibility timeout")
            .unwrap();
        assert_eq!(again.job_id, id);
        again.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_acked_message_is_not_redelivered() {
        let queue = InMemoryQueue::new(Duration::from_millis(10));
        queue.enqueue(Uuid::new_v4()).await.unwrap();

        queue.receive().await.unwrap().ack().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_nack_with_requeue() {
        let queue = InMemoryQueue::new(Duration::from_secs(60));
        let id = Uuid::new_v4();
        queue.enqueue(id).await.unwrap();

        queue.receive().await.unwrap().nack(true).await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.receive().await.unwrap().job_id, id);
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let queue = InMemoryQueue::new(Duration::from_secs(60));
        queue.close();
        assert!(matches!(queue.enqueue(Uuid::new_v4()).await, Err(QueueError::Closed)));
        assert!(matches!(queue.receive().await, Err(QueueError::Closed)));
    }
}
