#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::timeout;

use encode_sweep::config::settings::AppConfig;
use encode_sweep::infrastructure::queue::{Delivery, InMemoryQueue, JobQueue, QueueError};
use encode_sweep::infrastructure::storage::{InMemoryStorage, ObjectStorage};
use encode_sweep::modules::jobs::memory::InMemoryJobStore;
use encode_sweep::modules::jobs::model::{EncodeParameters, QualityMetrics};
use encode_sweep::modules::summary::repository::InMemorySummaryStore;
use encode_sweep::modules::sweep::grid::{GridSpec, ParameterRange};
use encode_sweep::state::AppState;
use encode_sweep::workers::transcoder::{EncodeError, Encoder, MetricError, QualityScorer, TranscodeWorker};
use uuid::Uuid;

pub const ADMIN_TOKEN: &str = "test-admin-token";
pub const SOURCE: &str = "source/s.mkv";

pub fn test_config() -> AppConfig {
    AppConfig {
        server_port: 0,
        database_url: String::new(),
        amqp_url: String::new(),
        queue_name: "encode_jobs_test".to_string(),
        minio_url: String::new(),
        minio_bucket: "test".to_string(),
        minio_access_key: String::new(),
        minio_secret_key: String::new(),
        presigned_url_ttl: Duration::from_secs(60),
        worker_count: 2,
        max_attempts: 3,
        encode_timeout: Duration::from_secs(5),
        score_timeout: Duration::from_secs(5),
        visibility_timeout: Duration::from_secs(60),
        default_grid: GridSpec {
            quantization: ParameterRange::new(25, 26),
            rate_control: ParameterRange::new(17, 18),
        },
        max_grid_size: 64,
        ffmpeg_bin: "ffmpeg".to_string(),
        encoder_preset: "ultrafast".to_string(),
        admin_token: Some(ADMIN_TOKEN.to_string()),
    }
}

/// Application state wired to in-process collaborators, with handles to the
/// concrete queue and storage for inspection. The application reaches the
/// queue through `faults`, which passes everything through until told to fail.
pub struct Harness {
    pub state: AppState,
    pub queue: InMemoryQueue,
    pub faults: Arc<FaultyQueue>,
    pub storage: InMemoryStorage,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        // Redelivery is exercised by the queue's own tests; keep it out of the way here.
        let queue = InMemoryQueue::new(Duration::from_secs(600));
        let faults = Arc::new(FaultyQueue::new(queue.clone()));
        let storage = InMemoryStorage::new();
        let state = AppState::new(
            config,
            Arc::new(InMemoryJobStore::new()),
            Arc::new(InMemorySummaryStore::new()),
            Arc::new(storage.clone()),
            faults.clone(),
        );
        Self {
            state,
            queue,
            faults,
            storage,
        }
    }

    pub async fn put_source(&self, key: &str, size: usize) {
        self.storage
            .put(key, Bytes::from(vec![7u8; size]), "video/x-matroska")
            .await
            .unwrap();
    }

    pub fn worker(&self, encoder: Arc<dyn Encoder>) -> TranscodeWorker {
        TranscodeWorker::new("test-worker", &self.state, encoder, Arc::new(SizeScorer))
    }

    /// Feeds deliveries to `worker` until the queue stays empty.
    pub async fn drain(&self, worker: &TranscodeWorker) {
        while let Ok(received) = timeout(Duration::from_millis(100), self.queue.receive()).await {
            worker.handle(received.unwrap()).await;
        }
    }
}

/// Fails the next few receives or enqueues with a broker error, the way a
/// dropped connection does, then passes through to the in-memory queue.
pub struct FaultyQueue {
    inner: InMemoryQueue,
    failing_receives: AtomicU32,
    failing_enqueues: AtomicU32,
}

impl FaultyQueue {
    pub fn new(inner: InMemoryQueue) -> Self {
        Self {
            inner,
            failing_receives: AtomicU32::new(0),
            failing_enqueues: AtomicU32::new(0),
        }
    }

    pub fn fail_receives(&self, count: u32) {
        self.failing_receives.store(count, Ordering::SeqCst);
    }

    pub fn fail_enqueues(&self, count: u32) {
        self.failing_enqueues.store(count, Ordering::SeqCst);
    }

    pub fn receive_failures_left(&self) -> u32 {
        self.failing_receives.load(Ordering::SeqCst)
    }

    pub fn enqueue_failures_left(&self) -> u32 {
        self.failing_enqueues.load(Ordering::SeqCst)
    }
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl JobQueue for FaultyQueue {
    async fn enqueue(&self, job_id: Uuid) -> Result<(), QueueError> {
        if take_failure(&self.failing_enqueues) {
            return Err(QueueError::Broker("connection reset by peer".to_string()));
        }
        self.inner.enqueue(job_id).await
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        if take_failure(&self.failing_receives) {
            return Err(QueueError::Broker("consumer stream ended".to_string()));
        }
        self.inner.receive().await
    }
}

/// Produces an artifact whose size depends on the parameters.
pub struct SizedEncoder {
    pub sizes: HashMap<EncodeParameters, usize>,
    pub calls: AtomicU32,
}

impl SizedEncoder {
    pub fn new(sizes: &[((i32, i32), usize)]) -> Self {
        Self {
            sizes: sizes
                .iter()
                .map(|&((q, rc), size)| (EncodeParameters::new(q, rc), size))
                .collect(),
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for SizedEncoder {
    async fn encode(&self, _source: &Bytes, parameters: &EncodeParameters) -> Result<Bytes, EncodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let size = self.sizes.get(parameters).copied().unwrap_or(500);
        Ok(Bytes::from(vec![1u8; size]))
    }
}

/// Fails the first `failures` calls with `error`, then succeeds.
pub struct FlakyEncoder {
    pub failures: u32,
    pub error: EncodeError,
    pub calls: AtomicU32,
}

impl FlakyEncoder {
    pub fn new(failures: u32, error: EncodeError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Encoder for FlakyEncoder {
    async fn encode(&self, _source: &Bytes, _parameters: &EncodeParameters) -> Result<Bytes, EncodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(self.error.clone());
        }
        Ok(Bytes::from(vec![1u8; 250]))
    }
}

pub struct SlowEncoder(pub Duration);

#[async_trait]
impl Encoder for SlowEncoder {
    async fn encode(&self, _source: &Bytes, _parameters: &EncodeParameters) -> Result<Bytes, EncodeError> {
        tokio::time::sleep(self.0).await;
        Ok(Bytes::from_static(b"late"))
    }
}

/// Reports the byte sizes it was given with a fixed quality score.
pub struct SizeScorer;

#[async_trait]
impl QualityScorer for SizeScorer {
    async fn score(&self, source: &Bytes, artifact: &Bytes) -> Result<QualityMetrics, MetricError> {
        Ok(QualityMetrics {
            quality_score: 0.95,
            source_size: source.len() as u64,
            output_size: artifact.len() as u64,
        })
    }
}
