use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

pub mod ffmpeg;
pub mod reaper;
pub mod transcoder;

use transcoder::{Encoder, QualityScorer, TranscodeWorker};

/// Spawns `count` independent workers sharing one encoder and scorer.
pub fn spawn_workers(
    state: &AppState,
    encoder: Arc<dyn Encoder>,
    scorer: Arc<dyn QualityScorer>,
    count: usize,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|i| {
            let name = format!("worker-{}-{}", std::process::id(), i);
            let worker = TranscodeWorker::new(name, state, encoder.clone(), scorer.clone());
            tokio::spawn(worker.run(shutdown.clone()))
        })
        .collect()
}
