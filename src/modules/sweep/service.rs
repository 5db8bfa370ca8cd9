use thiserror::Error;
use tracing::{error, info, warn};

use super::dto::SweepResponse;
use super::grid::{self, GridError, GridSpec};
use crate::infrastructure::queue::QueueError;
use crate::modules::jobs::store::StoreError;
use crate::state::AppState;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to dispatch {undispatched} of {total} jobs: {source}")]
    Dispatch {
        undispatched: usize,
        total: usize,
        #[source]
        source: QueueError,
    },
}

pub struct SweepService;

impl SweepService {
    /// Creates one job per grid point for `source_ref` and hands every job to
    /// the queue.
    ///
    /// Jobs that cannot be enqueued are cancelled, so a failed dispatch never
    /// leaves `pending` jobs that no worker will receive.
    pub async fn submit(
        state: &AppState,
        source_ref: &str,
        grid_spec: &GridSpec,
    ) -> Result<SweepResponse, SubmitError> {
        let parameters = grid::generate(grid_spec, state.config.max_grid_size)?;
        let jobs = state.jobs.create_batch(source_ref, &parameters).await?;
        let total = jobs.len();

        for (dispatched, job) in jobs.iter().enumerate() {
            if let Err(e) = state.queue.enqueue(job.id).await {
                error!(source = %source_ref, "❌ Dispatch failed after {} of {} jobs: {}", dispatched, total, e);
                let reason = format!("dispatch failed: {e}");
                for orphan in &jobs[dispatched..] {
                    match state.jobs.cancel_job(orphan.id, &reason).await {
                        Ok(job) => {
                            if let Err(e) = state.aggregator.on_job_resolved(&job).await {
                                warn!(job.id = %job.id, "Failed to update summary after cancel: {}", e);
                            }
                        }
                        Err(e) => error!(job.id = %orphan.id, "Failed to cancel undispatched job: {}", e),
                    }
                }
                return Err(SubmitError::Dispatch {
                    undispatched: total - dispatched,
                    total,
                    source: e,
                });
            }
        }

        let batch_id = jobs.first().map(|j| j.batch_id).unwrap_or_default();
        info!(source = %source_ref, batch.id = %batch_id, jobs = total, "🚀 Sweep submitted");

        Ok(SweepResponse {
            source_ref: source_ref.to_string(),
            batch_id,
            job_ids: jobs.iter().map(|j| j.id).collect(),
        })
    }
}
