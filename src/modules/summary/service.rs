use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{info, warn};

use super::model::{ParameterResult, SourceSummary};
use super::repository::SummaryStore;
use crate::modules::jobs::model::{Job, JobStatus};
use crate::modules::jobs::store::{JobStore, StoreError};

/// Builds the summary for `source_ref` from its jobs, or `None` while any of
/// them is still in flight.
pub fn summarize(source_ref: &str, jobs: &[Job]) -> Option<SourceSummary> {
    if jobs.is_empty() || jobs.iter().any(|j| !j.is_terminal()) {
        return None;
    }

    let mut results: Vec<ParameterResult> = jobs
        .iter()
        .filter(|j| j.status == JobStatus::Completed)
        .filter_map(|j| {
            let output_ref = j.output_ref.clone()?;
            let metrics = j.metrics?;
            Some(ParameterResult {
                parameters: j.parameters,
                output_ref,
                metrics,
                compression_ratio: metrics.compression_ratio(),
            })
        })
        .collect();
    results.sort_by(|a, b| {
        a.parameters
            .cmp(&b.parameters)
            .then_with(|| a.output_ref.cmp(&b.output_ref))
    });

    // Strictly greater, so a tie keeps the lower parameters seen first.
    let mut best: Option<&ParameterResult> = None;
    for result in &results {
        let Some(ratio) = result.compression_ratio else {
            continue;
        };
        if best.and_then(|b| b.compression_ratio).is_none_or(|current| ratio > current) {
            best = Some(result);
        }
    }
    let best_compression_ratio = best.and_then(|b| b.compression_ratio);
    let best_parameters = best.map(|b| b.parameters);

    Some(SourceSummary {
        source_ref: source_ref.to_string(),
        total_jobs: jobs.len(),
        completed: results.len(),
        failed: jobs.iter().filter(|j| j.status == JobStatus::Failed).count(),
        best_compression_ratio,
        best_parameters,
        results,
    })
}

/// Recomputes a source's summary whenever one of its jobs reaches a terminal
/// state. Recomputation is idempotent, so duplicate notifications are harmless.
#[derive(Clone)]
pub struct ResultAggregator {
    jobs: Arc<dyn JobStore>,
    summaries: Arc<dyn SummaryStore>,
}

impl ResultAggregator {
    pub fn new(jobs: Arc<dyn JobStore>, summaries: Arc<dyn SummaryStore>) -> Self {
        Self { jobs, summaries }
    }

    pub async fn on_job_resolved(&self, job: &Job) -> Result<Option<SourceSummary>, StoreError> {
        if !job.is_terminal() {
            return Ok(None);
        }

        let siblings = self.jobs.list_by_source(&job.source_ref).await?;
        let Some(summary) = summarize(&job.source_ref, &siblings) else {
            return Ok(None);
        };

        self.summaries.upsert(&summary).await?;
        info!(
            source = %summary.source_ref,
            completed = summary.completed,
            failed = summary.failed,
            best_ratio = ?summary.best_compression_ratio,
            "📊 Sweep finished"
        );
        Ok(Some(summary))
    }

    pub async fn summary(&self, source_ref: &str) -> Result<Option<SourceSummary>, StoreError> {
        self.summaries.get(source_ref).await
    }

    /// Rewrites the summary of every source settled since `since` whose
    /// stored summary is missing or differs from its jobs. Returns how many
    /// summaries were written.
    pub async fn reconcile(&self, since: OffsetDateTime) -> Result<usize, StoreError> {
        let mut written = 0;
        for source_ref in self.jobs.settled_sources(since).await? {
            let jobs = self.jobs.list_by_source(&source_ref).await?;
            let Some(summary) = summarize(&source_ref, &jobs) else {
                continue;
            };
            if self.summaries.get(&source_ref).await?.as_ref() == Some(&summary) {
                continue;
            }

            self.summaries.upsert(&summary).await?;
            warn!(source = %source_ref, "Restored missing source summary");
            written += 1;
        }
        Ok(written)
    }
}
