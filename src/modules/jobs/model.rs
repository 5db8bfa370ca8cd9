use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// The full transition table. `Pending -> Failed` is only taken by the
    /// administrative cancel path.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Processing, Completed)
                | (Processing, Pending)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status `{other}`")),
        }
    }
}

/// One point of the encoder parameter grid.
///
/// Field order defines the lexicographic ordering used by the grid and the
/// aggregated result tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
pub struct EncodeParameters {
    /// Upper bound on the quantizer (`qpmax`).
    pub quantization: i32,
    /// Constant rate factor (`crf`).
    pub rate_control_factor: i32,
}

impl EncodeParameters {
    pub fn new(quantization: i32, rate_control_factor: i32) -> Self {
        Self {
            quantization,
            rate_control_factor,
        }
    }
}

impl fmt::Display for EncodeParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "q{}/rc{}", self.quantization, self.rate_control_factor)
    }
}

/// Quality and size result of one encode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct QualityMetrics {
    /// Perceptual quality of the artifact against its source (SSIM, 0..=1).
    pub quality_score: f64,
    pub source_size: u64,
    pub output_size: u64,
}

impl QualityMetrics {
    /// `source_size / output_size`, or `None` for an empty artifact.
    pub fn compression_ratio(&self) -> Option<f64> {
        if self.output_size == 0 {
            return None;
        }
        Some(self.source_size as f64 / self.output_size as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Job {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub source_ref: String,
    pub parameters: EncodeParameters,
    pub status: JobStatus,
    pub output_ref: Option<String>,
    pub metrics: Option<QualityMetrics>,
    pub error: Option<String>,
    pub worker_id: Option<String>,
    pub attempt_count: i32,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: OffsetDateTime,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: OffsetDateTime,
}

impl Job {
    pub fn new(batch_id: Uuid, source_ref: &str, parameters: EncodeParameters, now: OffsetDateTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            batch_id,
            source_ref: source_ref.to_string(),
            parameters,
            status: JobStatus::Pending,
            output_ref: None,
            metrics: None,
            error: None,
            worker_id: None,
            attempt_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Field-presence rules: results only on `completed`, an error only on
    /// `failed`, a worker only while `processing`.
    pub fn invariants_hold(&self) -> bool {
        let completed = self.status == JobStatus::Completed;
        let failed = self.status == JobStatus::Failed;
        let processing = self.status == JobStatus::Processing;

        self.output_ref.is_some() == completed
            && self.metrics.is_some() == completed
            && self.error.as_deref().is_some_and(|e| !e.is_empty()) == failed
            && (self.error.is_none() || failed)
            && (self.worker_id.is_none() || processing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_str() {
        for status in JobStatus::ALL {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            assert_eq!(format!("{status}"), status.as_str());
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for from in [JobStatus::Completed, JobStatus::Failed] {
            for to in JobStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be rejected");
            }
        }
    }

    #[test]
    fn test_transition_table() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Processing));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Pending));
        assert!(JobStatus::Processing.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Processing.can_transition_to(JobStatus::Processing));
    }

    #[test]
    fn test_parameters_order_lexicographically() {
        let mut params = vec![
            EncodeParameters::new(26, 17),
            EncodeParameters::new(25, 18),
            EncodeParameters::new(25, 17),
        ];
        params.sort();
        assert_eq!(params[0], EncodeParameters::new(25, 17));
        assert_eq!(params[2], EncodeParameters::new(26, 17));
    }

    #[test]
    fn test_compression_ratio() {
        let metrics = QualityMetrics {
            quality_score: 0.97,
            source_size: 1000,
            output_size: 400,
        };
        assert_eq!(metrics.compression_ratio(), Some(2.5));

        let empty = QualityMetrics {
            output_size: 0,
            ..metrics
        };
        assert_eq!(empty.compression_ratio(), None);
    }

    #[test]
    fn test_new_job_is_pending_and_consistent() {
        let job = Job::new(
            Uuid::new_v4(),
            "source/a.mkv",
            EncodeParameters::new(25, 17),
            OffsetDateTime::now_utc(),
        );
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.attempt_count, 0);
        assert_eq!(job.created_at, job.updated_at);
        assert!(job.invariants_hold());
    }
}
