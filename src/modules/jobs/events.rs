use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Body of a queue message. Only the id travels; workers read everything else
/// from the job store after claiming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: Uuid,
}
