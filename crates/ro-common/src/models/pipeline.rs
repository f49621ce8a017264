use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status keys the reconciliation rules can move a candidate into.
pub mod status_keys {
    pub const STARTED_WORK: &str = "started-work";
    pub const INTERVIEW: &str = "interview";
    pub const INTERESTED: &str = "interested";
    pub const REJECTED: &str = "rejected";
    pub const HIRED: &str = "hired";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineCandidate {
    pub id: String,
    pub job_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub status: String,
    pub manual_override: bool,
    pub notes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineCandidate {
    pub fn new(id: &str, job_id: &str, status: &str) -> Self {
        Self {
            id: id.to_string(),
            job_id: job_id.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            phone: None,
            email: None,
            status: status.to_string(),
            manual_override: false,
            notes: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KanbanColumn {
    pub id: String,
    pub job_id: String,
    pub title: String,
    pub status_key: String,
    pub position: i32,
    pub is_post_hire: bool,
}

impl KanbanColumn {
    pub fn counts_as_hired(&self) -> bool {
        self.status_key == status_keys::HIRED || self.is_post_hire
    }
}

/// A conditional status move. It only applies while the candidate still sits
/// in `from`; automated moves additionally require `manual_override = false`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub candidate_id: String,
    pub job_id: String,
    pub from: String,
    pub to: String,
    pub hired_delta: i32,
    pub manual: bool,
}
