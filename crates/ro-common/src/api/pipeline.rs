use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoveCandidateRequest {
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveCandidateResponse {
    pub candidate_id: String,
    pub from: String,
    pub to: String,
    pub manual_override: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReconcileSummary {
    pub updated: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileResponse {
    pub job_id: String,
    #[serde(flatten)]
    pub summary: ReconcileSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HiredCountResponse {
    pub job_id: String,
    pub hired_count: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStartRequest {
    #[serde(default)]
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatusResponse {
    pub job_id: String,
    pub running: bool,
}
