use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchCampaignRequest {
    /// Explicit selection; all not-yet-contacted candidates when absent.
    #[serde(default)]
    pub candidate_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchCampaignResponse {
    pub campaign_id: String,
    pub batch_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopCampaignResponse {
    pub campaign_id: String,
    pub cancelled_batches: Vec<String>,
}
