pub mod batch;
pub mod pipeline;
pub mod webhook_event;

pub use batch::{LaunchCampaignRequest, LaunchCampaignResponse, StopCampaignResponse};
pub use pipeline::{
    HiredCountResponse, MoveCandidateRequest, MoveCandidateResponse, ReconcileResponse,
    ReconcileSummary, SyncStartRequest, SyncStatusResponse,
};
pub use webhook_event::{CallAnalysisPayload, CallPayload, EventKind, WebhookAck, WebhookPayload};
