pub mod calls;
pub mod campaign;
pub mod objectives;
pub mod pipeline;

pub use calls::{
    BatchJob, BatchStatus, CANCELLED_REASON, CallAnalysis, CallEnded, CallRecord,
    CallRecordStatus,
};
pub use campaign::{
    Campaign, CampaignCandidate, CampaignStatus, CallStatus, CandidateContactUpdate, Channel,
};
pub use objectives::{
    CallObjectives, ObjectiveKind, ObjectiveMap, ObjectiveTarget, ObjectiveValue,
    ObservedObjectives,
};
pub use pipeline::{KanbanColumn, PipelineCandidate, StatusTransition, status_keys};
