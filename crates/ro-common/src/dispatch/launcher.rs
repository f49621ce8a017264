use std::collections::HashSet;
use std::sync::Arc;

use tracing::{info, instrument};

use super::{
    AgentProvisioner, BatchRequest, CallBatchDispatcher, CallTarget, DispatchError,
    DispatchOptions, LaunchedBatch,
};
use crate::models::{CallStatus, CampaignCandidate, CampaignStatus};
use crate::normalize::normalize_phone;
use crate::store::OutreachStore;

/// Launches a campaign: loads it, provisions its agent, picks the targets
/// and hands them to the dispatcher.
#[derive(Clone)]
pub struct CampaignLauncher {
    store: Arc<dyn OutreachStore>,
    provisioner: AgentProvisioner,
    dispatcher: CallBatchDispatcher,
    options: DispatchOptions,
    default_from_number: Option<String>,
}

impl CampaignLauncher {
    pub fn new(
        store: Arc<dyn OutreachStore>,
        provisioner: AgentProvisioner,
        dispatcher: CallBatchDispatcher,
        options: DispatchOptions,
        default_from_number: Option<String>,
    ) -> Self {
        Self {
            store,
            provisioner,
            dispatcher,
            options,
            default_from_number,
        }
    }

    pub fn dispatcher(&self) -> &CallBatchDispatcher {
        &self.dispatcher
    }

    #[instrument(skip(self, candidate_ids))]
    pub async fn launch(
        &self,
        campaign_id: &str,
        candidate_ids: Option<&[String]>,
    ) -> Result<LaunchedBatch, DispatchError> {
        let campaign = self
            .store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| DispatchError::CampaignNotFound(campaign_id.to_string()))?;
        if !campaign.status.accepts_launch() {
            return Err(DispatchError::CampaignClosed {
                campaign_id: campaign.id,
                status: campaign.status,
            });
        }
        if !campaign.uses_voice() {
            return Err(DispatchError::InvalidOptions(
                "campaign has no voice channel".into(),
            ));
        }

        let candidates = self.store.list_campaign_candidates(campaign_id).await?;
        let targets = select_targets(&candidates, candidate_ids);
        if targets.is_empty() {
            return Err(DispatchError::EmptyBatch);
        }

        let agent_id = self.provisioner.ensure_agent(&campaign).await?;
        let launched = self
            .dispatcher
            .launch_batch(BatchRequest {
                campaign_id: campaign.id.clone(),
                agent_id,
                from_number: campaign
                    .from_number
                    .clone()
                    .or_else(|| self.default_from_number.clone()),
                targets,
                options: self.options,
            })
            .await?;

        self.store
            .set_campaign_status(campaign_id, CampaignStatus::Active)
            .await?;
        info!(batch_id = %launched.batch_id, "campaign launched");
        Ok(launched)
    }
}

/// Explicit ids select those candidates; otherwise every candidate not yet
/// contacted is selected. Candidates without a usable phone are skipped.
pub fn select_targets(
    candidates: &[CampaignCandidate],
    candidate_ids: Option<&[String]>,
) -> Vec<CallTarget> {
    let wanted: Option<HashSet<&str>> =
        candidate_ids.map(|ids| ids.iter().map(String::as_str).collect());

    candidates
        .iter()
        .filter(|c| match &wanted {
            Some(ids) => ids.contains(c.id.as_str()),
            None => c.call_status == CallStatus::NotCalled,
        })
        .filter_map(|c| {
            let phone = normalize_phone(c.phone.as_deref()?);
            (!phone.is_empty()).then(|| CallTarget::new(&c.id, &phone))
        })
        .collect()
}
