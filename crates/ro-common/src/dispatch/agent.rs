use std::sync::Arc;

use tracing::{info, instrument};

use super::DispatchError;
use crate::models::{Campaign, ObjectiveKind, ObjectiveTarget, objectives};
use crate::store::OutreachStore;
use crate::voice::{AnalysisField, CreateAgentRequest, VoiceProvider};

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Public URL of the inbound webhook endpoint.
    pub webhook_url: String,
    pub default_voice_id: Option<String>,
}

/// Creates each campaign's speaking agent at most once.
#[derive(Clone)]
pub struct AgentProvisioner {
    store: Arc<dyn OutreachStore>,
    provider: Arc<dyn VoiceProvider>,
    settings: AgentSettings,
}

impl AgentProvisioner {
    pub fn new(
        store: Arc<dyn OutreachStore>,
        provider: Arc<dyn VoiceProvider>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            store,
            provider,
            settings,
        }
    }

    /// Returns the campaign's agent id, creating the agent first if needed.
    ///
    /// The id is stored with compare-and-set, so concurrent launches of the
    /// same campaign converge on whichever agent was stored first.
    #[instrument(skip(self, campaign), fields(campaign_id = %campaign.id))]
    pub async fn ensure_agent(&self, campaign: &Campaign) -> Result<String, DispatchError> {
        if let Some(agent_id) = campaign.agent_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(agent_id.to_string());
        }

        let request = CreateAgentRequest {
            agent_name: campaign.name.clone(),
            prompt: campaign
                .agent_prompt
                .clone()
                .filter(|p| !p.trim().is_empty())
                .unwrap_or_else(|| build_agent_prompt(campaign)),
            voice_id: campaign
                .voice_id
                .clone()
                .or_else(|| self.settings.default_voice_id.clone()),
            webhook_url: self.settings.webhook_url.clone(),
            post_call_analysis_data: analysis_fields(&campaign.objective_targets),
        };

        let created = self.provider.create_agent(&request).await?;
        let stored = self.store.set_campaign_agent(&campaign.id, &created).await?;
        if stored != created {
            info!(%created, %stored, "agent already provisioned by a concurrent launch");
        } else {
            info!(agent_id = %stored, "agent provisioned");
        }
        Ok(stored)
    }
}

fn field_kind(kind: ObjectiveKind) -> &'static str {
    match kind {
        ObjectiveKind::Bool => "boolean",
        ObjectiveKind::Text => "string",
        ObjectiveKind::Number => "number",
    }
}

fn canonical_fields() -> [(&'static str, &'static str); 3] {
    [
        (
            objectives::AVAILABLE_TO_WORK,
            "Whether the candidate is currently available to take on work.",
        ),
        (
            objectives::INTERESTED,
            "Whether the candidate is interested in the role.",
        ),
        (
            objectives::KNOWS_REFEREE,
            "Whether the candidate knows someone they could refer.",
        ),
    ]
}

/// The three canonical objectives plus the campaign's own targets.
pub fn analysis_fields(targets: &[ObjectiveTarget]) -> Vec<AnalysisField> {
    let mut fields: Vec<AnalysisField> = canonical_fields()
        .into_iter()
        .map(|(name, description)| AnalysisField {
            name: name.to_string(),
            kind: "boolean",
            description: description.to_string(),
        })
        .collect();

    for target in targets {
        if fields.iter().any(|f| f.name == target.key) {
            continue;
        }
        fields.push(AnalysisField {
            name: target.key.clone(),
            kind: field_kind(target.kind),
            description: target
                .question
                .clone()
                .unwrap_or_else(|| target.key.replace('_', " ")),
        });
    }
    fields
}

/// Default agent prompt for campaigns without a hand-written one.
pub fn build_agent_prompt(campaign: &Campaign) -> String {
    let mut prompt = format!(
        "You are a friendly recruiter calling on behalf of the \"{}\" campaign. \
         Introduce yourself, confirm you are speaking with the right person and keep the call short.\n\
         During the call, find out:\n\
         - whether they are available to work\n\
         - whether they are interested in the opportunity\n\
         - whether they know someone who might be a good fit\n",
        campaign.name
    );
    for target in &campaign.objective_targets {
        let question = target
            .question
            .clone()
            .unwrap_or_else(|| target.key.replace('_', " "));
        prompt.push_str(&format!("- {question}\n"));
    }
    prompt.push_str("Thank them for their time before hanging up.");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::voice::FakeVoiceProvider;

    fn settings() -> AgentSettings {
        AgentSettings {
            webhook_url: "https://outreach.example/webhooks/voice".into(),
            default_voice_id: Some("voice-default".into()),
        }
    }

    #[tokio::test]
    async fn creates_the_agent_once_per_campaign() {
        let store = Arc::new(MemoryStore::new());
        let mut campaign = Campaign::new("camp", "Warehouse night shift");
        campaign
            .objective_targets
            .push(ObjectiveTarget::new("interview_scheduled", ObjectiveKind::Bool));
        store.insert_campaign(campaign.clone());
        let provider = Arc::new(FakeVoiceProvider::new());
        let provisioner = AgentProvisioner::new(store.clone(), provider.clone(), settings());

        let first = provisioner.ensure_agent(&campaign).await.unwrap();
        let reloaded = store.get_campaign("camp").await.unwrap().unwrap();
        let second = provisioner.ensure_agent(&reloaded).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.agents_created(), 1);
        assert_eq!(reloaded.agent_id.as_deref(), Some(first.as_str()));
    }

    #[tokio::test]
    async fn stale_campaign_snapshot_converges_on_stored_agent() {
        let store = Arc::new(MemoryStore::new());
        let campaign = Campaign::new("camp", "Warehouse night shift");
        store.insert_campaign(campaign.clone());
        store.set_campaign_agent("camp", "agent-existing").await.unwrap();
        let provisioner =
            AgentProvisioner::new(store, Arc::new(FakeVoiceProvider::new()), settings());

        let agent = provisioner.ensure_agent(&campaign).await.unwrap();
        assert_eq!(agent, "agent-existing");
    }

    #[tokio::test]
    async fn provider_failure_is_fatal() {
        let store = Arc::new(MemoryStore::new());
        let campaign = Campaign::new("camp", "Warehouse night shift");
        store.insert_campaign(campaign.clone());
        let provisioner = AgentProvisioner::new(
            store,
            Arc::new(FakeVoiceProvider::new().failing_agent_creation()),
            settings(),
        );

        let err = provisioner.ensure_agent(&campaign).await.unwrap_err();
        assert!(matches!(err, DispatchError::Provider(_)));
    }

    #[test]
    fn analysis_fields_skip_duplicate_canonical_keys() {
        let targets = vec![
            ObjectiveTarget::new(objectives::INTERESTED, ObjectiveKind::Bool),
            ObjectiveTarget::new("start_date", ObjectiveKind::Text),
        ];
        let fields = analysis_fields(&targets);
        let names: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["available_to_work", "interested", "knows_referee", "start_date"]
        );
        assert_eq!(fields[3].kind, "string");
    }
}
