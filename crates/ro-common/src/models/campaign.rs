use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::objectives::{CallObjectives, ObjectiveMap, ObjectiveTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
    Stopped,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Active => "active",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Stopped => "stopped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(CampaignStatus::Draft),
            "active" => Some(CampaignStatus::Active),
            "paused" => Some(CampaignStatus::Paused),
            "completed" => Some(CampaignStatus::Completed),
            "stopped" => Some(CampaignStatus::Stopped),
            _ => None,
        }
    }

    /// Completed and stopped campaigns never dispatch again.
    pub fn accepts_launch(&self) -> bool {
        !matches!(self, CampaignStatus::Completed | CampaignStatus::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Voice,
    Chat,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Voice => "voice",
            Channel::Chat => "chat",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "voice" => Some(Channel::Voice),
            "chat" => Some(Channel::Chat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    pub job_id: Option<String>,
    pub channels: Vec<Channel>,
    pub status: CampaignStatus,
    pub candidate_count: i32,
    pub response_rate: f64,
    pub agent_id: Option<String>,
    pub agent_prompt: Option<String>,
    pub voice_id: Option<String>,
    pub from_number: Option<String>,
    pub objective_targets: Vec<ObjectiveTarget>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: id.to_string(),
            name: name.to_string(),
            job_id: None,
            channels: vec![Channel::Voice],
            status: CampaignStatus::Draft,
            candidate_count: 0,
            response_rate: 0.0,
            agent_id: None,
            agent_prompt: None,
            voice_id: None,
            from_number: None,
            objective_targets: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn uses_voice(&self) -> bool {
        self.channels.contains(&Channel::Voice)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    NotCalled,
    Contacted,
}

impl CallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallStatus::NotCalled => "not_called",
            CallStatus::Contacted => "contacted",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "not_called" => Some(CallStatus::NotCalled),
            "contacted" => Some(CallStatus::Contacted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignCandidate {
    pub id: String,
    pub campaign_id: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub call_status: CallStatus,
    pub available_to_work: Option<bool>,
    pub interested: Option<bool>,
    pub knows_referee: Option<bool>,
    pub custom_objectives: ObjectiveMap,
    pub notes: Vec<String>,
    pub last_contact: Option<DateTime<Utc>>,
}

impl CampaignCandidate {
    pub fn new(id: &str, campaign_id: &str, first_name: &str, last_name: &str) -> Self {
        Self {
            id: id.to_string(),
            campaign_id: campaign_id.to_string(),
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            phone: None,
            email: None,
            call_status: CallStatus::NotCalled,
            available_to_work: None,
            interested: None,
            knows_referee: None,
            custom_objectives: ObjectiveMap::new(),
            notes: Vec::new(),
            last_contact: None,
        }
    }

    /// Applies a field-scoped objective update. Unknown objectives in the
    /// update leave the stored values untouched.
    pub fn apply_contact(&mut self, update: &CandidateContactUpdate) {
        let objectives = &update.objectives;
        if objectives.available_to_work.is_some() {
            self.available_to_work = objectives.available_to_work;
        }
        if objectives.interested.is_some() {
            self.interested = objectives.interested;
        }
        if objectives.knows_referee.is_some() {
            self.knows_referee = objectives.knows_referee;
        }
        for (key, value) in &objectives.custom {
            self.custom_objectives.insert(key.clone(), value.clone());
        }
        self.last_contact = Some(update.last_contact);
        self.call_status = update.call_status;
    }
}

/// The part of a campaign candidate an analyzed call is allowed to touch.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateContactUpdate {
    pub campaign_id: String,
    pub candidate_id: String,
    pub objectives: CallObjectives,
    pub last_contact: DateTime<Utc>,
    pub call_status: CallStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::objectives::ObjectiveValue;

    #[test]
    fn contact_update_keeps_known_values_when_new_ones_are_unknown() {
        let mut candidate = CampaignCandidate::new("c1", "camp", "Ada", "Lovelace");
        candidate.interested = Some(true);

        let mut objectives = CallObjectives {
            available_to_work: Some(false),
            ..Default::default()
        };
        objectives
            .custom
            .insert("start_date".into(), ObjectiveValue::Text("june".into()));

        candidate.apply_contact(&CandidateContactUpdate {
            campaign_id: "camp".into(),
            candidate_id: "c1".into(),
            objectives,
            last_contact: Utc::now(),
            call_status: CallStatus::Contacted,
        });

        assert_eq!(candidate.interested, Some(true));
        assert_eq!(candidate.available_to_work, Some(false));
        assert_eq!(candidate.knows_referee, None);
        assert_eq!(candidate.call_status, CallStatus::Contacted);
        assert!(candidate.custom_objectives.contains_key("start_date"));
    }

    #[test]
    fn stopped_campaigns_do_not_launch() {
        assert!(CampaignStatus::Paused.accepts_launch());
        assert!(CampaignStatus::Draft.accepts_launch());
        assert!(!CampaignStatus::Stopped.accepts_launch());
        assert!(!CampaignStatus::Completed.accepts_launch());
    }
}
