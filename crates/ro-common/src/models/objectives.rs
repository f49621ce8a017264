use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Canonical objective keys captured on every call.
pub const AVAILABLE_TO_WORK: &str = "available_to_work";
pub const INTERESTED: &str = "interested";
pub const KNOWS_REFEREE: &str = "knows_referee";

/// Custom objective keys that drive pipeline movement when a campaign
/// configures them as boolean targets.
pub const INTERVIEW_SCHEDULED: &str = "interview_scheduled";
pub const STARTED_WORK: &str = "started_work";
pub const HIRED: &str = "hired";
pub const REJECTED: &str = "rejected";
pub const NOT_INTERESTED: &str = "not_interested";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectiveKind {
    Bool,
    Text,
    Number,
}

/// One question a campaign asks the provider to extract after a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectiveTarget {
    pub key: String,
    pub kind: ObjectiveKind,
    #[serde(default)]
    pub question: Option<String>,
}

impl ObjectiveTarget {
    pub fn new(key: &str, kind: ObjectiveKind) -> Self {
        Self {
            key: key.to_string(),
            kind,
            question: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ObjectiveValue {
    Bool(bool),
    Text(String),
    Number(f64),
}

impl ObjectiveValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ObjectiveValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

pub type ObjectiveMap = BTreeMap<String, ObjectiveValue>;

/// Objectives decoded from a single analyzed call.
///
/// `None` means the provider did not report the objective; it is never
/// treated as `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallObjectives {
    pub available_to_work: Option<bool>,
    pub interested: Option<bool>,
    pub knows_referee: Option<bool>,
    #[serde(default)]
    pub custom: ObjectiveMap,
}

impl CallObjectives {
    pub fn custom_flag(&self, key: &str) -> Option<bool> {
        self.custom.get(key).and_then(ObjectiveValue::as_bool)
    }
}

/// The externally observed signals the reconciliation rules look at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedObjectives {
    pub started_work: Option<bool>,
    pub hired: Option<bool>,
    pub interview_scheduled: Option<bool>,
    pub interested: Option<bool>,
    pub rejected: Option<bool>,
    pub not_interested: Option<bool>,
    pub available_to_work: Option<bool>,
}

impl From<&CallObjectives> for ObservedObjectives {
    fn from(call: &CallObjectives) -> Self {
        Self {
            started_work: call.custom_flag(STARTED_WORK),
            hired: call.custom_flag(HIRED),
            interview_scheduled: call.custom_flag(INTERVIEW_SCHEDULED),
            interested: call.interested,
            rejected: call.custom_flag(REJECTED),
            not_interested: call.custom_flag(NOT_INTERESTED),
            available_to_work: call.available_to_work,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn objective_values_serialize_as_tagged_pairs() {
        let value = serde_json::to_value(ObjectiveValue::Number(3.0)).unwrap();
        assert_eq!(value, json!({"kind": "number", "value": 3.0}));

        let parsed: ObjectiveValue =
            serde_json::from_value(json!({"kind": "text", "value": "next monday"})).unwrap();
        assert_eq!(parsed, ObjectiveValue::Text("next monday".into()));
    }

    #[test]
    fn observed_objectives_only_read_boolean_custom_values() {
        let mut call = CallObjectives {
            interested: Some(true),
            ..Default::default()
        };
        call.custom
            .insert(INTERVIEW_SCHEDULED.into(), ObjectiveValue::Bool(true));
        call.custom
            .insert(HIRED.into(), ObjectiveValue::Text("yes".into()));

        let observed = ObservedObjectives::from(&call);
        assert_eq!(observed.interview_scheduled, Some(true));
        assert_eq!(observed.interested, Some(true));
        assert_eq!(observed.hired, None);
        assert_eq!(observed.rejected, None);
    }
}
