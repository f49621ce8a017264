//! Tolerant decoding of provider payload fragments. Nothing here fails:
//! unexpected shapes decode to "unknown" (or `false` for the boolean parser).

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::api::CallAnalysisPayload;
use crate::models::objectives as keys;
use crate::models::{CallObjectives, ObjectiveKind, ObjectiveTarget, ObjectiveValue};

const MAX_KEY_POINTS: usize = 3;

/// `true` for JSON `true` and the strings "yes", "true", "1" in any case;
/// `false` for everything else.
pub fn parse_bool(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("yes") || s.eq_ignore_ascii_case("true") || s == "1"
        }
        _ => false,
    }
}

/// Tri-state flag: absent or `null` stays unknown, anything else goes
/// through [`parse_bool`].
pub fn decode_flag(value: Option<&Value>) -> Option<bool> {
    match value {
        None | Some(Value::Null) => None,
        other => Some(parse_bool(other)),
    }
}

fn decode_typed(kind: ObjectiveKind, value: &Value) -> Option<ObjectiveValue> {
    match (kind, value) {
        (_, Value::Null) => None,
        (ObjectiveKind::Bool, other) => Some(ObjectiveValue::Bool(parse_bool(Some(other)))),
        (ObjectiveKind::Text, Value::String(s)) if !s.trim().is_empty() => {
            Some(ObjectiveValue::Text(s.trim().to_string()))
        }
        (ObjectiveKind::Number, Value::Number(n)) => n.as_f64().map(ObjectiveValue::Number),
        (ObjectiveKind::Number, Value::String(s)) => {
            s.trim().parse::<f64>().ok().map(ObjectiveValue::Number)
        }
        _ => None,
    }
}

/// Decodes the canonical objectives plus the campaign's configured targets.
/// Keys the campaign did not configure, and values that do not fit the
/// declared kind, are dropped.
pub fn decode_objectives(
    answers: Option<&Map<String, Value>>,
    targets: &[ObjectiveTarget],
) -> CallObjectives {
    let Some(answers) = answers else {
        return CallObjectives::default();
    };

    let mut decoded = CallObjectives {
        available_to_work: decode_flag(answers.get(keys::AVAILABLE_TO_WORK)),
        interested: decode_flag(answers.get(keys::INTERESTED)),
        knows_referee: decode_flag(answers.get(keys::KNOWS_REFEREE)),
        ..Default::default()
    };

    for target in targets {
        if matches!(
            target.key.as_str(),
            keys::AVAILABLE_TO_WORK | keys::INTERESTED | keys::KNOWS_REFEREE
        ) {
            continue;
        }
        if let Some(value) = answers
            .get(&target.key)
            .and_then(|raw| decode_typed(target.kind, raw))
        {
            decoded.custom.insert(target.key.clone(), value);
        }
    }
    decoded
}

/// Epoch milliseconds (number or numeric string) or an RFC 3339 string.
pub fn parse_timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(DateTime::from_timestamp_millis),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<i64>() {
                Ok(millis) => DateTime::from_timestamp_millis(millis),
                Err(_) => DateTime::parse_from_rfc3339(s)
                    .ok()
                    .map(|dt| dt.with_timezone(&Utc)),
            }
        }
        _ => None,
    }
}

/// Whole seconds from a number or numeric string; negatives are dropped.
pub fn parse_duration_seconds(value: Option<&Value>) -> Option<i32> {
    let seconds = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return None;
    }
    i32::try_from(seconds.round() as i64).ok()
}

/// Numeric `sentiment_score` clamped to `[0, 1]`, else the provider's label.
pub fn sentiment(analysis: &CallAnalysisPayload) -> Option<f64> {
    let numeric = match analysis.sentiment_score.as_ref() {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    if let Some(score) = numeric.filter(|s| s.is_finite()) {
        return Some(score.clamp(0.0, 1.0));
    }

    match analysis.user_sentiment.as_deref()?.trim().to_ascii_lowercase().as_str() {
        "positive" => Some(1.0),
        "neutral" => Some(0.5),
        "negative" => Some(0.0),
        _ => None,
    }
}

/// First three sentences of the summary.
pub fn key_points(summary: Option<&str>) -> Vec<String> {
    let Some(summary) = summary else {
        return Vec::new();
    };

    let mut points = Vec::new();
    let mut current = String::new();
    for ch in summary.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let sentence = current.trim();
            if sentence.len() > 1 {
                points.push(sentence.to_string());
            }
            current.clear();
            if points.len() == MAX_KEY_POINTS {
                return points;
            }
        }
    }
    let tail = current.trim();
    if !tail.is_empty() && points.len() < MAX_KEY_POINTS {
        points.push(tail.to_string());
    }
    points
}

pub fn next_step(objectives: &CallObjectives, in_voicemail: bool) -> String {
    let not_interested = objectives.interested == Some(false)
        || objectives.custom_flag(keys::NOT_INTERESTED) == Some(true);

    let step = if in_voicemail {
        "Reached voicemail; retry the call."
    } else if objectives.interested == Some(true) && objectives.available_to_work == Some(true) {
        "Schedule an interview."
    } else if objectives.interested == Some(true) {
        "Confirm the candidate's availability."
    } else if not_interested {
        "Close out; the candidate is not interested."
    } else {
        "Follow up with the candidate."
    };
    step.to_string()
}
