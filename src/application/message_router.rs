// Message router - Parses raw payloads into typed sensor events
use crate::domain::sensor::{EventKind, FieldValue, SensorEvent};
use crate::domain::series::SeriesTarget;
use crate::infrastructure::config::RouterSettings;
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Error parsing message: {0}")]
    Malformed(String),
    #[error("Error parsing message: expected a JSON object")]
    NotAnObject,
    #[error("Error parsing message: field '{field}' is not a number ({value})")]
    InvalidNumber { field: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct MessageRouter {
    settings: RouterSettings,
}

impl MessageRouter {
    pub fn new(settings: RouterSettings) -> Self {
        Self { settings }
    }

    pub fn parse(&self, raw: &str) -> Result<SensorEvent, ParseError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(ParseError::NotAnObject);
        };

        let kind = self.classify(&object);
        let mut event = SensorEvent::new(kind);
        event.fields = scalar_fields(&object);
        event.last = number_field(&object, "last")?;
        event.setning = number_field(&object, "setning")?;
        event.tid = object.get("tid").and_then(text_of);

        if kind != EventKind::PhaseEnd {
            event.phase = object.get("phase").and_then(phase_target);
        }

        tracing::debug!("Routed {:?} message (phase {:?})", event.kind, event.phase);
        Ok(event)
    }

    fn classify(&self, object: &Map<String, Value>) -> EventKind {
        let marker = object.get("type").and_then(Value::as_str);
        if marker == Some(self.settings.reset_marker.as_str()) {
            return EventKind::Reset;
        }
        if marker.is_some_and(|m| m == self.settings.save_marker) {
            tracing::debug!("Save marker received; treated as a reading");
        }

        let phase = object.get("phase").and_then(Value::as_str);
        if phase == Some(self.settings.phase_end_marker.as_str()) {
            return EventKind::PhaseEnd;
        }

        EventKind::Reading
    }
}

/// Non-negative integers (numeric or all-digit strings) address by position;
/// anything else non-empty addresses by key.
fn phase_target(value: &Value) -> Option<SeriesTarget> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .and_then(|i| usize::try_from(i).ok())
            .map(SeriesTarget::Index),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else if s.chars().all(|c| c.is_ascii_digit()) {
                s.parse().ok().map(SeriesTarget::Index)
            } else {
                Some(SeriesTarget::Key(s.to_string()))
            }
        }
        _ => None,
    }
}

fn number_field(
    object: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<f64>, ParseError> {
    let invalid = |value: &Value| ParseError::InvalidNumber {
        field,
        value: value.to_string(),
    };

    match object.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(v @ Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|n| n.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(v)),
        Some(other) => Err(invalid(other)),
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn scalar_fields(object: &Map<String, Value>) -> std::collections::BTreeMap<String, FieldValue> {
    object
        .iter()
        .filter_map(|(key, value)| {
            let field = match value {
                Value::Number(n) => FieldValue::Number(n.as_f64()?),
                Value::String(s) => FieldValue::Text(s.clone()),
                Value::Bool(b) => FieldValue::Text(b.to_string()),
                _ => return None,
            };
            Some((key.clone(), field))
        })
        .collect()
}
