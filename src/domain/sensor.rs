// Sensor reading domain models
use super::series::SeriesTarget;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Reading,
    Reset,
    PhaseEnd,
}

/// Scalar field value kept for pass-through display
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

/// One inbound message after parsing and classification.
///
/// `last` and `setning` carry the readings as they appeared on the wire;
/// the sign convention for displacement is applied by the series buffer.
/// `fields` holds every scalar field of the message, recognized or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorEvent {
    pub kind: EventKind,
    pub phase: Option<SeriesTarget>,
    pub last: Option<f64>,
    pub setning: Option<f64>,
    pub tid: Option<String>,
    pub fields: BTreeMap<String, FieldValue>,
}

impl SensorEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            phase: None,
            last: None,
            setning: None,
            tid: None,
            fields: BTreeMap::new(),
        }
    }

    pub fn carries_pair_field(&self) -> bool {
        self.last.is_some() || self.setning.is_some()
    }
}

#[cfg(test)]
impl SensorEvent {
    pub fn reading() -> Self {
        Self::new(EventKind::Reading)
    }

    pub fn with_phase(mut self, phase: SeriesTarget) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_last(mut self, last: f64) -> Self {
        self.last = Some(last);
        self
    }

    pub fn with_setning(mut self, setning: f64) -> Self {
        self.setning = Some(setning);
        self
    }
}
