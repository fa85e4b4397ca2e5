// Live readout - Latest value of every displayed sensor field
use crate::domain::sensor::{EventKind, FieldValue, SensorEvent};
use std::collections::BTreeMap;

/// Backs the "Live Sensor Data" panel. Updated from every reading, whether
/// or not a phase is active, so values stay visible between phases.
#[derive(Debug, Clone, Default)]
pub struct LiveReadout {
    fields: BTreeMap<String, FieldValue>,
}

impl LiveReadout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, event: &SensorEvent) {
        if event.kind == EventKind::Reset {
            return;
        }
        for (key, value) in &event.fields {
            self.fields.insert(key.clone(), value.clone());
        }
    }

    pub fn snapshot(&self) -> BTreeMap<String, FieldValue> {
        self.fields.clone()
    }
}
