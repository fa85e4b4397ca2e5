// Phase series domain models
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
}

impl Observation {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A phase identifier as it appears on the wire: either a position in the
/// current series list or a stable series key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum SeriesTarget {
    Index(usize),
    Key(String),
}

impl fmt::Display for SeriesTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeriesTarget::Index(i) => write!(f, "#{}", i),
            SeriesTarget::Key(k) => f.write_str(k),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PhaseSeries {
    pub key: String,
    pub display_label: String,
    pub color_id: String,
    points: VecDeque<Observation>,
}

impl PhaseSeries {
    pub fn new(key: String, display_label: String, color_id: String) -> Self {
        Self {
            key,
            display_label,
            color_id,
            points: VecDeque::new(),
        }
    }

    /// Append and trim the front until at most `max_points` remain.
    /// Returns how many points were evicted.
    pub fn push_bounded(&mut self, observation: Observation, max_points: usize) -> usize {
        self.points.push_back(observation);
        let mut evicted = 0;
        while self.points.len() > max_points {
            self.points.pop_front();
            evicted += 1;
        }
        evicted
    }

    pub fn to_snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            key: self.key.clone(),
            display_label: self.display_label.clone(),
            color_id: self.color_id.clone(),
            points: self.points.iter().copied().collect(),
        }
    }
}

#[cfg(test)]
impl PhaseSeries {
    pub fn points(&self) -> impl Iterator<Item = &Observation> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Series as handed to the chart renderer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    pub key: String,
    pub display_label: String,
    pub color_id: String,
    pub points: Vec<Observation>,
}

/// Change applied to the series set, in the order it happened
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum SeriesMutation {
    Appended { key: String, observation: Observation },
    Evicted { key: String, count: usize },
    Reset { keys: Vec<String> },
    Relabeled { key: String, label: String },
}
