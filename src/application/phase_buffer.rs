// Phase series buffer - Assembles load/displacement pairs into bounded per-phase series
use crate::domain::sensor::{EventKind, SensorEvent};
use crate::domain::series::{Observation, PhaseSeries, SeriesMutation, SeriesSnapshot, SeriesTarget};
use crate::infrastructure::config::BufferSettings;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum BufferError {
    #[error("Unknown phase target {0}; observation dropped")]
    UnknownPhaseTarget(SeriesTarget),
}

/// Field updates waiting for their complement
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PendingObservation {
    pub last: Option<f64>,
    /// Stored negated relative to the wire reading
    pub setning: Option<f64>,
}

impl PendingObservation {
    pub fn is_empty(&self) -> bool {
        self.last.is_none() && self.setning.is_none()
    }

    /// Take both fields as an observation once both are present
    fn take_complete(&mut self) -> Option<Observation> {
        match (self.last, self.setning) {
            (Some(x), Some(y)) => {
                *self = Self::default();
                Some(Observation::new(x, y))
            }
            _ => None,
        }
    }
}

pub struct PhaseSeriesBuffer {
    settings: BufferSettings,
    series: Vec<PhaseSeries>,
    pending: PendingObservation,
    active_phase: Option<SeriesTarget>,
}

impl PhaseSeriesBuffer {
    pub fn new(mut settings: BufferSettings) -> Self {
        settings.max_points = settings.max_points.max(1);
        let mut buffer = Self {
            settings,
            series: Vec::new(),
            pending: PendingObservation::default(),
            active_phase: None,
        };
        buffer.reset();
        buffer
    }

    /// Dispatch a routed event to the matching operation
    pub fn apply(&mut self, event: &SensorEvent) -> Result<Vec<SeriesMutation>, BufferError> {
        match event.kind {
            EventKind::Reading => self.ingest(event),
            EventKind::Reset => Ok(vec![self.reset()]),
            EventKind::PhaseEnd => {
                self.end_phase();
                Ok(Vec::new())
            }
        }
    }

    /// Merge the reading's fields into the pending pair and commit once both
    /// `last` and `setning` are known.
    ///
    /// A phase carried by the reading becomes active before the pair is
    /// checked, so a message that both switches phase and completes a pair
    /// commits under the new phase. Pair fields arriving while no phase is
    /// active are ignored. Pending fields are cleared on every commit
    /// attempt, including ones dropped for an unresolvable phase.
    pub fn ingest(&mut self, event: &SensorEvent) -> Result<Vec<SeriesMutation>, BufferError> {
        if let Some(phase) = &event.phase {
            self.active_phase = Some(phase.clone());
        }
        let Some(target) = self.active_phase.clone() else {
            if event.carries_pair_field() {
                tracing::debug!("Ignoring pair fields outside any phase");
            }
            return Ok(Vec::new());
        };

        if let Some(last) = event.last {
            self.pending.last = Some(last);
        }
        if let Some(setning) = event.setning {
            self.pending.setning = Some(-setning);
        }

        let Some(observation) = self.pending.take_complete() else {
            return Ok(Vec::new());
        };

        let index = self.resolve_series_target(&target)?;
        let max_points = self.settings.max_points;
        let series = &mut self.series[index];
        let evicted = series.push_bounded(observation, max_points);

        let mut mutations = vec![SeriesMutation::Appended {
            key: series.key.clone(),
            observation,
        }];
        if evicted > 0 {
            mutations.push(SeriesMutation::Evicted {
                key: series.key.clone(),
                count: evicted,
            });
        }
        Ok(mutations)
    }

    /// Leave the current phase and drop any half pair. Series data is untouched.
    pub fn end_phase(&mut self) {
        if !self.pending.is_empty() {
            tracing::debug!("Discarding incomplete pair at phase end");
        }
        self.pending = PendingObservation::default();
        if let Some(phase) = self.active_phase.take() {
            tracing::debug!("Phase {} ended", phase);
        }
    }

    /// Drop every point and rebuild the canonical series list in configured
    /// order. Lazily created series are removed. The active phase is kept.
    pub fn reset(&mut self) -> SeriesMutation {
        self.pending = PendingObservation::default();
        self.series = self
            .settings
            .phases
            .iter()
            .enumerate()
            .map(|(i, phase)| {
                PhaseSeries::new(phase.key.clone(), phase.label.clone(), self.color_for(i))
            })
            .collect();

        SeriesMutation::Reset {
            keys: self.series.iter().map(|s| s.key.clone()).collect(),
        }
    }

    /// Index into the series list for `target`. Positional targets must be
    /// in range; unknown keys are created on first use unless phases are strict.
    pub fn resolve_series_target(&mut self, target: &SeriesTarget) -> Result<usize, BufferError> {
        let unknown = || {
            tracing::warn!("Unknown phase target {}", target);
            BufferError::UnknownPhaseTarget(target.clone())
        };

        match target {
            SeriesTarget::Index(i) if *i < self.series.len() => Ok(*i),
            SeriesTarget::Index(_) => Err(unknown()),
            SeriesTarget::Key(key) => {
                if let Some(i) = self.series.iter().position(|s| &s.key == key) {
                    return Ok(i);
                }
                if self.settings.strict_phases {
                    return Err(unknown());
                }
                let index = self.series.len();
                let color_id = self.color_for(index);
                tracing::info!("Creating series for phase {}", key);
                self.series.push(PhaseSeries::new(key.clone(), key.clone(), color_id));
                Ok(index)
            }
        }
    }

    /// Rename a series for display. Its key and points stay as they are.
    pub fn set_display_label(&mut self, key: &str, label: impl Into<String>) -> bool {
        match self.series.iter_mut().find(|s| s.key == key) {
            Some(series) => {
                series.display_label = label.into();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<SeriesSnapshot> {
        self.series.iter().map(PhaseSeries::to_snapshot).collect()
    }

    fn color_for(&self, index: usize) -> String {
        let palette = &self.settings.palette;
        if palette.is_empty() {
            format!("series-{}", index)
        } else {
            palette[index % palette.len()].clone()
        }
    }
}

#[cfg(test)]
impl PhaseSeriesBuffer {
    pub fn pending(&self) -> PendingObservation {
        self.pending
    }

    pub fn active_phase(&self) -> Option<&SeriesTarget> {
        self.active_phase.as_ref()
    }

    pub fn series(&self, key: &str) -> Option<&PhaseSeries> {
        self.series.iter().find(|s| s.key == key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::message_router::MessageRouter;
    use crate::infrastructure::config::{PhaseSettings, RouterSettings};

    fn buffer_with(max_points: usize) -> PhaseSeriesBuffer {
        PhaseSeriesBuffer::new(BufferSettings {
            max_points,
            ..BufferSettings::default()
        })
    }

    fn reading(phase: &str, last: f64, setning: f64) -> SensorEvent {
        SensorEvent::reading()
            .with_phase(SeriesTarget::Key(phase.to_string()))
            .with_last(last)
            .with_setning(setning)
    }

    fn xs(buffer: &PhaseSeriesBuffer, key: &str) -> Vec<f64> {
        buffer.series(key).unwrap().points().map(|p| p.x).collect()
    }

    #[test]
    fn test_split_pair_commits_once_with_negated_displacement() {
        let router = MessageRouter::new(RouterSettings::default());
        let mut buffer = buffer_with(50);

        let first = router.parse(r#"{"last": 100, "phase": "phase1"}"#).unwrap();
        assert!(buffer.apply(&first).unwrap().is_empty());
        assert_eq!(buffer.pending().last, Some(100.0));

        let second = router.parse(r#"{"setning": -1.23}"#).unwrap();
        let mutations = buffer.apply(&second).unwrap();
        assert_eq!(
            mutations,
            vec![SeriesMutation::Appended {
                key: "phase1".to_string(),
                observation: Observation::new(100.0, 1.23),
            }]
        );
        assert_eq!(buffer.pending(), PendingObservation::default());
        assert_eq!(buffer.series("phase1").unwrap().len(), 1);
    }

    #[test]
    fn test_repeated_field_does_not_double_commit() {
        let mut buffer = buffer_with(50);
        let phase = SeriesTarget::Key("phase1".to_string());
        buffer.ingest(&SensorEvent::reading().with_phase(phase).with_last(1.0)).unwrap();
        buffer.ingest(&SensorEvent::reading().with_last(2.0)).unwrap();
        buffer.ingest(&SensorEvent::reading().with_setning(-0.5)).unwrap();
        buffer.ingest(&SensorEvent::reading().with_setning(-0.7)).unwrap();

        let series = buffer.series("phase1").unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series.points().next(), Some(&Observation::new(2.0, 0.5)));
        assert_eq!(buffer.pending().setning, Some(0.7));
    }

    #[test]
    fn test_fifo_bound_keeps_most_recent() {
        let mut buffer = buffer_with(50);
        let mut evictions = 0;
        for i in 0..51 {
            let mutations = buffer.ingest(&reading("phase1", i as f64, -1.0)).unwrap();
            evictions += mutations
                .iter()
                .filter(|m| matches!(m, SeriesMutation::Evicted { count: 1, .. }))
                .count();
        }

        let kept = xs(&buffer, "phase1");
        assert_eq!(kept.len(), 50);
        assert_eq!(kept.first(), Some(&1.0));
        assert_eq!(kept.last(), Some(&50.0));
        assert_eq!(evictions, 1);
    }

    #[test]
    fn test_bound_holds_across_long_runs() {
        let mut buffer = buffer_with(7);
        for i in 0..200 {
            let phase = if i % 3 == 0 { "phase2" } else { "phase1" };
            buffer.ingest(&reading(phase, i as f64, 0.0)).unwrap();
            for snapshot in buffer.snapshot() {
                assert!(snapshot.points.len() <= 7);
            }
        }
        let all: Vec<f64> = (0..200).filter(|i| i % 3 != 0).map(|i| i as f64).collect();
        assert_eq!(xs(&buffer, "phase1"), all[all.len() - 7..].to_vec());
    }

    #[test]
    fn test_reset_mid_series_starts_fresh() {
        let mut buffer = buffer_with(50);
        for i in 0..10 {
            buffer.ingest(&reading("phase1", i as f64, -1.0)).unwrap();
        }
        buffer.ingest(&SensorEvent::reading().with_last(99.0)).unwrap();

        let mutation = buffer.apply(&SensorEvent::new(EventKind::Reset)).unwrap();
        assert_eq!(
            mutation,
            vec![SeriesMutation::Reset {
                keys: vec!["phase1".into(), "phase2".into(), "phase3".into()]
            }]
        );
        assert!(buffer.snapshot().iter().all(|s| s.points.is_empty()));
        assert_eq!(buffer.pending(), PendingObservation::default());

        buffer.ingest(&reading("phase1", 5.0, -2.0)).unwrap();
        assert_eq!(buffer.series("phase1").unwrap().len(), 1);
    }

    #[test]
    fn test_reset_restores_canonical_order_and_colors() {
        let mut buffer = buffer_with(50);
        let canonical: Vec<(String, String)> = buffer
            .snapshot()
            .into_iter()
            .map(|s| (s.key, s.color_id))
            .collect();

        buffer.ingest(&reading("phase9", 1.0, 1.0)).unwrap();
        buffer.ingest(&reading("phase3", 1.0, 1.0)).unwrap();
        buffer.ingest(&reading("phase1", 1.0, 1.0)).unwrap();
        assert_eq!(buffer.snapshot().len(), 4);

        buffer.reset();
        let restored: Vec<(String, String)> = buffer
            .snapshot()
            .into_iter()
            .map(|s| (s.key, s.color_id))
            .collect();
        assert_eq!(restored, canonical);
    }

    #[test]
    fn test_index_and_key_address_the_same_series() {
        let mut buffer = buffer_with(50);
        let by_index = buffer.resolve_series_target(&SeriesTarget::Index(0)).unwrap();
        let by_key = buffer
            .resolve_series_target(&SeriesTarget::Key("phase1".to_string()))
            .unwrap();
        assert_eq!(by_index, by_key);

        buffer
            .ingest(
                &SensorEvent::reading()
                    .with_phase(SeriesTarget::Index(1))
                    .with_last(4.0)
                    .with_setning(-4.0),
            )
            .unwrap();
        assert_eq!(xs(&buffer, "phase2"), vec![4.0]);
    }

    #[test]
    fn test_out_of_range_index_drops_and_clears_pending() {
        let mut buffer = buffer_with(50);
        let event = SensorEvent::reading()
            .with_phase(SeriesTarget::Index(12))
            .with_last(1.0)
            .with_setning(-1.0);

        let err = buffer.ingest(&event).unwrap_err();
        assert_eq!(err, BufferError::UnknownPhaseTarget(SeriesTarget::Index(12)));
        assert_eq!(buffer.pending(), PendingObservation::default());
        assert!(buffer.snapshot().iter().all(|s| s.points.is_empty()));
    }

    #[test]
    fn test_strict_phases_reject_unknown_keys() {
        let mut buffer = PhaseSeriesBuffer::new(BufferSettings {
            strict_phases: true,
            ..BufferSettings::default()
        });
        let err = buffer.ingest(&reading("phase7", 1.0, 1.0)).unwrap_err();
        assert_eq!(err, BufferError::UnknownPhaseTarget(SeriesTarget::Key("phase7".into())));
        assert_eq!(buffer.snapshot().len(), 3);
    }

    #[test]
    fn test_lazy_series_gets_next_palette_color() {
        let mut buffer = PhaseSeriesBuffer::new(BufferSettings {
            palette: vec!["red".into(), "blue".into()],
            phases: vec![PhaseSettings {
                key: "phase1".into(),
                label: "Fase 1".into(),
            }],
            ..BufferSettings::default()
        });
        buffer.ingest(&reading("phase2", 1.0, 1.0)).unwrap();
        buffer.ingest(&reading("phase3", 1.0, 1.0)).unwrap();

        let colors: Vec<String> = buffer.snapshot().into_iter().map(|s| s.color_id).collect();
        assert_eq!(colors, vec!["red", "blue", "red"]);
        assert_eq!(buffer.series("phase2").unwrap().display_label, "phase2");
    }

    #[test]
    fn test_phase_end_blocks_commits_until_next_phase() {
        let mut buffer = buffer_with(50);
        buffer.ingest(&reading("phase1", 1.0, -1.0)).unwrap();
        buffer.apply(&SensorEvent::new(EventKind::PhaseEnd)).unwrap();
        assert_eq!(buffer.active_phase(), None);

        let late = SensorEvent::reading().with_last(2.0).with_setning(-2.0);
        assert!(buffer.ingest(&late).unwrap().is_empty());
        assert_eq!(buffer.pending(), PendingObservation::default());
        assert_eq!(buffer.series("phase1").unwrap().len(), 1);

        buffer.ingest(&reading("phase2", 3.0, -3.0)).unwrap();
        assert_eq!(xs(&buffer, "phase2"), vec![3.0]);
    }

    #[test]
    fn test_half_pair_does_not_cross_phase_end() {
        let mut buffer = buffer_with(50);
        let phase1 = SeriesTarget::Key("phase1".into());
        buffer.ingest(&SensorEvent::reading().with_phase(phase1).with_last(1.0)).unwrap();
        buffer.end_phase();
        assert!(buffer.pending().is_empty());

        // Load read between phases is ignored as well
        buffer.ingest(&SensorEvent::reading().with_last(7.0)).unwrap();
        assert!(buffer.pending().is_empty());

        let next = SensorEvent::reading()
            .with_phase(SeriesTarget::Key("phase2".into()))
            .with_setning(-2.0);
        assert!(buffer.ingest(&next).unwrap().is_empty());
        assert_eq!(buffer.pending().setning, Some(2.0));
        assert!(buffer.series("phase2").unwrap().is_empty());

        let mutations = buffer.ingest(&SensorEvent::reading().with_last(8.0)).unwrap();
        assert_eq!(
            mutations,
            vec![SeriesMutation::Appended {
                key: "phase2".to_string(),
                observation: Observation::new(8.0, 2.0),
            }]
        );
    }

    #[test]
    fn test_phase_switch_mid_pair_commits_under_new_phase() {
        let mut buffer = buffer_with(50);
        buffer
            .ingest(
                &SensorEvent::reading()
                    .with_phase(SeriesTarget::Key("phase1".into()))
                    .with_last(10.0),
            )
            .unwrap();
        buffer
            .ingest(
                &SensorEvent::reading()
                    .with_phase(SeriesTarget::Key("phase2".into()))
                    .with_setning(-1.0),
            )
            .unwrap();

        assert!(buffer.series("phase1").unwrap().is_empty());
        assert_eq!(xs(&buffer, "phase2"), vec![10.0]);
    }

    #[test]
    fn test_relabel_keeps_identity() {
        let mut buffer = buffer_with(50);
        buffer.ingest(&reading("phase1", 1.0, 1.0)).unwrap();
        assert!(buffer.set_display_label("phase1", "Fase 1"));
        assert!(!buffer.set_display_label("nope", "x"));

        let series = buffer.series("phase1").unwrap();
        assert_eq!(series.display_label, "Fase 1");
        assert_eq!(series.len(), 1);
    }
}
