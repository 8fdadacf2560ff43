//! Operational interval reconstruction from boolean toggle events.
//!
//! A toggle sequence is folded through a two-state machine. Repeated values
//! are no-ops. An interval still open when the sequence ends is credited
//! according to an explicit [`OpenIntervalPolicy`]; the default credits it
//! only up to the last event seen, which undercounts whenever the real
//! "off" transition lies outside the window.

use crate::telemetry::types::{EntityId, FeatureCode, FeatureEvent};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Configured handling of intervals left open at the end of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenIntervalMode {
    /// Credit up to the last event in the window
    LastEvent,
    /// Credit up to the wall-clock time of the query
    WallClock,
}

impl OpenIntervalMode {
    /// Resolve into a policy. `now` is only used by [`OpenIntervalMode::WallClock`].
    pub fn policy(self, now: DateTime<Utc>) -> OpenIntervalPolicy {
        match self {
            OpenIntervalMode::LastEvent => OpenIntervalPolicy::LastEvent,
            OpenIntervalMode::WallClock => OpenIntervalPolicy::CloseAt(now),
        }
    }
}

/// How an unterminated interval is credited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenIntervalPolicy {
    /// Close at the timestamp of the last event in the sequence.
    #[default]
    LastEvent,
    /// Close at the given instant, or at the last event if that is later.
    CloseAt(DateTime<Utc>),
}

/// A maximal span during which the feature held true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalInterval {
    pub entity_id: EntityId,
    pub start: DateTime<Utc>,
    /// `None` when the interval was still open at the end of the window
    pub end: Option<DateTime<Utc>>,
}

impl OperationalInterval {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }
}

/// Cumulative time one entity spent with the feature true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityUptime {
    pub entity_id: EntityId,
    #[serde(rename = "total_operational_secs", with = "duration_secs_f64")]
    pub total: Duration,
    pub intervals: Vec<OperationalInterval>,
}

#[derive(Debug, Clone, Copy)]
enum ToggleState {
    Off,
    On { since: DateTime<Utc> },
}

/// Derives cumulative true-durations for one boolean feature.
#[derive(Debug, Clone)]
pub struct IntervalReconstructor {
    feature: FeatureCode,
    policy: OpenIntervalPolicy,
}

impl IntervalReconstructor {
    pub fn new(feature: FeatureCode, policy: OpenIntervalPolicy) -> Self {
        Self { feature, policy }
    }

    /// Time-operational accounting with the conservative default policy.
    pub fn operational() -> Self {
        Self::new(FeatureCode::OperationalState, OpenIntervalPolicy::LastEvent)
    }

    pub fn feature(&self) -> FeatureCode {
        self.feature
    }

    /// Fold one entity's toggle sequence.
    ///
    /// `toggles` must be sorted ascending by timestamp; this is not checked.
    pub fn reconstruct(
        &self,
        entity_id: &EntityId,
        toggles: &[(DateTime<Utc>, bool)],
    ) -> EntityUptime {
        let mut state = ToggleState::Off;
        let mut total = Duration::zero();
        let mut intervals = Vec::new();

        for &(timestamp, on) in toggles {
            state = match (state, on) {
                (ToggleState::Off, true) => ToggleState::On { since: timestamp },
                (ToggleState::On { since }, false) => {
                    total = total + (timestamp - since);
                    intervals.push(OperationalInterval {
                        entity_id: entity_id.clone(),
                        start: since,
                        end: Some(timestamp),
                    });
                    ToggleState::Off
                }
                (unchanged, _) => unchanged,
            };
        }

        if let ToggleState::On { since } = state {
            let last_seen = toggles.last().map(|&(ts, _)| ts).unwrap_or(since);
            let close = match self.policy {
                OpenIntervalPolicy::LastEvent => last_seen,
                OpenIntervalPolicy::CloseAt(at) => at.max(last_seen),
            };
            total = total + (close - since).max(Duration::zero());
            intervals.push(OperationalInterval {
                entity_id: entity_id.clone(),
                start: since,
                end: None,
            });
        }

        EntityUptime {
            entity_id: entity_id.clone(),
            total,
            intervals,
        }
    }

    /// Group a mixed, timestamp-ordered event slice by entity and fold each
    /// entity's toggles. Events for other features are ignored. Results are
    /// ordered by entity id; entities without toggles are omitted.
    pub fn per_entity(&self, events: &[FeatureEvent]) -> Vec<EntityUptime> {
        let mut toggles: BTreeMap<&EntityId, Vec<(DateTime<Utc>, bool)>> = BTreeMap::new();
        for event in events.iter().filter(|e| e.feature == self.feature) {
            if let Some(on) = event.value.as_flag() {
                toggles
                    .entry(&event.entity_id)
                    .or_default()
                    .push((event.timestamp, on));
            }
        }

        toggles
            .into_iter()
            .map(|(entity_id, sequence)| self.reconstruct(entity_id, &sequence))
            .collect()
    }
}

/// Serde support for chrono durations as fractional seconds.
mod duration_secs_f64 {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.num_milliseconds() as f64 / 1000.0).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Ok(Duration::milliseconds((secs * 1000.0).round() as i64))
    }
}
