//! Folding a sparse event stream into last-known-value snapshots.
//!
//! The reducer never sorts. Events must be applied in timestamp order per
//! (entity, feature); an event older than the stored reading is ignored,
//! so out-of-order input loses data rather than regressing the snapshot.

use crate::telemetry::types::{
    DataQuality, EntityId, FeatureCode, FeatureEvent, FeatureValue, RawFeatureEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Last known value of one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: FeatureValue,
    pub timestamp: DateTime<Utc>,
}

/// Last-known-value state of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub features: BTreeMap<FeatureCode, Reading>,
}

impl EntitySnapshot {
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            features: BTreeMap::new(),
        }
    }

    pub fn reading(&self, feature: FeatureCode) -> Option<&Reading> {
        self.features.get(&feature)
    }

    pub fn number(&self, feature: FeatureCode) -> Option<f64> {
        self.reading(feature).and_then(|r| r.value.as_number())
    }

    pub fn flag(&self, feature: FeatureCode) -> Option<bool> {
        self.reading(feature).and_then(|r| r.value.as_flag())
    }

    /// Timestamp of the newest reading.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.features.values().map(|r| r.timestamp).max()
    }

    /// Whether this entity reports mobile-unit features.
    pub fn is_mobile_unit(&self) -> bool {
        self.features.contains_key(&FeatureCode::BatteryLevel)
            || self.features.contains_key(&FeatureCode::ChargeState)
    }

    /// Whether this entity reports station features.
    pub fn is_station(&self) -> bool {
        self.features.contains_key(&FeatureCode::StationOccupied)
            || self.features.contains_key(&FeatureCode::StationTemp)
    }
}

/// Snapshot of every known entity, ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSnapshot {
    pub entities: BTreeMap<EntityId, EntitySnapshot>,
}

impl FleetSnapshot {
    pub fn get(&self, entity_id: &str) -> Option<&EntitySnapshot> {
        self.entities.get(&EntityId::new(entity_id))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.entities.values()
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// The snapshot now reflects the event
    Applied,
    /// The stored reading is newer; the event was ignored
    Stale,
    /// Unrecognized feature code; the snapshot is untouched
    Skipped,
}

/// Result of applying one raw event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ingested {
    pub outcome: ApplyOutcome,
    pub quality: DataQuality,
}

/// Folds events into one [`EntitySnapshot`] per entity.
#[derive(Debug, Clone, Default)]
pub struct StateReducer {
    fleet: FleetSnapshot,
}

impl StateReducer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a reducer by applying an ordered event log.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a FeatureEvent>) -> Self {
        let mut reducer = Self::new();
        for event in events {
            reducer.apply(event);
        }
        reducer
    }

    /// Apply a decoded event.
    ///
    /// Events with a timestamp equal to the stored reading replace it.
    pub fn apply(&mut self, event: &FeatureEvent) -> ApplyOutcome {
        let snapshot = self
            .fleet
            .entities
            .entry(event.entity_id.clone())
            .or_insert_with(|| EntitySnapshot::new(event.entity_id.clone()));

        match snapshot.features.get(&event.feature) {
            Some(stored) if event.timestamp < stored.timestamp => ApplyOutcome::Stale,
            _ => {
                snapshot.features.insert(
                    event.feature,
                    Reading {
                        value: event.value,
                        timestamp: event.timestamp,
                    },
                );
                ApplyOutcome::Applied
            }
        }
    }

    /// Decode and apply a raw event. Unknown feature codes are skipped
    /// without touching the snapshot.
    pub fn apply_raw(&mut self, raw: &RawFeatureEvent) -> Ingested {
        match raw.decode() {
            Ok(decoded) => Ingested {
                outcome: self.apply(&decoded.event),
                quality: decoded.quality,
            },
            Err(_) => Ingested {
                outcome: ApplyOutcome::Skipped,
                quality: DataQuality::Clean,
            },
        }
    }

    pub fn entity(&self, entity_id: &str) -> Option<&EntitySnapshot> {
        self.fleet.get(entity_id)
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> FleetSnapshot {
        self.fleet.clone()
    }
}

/// Live snapshot shared between a single mutator and many readers.
///
/// Writers apply whole batches under one lock so readers never observe a
/// half-applied tick. Readers only ever receive copies.
#[derive(Debug, Clone, Default)]
pub struct LiveState {
    inner: Arc<RwLock<StateReducer>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&self, event: &FeatureEvent) -> ApplyOutcome {
        self.inner.write().apply(event)
    }

    pub fn apply_raw(&self, raw: &RawFeatureEvent) -> Ingested {
        self.inner.write().apply_raw(raw)
    }

    pub fn apply_batch(&self, events: &[FeatureEvent]) -> Vec<ApplyOutcome> {
        let mut reducer = self.inner.write();
        events.iter().map(|e| reducer.apply(e)).collect()
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        self.inner.read().snapshot()
    }

    pub fn entity(&self, entity_id: &str) -> Option<EntitySnapshot> {
        self.inner.read().entity(entity_id).cloned()
    }
}
