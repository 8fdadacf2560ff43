//! Derived fleet metrics.
//!
//! Everything here is a pure function over a snapshot or a copied slice of
//! the event log.

use crate::core::buckets::SeriesPoint;
use crate::core::intervals::EntityUptime;
use crate::core::reducer::FleetSnapshot;
use crate::telemetry::types::{EntityId, FeatureCode, FeatureEvent};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Mean of one temperature feature for one entity over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureAverage {
    pub entity_id: EntityId,
    pub feature: FeatureCode,
    pub mean: f64,
    pub samples: usize,
}

/// Per-entity averages of every temperature feature with readings in
/// `[start, end)`. Results are ordered by entity id, then feature.
pub fn temperature_averages(
    events: &[FeatureEvent],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<TemperatureAverage> {
    let mut grouped: BTreeMap<(&EntityId, FeatureCode), Vec<f64>> = BTreeMap::new();

    for event in events {
        if !event.feature.is_temperature() || event.timestamp < start || event.timestamp >= end {
            continue;
        }
        if let Some(value) = event.value.as_number() {
            grouped
                .entry((&event.entity_id, event.feature))
                .or_default()
                .push(value);
        }
    }

    grouped
        .into_iter()
        .map(|((entity_id, feature), values)| TemperatureAverage {
            entity_id: entity_id.clone(),
            feature,
            samples: values.len(),
            mean: values.iter().mean(),
        })
        .collect()
}

/// Headline numbers for the fleet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FleetSummary {
    pub units: usize,
    pub units_charging: usize,
    /// Mean battery level, rounded to a whole percent
    pub mean_battery: Option<f64>,
    pub stations: usize,
    pub stations_occupied: usize,
}

/// Summarize a snapshot.
///
/// A unit counts as charging when its charge flag is set, or, lacking one,
/// when it reports itself not operational.
pub fn fleet_summary(snapshot: &FleetSnapshot) -> FleetSummary {
    let mut summary = FleetSummary::default();
    let mut batteries = Vec::new();

    for entity in snapshot.iter() {
        if entity.is_mobile_unit() {
            summary.units += 1;
            let charging = entity
                .flag(FeatureCode::ChargeState)
                .or_else(|| entity.flag(FeatureCode::OperationalState).map(|op| !op))
                .unwrap_or(false);
            if charging {
                summary.units_charging += 1;
            }
            if let Some(level) = entity.number(FeatureCode::BatteryLevel) {
                batteries.push(level);
            }
        } else if entity.is_station() {
            summary.stations += 1;
            if entity.flag(FeatureCode::StationOccupied).unwrap_or(false) {
                summary.stations_occupied += 1;
            }
        }
    }

    if !batteries.is_empty() {
        summary.mean_battery = Some(batteries.iter().mean().round());
    }
    summary
}

/// Everything a dashboard needs, in one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub snapshot: FleetSnapshot,
    pub summary: FleetSummary,
    pub uptime: Vec<EntityUptime>,
    pub battery_series: Vec<SeriesPoint>,
    pub temperature_averages: Vec<TemperatureAverage>,
}

impl FleetReport {
    /// Write the report as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }

    /// File name used when exporting into a directory.
    pub fn file_name(&self) -> String {
        format!(
            "fleet_report_{}_{}.json",
            self.generated_at.format("%Y%m%dT%H%M%S"),
            &self.run_id.simple().to_string()[..8]
        )
    }
}
