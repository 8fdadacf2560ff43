//! The fleet engine: one ingestion path feeding the event log and the live
//! snapshot, and pull-based queries over both.
//!
//! Every historical query copies the retained log first and computes on the
//! copy, so a slow query never holds up ingestion.

use crate::config::{AggregationConfig, Config, ConfigError};
use crate::core::buckets::{BucketAggregator, BucketSeries};
use crate::core::intervals::{EntityUptime, IntervalReconstructor};
use crate::core::log::EventStore;
use crate::core::metrics::{
    fleet_summary, temperature_averages, FleetReport, FleetSummary, TemperatureAverage,
};
use crate::core::reducer::{ApplyOutcome, FleetSnapshot, Ingested, LiveState};
use crate::quality::{create_shared_log, SharedQualityLog};
use crate::telemetry::driver::TickBatch;
use crate::telemetry::types::{
    sort_by_timestamp, DataQuality, FeatureCode, FeatureEvent, RawFeatureEvent,
};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// Counts for one ingested batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub applied: usize,
    pub stale: usize,
    pub skipped: usize,
    pub malformed: usize,
}

impl IngestSummary {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Stale => self.stale += 1,
            ApplyOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.stale + self.skipped
    }
}

/// Event log, live state and aggregation settings behind one handle.
pub struct Engine {
    aggregation: AggregationConfig,
    buckets: BucketAggregator,
    log: EventStore,
    live: LiveState,
    quality: SharedQualityLog,
    // Serializes writers so the log and the snapshot see batches in the same order
    ingest_lock: Mutex<()>,
}

impl Engine {
    pub fn new(config: &Config, quality: SharedQualityLog) -> Result<Self, ConfigError> {
        Ok(Self {
            aggregation: config.aggregation.clone(),
            buckets: BucketAggregator::from_config(&config.aggregation)?,
            log: EventStore::from_config(&config.retention),
            live: LiveState::new(),
            quality,
            ingest_lock: Mutex::new(()),
        })
    }

    /// Engine with default settings and a private quality log.
    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(&Config::default(), create_shared_log())
    }

    /// Ingest one driver tick.
    pub fn ingest_batch(&self, batch: &TickBatch) -> IngestSummary {
        self.quality.record_tick();
        self.ingest(&batch.events)
    }

    /// Ingest already decoded events, in order.
    pub fn ingest(&self, events: &[FeatureEvent]) -> IngestSummary {
        let _guard = self.ingest_lock.lock();
        self.record_evictions(self.log.append_batch(events));

        let mut summary = IngestSummary::default();
        for outcome in self.live.apply_batch(events) {
            self.quality.record_outcome(outcome);
            summary.record(outcome);
        }

        debug!(
            applied = summary.applied,
            stale = summary.stale,
            "Ingested batch"
        );
        summary
    }

    /// Decode and ingest wire events from a source with no ordering
    /// guarantee. The batch is stable-sorted by timestamp first; unknown
    /// feature codes are skipped and counted.
    pub fn ingest_raw(&self, raw: &[RawFeatureEvent]) -> IngestSummary {
        let mut summary = IngestSummary::default();
        let mut decoded = Vec::with_capacity(raw.len());

        for event in raw {
            match event.decode() {
                Ok(d) => {
                    if d.quality == DataQuality::MalformedNumeric {
                        debug!(
                            entity = %d.event.entity_id,
                            feature = d.event.feature.code(),
                            raw_value = %event.raw_value,
                            "Malformed numeric value stored as 0"
                        );
                        summary.malformed += 1;
                    }
                    decoded.push(d);
                }
                Err(e) => {
                    debug!(entity = %event.entity_id, "Skipping event: {e}");
                    summary.skipped += 1;
                    self.quality.record_outcome(ApplyOutcome::Skipped);
                }
            }
        }

        decoded.sort_by_key(|d| d.event.timestamp);
        let _guard = self.ingest_lock.lock();
        let events: Vec<FeatureEvent> = decoded.iter().map(|d| d.event.clone()).collect();
        self.record_evictions(self.log.append_batch(&events));

        for (d, outcome) in decoded.iter().zip(self.live.apply_batch(&events)) {
            self.quality.record_ingested(Ingested {
                outcome,
                quality: d.quality,
            });
            summary.record(outcome);
        }
        summary
    }

    fn record_evictions(&self, evicted: u64) {
        if evicted > 0 {
            debug!(evicted, retained = self.log.len(), "Retention evicted events");
            self.quality.record_evicted(evicted);
        }
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        self.live.snapshot()
    }

    pub fn summary(&self) -> FleetSummary {
        fleet_summary(&self.live.snapshot())
    }

    /// Ordered copy of the retained log.
    pub fn events(&self) -> Vec<FeatureEvent> {
        let mut events = self.log.snapshot();
        sort_by_timestamp(&mut events);
        events
    }

    pub fn event_count(&self) -> usize {
        self.log.len()
    }

    /// Time operational per entity. `now` closes open intervals when the
    /// wall-clock policy is configured.
    pub fn uptime(&self, now: DateTime<Utc>) -> Vec<EntityUptime> {
        IntervalReconstructor::new(
            FeatureCode::OperationalState,
            self.aggregation.open_interval.policy(now),
        )
        .per_entity(&self.events())
    }

    /// Bucketed cross-entity means of one numeric feature.
    pub fn series(&self, feature: FeatureCode) -> BucketSeries {
        self.buckets.aggregate(feature, &self.events())
    }

    /// Temperature means over `[start, end)`.
    pub fn temperatures(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<TemperatureAverage> {
        temperature_averages(&self.log.window(start, end), start, end)
    }

    /// Everything at once, computed over a single copy of the log taken
    /// together with the snapshot.
    pub fn report(&self, now: DateTime<Utc>) -> FleetReport {
        let (events, snapshot) = {
            let _guard = self.ingest_lock.lock();
            (self.events(), self.live.snapshot())
        };

        FleetReport {
            run_id: Uuid::new_v4(),
            generated_at: now,
            summary: fleet_summary(&snapshot),
            snapshot,
            uptime: IntervalReconstructor::new(
                FeatureCode::OperationalState,
                self.aggregation.open_interval.policy(now),
            )
            .per_entity(&events),
            battery_series: self
                .buckets
                .aggregate(FeatureCode::BatteryLevel, &events)
                .points(),
            temperature_averages: temperature_averages(
                &events,
                DateTime::<Utc>::MIN_UTC,
                DateTime::<Utc>::MAX_UTC,
            ),
        }
    }

    pub fn quality(&self) -> &SharedQualityLog {
        &self.quality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::driver::Cadence;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn raw(entity: &str, code: &str, value: &str, secs: i64) -> RawFeatureEvent {
        RawFeatureEvent {
            entity_id: entity.to_string(),
            feature_code: code.to_string(),
            raw_value: value.to_string(),
            timestamp: at(secs),
        }
    }

    #[test]
    fn test_ingest_batch_updates_log_and_snapshot() {
        let engine = Engine::with_defaults().unwrap();
        let batch = TickBatch {
            cadence: Cadence::Fast,
            at: at(0),
            events: vec![
                FeatureEvent::number("R1", FeatureCode::BatteryLevel, 90.0, at(0)),
                FeatureEvent::flag("R1", FeatureCode::ChargeState, false, at(0)),
            ],
        };
        let summary = engine.ingest_batch(&batch);

        assert_eq!(summary.applied, 2);
        assert_eq!(engine.event_count(), 2);
        assert_eq!(engine.summary().units, 1);
        assert_eq!(engine.quality().stats().ticks_emitted, 1);
    }

    #[test]
    fn test_ingest_raw_sorts_and_counts() {
        let engine = Engine::with_defaults().unwrap();
        let summary = engine.ingest_raw(&[
            raw("R1", "battery_level", "70", 10),
            raw("R1", "battery_level", "90", 0),
            raw("R1", "humidity", "12", 5),
            raw("R1", "battery_temp", "n/a", 3),
        ]);

        assert_eq!(summary.applied, 3);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.malformed, 1);
        assert_eq!(summary.total(), 4);
        let r1 = engine.snapshot().get("R1").cloned().unwrap();
        assert_eq!(r1.number(FeatureCode::BatteryLevel), Some(70.0));

        let stats = engine.quality().stats();
        assert_eq!(stats.unknown_features, 1);
        assert_eq!(stats.malformed_values, 1);
    }

    #[test]
    fn test_queries_on_empty_engine() {
        let engine = Engine::with_defaults().unwrap();
        assert!(engine.snapshot().is_empty());
        assert!(engine.uptime(at(0)).is_empty());
        assert!(engine.series(FeatureCode::BatteryLevel).is_empty());
        assert!(engine.temperatures(at(0), at(60)).is_empty());

        let report = engine.report(at(0));
        assert_eq!(report.summary, FleetSummary::default());
        assert!(report.battery_series.is_empty());
    }

    #[test]
    fn test_uptime_honours_wall_clock_mode() {
        let mut config = Config::default();
        config.aggregation.open_interval = crate::core::intervals::OpenIntervalMode::WallClock;
        let engine = Engine::new(&config, create_shared_log()).unwrap();
        engine.ingest(&[FeatureEvent::flag("R1", FeatureCode::OperationalState, true, at(0))]);

        let uptime = engine.uptime(at(30));
        assert_eq!(uptime[0].total, Duration::seconds(30));

        let default_engine = Engine::with_defaults().unwrap();
        default_engine
            .ingest(&[FeatureEvent::flag("R1", FeatureCode::OperationalState, true, at(0))]);
        assert_eq!(default_engine.uptime(at(30))[0].total, Duration::zero());
    }

    #[test]
    fn test_report_covers_all_views() {
        let engine = Engine::with_defaults().unwrap();
        engine.ingest(&[
            FeatureEvent::number("R1", FeatureCode::BatteryLevel, 80.0, at(0)),
            FeatureEvent::number("R1", FeatureCode::BatteryTemp, 22.0, at(0)),
            FeatureEvent::flag("R1", FeatureCode::OperationalState, true, at(0)),
            FeatureEvent::flag("R1", FeatureCode::OperationalState, false, at(20)),
            FeatureEvent::number("R1", FeatureCode::BatteryLevel, 78.0, at(20)),
        ]);
        let report = engine.report(at(30));

        assert_eq!(report.snapshot.len(), 1);
        assert_eq!(report.summary.mean_battery, Some(78.0));
        assert_eq!(report.uptime[0].total, Duration::seconds(20));
        assert_eq!(report.battery_series.len(), 1);
        assert_eq!(report.battery_series[0].mean_value, 79.0);
        assert_eq!(report.temperature_averages[0].mean, 22.0);
    }

    #[test]
    fn test_retention_evictions_are_counted() {
        let mut config = Config::default();
        config.retention.capacity = 3;
        let engine = Engine::new(&config, create_shared_log()).unwrap();
        let events: Vec<_> = (0..5)
            .map(|i| FeatureEvent::number("R1", FeatureCode::BatteryLevel, i as f64, at(i)))
            .collect();
        engine.ingest(&events);

        assert_eq!(engine.event_count(), 3);
        assert_eq!(engine.quality().stats().events_evicted, 2);
    }

    #[test]
    fn test_keep_forever_retention_does_not_overflow() {
        let mut config = Config::default();
        config.retention.max_age = std::time::Duration::from_secs(10_000_000_000_000);
        assert!(config.validate().is_ok());
        let engine = Engine::new(&config, create_shared_log()).unwrap();

        engine.ingest(&[FeatureEvent::number(
            "R1",
            FeatureCode::BatteryLevel,
            50.0,
            Utc::now(),
        )]);
        assert_eq!(engine.event_count(), 1);
    }

    #[test]
    fn test_report_snapshot_matches_its_log_copy() {
        let mut config = Config::default();
        config.aggregation.granularity = crate::core::buckets::Granularity::Second;
        config.aggregation.window_cap = 10_000;
        let engine = Engine::new(&config, create_shared_log()).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..500 {
                    engine.ingest(&[FeatureEvent::number(
                        "R1",
                        FeatureCode::BatteryLevel,
                        i as f64,
                        at(i),
                    )]);
                }
            });

            for _ in 0..200 {
                let report = engine.report(at(600));
                let Some(latest) = report.battery_series.last() else {
                    continue;
                };
                let live = report
                    .snapshot
                    .get("R1")
                    .and_then(|r1| r1.number(FeatureCode::BatteryLevel));
                assert_eq!(live, Some(latest.mean_value));
            }
        });
    }
}
