//! Counters for ingestion outcomes and driver health.
//!
//! Counters are atomics so the driver thread, the ingestion loop and HTTP
//! handlers can all record without locking. Totals can be persisted so
//! `fleet-telemetry status` reports across runs.

use crate::core::reducer::{ApplyOutcome, Ingested};
use crate::telemetry::types::DataQuality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Data-quality statistics for the current session.
#[derive(Debug)]
pub struct DataQualityLog {
    /// Events offered to the reducer
    events_ingested: AtomicU64,
    /// Events that updated the snapshot
    events_applied: AtomicU64,
    /// Events older than the stored reading
    events_stale: AtomicU64,
    /// Numeric values that failed to parse and were stored as zero
    malformed_values: AtomicU64,
    /// Events with an unrecognized feature code
    unknown_features: AtomicU64,
    /// Events pushed out of the log by the retention policy
    events_evicted: AtomicU64,
    /// Tick batches delivered by the driver
    ticks_emitted: AtomicU64,
    /// Tick batches dropped on a full queue
    ticks_dropped: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl DataQualityLog {
    pub fn new() -> Self {
        Self {
            events_ingested: AtomicU64::new(0),
            events_applied: AtomicU64::new(0),
            events_stale: AtomicU64::new(0),
            malformed_values: AtomicU64::new(0),
            unknown_features: AtomicU64::new(0),
            events_evicted: AtomicU64::new(0),
            ticks_emitted: AtomicU64::new(0),
            ticks_dropped: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that starts from, and saves back to, a stats file.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            debug!(error = %e, "Could not load previous data-quality stats");
        }

        log
    }

    /// Record the result of applying one decoded event.
    pub fn record_outcome(&self, outcome: ApplyOutcome) {
        self.events_ingested.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            ApplyOutcome::Applied => &self.events_applied,
            ApplyOutcome::Stale => &self.events_stale,
            ApplyOutcome::Skipped => &self.unknown_features,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the result of applying one raw event.
    pub fn record_ingested(&self, ingested: Ingested) {
        self.record_outcome(ingested.outcome);
        if ingested.quality == DataQuality::MalformedNumeric {
            self.malformed_values.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_evicted(&self, count: u64) {
        self.events_evicted.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Bring the dropped-tick counter up to the driver's running total.
    pub fn record_ticks_dropped(&self, count: u64) {
        self.ticks_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> QualityStats {
        QualityStats {
            events_ingested: self.events_ingested.load(Ordering::Relaxed),
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_stale: self.events_stale.load(Ordering::Relaxed),
            malformed_values: self.malformed_values.load(Ordering::Relaxed),
            unknown_features: self.unknown_features.load(Ordering::Relaxed),
            events_evicted: self.events_evicted.load(Ordering::Relaxed),
            ticks_emitted: self.ticks_emitted.load(Ordering::Relaxed),
            ticks_dropped: self.ticks_dropped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Data Quality:\n\
             - Events ingested: {}\n\
             - Events applied: {}\n\
             - Stale events ignored: {}\n\
             - Malformed numeric values: {}\n\
             - Unknown feature codes: {}\n\
             - Events evicted by retention: {}\n\
             - Ticks emitted: {}\n\
             - Ticks dropped: {}\n\
             - Session duration: {} seconds",
            stats.events_ingested,
            stats.events_applied,
            stats.events_stale,
            stats.malformed_values,
            stats.unknown_features,
            stats.events_evicted,
            stats.ticks_emitted,
            stats.ticks_dropped,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                events_ingested: stats.events_ingested,
                events_applied: stats.events_applied,
                events_stale: stats.events_stale,
                malformed_values: stats.malformed_values,
                unknown_features: stats.unknown_features,
                events_evicted: stats.events_evicted,
                ticks_emitted: stats.ticks_emitted,
                ticks_dropped: stats.ticks_dropped,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.events_ingested
                    .store(persisted.events_ingested, Ordering::Relaxed);
                self.events_applied
                    .store(persisted.events_applied, Ordering::Relaxed);
                self.events_stale
                    .store(persisted.events_stale, Ordering::Relaxed);
                self.malformed_values
                    .store(persisted.malformed_values, Ordering::Relaxed);
                self.unknown_features
                    .store(persisted.unknown_features, Ordering::Relaxed);
                self.events_evicted
                    .store(persisted.events_evicted, Ordering::Relaxed);
                self.ticks_emitted
                    .store(persisted.ticks_emitted, Ordering::Relaxed);
                self.ticks_dropped
                    .store(persisted.ticks_dropped, Ordering::Relaxed);
            }
        }
        Ok(())
    }

    /// Reset all counters.
    pub fn reset(&self) {
        for counter in [
            &self.events_ingested,
            &self.events_applied,
            &self.events_stale,
            &self.malformed_values,
            &self.unknown_features,
            &self.events_evicted,
            &self.ticks_emitted,
            &self.ticks_dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for DataQualityLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityStats {
    pub events_ingested: u64,
    pub events_applied: u64,
    pub events_stale: u64,
    pub malformed_values: u64,
    pub unknown_features: u64,
    pub events_evicted: u64,
    pub ticks_emitted: u64,
    pub ticks_dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    events_ingested: u64,
    events_applied: u64,
    events_stale: u64,
    malformed_values: u64,
    unknown_features: u64,
    #[serde(default)]
    events_evicted: u64,
    ticks_emitted: u64,
    ticks_dropped: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared data-quality log.
pub type SharedQualityLog = Arc<DataQualityLog>;

pub fn create_shared_log() -> SharedQualityLog {
    Arc::new(DataQualityLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedQualityLog {
    Arc::new(DataQualityLog::with_persistence(path))
}
