//! Fleet Telemetry - simulation and aggregation engine for mobile units and
//! charging stations.
//!
//! This library ingests sparse, feature-keyed telemetry events, keeps a
//! last-known-value snapshot per entity, and derives historical metrics
//! (time operational, time-bucketed averages) over a retained event log.
//!
//! # Guarantees
//!
//! - **Closed feature set**: values are decoded once at ingestion; unknown
//!   codes are skipped and counted, never stored
//! - **Monotonic snapshots**: a reading older than the stored one never
//!   replaces it
//! - **Whole ticks**: the driver publishes each tick as one batch and readers
//!   never observe half of it
//! - **Copy-then-compute**: historical queries run on a copy of the log
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Fleet Telemetry                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │  Generator  │──▶│  Event Log  │──▶│  Intervals  │        │
//! │  │ (fast/slow) │   │ (retention) │   │  Buckets    │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! │         │                 │                  │              │
//! │         ▼                 ▼                  ▼              │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐        │
//! │  │Data Quality │   │   Reducer   │──▶│   Report    │        │
//! │  │    Log      │   │ (snapshot)  │   │ CLI / HTTP  │        │
//! │  └─────────────┘   └─────────────┘   └─────────────┘        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use fleet_telemetry::{config::Config, telemetry, Engine};
//!
//! let config = Config::default();
//! let engine = Engine::with_defaults().expect("default config is valid");
//!
//! let generator = telemetry::SyntheticGenerator::new(&config.simulation);
//! let mut driver = telemetry::SimulationDriver::new(generator, Default::default());
//! driver.start().expect("Failed to start driver");
//!
//! // Batches can be received from driver.receiver() and fed to engine.ingest_batch()
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod quality;
pub mod replay;
pub mod telemetry;

#[cfg(feature = "server")]
pub mod server;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use crate::core::{
    BucketAggregator, EntitySnapshot, EntityUptime, FleetReport, FleetSnapshot, FleetSummary,
    IntervalReconstructor, StateReducer,
};
pub use engine::{Engine, IngestSummary};
pub use quality::{DataQualityLog, QualityStats, SharedQualityLog};
pub use replay::ReplayError;
pub use telemetry::{
    FeatureCode, FeatureEvent, FeatureValue, RawFeatureEvent, SimulationDriver,
    SyntheticGenerator, TickBatch,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Printable table of the feature codes shared by producers and consumers.
pub fn feature_contract() -> String {
    let mut out = String::from(
        "Feature contract\n\
         ================\n\
         \n\
         CODE                KIND    UNIT  DESCRIPTION\n",
    );
    for feature in FeatureCode::ALL {
        let kind = match feature.kind() {
            telemetry::ValueKind::Number => "number",
            telemetry::ValueKind::Flag => "flag",
        };
        out.push_str(&format!(
            "{:<19} {:<7} {:<5} {}\n",
            feature.code(),
            kind,
            feature.unit().symbol(),
            feature.description()
        ));
    }
    out.push_str(
        "\nValues travel as strings. Flags are true only for \"true\" or \"1\".\n\
         Unparseable numbers are stored as 0 and counted. Unknown codes are ignored.\n",
    );
    out
}
