//! Core reduction and aggregation for the fleet engine.
//!
//! This module contains:
//! - The append-only event log with its retention policy
//! - The state reducer folding events into live snapshots
//! - Operational interval reconstruction from toggle events
//! - Time-bucketed averaging for trend series
//! - Derived fleet metrics and the combined report

pub mod buckets;
pub mod intervals;
pub mod log;
pub mod metrics;
pub mod reducer;

// Re-export commonly used types
pub use buckets::{Bucket, BucketAggregator, BucketSeries, Granularity, SeriesPoint};
pub use intervals::{
    EntityUptime, IntervalReconstructor, OpenIntervalMode, OpenIntervalPolicy, OperationalInterval,
};
pub use log::{EventLog, EventStore};
pub use metrics::{
    fleet_summary, temperature_averages, FleetReport, FleetSummary, TemperatureAverage,
};
pub use reducer::{
    ApplyOutcome, EntitySnapshot, FleetSnapshot, Ingested, LiveState, Reading, StateReducer,
};
