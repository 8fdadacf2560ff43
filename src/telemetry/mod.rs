//! Telemetry production for the fleet engine.
//!
//! This module defines the feature-keyed event types shared by producers and
//! consumers, the synthetic generator that stands in for sensor hardware,
//! and the driver that runs it on two independent cadences.

pub mod driver;
pub mod generator;
pub mod types;

// Re-export commonly used types
pub use driver::{Cadence, DriverConfig, DriverError, SimulationDriver, TickBatch};
pub use generator::{Arena, ChargingStation, MobileUnit, SyntheticGenerator};
pub use types::{
    coerce, sort_by_timestamp, DataQuality, DecodeError, Decoded, EntityId, FeatureCode,
    FeatureEvent, FeatureValue, RawFeatureEvent, Unit, ValueKind,
};
