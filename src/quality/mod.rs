//! Data-quality accounting for the fleet engine.
//!
//! Malformed values and unknown feature codes are not errors; ingestion
//! continues and the conditions are counted here so they stay visible.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, DataQualityLog, QualityStats,
    SharedQualityLog,
};
