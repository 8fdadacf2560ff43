//! Batch replay of recorded wire events.
//!
//! A replay file is either a JSON array of raw events or JSON Lines (one
//! event per line, blank lines ignored). The format is picked from the first
//! non-whitespace character.

use crate::telemetry::types::RawFeatureEvent;
use chrono::NaiveDate;
use std::path::Path;

/// Errors raised while loading a replay file.
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Parse error on line {line}: {source}")]
    Line {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Read every raw event from a JSON or JSON Lines file, in file order.
pub fn load_raw_events(path: &Path) -> Result<Vec<RawFeatureEvent>, ReplayError> {
    let content = std::fs::read_to_string(path)?;
    parse_raw_events(&content)
}

pub fn parse_raw_events(content: &str) -> Result<Vec<RawFeatureEvent>, ReplayError> {
    if content.trim_start().starts_with('[') {
        return Ok(serde_json::from_str(content)?);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|source| ReplayError::Line { line: i + 1, source })
        })
        .collect()
}

/// Keep only the events whose UTC date is `day`.
pub fn restrict_to_day(events: Vec<RawFeatureEvent>, day: NaiveDate) -> Vec<RawFeatureEvent> {
    events
        .into_iter()
        .filter(|e| e.timestamp.date_naive() == day)
        .collect()
}
