//! Append-only event log with a bounded retention window.
//!
//! Events are never modified once appended. The oldest events are evicted
//! when the log exceeds its capacity or falls further behind the newest
//! event than the configured maximum age. Readers copy the slice they need
//! and compute on the copy.

use crate::config::RetentionConfig;
use crate::telemetry::types::FeatureEvent;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct EventLog {
    events: VecDeque<FeatureEvent>,
    capacity: usize,
    max_age: Duration,
    newest: Option<DateTime<Utc>>,
    evicted: u64,
}

impl EventLog {
    pub fn new(capacity: usize, max_age: std::time::Duration) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity.min(4_096)),
            capacity: capacity.max(1),
            max_age: Duration::from_std(max_age).unwrap_or(Duration::MAX),
            newest: None,
            evicted: 0,
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(config.capacity, config.max_age)
    }

    /// Append one event and return how many events were evicted.
    pub fn append(&mut self, event: FeatureEvent) -> u64 {
        let newest = match self.newest {
            Some(t) if t >= event.timestamp => t,
            _ => event.timestamp,
        };
        self.newest = Some(newest);
        self.events.push_back(event);
        self.evict(newest)
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = FeatureEvent>) -> u64 {
        events.into_iter().map(|event| self.append(event)).sum()
    }

    fn evict(&mut self, newest: DateTime<Utc>) -> u64 {
        // No horizon when max_age reaches past the earliest representable time
        let horizon = newest.checked_sub_signed(self.max_age);
        let mut evicted = 0;
        while let Some(front) = self.events.front() {
            let too_old = horizon.is_some_and(|h| front.timestamp < h);
            if self.events.len() > self.capacity || too_old {
                self.events.pop_front();
                evicted += 1;
            } else {
                break;
            }
        }
        self.evicted += evicted;
        evicted
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events dropped by the retention policy so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeatureEvent> {
        self.events.iter()
    }

    pub fn to_vec(&self) -> Vec<FeatureEvent> {
        self.events.iter().cloned().collect()
    }

    /// Copy of the events with `start <= timestamp < end`.
    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<FeatureEvent> {
        self.events
            .iter()
            .filter(|e| e.timestamp >= start && e.timestamp < end)
            .cloned()
            .collect()
    }
}

/// Event log shared between the single appender and concurrent readers.
#[derive(Debug, Clone)]
pub struct EventStore {
    inner: Arc<RwLock<EventLog>>,
}

impl EventStore {
    pub fn new(log: EventLog) -> Self {
        Self {
            inner: Arc::new(RwLock::new(log)),
        }
    }

    pub fn from_config(config: &RetentionConfig) -> Self {
        Self::new(EventLog::from_config(config))
    }

    /// Append a batch, returning the number of events it pushed out.
    pub fn append_batch(&self, events: &[FeatureEvent]) -> u64 {
        self.inner.write().extend(events.iter().cloned())
    }

    /// Copy of the whole retained log.
    pub fn snapshot(&self) -> Vec<FeatureEvent> {
        self.inner.read().to_vec()
    }

    pub fn window(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<FeatureEvent> {
        self.inner.read().window(start, end)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.inner.read().evicted()
    }
}
