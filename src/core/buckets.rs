//! Time-bucketed averaging for trend series.
//!
//! Timestamps are truncated to a fixed granularity. Sub-hour slots are
//! aligned to the Unix epoch; hour and day slots start on the local hour and
//! local midnight of the label timezone, so a label always names the slot
//! it heads. Readings from every entity that fall in the same slot are
//! pooled, so a bucket mean is a cross-entity average. Buckets keep
//! first-seen order and a query returns only the most recent `window_cap`.

use crate::config::{AggregationConfig, ConfigError};
use crate::telemetry::types::{FeatureCode, FeatureEvent};
use chrono::{DateTime, Duration, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Width of one bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Second,
    Minute,
    Hour,
    Day,
    /// A custom width in seconds
    Seconds(u32),
}

impl Granularity {
    pub fn step_secs(self) -> i64 {
        match self {
            Granularity::Second => 1,
            Granularity::Minute => 60,
            Granularity::Hour => 3_600,
            Granularity::Day => 86_400,
            Granularity::Seconds(n) => i64::from(n.max(1)),
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn truncate(self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let offset = ts.timestamp().rem_euclid(self.step_secs());
        let nanos = i64::from(ts.timestamp_subsec_nanos());
        ts - Duration::seconds(offset) - Duration::nanoseconds(nanos)
    }

    /// Start of the bucket containing `ts`, with hour and day boundaries
    /// taken in `tz`.
    pub fn truncate_in(self, ts: DateTime<Utc>, tz: &Tz) -> DateTime<Utc> {
        let local = ts.with_timezone(tz);
        let nanos = Duration::nanoseconds(i64::from(local.nanosecond()));
        match self {
            Granularity::Hour => {
                let into_hour = i64::from(local.minute() * 60 + local.second());
                ts - Duration::seconds(into_hour) - nanos
            }
            Granularity::Day => local
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .and_then(|midnight| tz.from_local_datetime(&midnight).earliest())
                .map(|start| start.with_timezone(&Utc))
                // Midnight skipped by a DST jump
                .unwrap_or_else(|| {
                    let into_day = i64::from(local.num_seconds_from_midnight());
                    ts - Duration::seconds(into_day) - nanos
                }),
            _ => self.truncate(ts),
        }
    }

    fn label_format(self) -> &'static str {
        match self {
            Granularity::Second | Granularity::Seconds(_) => "%H:%M:%S",
            Granularity::Minute => "%H:%M",
            Granularity::Hour => "%H:00",
            Granularity::Day => "%Y-%m-%d",
        }
    }
}

/// Running sum and count for one time slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub start: DateTime<Utc>,
    pub label: String,
    pub sum: f64,
    pub count: u64,
}

impl Bucket {
    /// Mean of the contributing readings. A bucket only exists once a
    /// reading has landed in it, so `count` is never zero.
    pub fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// One point of a chart series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub label: String,
    pub mean_value: f64,
    pub start: DateTime<Utc>,
}

/// Ordered buckets for one feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketSeries {
    pub feature: FeatureCode,
    pub granularity: Granularity,
    pub buckets: Vec<Bucket>,
}

impl BucketSeries {
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn points(&self) -> Vec<SeriesPoint> {
        self.buckets
            .iter()
            .map(|b| SeriesPoint {
                label: b.label.clone(),
                mean_value: b.mean(),
                start: b.start,
            })
            .collect()
    }

    pub fn means(&self) -> Vec<f64> {
        self.buckets.iter().map(Bucket::mean).collect()
    }
}

/// Quantizes a numeric feature stream into capped, averaged buckets.
#[derive(Debug, Clone)]
pub struct BucketAggregator {
    granularity: Granularity,
    window_cap: usize,
    label_tz: Tz,
}

impl BucketAggregator {
    pub fn new(granularity: Granularity, window_cap: usize) -> Self {
        Self {
            granularity,
            window_cap,
            label_tz: Tz::UTC,
        }
    }

    pub fn from_config(config: &AggregationConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.granularity, config.window_cap).with_timezone(config.label_tz()?))
    }

    /// Format labels in the given timezone.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.label_tz = tz;
        self
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Bucket every numeric reading of `feature` in `events`.
    ///
    /// Buckets come out in first-seen order, which is chronological for a
    /// timestamp-ordered slice, and only the newest `window_cap` are kept.
    pub fn aggregate(&self, feature: FeatureCode, events: &[FeatureEvent]) -> BucketSeries {
        let mut slots: IndexMap<DateTime<Utc>, Bucket> = IndexMap::new();

        for event in events.iter().filter(|e| e.feature == feature) {
            let Some(value) = event.value.as_number() else {
                continue;
            };
            let start = self.granularity.truncate_in(event.timestamp, &self.label_tz);
            let bucket = slots.entry(start).or_insert_with(|| Bucket {
                start,
                label: self.label(start),
                sum: 0.0,
                count: 0,
            });
            bucket.sum += value;
            bucket.count += 1;
        }

        let mut buckets: Vec<Bucket> = slots.into_values().collect();
        if buckets.len() > self.window_cap {
            buckets.drain(..buckets.len() - self.window_cap);
        }

        BucketSeries {
            feature,
            granularity: self.granularity,
            buckets,
        }
    }

    fn label(&self, start: DateTime<Utc>) -> String {
        start
            .with_timezone(&self.label_tz)
            .format(self.granularity.label_format())
            .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn battery(entity: &str, value: f64, secs: i64) -> FeatureEvent {
        FeatureEvent::number(entity, FeatureCode::BatteryLevel, value, at(secs))
    }

    #[test]
    fn test_bucket_mean() {
        let events = vec![battery("R1", 10.0, 5), battery("R1", 20.0, 40)];
        let series = BucketAggregator::new(Granularity::Minute, 20)
            .aggregate(FeatureCode::BatteryLevel, &events);

        assert_eq!(series.len(), 1);
        assert_eq!(series.buckets[0].count, 2);
        assert_eq!(series.buckets[0].mean(), 15.0);
        assert_eq!(series.buckets[0].label, "08:00");
    }

    #[test]
    fn test_cross_entity_fan_in() {
        let events = vec![
            battery("R1", 90.0, 0),
            battery("R2", 60.0, 1),
            battery("R1", 88.0, 61),
        ];
        let series = BucketAggregator::new(Granularity::Minute, 20)
            .aggregate(FeatureCode::BatteryLevel, &events);
        assert_eq!(series.means(), vec![75.0, 88.0]);
    }

    #[test]
    fn test_window_cap_keeps_most_recent() {
        let events: Vec<_> = (0..25).map(|i| battery("R1", i as f64, i * 60)).collect();
        let series = BucketAggregator::new(Granularity::Minute, 20)
            .aggregate(FeatureCode::BatteryLevel, &events);

        assert_eq!(series.len(), 20);
        let expected: Vec<f64> = (5..25).map(|i| i as f64).collect();
        assert_eq!(series.means(), expected);
        assert!(series.buckets.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn test_truncation() {
        let ts = at(3_725) + Duration::milliseconds(250);
        assert_eq!(Granularity::Second.truncate(ts), at(3_725));
        assert_eq!(Granularity::Minute.truncate(ts), at(3_720));
        assert_eq!(Granularity::Hour.truncate(ts), at(3_600));
        assert_eq!(Granularity::Seconds(15).truncate(ts), at(3_720));
        assert_eq!(
            Granularity::Day.truncate(ts),
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_labels_use_timezone() {
        let events = vec![battery("R1", 50.0, 0)];
        let series = BucketAggregator::new(Granularity::Hour, 20)
            .with_timezone(chrono_tz::Europe::Madrid)
            .aggregate(FeatureCode::BatteryLevel, &events);
        assert_eq!(series.buckets[0].label, "10:00");
    }

    #[test]
    fn test_day_buckets_follow_local_midnight() {
        // 12:00Z and 02:00Z next day are both May 1st in New York
        let events = vec![battery("R1", 40.0, 4 * 3_600), battery("R1", 60.0, 18 * 3_600)];
        let series = BucketAggregator::new(Granularity::Day, 20)
            .with_timezone(chrono_tz::America::New_York)
            .aggregate(FeatureCode::BatteryLevel, &events);

        assert_eq!(series.len(), 1);
        assert_eq!(series.buckets[0].label, "2024-05-01");
        assert_eq!(series.buckets[0].mean(), 50.0);
        assert_eq!(
            series.buckets[0].start,
            Utc.with_ymd_and_hms(2024, 5, 1, 4, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_hour_buckets_with_half_hour_offset() {
        // 08:00Z is 13:30 in Kolkata
        let events = vec![
            battery("R1", 10.0, 0),
            battery("R1", 20.0, 1_200),
            battery("R1", 30.0, 2_400),
        ];
        let series = BucketAggregator::new(Granularity::Hour, 20)
            .with_timezone(chrono_tz::Asia::Kolkata)
            .aggregate(FeatureCode::BatteryLevel, &events);

        let labels: Vec<_> = series.buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["13:00", "14:00"]);
        assert_eq!(series.means(), vec![15.0, 30.0]);
    }

    #[test]
    fn test_other_features_and_flags_ignored() {
        let events = vec![
            FeatureEvent::number("R1", FeatureCode::BatteryTemp, 25.0, at(0)),
            FeatureEvent::flag("R1", FeatureCode::BatteryLevel, true, at(0)),
            battery("R1", 40.0, 0),
        ];
        let series = BucketAggregator::new(Granularity::Minute, 20)
            .aggregate(FeatureCode::BatteryLevel, &events);
        assert_eq!(series.means(), vec![40.0]);
    }

    #[test]
    fn test_empty_input_yields_empty_series() {
        let series = BucketAggregator::new(Granularity::Minute, 20)
            .aggregate(FeatureCode::BatteryLevel, &[]);
        assert!(series.is_empty());
        assert!(series.points().is_empty());
    }

    #[test]
    fn test_points_carry_label_and_mean() {
        let events = vec![battery("R1", 10.0, 0), battery("R2", 30.0, 10)];
        let points = BucketAggregator::new(Granularity::Seconds(30), 20)
            .aggregate(FeatureCode::BatteryLevel, &events)
            .points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].label, "08:00:00");
        assert_eq!(points[0].mean_value, 20.0);
    }
}
