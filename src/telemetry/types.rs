//! Feature-keyed telemetry event types.
//!
//! Events travel on the wire with string values ([`RawFeatureEvent`]) and are
//! decoded once, at the ingestion boundary, into typed [`FeatureEvent`]s.
//! Everything past that boundary works on [`FeatureValue`] only.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a mobile unit or charging station.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The closed set of measured or controlled attributes.
///
/// Producer and consumer share this enumeration; codes outside it are
/// ignored at ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureCode {
    PositionX,
    PositionY,
    BatteryLevel,
    BatteryTemp,
    ChargeState,
    OperationalState,
    MotorTemp,
    EnergyUsage,
    StationTemp,
    StationOccupied,
    FastCharge,
}

/// How a feature's raw value is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Number,
    Flag,
}

/// Unit convention attached to each feature code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    ArenaUnits,
    Percent,
    Celsius,
    KilowattHours,
    Boolean,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::ArenaUnits => "u",
            Unit::Percent => "%",
            Unit::Celsius => "°C",
            Unit::KilowattHours => "kWh",
            Unit::Boolean => "bool",
        }
    }
}

impl FeatureCode {
    pub const ALL: [FeatureCode; 11] = [
        FeatureCode::PositionX,
        FeatureCode::PositionY,
        FeatureCode::BatteryLevel,
        FeatureCode::BatteryTemp,
        FeatureCode::ChargeState,
        FeatureCode::OperationalState,
        FeatureCode::MotorTemp,
        FeatureCode::EnergyUsage,
        FeatureCode::StationTemp,
        FeatureCode::StationOccupied,
        FeatureCode::FastCharge,
    ];

    /// Wire code for this feature.
    pub fn code(self) -> &'static str {
        match self {
            FeatureCode::PositionX => "position_x",
            FeatureCode::PositionY => "position_y",
            FeatureCode::BatteryLevel => "battery_level",
            FeatureCode::BatteryTemp => "battery_temp",
            FeatureCode::ChargeState => "charge_state",
            FeatureCode::OperationalState => "operational_state",
            FeatureCode::MotorTemp => "motor_temp",
            FeatureCode::EnergyUsage => "energy_usage",
            FeatureCode::StationTemp => "station_temp",
            FeatureCode::StationOccupied => "station_occupied",
            FeatureCode::FastCharge => "fast_charge",
        }
    }

    /// Look up a feature by its wire code. Returns `None` for codes outside
    /// the enumeration.
    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL.into_iter().find(|f| f.code() == code)
    }

    pub fn kind(self) -> ValueKind {
        match self {
            FeatureCode::ChargeState
            | FeatureCode::OperationalState
            | FeatureCode::StationOccupied
            | FeatureCode::FastCharge => ValueKind::Flag,
            _ => ValueKind::Number,
        }
    }

    pub fn unit(self) -> Unit {
        match self {
            FeatureCode::PositionX | FeatureCode::PositionY => Unit::ArenaUnits,
            FeatureCode::BatteryLevel => Unit::Percent,
            FeatureCode::BatteryTemp | FeatureCode::MotorTemp | FeatureCode::StationTemp => {
                Unit::Celsius
            }
            FeatureCode::EnergyUsage => Unit::KilowattHours,
            FeatureCode::ChargeState
            | FeatureCode::OperationalState
            | FeatureCode::StationOccupied
            | FeatureCode::FastCharge => Unit::Boolean,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FeatureCode::PositionX => "Horizontal position inside the arena",
            FeatureCode::PositionY => "Vertical position inside the arena",
            FeatureCode::BatteryLevel => "Battery state of charge",
            FeatureCode::BatteryTemp => "Battery pack temperature",
            FeatureCode::ChargeState => "Unit is charging",
            FeatureCode::OperationalState => "Unit is operational",
            FeatureCode::MotorTemp => "Drive motor temperature",
            FeatureCode::EnergyUsage => "Station energy delivered",
            FeatureCode::StationTemp => "Station housing temperature",
            FeatureCode::StationOccupied => "A unit is docked at the station",
            FeatureCode::FastCharge => "Station supports fast charging",
        }
    }

    pub fn is_temperature(self) -> bool {
        self.unit() == Unit::Celsius
    }
}

impl fmt::Display for FeatureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A decoded feature value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeatureValue {
    Number(f64),
    Flag(bool),
}

impl FeatureValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FeatureValue::Number(v) => Some(*v),
            FeatureValue::Flag(_) => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FeatureValue::Flag(v) => Some(*v),
            FeatureValue::Number(_) => None,
        }
    }

    /// Wire encoding of this value.
    pub fn to_raw(&self) -> String {
        match self {
            FeatureValue::Number(v) => v.to_string(),
            FeatureValue::Flag(v) => v.to_string(),
        }
    }
}

/// Whether a raw value decoded cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Clean,
    /// A numeric value failed to parse and was coerced to 0.
    MalformedNumeric,
}

/// Coerce a raw string into a typed value.
///
/// Flags accept `"true"` or `"1"` as true and anything else as false.
/// Numbers parse as `f64`; unparseable or non-finite input becomes `0.0`
/// and is reported as [`DataQuality::MalformedNumeric`]. Never fails.
pub fn coerce(kind: ValueKind, raw: &str) -> (FeatureValue, DataQuality) {
    let raw = raw.trim();
    match kind {
        ValueKind::Flag => (
            FeatureValue::Flag(matches!(raw, "true" | "1")),
            DataQuality::Clean,
        ),
        ValueKind::Number => match raw.parse::<f64>() {
            Ok(v) if v.is_finite() => (FeatureValue::Number(v), DataQuality::Clean),
            _ => (FeatureValue::Number(0.0), DataQuality::MalformedNumeric),
        },
    }
}

/// Errors raised while decoding a raw event.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("unrecognized feature code '{0}'")]
    UnknownFeature(String),
}

/// A telemetry event as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawFeatureEvent {
    pub entity_id: String,
    pub feature_code: String,
    pub raw_value: String,
    pub timestamp: DateTime<Utc>,
}

/// A decoded event plus the quality of its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub event: FeatureEvent,
    pub quality: DataQuality,
}

impl RawFeatureEvent {
    /// Decode into a typed event.
    pub fn decode(&self) -> Result<Decoded, DecodeError> {
        let feature = FeatureCode::parse(&self.feature_code)
            .ok_or_else(|| DecodeError::UnknownFeature(self.feature_code.clone()))?;
        let (value, quality) = coerce(feature.kind(), &self.raw_value);

        Ok(Decoded {
            event: FeatureEvent {
                entity_id: EntityId::new(self.entity_id.clone()),
                feature,
                value,
                timestamp: self.timestamp,
            },
            quality,
        })
    }
}

/// One timestamped (entity, feature, value) observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureEvent {
    pub entity_id: EntityId,
    pub feature: FeatureCode,
    pub value: FeatureValue,
    pub timestamp: DateTime<Utc>,
}

impl FeatureEvent {
    pub fn new(
        entity_id: impl Into<EntityId>,
        feature: FeatureCode,
        value: FeatureValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id: entity_id.into(),
            feature,
            value,
            timestamp,
        }
    }

    pub fn number(
        entity_id: impl Into<EntityId>,
        feature: FeatureCode,
        value: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(entity_id, feature, FeatureValue::Number(value), timestamp)
    }

    pub fn flag(
        entity_id: impl Into<EntityId>,
        feature: FeatureCode,
        value: bool,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self::new(entity_id, feature, FeatureValue::Flag(value), timestamp)
    }

    /// Encode back into the wire form.
    pub fn to_raw(&self) -> RawFeatureEvent {
        RawFeatureEvent {
            entity_id: self.entity_id.to_string(),
            feature_code: self.feature.code().to_string(),
            raw_value: self.value.to_raw(),
            timestamp: self.timestamp,
        }
    }
}

/// Stable sort by timestamp, for batches whose source does not guarantee
/// order. Events sharing a timestamp keep their relative order.
pub fn sort_by_timestamp(events: &mut [FeatureEvent]) {
    events.sort_by_key(|e| e.timestamp);
}
