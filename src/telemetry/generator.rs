//! Synthetic telemetry generator.
//!
//! Stands in for real sensor hardware. Mobile units take a bounded random
//! walk on the fast cadence; one randomly chosen station changes on the slow
//! cadence. The generator owns its whole simulation context, so tick
//! functions take `&mut self` and nothing else is shared.

use crate::config::SimulationConfig;
use crate::telemetry::types::{EntityId, FeatureCode, FeatureEvent};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Largest per-axis position step per fast tick.
pub const MAX_STEP: i32 = 10;

/// Largest battery drain per fast tick (percent).
pub const MAX_BATTERY_DRAIN: u32 = 2;

/// Clamp range for mobile-unit battery temperature.
pub const UNIT_TEMP_MIN: f64 = 20.0;
pub const UNIT_TEMP_MAX: f64 = 30.0;

pub const BATTERY_MIN: f64 = 0.0;
pub const BATTERY_MAX: f64 = 100.0;

/// Probability that a unit's charge state flips on a fast tick.
pub const CHARGE_FLIP_PROBABILITY: f64 = 0.1;

/// Probability that the selected station's occupancy flips on a slow tick.
pub const OCCUPANCY_FLIP_PROBABILITY: f64 = 0.3;

/// Rectangle mobile units are confined to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arena {
    pub width: f64,
    pub height: f64,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            width: 800.0,
            height: 600.0,
        }
    }
}

impl Arena {
    pub fn clamp_x(&self, x: f64) -> f64 {
        x.clamp(0.0, self.width)
    }

    pub fn clamp_y(&self, y: f64) -> f64 {
        y.clamp(0.0, self.height)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        (0.0..=self.width).contains(&x) && (0.0..=self.height).contains(&y)
    }
}

/// Simulated state of one mobile unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileUnit {
    pub id: EntityId,
    pub x: f64,
    pub y: f64,
    pub battery_level: f64,
    pub battery_temp: f64,
    pub charging: bool,
}

impl MobileUnit {
    /// The full feature set for this unit at `at`.
    ///
    /// A unit on charge reports itself as not operational.
    pub fn events(&self, at: DateTime<Utc>) -> Vec<FeatureEvent> {
        let id = &self.id;
        vec![
            FeatureEvent::number(id.clone(), FeatureCode::PositionX, self.x, at),
            FeatureEvent::number(id.clone(), FeatureCode::PositionY, self.y, at),
            FeatureEvent::number(id.clone(), FeatureCode::BatteryLevel, self.battery_level, at),
            FeatureEvent::number(id.clone(), FeatureCode::BatteryTemp, self.battery_temp, at),
            FeatureEvent::flag(id.clone(), FeatureCode::ChargeState, self.charging, at),
            FeatureEvent::flag(id.clone(), FeatureCode::OperationalState, !self.charging, at),
        ]
    }

    fn step(&mut self, rng: &mut StdRng, arena: &Arena) {
        self.x = arena.clamp_x(self.x + rng.gen_range(-MAX_STEP..=MAX_STEP) as f64);
        self.y = arena.clamp_y(self.y + rng.gen_range(-MAX_STEP..=MAX_STEP) as f64);

        let drift = if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
        self.battery_temp = (self.battery_temp + drift).clamp(UNIT_TEMP_MIN, UNIT_TEMP_MAX);

        let drain = rng.gen_range(0..=MAX_BATTERY_DRAIN) as f64;
        self.battery_level = (self.battery_level - drain).clamp(BATTERY_MIN, BATTERY_MAX);

        if rng.gen_bool(CHARGE_FLIP_PROBABILITY) {
            self.charging = !self.charging;
        }
    }
}

/// Simulated state of one fixed charging station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargingStation {
    pub id: EntityId,
    pub x: f64,
    pub y: f64,
    pub temperature: f64,
    pub occupied: bool,
    pub fast_charge: bool,
    pub energy_usage: f64,
}

impl ChargingStation {
    /// Features that change on a slow tick.
    pub fn events(&self, at: DateTime<Utc>) -> Vec<FeatureEvent> {
        vec![
            FeatureEvent::number(self.id.clone(), FeatureCode::StationTemp, self.temperature, at),
            FeatureEvent::flag(self.id.clone(), FeatureCode::StationOccupied, self.occupied, at),
        ]
    }

    /// Every feature, including the fixed ones.
    pub fn announce_events(&self, at: DateTime<Utc>) -> Vec<FeatureEvent> {
        let mut events = vec![
            FeatureEvent::number(self.id.clone(), FeatureCode::PositionX, self.x, at),
            FeatureEvent::number(self.id.clone(), FeatureCode::PositionY, self.y, at),
            FeatureEvent::number(self.id.clone(), FeatureCode::EnergyUsage, self.energy_usage, at),
            FeatureEvent::flag(self.id.clone(), FeatureCode::FastCharge, self.fast_charge, at),
        ];
        events.extend(self.events(at));
        events
    }

    fn step(&mut self, rng: &mut StdRng) {
        if rng.gen_bool(OCCUPANCY_FLIP_PROBABILITY) {
            self.occupied = !self.occupied;
        }
        self.temperature += if rng.gen_bool(0.5) { 1.0 } else { -1.0 };
    }
}

pub fn default_units() -> Vec<MobileUnit> {
    vec![
        MobileUnit {
            id: "R1".into(),
            x: 100.0,
            y: 100.0,
            battery_level: 90.0,
            battery_temp: 22.0,
            charging: false,
        },
        MobileUnit {
            id: "R2".into(),
            x: 300.0,
            y: 200.0,
            battery_level: 60.0,
            battery_temp: 23.0,
            charging: true,
        },
    ]
}

pub fn default_stations() -> Vec<ChargingStation> {
    vec![
        ChargingStation {
            id: "S1".into(),
            x: 50.0,
            y: 50.0,
            temperature: 22.0,
            occupied: false,
            fast_charge: false,
            energy_usage: 100.0,
        },
        ChargingStation {
            id: "S2".into(),
            x: 750.0,
            y: 550.0,
            temperature: 24.0,
            occupied: true,
            fast_charge: true,
            energy_usage: 100.0,
        },
    ]
}

/// Bounded-random-walk event generator.
#[derive(Debug)]
pub struct SyntheticGenerator {
    arena: Arena,
    units: Vec<MobileUnit>,
    stations: Vec<ChargingStation>,
    rng: StdRng,
}

impl SyntheticGenerator {
    /// Build a generator from configuration. Without a configured seed the
    /// RNG is seeded from OS entropy.
    pub fn new(config: &SimulationConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            arena: config.arena,
            units: config.units.clone(),
            stations: config.stations.clone(),
            rng,
        }
    }

    pub fn with_fleet(
        arena: Arena,
        units: Vec<MobileUnit>,
        stations: Vec<ChargingStation>,
        seed: u64,
    ) -> Self {
        Self {
            arena,
            units,
            stations,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn units(&self) -> &[MobileUnit] {
        &self.units
    }

    pub fn stations(&self) -> &[ChargingStation] {
        &self.stations
    }

    /// Announce the full state of every entity.
    pub fn initial_events(&self, at: DateTime<Utc>) -> Vec<FeatureEvent> {
        let mut events: Vec<FeatureEvent> =
            self.units.iter().flat_map(|u| u.events(at)).collect();
        events.extend(self.stations.iter().flat_map(|s| s.announce_events(at)));
        events
    }

    /// Advance every mobile unit one step.
    pub fn tick_units(&mut self, at: DateTime<Utc>) -> Vec<FeatureEvent> {
        let rng = &mut self.rng;
        let arena = &self.arena;
        let mut events = Vec::with_capacity(self.units.len() * 6);
        for unit in &mut self.units {
            unit.step(rng, arena);
            events.extend(unit.events(at));
        }
        events
    }

    /// Advance one uniformly chosen station.
    pub fn tick_stations(&mut self, at: DateTime<Utc>) -> Vec<FeatureEvent> {
        if self.stations.is_empty() {
            return Vec::new();
        }
        let idx = self.rng.gen_range(0..self.stations.len());
        let station = &mut self.stations[idx];
        station.step(&mut self.rng);
        station.events(at)
    }
}
