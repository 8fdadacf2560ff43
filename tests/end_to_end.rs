//! End-to-end tests over the public engine API

use chrono::{DateTime, Duration, TimeZone, Utc};
use fleet_telemetry::config::Config;
use fleet_telemetry::core::Granularity;
use fleet_telemetry::quality::create_shared_log;
use fleet_telemetry::telemetry::{
    Arena, DriverConfig, SimulationDriver, SyntheticGenerator,
};
use fleet_telemetry::{Engine, FeatureCode, RawFeatureEvent};

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

fn raw(secs: i64, entity: &str, code: &str, value: &str) -> RawFeatureEvent {
    RawFeatureEvent {
        entity_id: entity.to_string(),
        feature_code: code.to_string(),
        raw_value: value.to_string(),
        timestamp: at(secs),
    }
}

fn engine_with_30s_buckets() -> Engine {
    let mut config = Config::default();
    config.aggregation.granularity = Granularity::Seconds(30);
    Engine::new(&config, create_shared_log()).unwrap()
}

/// Two units and two stations over one minute.
fn minute_script() -> Vec<RawFeatureEvent> {
    vec![
        raw(0, "R1", "position_x", "100"),
        raw(0, "R1", "position_y", "100"),
        raw(0, "R1", "battery_level", "90"),
        raw(0, "R1", "battery_temp", "22"),
        raw(0, "R1", "charge_state", "false"),
        raw(0, "R1", "operational_state", "true"),
        raw(0, "R2", "battery_level", "60"),
        raw(0, "R2", "charge_state", "true"),
        raw(0, "R2", "operational_state", "false"),
        raw(0, "S1", "station_temp", "22"),
        raw(0, "S1", "station_occupied", "false"),
        raw(0, "S2", "station_temp", "24"),
        raw(0, "S2", "station_occupied", "1"),
        raw(10, "R1", "battery_level", "88"),
        raw(15, "R2", "charge_state", "false"),
        raw(15, "R2", "operational_state", "true"),
        raw(20, "R1", "battery_level", "86"),
        raw(20, "R1", "charge_state", "true"),
        raw(20, "R1", "operational_state", "false"),
        raw(30, "R1", "battery_level", "84"),
        raw(30, "R1", "battery_temp", "24"),
        raw(30, "R2", "battery_level", "58"),
        raw(40, "R1", "charge_state", "false"),
        raw(40, "R1", "operational_state", "true"),
        raw(45, "R2", "battery_level", "56"),
        raw(45, "S1", "station_occupied", "true"),
        raw(45, "S1", "station_temp", "23"),
        raw(50, "R2", "charge_state", "true"),
        raw(50, "R2", "operational_state", "false"),
        raw(59, "R1", "battery_level", "80"),
        raw(59, "R1", "operational_state", "true"),
        raw(59, "R1", "position_x", "140"),
        raw(59, "R2", "humidity", "40"),
        raw(59, "R2", "battery_temp", "n/a"),
    ]
}

#[test]
fn test_scripted_minute() {
    let engine = engine_with_30s_buckets();
    let mut script = minute_script();
    // Arrival order is not timestamp order
    script.reverse();

    let ingested = engine.ingest_raw(&script);
    assert_eq!(ingested.skipped, 1);
    assert_eq!(ingested.malformed, 1);
    assert_eq!(ingested.stale, 0);
    assert_eq!(ingested.applied, script.len() - 1);

    // Final snapshot
    let snapshot = engine.snapshot();
    assert_eq!(snapshot.len(), 4);
    let r1 = snapshot.get("R1").unwrap();
    assert_eq!(r1.number(FeatureCode::BatteryLevel), Some(80.0));
    assert_eq!(r1.number(FeatureCode::PositionX), Some(140.0));
    assert_eq!(r1.number(FeatureCode::PositionY), Some(100.0));
    assert_eq!(r1.flag(FeatureCode::ChargeState), Some(false));
    assert_eq!(r1.flag(FeatureCode::OperationalState), Some(true));
    let r2 = snapshot.get("R2").unwrap();
    assert_eq!(r2.number(FeatureCode::BatteryLevel), Some(56.0));
    assert_eq!(r2.number(FeatureCode::BatteryTemp), Some(0.0));
    assert_eq!(r2.flag(FeatureCode::ChargeState), Some(true));
    let s1 = snapshot.get("S1").unwrap();
    assert_eq!(s1.flag(FeatureCode::StationOccupied), Some(true));
    assert_eq!(s1.number(FeatureCode::StationTemp), Some(23.0));

    let summary = engine.summary();
    assert_eq!(summary.units, 2);
    assert_eq!(summary.units_charging, 1);
    assert_eq!(summary.mean_battery, Some(68.0));
    assert_eq!(summary.stations, 2);
    assert_eq!(summary.stations_occupied, 2);

    // R1: on 0..20, then on from 40 with the last event at 59
    // R2: on 15..50
    let uptime = engine.uptime(at(60));
    assert_eq!(uptime.len(), 2);
    assert_eq!(uptime[0].entity_id.as_str(), "R1");
    assert_eq!(uptime[0].total, Duration::seconds(39));
    assert_eq!(uptime[1].entity_id.as_str(), "R2");
    assert_eq!(uptime[1].total, Duration::seconds(35));

    // 08:00:00 bucket: 90, 60, 88, 86; 08:00:30 bucket: 84, 58, 56, 80
    let series = engine.series(FeatureCode::BatteryLevel);
    let points = series.points();
    assert_eq!(points.len(), 2);
    assert_eq!(points[0].label, "08:00:00");
    assert_eq!(points[0].mean_value, 81.0);
    assert_eq!(points[1].label, "08:00:30");
    assert_eq!(points[1].mean_value, 69.5);

    let temps = engine.temperatures(at(0), at(60));
    let r1_battery = temps
        .iter()
        .find(|t| t.entity_id.as_str() == "R1" && t.feature == FeatureCode::BatteryTemp)
        .unwrap();
    assert_eq!(r1_battery.mean, 23.0);
    let s1_station = temps
        .iter()
        .find(|t| t.entity_id.as_str() == "S1")
        .unwrap();
    assert_eq!(s1_station.mean, 22.5);

    let stats = engine.quality().stats();
    assert_eq!(stats.unknown_features, 1);
    assert_eq!(stats.malformed_values, 1);
}

#[test]
fn test_late_event_is_stale() {
    let engine = engine_with_30s_buckets();
    engine.ingest_raw(&minute_script());

    let late = engine.ingest_raw(&[raw(5, "R1", "battery_level", "99")]);
    assert_eq!(late.stale, 1);
    assert_eq!(
        engine
            .snapshot()
            .get("R1")
            .unwrap()
            .number(FeatureCode::BatteryLevel),
        Some(80.0)
    );
    assert_eq!(engine.quality().stats().events_stale, 1);
}

#[test]
fn test_report_matches_queries() {
    let engine = engine_with_30s_buckets();
    engine.ingest_raw(&minute_script());

    let report = engine.report(at(60));
    assert_eq!(report.snapshot, engine.snapshot());
    assert_eq!(report.summary, engine.summary());
    assert_eq!(report.uptime, engine.uptime(at(60)));
    assert_eq!(report.battery_series, engine.series(FeatureCode::BatteryLevel).points());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["uptime"][0]["total_operational_secs"], 39.0);
    assert_eq!(json["snapshot"]["entities"]["R1"]["features"]["battery_level"]["value"], 80.0);
}

#[test]
fn test_generated_minute_stays_in_range() {
    let mut generator = SyntheticGenerator::with_fleet(
        Arena::default(),
        fleet_telemetry::telemetry::generator::default_units(),
        fleet_telemetry::telemetry::generator::default_stations(),
        42,
    );
    let engine = Engine::with_defaults().unwrap();

    engine.ingest(&generator.initial_events(at(0)));
    for second in 1..=60 {
        engine.ingest(&generator.tick_units(at(second)));
        if second % 5 == 0 {
            engine.ingest(&generator.tick_stations(at(second)));
        }

        for entity in engine.snapshot().iter().filter(|e| e.is_mobile_unit()) {
            let x = entity.number(FeatureCode::PositionX).unwrap();
            let y = entity.number(FeatureCode::PositionY).unwrap();
            let battery = entity.number(FeatureCode::BatteryLevel).unwrap();
            let temp = entity.number(FeatureCode::BatteryTemp).unwrap();
            assert!((0.0..=800.0).contains(&x));
            assert!((0.0..=600.0).contains(&y));
            assert!((0.0..=100.0).contains(&battery));
            assert!((20.0..=30.0).contains(&temp));
        }
    }

    let summary = engine.summary();
    assert_eq!(summary.units, 2);
    assert_eq!(summary.stations, 2);
    assert!(engine.series(FeatureCode::BatteryLevel).len() <= 2);
    assert!(engine
        .uptime(at(60))
        .iter()
        .all(|u| u.total <= Duration::seconds(60)));
}

#[test]
fn test_driver_feeds_engine() {
    let generator = SyntheticGenerator::with_fleet(
        Arena::default(),
        fleet_telemetry::telemetry::generator::default_units(),
        fleet_telemetry::telemetry::generator::default_stations(),
        7,
    );
    let mut driver = SimulationDriver::new(
        generator,
        DriverConfig {
            fast_tick: std::time::Duration::from_millis(10),
            slow_tick: std::time::Duration::from_millis(30),
            queue_capacity: 256,
        },
    );
    let engine = Engine::with_defaults().unwrap();

    driver.start().unwrap();
    let deadline = std::time::Instant::now() + std::time::Duration::from_millis(200);
    while std::time::Instant::now() < deadline {
        if let Ok(batch) = driver
            .receiver()
            .recv_timeout(std::time::Duration::from_millis(50))
        {
            engine.ingest_batch(&batch);
        }
    }
    driver.stop().unwrap();

    assert_eq!(engine.snapshot().len(), 4);
    assert!(engine.quality().stats().ticks_emitted >= 2);
    assert_eq!(engine.quality().stats().events_stale, 0);
}
