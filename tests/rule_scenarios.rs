/// Rule engine scenarios against the in-memory record store
///
/// Each scenario feeds readings one tick at a time, the way the daemon sees
/// them, and evaluates the metric's trailing window after every tick. The
/// alert log in the store is the only state carried between ticks.
///
/// Verifies:
/// 1. Rain events: ONSET, EASING and STOP each fire once per shower, and
///    nothing fires before a station has enough history
/// 2. Wind escalation STRONG -> VERY_STRONG
/// 3. Temperature against a stored time-of-day baseline, and the generic
///    fallback when no baseline exists
/// 4. Cooldown suppression across ticks
///
/// Run with: cargo test --test rule_scenarios

use chrono::{DateTime, Duration, TimeZone, Utc};
use wxguard_service::alert::RuleEngine;
use wxguard_service::config::{CooldownConfig, Settings};
use wxguard_service::model::{AlertType, Metric, Reading};
use wxguard_service::store::{MemoryStore, RecordStore};

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 9, 20, 4, 0, 0).unwrap()
}

fn tick(i: usize) -> DateTime<Utc> {
    start() + Duration::minutes(5 * i as i64)
}

/// Feed `values` for one station tick by tick, evaluating after each.
/// Returns (tick index, alert type) for every alert written.
fn run_ticks(
    store: &mut MemoryStore,
    rules: &mut RuleEngine,
    station: &str,
    metric: Metric,
    values: &[f64],
) -> Vec<(usize, AlertType)> {
    let window = Duration::minutes(rules.settings().rolling_window_minutes);
    let before = store.alerts().len();
    let mut at_tick = Vec::new();

    for (i, v) in values.iter().enumerate() {
        let now = tick(i);
        store
            .write_readings(&[Reading::new(now, station, metric, *v)])
            .unwrap();
        let recent = store.readings_since(metric, now - window).unwrap();
        let written = rules.evaluate(store, metric, &recent, now).unwrap();
        at_tick.extend(std::iter::repeat_n(i, written));
    }

    store.alerts()[before..]
        .iter()
        .zip(at_tick)
        .map(|(a, i)| (i, a.alert_type))
        .collect()
}

// ---------------------------------------------------------------------------
// Rain
// ---------------------------------------------------------------------------

#[test]
fn test_shower_onset_easing_stop() {
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());

    // fifty dry minutes, then a fifteen minute shower
    let mut values = vec![0.0; 10];
    values.extend_from_slice(&[0.3, 0.4, 0.3, 0.0, 0.0, 0.0]);
    let fired = run_ticks(&mut store, &mut rules, "S50", Metric::Rainfall, &values);

    assert_eq!(
        fired,
        vec![
            (10, AlertType::RainOnset),
            (14, AlertType::RainEasing),
            (14, AlertType::RainStop),
        ]
    );
    let onset = &store.alerts()[0];
    assert_eq!(onset.station_id, "S50");
    assert_eq!(onset.ts, tick(10));
    assert_eq!(onset.payload["window_ticks"], 3);
}

#[test]
fn test_station_joining_mid_shower_raises_nothing() {
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());

    let fired = run_ticks(&mut store, &mut rules, "S50", Metric::Rainfall, &[1.0, 1.0, 1.0]);
    assert!(fired.is_empty());

    // still raining once the history is long enough
    let mut store = MemoryStore::new();
    let fired = run_ticks(&mut store, &mut rules, "S50", Metric::Rainfall, &[1.0; 12]);
    assert!(fired.is_empty());
}

#[test]
fn test_dry_day_raises_nothing() {
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());
    let fired = run_ticks(&mut store, &mut rules, "S50", Metric::Rainfall, &[0.0; 18]);
    assert!(fired.is_empty());
}

// ---------------------------------------------------------------------------
// Wind
// ---------------------------------------------------------------------------

#[test]
fn test_wind_escalates_strong_then_very_strong() {
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());

    let fired = run_ticks(
        &mut store,
        &mut rules,
        "S24",
        Metric::WindSpeed,
        &[10.0, 14.0, 15.0, 22.0, 24.0, 24.0],
    );

    assert_eq!(
        fired,
        vec![(2, AlertType::WindStrong), (4, AlertType::WindVeryStrong)]
    );
}

// ---------------------------------------------------------------------------
// Temperature
// ---------------------------------------------------------------------------

/// Ten earlier days at the same local slots, 27 to 29°C.
fn seed_temperature_history(store: &mut MemoryStore, station: &str) {
    let mut rows = Vec::new();
    for d in 1..=10i64 {
        for slot in 0..8 {
            let ts = tick(slot) - Duration::days(d);
            let v = 28.0 + [-1.0, 0.0, 1.0][(d as usize) % 3];
            rows.push(Reading::new(ts, station, Metric::Temperature, v));
        }
    }
    store.write_readings(&rows).unwrap();
}

#[test]
fn test_warm_spell_against_baseline() {
    let mut store = MemoryStore::new();
    seed_temperature_history(&mut store, "S104");
    let mut rules = RuleEngine::new(Settings::default());

    let fired = run_ticks(
        &mut store,
        &mut rules,
        "S104",
        Metric::Temperature,
        &[28.0, 28.5, 33.0, 34.0, 35.0, 36.0],
    );

    assert_eq!(fired, vec![(3, AlertType::TempHighUnusual)]);
    assert!(rules.baseline_cache().current().is_some_and(|b| !b.is_empty()));
}

#[test]
fn test_temperature_without_history_uses_generic_rule() {
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());

    // two consecutive 1°C steps clear the 0.8°C generic threshold
    let fired = run_ticks(
        &mut store,
        &mut rules,
        "S104",
        Metric::Temperature,
        &[28.0, 29.0, 30.0, 30.0],
    );

    assert_eq!(fired, vec![(2, AlertType::Alert)]);
    assert_eq!(store.alerts()[0].payload["delta_last"], 1.0);
}

// ---------------------------------------------------------------------------
// Cooldown
// ---------------------------------------------------------------------------

#[test]
fn test_second_humidity_surge_suppressed_within_cooldown() {
    let humid = [70.0, 76.0, 82.0, 82.0, 88.0, 94.0];

    // default 3 minute generic cooldown: both surges alert
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());
    let fired = run_ticks(&mut store, &mut rules, "S43", Metric::Humidity, &humid);
    assert_eq!(fired, vec![(2, AlertType::Alert), (5, AlertType::Alert)]);

    // 30 minute cooldown: the second surge, 15 minutes later, is dropped
    let settings = Settings {
        cooldown: CooldownConfig {
            generic_minutes: 30,
            ..CooldownConfig::default()
        },
        ..Settings::default()
    };
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(settings);
    let fired = run_ticks(&mut store, &mut rules, "S43", Metric::Humidity, &humid);
    assert_eq!(fired, vec![(2, AlertType::Alert)]);
}

#[test]
fn test_reevaluating_same_tick_writes_nothing() {
    let mut store = MemoryStore::new();
    let mut rules = RuleEngine::new(Settings::default());
    run_ticks(&mut store, &mut rules, "S24", Metric::WindSpeed, &[5.0, 25.0, 26.0]);
    assert_eq!(store.alerts().len(), 1);

    let now = tick(2);
    let recent = store.readings_since(Metric::WindSpeed, now - Duration::minutes(90)).unwrap();
    let written = rules.evaluate(&mut store, Metric::WindSpeed, &recent, now).unwrap();
    assert_eq!(written, 0);
    assert_eq!(store.alerts().len(), 1);
}
