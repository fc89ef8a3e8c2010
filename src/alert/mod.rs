//! Alert rules and their dispatch.
//!
//! Rules are pure functions of a station's recent series and return alert
//! candidates. The `RuleEngine` routes each metric to its rule set and pushes
//! every candidate through the shared cooldown check before appending it to
//! the alert log. The log is the only rule state; nothing is remembered in
//! memory between ticks apart from the temperature baseline cache.

pub mod baseline;
pub mod cooldown;
pub mod generic;
pub mod rain;
pub mod temperature;
pub mod wind;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::config::Settings;
use crate::logging::{self, Component};
use crate::model::{AlertType, Metric, NewAlert, Reading, Result};
use crate::store::RecordStore;

pub use baseline::{BaselineCache, BaselineEntry, TempBaseline};
pub use temperature::TempOutcome;

/// (timestamp, value) sample of one station.
pub type Point = (DateTime<Utc>, f64);

/// Time-ordered samples of one metric for one station.
#[derive(Debug, Clone, PartialEq)]
pub struct StationSeries {
    pub station_id: String,
    pub metric: Metric,
    pub points: Vec<Point>,
}

impl StationSeries {
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.1).collect()
    }

    pub fn last_ts(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|p| p.0)
    }
}

/// Group one metric's readings by station, ordered by time. Duplicate
/// timestamps keep the last value seen; non-finite values are dropped.
pub fn station_series(readings: &[Reading], metric: Metric) -> Vec<StationSeries> {
    let mut grouped: BTreeMap<&str, BTreeMap<DateTime<Utc>, f64>> = BTreeMap::new();
    for r in readings
        .iter()
        .filter(|r| r.metric == metric && r.value.is_finite())
    {
        grouped
            .entry(r.station_id.as_str())
            .or_default()
            .insert(r.ts, r.value);
    }

    grouped
        .into_iter()
        .map(|(sid, points)| StationSeries {
            station_id: sid.to_string(),
            metric,
            points: points.into_iter().collect(),
        })
        .collect()
}

/// True when `holds` is true for the whole series but was not for the
/// series one tick shorter.
pub fn rising_edge<T, F>(items: &[T], holds: F) -> bool
where
    F: Fn(&[T]) -> bool,
{
    match items.split_last() {
        Some((_, previous)) => holds(items) && !holds(previous),
        None => false,
    }
}

/// Cooldown window for an alert type.
pub fn cooldown_minutes(settings: &Settings, alert_type: AlertType) -> i64 {
    match alert_type {
        AlertType::Alert => settings.cooldown.generic_minutes,
        AlertType::RainOnset
        | AlertType::RainIntense
        | AlertType::RainEasing
        | AlertType::RainStop => settings.cooldown.rain_minutes,
        AlertType::WindStrong | AlertType::WindVeryStrong => settings.cooldown.wind_minutes,
        AlertType::TempHighUnusual | AlertType::TempLowUnusual => {
            settings.cooldown.temperature_minutes
        }
    }
}

// ---------------------------------------------------------------------------
// Rule engine
// ---------------------------------------------------------------------------

pub struct RuleEngine {
    settings: Settings,
    baseline: BaselineCache,
}

impl RuleEngine {
    pub fn new(settings: Settings) -> Self {
        let baseline = BaselineCache::new(settings.temperature.clone(), settings.local_offset());
        Self { settings, baseline }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn baseline_cache(&mut self) -> &mut BaselineCache {
        &mut self.baseline
    }

    /// Candidate alerts for one metric's window of readings, before cooldown.
    pub fn candidates(
        &mut self,
        store: &mut dyn RecordStore,
        metric: Metric,
        window: &[Reading],
        now: DateTime<Utc>,
    ) -> Result<Vec<NewAlert>> {
        let series = station_series(window, metric);
        if series.is_empty() {
            return Ok(Vec::new());
        }
        let s = &self.settings;

        let mut out = Vec::new();
        match metric {
            Metric::Rainfall => {
                for station in &series {
                    out.extend(rain::evaluate(station, &s.rain));
                }
            }
            Metric::WindSpeed => {
                out.extend(series.iter().filter_map(|st| wind::evaluate(st, &s.wind)));
            }
            Metric::Temperature => {
                let baseline = self.baseline.ensure(store, now)?;
                for station in &series {
                    let outcome = match baseline {
                        Some(b) => temperature::evaluate(
                            station,
                            b,
                            &s.temperature,
                            s.delta_min.get(metric),
                        ),
                        None => TempOutcome::NoBaseline,
                    };
                    match outcome {
                        TempOutcome::Fire(alert) => out.push(alert),
                        TempOutcome::Quiet => {}
                        TempOutcome::NoBaseline => out.extend(generic::evaluate(
                            station,
                            s.simple_delta_threshold.get(metric),
                            s.simple_sustained_ticks.get(metric),
                        )),
                    }
                }
            }
            Metric::Humidity | Metric::WindDirection => {
                out.extend(series.iter().filter_map(|st| {
                    generic::evaluate(
                        st,
                        s.simple_delta_threshold.get(metric),
                        s.simple_sustained_ticks.get(metric),
                    )
                }));
            }
        }
        Ok(out)
    }

    /// Evaluate one metric and append every candidate that clears cooldown.
    /// Returns the number of alerts written.
    pub fn evaluate(
        &mut self,
        store: &mut dyn RecordStore,
        metric: Metric,
        window: &[Reading],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let candidates = self.candidates(store, metric, window, now)?;
        let mut written = 0;
        for alert in &candidates {
            let minutes = cooldown_minutes(&self.settings, alert.alert_type);
            if cooldown::emit(store, alert, minutes)? {
                written += 1;
            }
        }
        if written > 0 {
            logging::debug(
                Component::Rules,
                None,
                &format!("{}: {} of {} candidate alerts written", metric, written, candidates.len()),
            );
        }
        Ok(written)
    }
}
