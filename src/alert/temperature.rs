//! Temperature deviation from the time-of-day baseline.
//!
//! Each of the last N ticks must sit beyond the high (or low) z threshold
//! relative to its own minute-of-day bucket, and must also have moved by at
//! least `delta_min` since the tick before. A sensor stuck at a constant
//! offset therefore never qualifies.

use serde_json::json;

use crate::alert::{Point, StationSeries, TempBaseline};
use crate::config::TemperatureConfig;
use crate::model::{AlertType, NewAlert};

/// Result of evaluating one station.
#[derive(Debug, Clone, PartialEq)]
pub enum TempOutcome {
    /// No valid baseline bucket for the ticks under test; the caller falls
    /// back to the generic delta rule.
    NoBaseline,
    Quiet,
    Fire(NewAlert),
}

/// Baseline-relative view of one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
struct TickResidual {
    mu: f64,
    sigma: f64,
    resid: f64,
    z: f64,
}

fn residuals(
    points: &[Point],
    station_id: &str,
    baseline: &TempBaseline,
    need: usize,
) -> Option<Vec<TickResidual>> {
    if points.len() < need {
        return None;
    }
    points[points.len() - need..]
        .iter()
        .map(|(ts, v)| {
            let entry = baseline.lookup(station_id, *ts)?;
            let resid = v - entry.mu;
            Some(TickResidual {
                mu: entry.mu,
                sigma: entry.sigma,
                resid,
                z: resid / entry.sigma,
            })
        })
        .collect()
}

/// Which unusual-temperature condition holds at the end of `points`, if any.
fn condition(
    points: &[Point],
    station_id: &str,
    baseline: &TempBaseline,
    cfg: &TemperatureConfig,
    delta_min: f64,
) -> Option<AlertType> {
    let need = cfg.sustain_ticks.max(1);
    if points.len() < need + 1 {
        return None;
    }
    let moving = points[points.len() - need - 1..]
        .windows(2)
        .all(|w| (w[1].1 - w[0].1).abs() >= delta_min);
    if !moving {
        return None;
    }

    let ticks = residuals(points, station_id, baseline, need)?;
    if ticks.iter().all(|t| t.z >= cfg.z_high) {
        Some(AlertType::TempHighUnusual)
    } else if ticks.iter().all(|t| t.z <= -cfg.z_low) {
        Some(AlertType::TempLowUnusual)
    } else {
        None
    }
}

pub fn evaluate(
    series: &StationSeries,
    baseline: &TempBaseline,
    cfg: &TemperatureConfig,
    delta_min: f64,
) -> TempOutcome {
    let need = cfg.sustain_ticks.max(1);
    let Some(ticks) = residuals(&series.points, &series.station_id, baseline, need) else {
        return TempOutcome::NoBaseline;
    };
    let Some(ts) = series.last_ts() else {
        return TempOutcome::NoBaseline;
    };

    let points = &series.points;
    let now = condition(points, &series.station_id, baseline, cfg, delta_min);
    let before = points
        .split_last()
        .and_then(|(_, prev)| condition(prev, &series.station_id, baseline, cfg, delta_min));

    let alert_type = match now {
        Some(t) if before != Some(t) => t,
        _ => return TempOutcome::Quiet,
    };

    let Some(last) = ticks.last().copied() else {
        return TempOutcome::Quiet;
    };
    let label = match alert_type {
        AlertType::TempHighUnusual => "hotter",
        _ => "colder",
    };
    TempOutcome::Fire(NewAlert {
        ts,
        station_id: series.station_id.clone(),
        metric: series.metric,
        alert_type,
        severity: last.resid.abs(),
        reason: format!(
            "{} than usual: z_tod={:.2}, resid={:.2}°C",
            label, last.z, last.resid
        ),
        payload: json!({
            "mu_tod": last.mu,
            "sigma_tod": last.sigma,
            "resid": last.resid,
            "z_tod": last.z,
            "sustained_ticks": need,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metric, Reading};
    use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};

    fn sgt() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn today() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 20, 4, 0, 0).unwrap()
    }

    /// Ten days of history at the same five-minute slots, 27 to 29°C: each
    /// bucket has median 28 and sigma 1.4826.
    fn baseline(cfg: &TemperatureConfig) -> TempBaseline {
        let mut history = Vec::new();
        for d in 1..=10 {
            for slot in 0..8 {
                let ts = today() - Duration::days(d) + Duration::minutes(5 * slot);
                let v = 28.0 + [-1.0, 0.0, 1.0][(d as usize) % 3];
                history.push(Reading::new(ts, "S104", Metric::Temperature, v));
            }
        }
        TempBaseline::build(&history, cfg, sgt())
    }

    fn series(values: &[f64]) -> StationSeries {
        StationSeries {
            station_id: "S104".into(),
            metric: Metric::Temperature,
            points: values
                .iter()
                .enumerate()
                .map(|(i, v)| (today() + Duration::minutes(5 * i as i64), *v))
                .collect(),
        }
    }

    fn replay(values: &[f64], cfg: &TemperatureConfig) -> Vec<(usize, AlertType)> {
        let b = baseline(cfg);
        (1..=values.len())
            .filter_map(|n| match evaluate(&series(&values[..n]), &b, cfg, 0.2) {
                TempOutcome::Fire(a) => Some((n - 1, a.alert_type)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_flat_offset_never_fires() {
        let cfg = TemperatureConfig { z_high: 3.0, ..TemperatureConfig::default() };
        // baseline + 6°C is far beyond z_high, but the sensor never moves
        assert!(replay(&[34.0; 5], &cfg).is_empty());
    }

    #[test]
    fn test_rising_warm_spell_fires_high_once() {
        let cfg = TemperatureConfig::default();
        let fired = replay(&[28.0, 28.5, 33.0, 34.0, 35.0, 36.0], &cfg);
        assert_eq!(fired, vec![(3, AlertType::TempHighUnusual)]);
    }

    #[test]
    fn test_falling_cold_spell_fires_low() {
        let cfg = TemperatureConfig::default();
        let fired = replay(&[28.0, 27.0, 23.0, 22.0, 21.0], &cfg);
        assert_eq!(fired, vec![(3, AlertType::TempLowUnusual)]);
    }

    #[test]
    fn test_missing_bucket_reports_no_baseline() {
        let cfg = TemperatureConfig::default();
        let b = baseline(&cfg);
        let mut s = series(&[28.0, 29.0]);
        // shift to an hour with no history
        for p in s.points.iter_mut() {
            p.0 += Duration::hours(6);
        }
        assert_eq!(evaluate(&s, &b, &cfg, 0.2), TempOutcome::NoBaseline);
    }

    #[test]
    fn test_payload_fields() {
        let cfg = TemperatureConfig::default();
        let b = baseline(&cfg);
        let outcome = evaluate(&series(&[28.0, 33.0, 34.0]), &b, &cfg, 0.2);
        let alert = match outcome {
            TempOutcome::Fire(alert) => alert,
            other => panic!("expected an alert, got {other:?}"),
        };
        assert_eq!(alert.payload["mu_tod"], 28.0);
        assert_eq!(alert.payload["resid"], 6.0);
        assert_eq!(alert.severity, 6.0);
        assert_eq!(alert.payload["sustained_ticks"], 2);
    }
}
