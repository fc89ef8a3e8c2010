//! Rain event rules: ONSET, INTENSE, EASING and STOP.
//!
//! All four look at per-tick accumulations (mm per 5 minutes). The "recent"
//! window is the last `trend_window` ticks; the "previous" window is the
//! same number of ticks immediately before it. Each sub-rule is edge
//! triggered against the series one tick shorter.
//!
//! A station raises nothing until it has `min_history` ticks. ONSET and
//! EASING additionally need a full previous window, so a station that was
//! already raining when its history starts is never mistaken for an onset.

use serde_json::json;

use crate::alert::{StationSeries, rising_edge};
use crate::config::RainConfig;
use crate::model::{AlertType, NewAlert};

/// Accumulations over the recent and previous windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RainWindows {
    pub recent_mm: f64,
    pub previous_mm: f64,
    pub tick_mm: f64,
}

impl RainWindows {
    /// `None` until the series fills one recent window.
    pub fn from_values(values: &[f64], window: usize) -> Option<Self> {
        let w = window.max(1);
        let n = values.len();
        if n < w {
            return None;
        }
        let recent = &values[n - w..];
        let previous = &values[(n - w).saturating_sub(w)..n - w];
        Some(Self {
            recent_mm: recent.iter().sum(),
            previous_mm: previous.iter().sum(),
            tick_mm: values[n - 1],
        })
    }
}

/// Ticks a station needs before any rain alert can be raised.
pub fn min_history(cfg: &RainConfig) -> usize {
    let w = cfg.trend_window.max(1);
    let stop_span = cfg.stop_quiet_intervals.max(1) + cfg.stop_lookback_intervals;
    w.max(cfg.onset_k.max(1)).max(stop_span).max(2 * w) + 2
}

fn has_full_previous(values: &[f64], cfg: &RainConfig) -> bool {
    values.len() >= 2 * cfg.trend_window.max(1)
}

pub fn onset_holds(values: &[f64], cfg: &RainConfig) -> bool {
    if !has_full_previous(values, cfg) {
        return false;
    }
    let Some(w) = RainWindows::from_values(values, cfg.trend_window) else {
        return false;
    };
    let k = cfg.onset_k.max(1).min(values.len());
    let tick_ok = values[values.len() - k..].iter().any(|v| *v >= cfg.onset_tick_mm);
    let sum_ok = w.recent_mm >= cfg.onset_sum_mm;
    (tick_ok || sum_ok) && w.previous_mm <= cfg.calm_mm
}

pub fn intense_holds(values: &[f64], cfg: &RainConfig) -> bool {
    RainWindows::from_values(values, cfg.trend_window)
        .is_some_and(|w| w.tick_mm >= cfg.intense_tick_mm || w.recent_mm >= cfg.intense_sum_mm)
}

pub fn easing_holds(values: &[f64], cfg: &RainConfig) -> bool {
    if !has_full_previous(values, cfg) {
        return false;
    }
    RainWindows::from_values(values, cfg.trend_window).is_some_and(|w| {
        w.previous_mm > cfg.calm_mm
            && w.recent_mm <= w.previous_mm * (1.0 - cfg.easing_drop_fraction)
    })
}

/// Last `q` ticks calm, with a wet tick somewhere in the bounded lookback
/// just before that quiet streak.
pub fn stop_holds(values: &[f64], cfg: &RainConfig) -> bool {
    let q = cfg.stop_quiet_intervals.max(1);
    let n = values.len();
    if n <= q {
        return false;
    }
    let quiet = values[n - q..].iter().all(|v| *v <= cfg.calm_mm);
    let lookback = &values[(n - q).saturating_sub(cfg.stop_lookback_intervals)..n - q];
    quiet && lookback.iter().any(|v| *v > cfg.calm_mm)
}

/// Candidate rain alerts for one station's rainfall series.
pub fn evaluate(series: &StationSeries, cfg: &RainConfig) -> Vec<NewAlert> {
    let values = series.values();
    if values.len() < min_history(cfg) {
        return Vec::new();
    }
    let (Some(ts), Some(w)) = (series.last_ts(), RainWindows::from_values(&values, cfg.trend_window))
    else {
        return Vec::new();
    };

    let alert = |alert_type: AlertType, severity: f64, reason: String, payload: serde_json::Value| {
        NewAlert {
            ts,
            station_id: series.station_id.clone(),
            metric: series.metric,
            alert_type,
            severity,
            reason,
            payload,
        }
    };

    let mut out = Vec::new();

    if rising_edge(&values, |v| onset_holds(v, cfg)) {
        out.push(alert(
            AlertType::RainOnset,
            w.recent_mm,
            format!("onset: recent={:.2}mm; previous={:.2}mm", w.recent_mm, w.previous_mm),
            json!({ "recent_mm": w.recent_mm, "previous_mm": w.previous_mm, "window_ticks": cfg.trend_window }),
        ));
    }

    if rising_edge(&values, |v| intense_holds(v, cfg)) {
        out.push(alert(
            AlertType::RainIntense,
            w.tick_mm.max(w.recent_mm),
            format!("intense: tick={:.2}mm; recent={:.2}mm", w.tick_mm, w.recent_mm),
            json!({ "tick_mm": w.tick_mm, "recent_mm": w.recent_mm, "window_ticks": cfg.trend_window }),
        ));
    }

    if rising_edge(&values, |v| easing_holds(v, cfg)) {
        let drop_fraction = if w.previous_mm > 0.0 {
            1.0 - w.recent_mm / w.previous_mm
        } else {
            0.0
        };
        out.push(alert(
            AlertType::RainEasing,
            drop_fraction,
            format!(
                "easing: recent {:.2}mm <= {:.0}% of previous {:.2}mm",
                w.recent_mm,
                100.0 * (1.0 - cfg.easing_drop_fraction),
                w.previous_mm
            ),
            json!({
                "recent_mm": w.recent_mm,
                "previous_mm": w.previous_mm,
                "drop_fraction": drop_fraction,
            }),
        ));
    }

    if rising_edge(&values, |v| stop_holds(v, cfg)) {
        out.push(alert(
            AlertType::RainStop,
            0.0,
            format!(
                "stopped: last {} tick(s) <= {}mm",
                cfg.stop_quiet_intervals, cfg.calm_mm
            ),
            json!({ "quiet_ticks": cfg.stop_quiet_intervals, "calm_mm": cfg.calm_mm }),
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use crate::model::Metric;

    fn series(values: &[f64]) -> StationSeries {
        let t0: DateTime<Utc> = Utc.with_ymd_and_hms(2025, 9, 16, 6, 0, 0).unwrap();
        StationSeries {
            station_id: "S50".into(),
            metric: Metric::Rainfall,
            points: values
                .iter()
                .enumerate()
                .map(|(i, v)| (t0 + Duration::minutes(5 * i as i64), *v))
                .collect(),
        }
    }

    /// (tick index, type) of every candidate when ticks arrive one at a time.
    fn replay(values: &[f64], cfg: &RainConfig) -> Vec<(usize, AlertType)> {
        (1..=values.len())
            .flat_map(|n| {
                evaluate(&series(&values[..n]), cfg)
                    .into_iter()
                    .map(move |a| (n - 1, a.alert_type))
            })
            .collect()
    }

    fn scenario_config() -> RainConfig {
        RainConfig {
            onset_k: 1,
            onset_tick_mm: 0.2,
            calm_mm: 0.05,
            stop_quiet_intervals: 2,
            ..RainConfig::default()
        }
    }

    /// Ten dry ticks followed by `tail`.
    fn after_dry_spell(tail: &[f64]) -> Vec<f64> {
        let mut values = vec![0.0; 10];
        values.extend_from_slice(tail);
        values
    }

    #[test]
    fn test_shower_gives_one_onset_and_one_stop() {
        let values = after_dry_spell(&[0.3, 0.4, 0.3, 0.0, 0.0, 0.0]);
        let fired = replay(&values, &scenario_config());
        let onsets: Vec<_> = fired.iter().filter(|f| f.1 == AlertType::RainOnset).collect();
        let stops: Vec<_> = fired.iter().filter(|f| f.1 == AlertType::RainStop).collect();
        assert_eq!(onsets, vec![&(10, AlertType::RainOnset)]);
        assert_eq!(stops, vec![&(14, AlertType::RainStop)]);
        assert!(!fired.iter().any(|f| f.1 == AlertType::RainIntense));
    }

    #[test]
    fn test_dry_station_never_stops() {
        let fired = replay(&[0.0; 12], &scenario_config());
        assert!(fired.is_empty());
    }

    #[test]
    fn test_intense_fires_once_while_heavy() {
        let cfg = RainConfig::default();
        let fired = replay(&after_dry_spell(&[2.5, 3.0, 2.8, 0.4]), &cfg);
        let intense: Vec<usize> = fired
            .iter()
            .filter(|f| f.1 == AlertType::RainIntense)
            .map(|f| f.0)
            .collect();
        assert_eq!(intense, vec![10]);
    }

    #[test]
    fn test_min_history_follows_longest_lookback() {
        assert_eq!(min_history(&RainConfig::default()), 10);
        let wide = RainConfig {
            trend_window: 6,
            ..RainConfig::default()
        };
        assert_eq!(min_history(&wide), 14);
    }

    #[test]
    fn test_rain_already_falling_when_history_starts_is_not_an_onset() {
        let cfg = RainConfig::default();
        assert!(evaluate(&series(&[1.0, 1.0, 1.0]), &cfg).is_empty());
        assert!(!onset_holds(&[1.0, 1.0, 1.0], &cfg));
        assert!(!onset_holds(&[0.0, 1.0, 1.0, 1.0], &cfg), "partial previous window");

        // steady rain from the first tick stays silent once history fills
        assert!(replay(&[1.0; 14], &cfg).is_empty());
    }

    #[test]
    fn test_easing_requires_wet_previous_window() {
        let cfg = RainConfig::default();
        // previous window 3.0mm, recent 0.9mm: a 70% drop
        assert!(easing_holds(&[1.0, 1.0, 1.0, 0.3, 0.3, 0.3], &cfg));
        // previous window calm
        assert!(!easing_holds(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0], &cfg));
    }

    #[test]
    fn test_onset_blocked_after_wet_previous_window() {
        let cfg = scenario_config();
        assert!(!onset_holds(&[0.5, 0.5, 0.5, 0.3, 0.3, 0.3], &cfg));
        assert!(onset_holds(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.3], &cfg));
        assert!(!easing_holds(&[1.0, 0.3, 0.3, 0.3], &RainConfig::default()));
    }

    #[test]
    fn test_short_series_is_ignored() {
        assert!(evaluate(&series(&[0.5, 0.5]), &RainConfig::default()).is_empty());
    }
}
