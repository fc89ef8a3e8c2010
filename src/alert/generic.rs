//! Generic sustained-delta rule.
//!
//! Rainfall tests the raw per-tick accumulation against the threshold;
//! every other metric tests |Δ| between consecutive ticks, using the
//! shortest arc for wind direction.

use serde_json::json;

use crate::alert::{StationSeries, rising_edge};
use crate::features::circular::angular_difference_deg;
use crate::model::{AlertType, Metric, NewAlert};

fn abs_deltas(metric: Metric, values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| {
            if metric.is_circular() {
                angular_difference_deg(w[1], w[0]).abs()
            } else {
                (w[1] - w[0]).abs()
            }
        })
        .collect()
}

/// Last `need` raw values all at or above the threshold.
fn rain_holds(values: &[f64], threshold: f64, need: usize) -> bool {
    values.len() >= need && values[values.len() - need..].iter().all(|v| *v >= threshold)
}

/// Last `need` tick-to-tick changes all at or above the threshold.
fn delta_holds(metric: Metric, values: &[f64], threshold: f64, need: usize) -> bool {
    if values.len() < need + 1 {
        return false;
    }
    abs_deltas(metric, &values[values.len() - need - 1..])
        .iter()
        .all(|d| *d >= threshold)
}

/// Candidate generic `ALERT` for one station, on the rising edge only.
pub fn evaluate(series: &StationSeries, threshold: f64, need: usize) -> Option<NewAlert> {
    let need = need.max(1);
    let metric = series.metric;
    let values = series.values();
    let ts = series.last_ts()?;

    if metric == Metric::Rainfall {
        if !rising_edge(&values, |v| rain_holds(v, threshold, need)) {
            return None;
        }
        let curr = *values.last()?;
        return Some(NewAlert {
            ts,
            station_id: series.station_id.clone(),
            metric,
            alert_type: AlertType::Alert,
            severity: curr,
            reason: format!(
                "rainfall>=threshold for {} tick(s): {:.2}mm >= {:.2}mm",
                need, curr, threshold
            ),
            payload: json!({ "value": curr, "threshold": threshold, "sustained_ticks": need }),
        });
    }

    if !rising_edge(&values, |v| delta_holds(metric, v, threshold, need)) {
        return None;
    }
    let n = values.len();
    let (prev, curr) = (values[n - 2], values[n - 1]);
    let delta_last = *abs_deltas(metric, &values[n - 2..]).first()?;

    Some(NewAlert {
        ts,
        station_id: series.station_id.clone(),
        metric,
        alert_type: AlertType::Alert,
        severity: delta_last,
        reason: format!("|Δ|>={} for {} tick(s); last Δ={:.2}", threshold, need, delta_last),
        payload: json!({
            "prev": prev,
            "curr": curr,
            "delta_last": delta_last,
            "threshold": threshold,
            "sustained_ticks": need,
        }),
    })
}
