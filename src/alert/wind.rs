//! Sustained wind-speed rule (knots).
//!
//! VERY_STRONG takes precedence: while the last N ticks all clear the
//! very-strong threshold, the STRONG condition is considered false.

use serde_json::json;

use crate::alert::{StationSeries, rising_edge};
use crate::config::WindConfig;
use crate::model::{AlertType, NewAlert};

fn sustained(values: &[f64], threshold: f64, need: usize) -> bool {
    values.len() >= need && values[values.len() - need..].iter().all(|v| *v >= threshold)
}

pub fn very_strong_holds(values: &[f64], cfg: &WindConfig) -> bool {
    sustained(values, cfg.very_strong_kn, cfg.sustain_ticks.max(1))
}

pub fn strong_holds(values: &[f64], cfg: &WindConfig) -> bool {
    sustained(values, cfg.strong_kn, cfg.sustain_ticks.max(1)) && !very_strong_holds(values, cfg)
}

pub fn evaluate(series: &StationSeries, cfg: &WindConfig) -> Option<NewAlert> {
    let values = series.values();
    let ts = series.last_ts()?;
    let last_kn = *values.last()?;
    let need = cfg.sustain_ticks.max(1);

    let (alert_type, threshold) = if rising_edge(&values, |v| very_strong_holds(v, cfg)) {
        (AlertType::WindVeryStrong, cfg.very_strong_kn)
    } else if rising_edge(&values, |v| strong_holds(v, cfg)) {
        (AlertType::WindStrong, cfg.strong_kn)
    } else {
        return None;
    };

    Some(NewAlert {
        ts,
        station_id: series.station_id.clone(),
        metric: series.metric,
        alert_type,
        severity: last_kn,
        reason: format!(">= {} kn for {} tick(s)", threshold, need),
        payload: json!({ "last_kn": last_kn, "threshold_kn": threshold, "sustained_ticks": need }),
    })
}
