/// Rolling per-station, per-metric features over a trailing time window.
///
/// Windows are time-based: the window for a row at `ts` holds every row of
/// the same (metric, station) with timestamp in `(ts - W, ts]`. Statistics
/// stay `None` until the window holds `min_samples` rows.

use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

use crate::config::PerMetric;
use crate::features::circular::{Resultant, angular_difference_deg};
use crate::model::{Metric, Reading};

/// MAD → σ under normality.
pub const MAD_SCALE: f64 = 1.4826;

/// One derived row, keyed by (metric, station_id, ts).
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub ts: DateTime<Utc>,
    pub station_id: String,
    pub metric: Metric,
    pub value: f64,
    /// Rolling mean (circular mean for wind direction).
    pub mu: Option<f64>,
    /// Rolling median; `None` for circular metrics.
    pub median: Option<f64>,
    /// Floored population std (circular std for wind direction).
    pub sigma: Option<f64>,
    /// Floored 1.4826·MAD; equals `sigma` for circular metrics.
    pub sigma_robust: Option<f64>,
    pub z: Option<f64>,
    pub z_robust: Option<f64>,
    /// Tick-to-tick change (shortest arc for wind direction).
    pub delta: Option<f64>,
    /// Rolling mean of |delta|.
    pub rolling_vol: Option<f64>,
    /// Deviation from the neighbor consensus; filled on the latest snapshot.
    pub neighbor_gap: Option<f64>,
}

impl FeatureRow {
    fn bare(r: &Reading) -> Self {
        Self {
            ts: r.ts,
            station_id: r.station_id.clone(),
            metric: r.metric,
            value: r.value,
            mu: None,
            median: None,
            sigma: None,
            sigma_robust: None,
            z: None,
            z_robust: None,
            delta: None,
            rolling_vol: None,
            neighbor_gap: None,
        }
    }

    /// max(|z|, |z_robust|), 0.0 when neither is known.
    pub fn z_eff(&self) -> f64 {
        let z = self.z.map(f64::abs).unwrap_or(0.0);
        let zr = self.z_robust.map(f64::abs).unwrap_or(0.0);
        z.max(zr)
    }

    /// True once the row carries anomaly statistics.
    pub fn is_scorable(&self) -> bool {
        self.z.is_some()
    }
}

/// Non-finite results become `None`, never ±inf.
pub fn finite(x: f64) -> Option<f64> {
    if x.is_finite() { Some(x) } else { None }
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    let m = if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    };
    Some(m)
}

/// Median of a slice without disturbing it.
pub fn median_of(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    median(&mut v)
}

/// Compute rolling features for a batch of readings of any mix of metrics
/// and stations. Output is ordered by (metric, station_id, ts).
pub fn compute_features(
    readings: &[Reading],
    window_minutes: i64,
    min_samples: usize,
    sigma_floor: &PerMetric<f64>,
) -> Vec<FeatureRow> {
    let window = Duration::minutes(window_minutes.max(1));
    let min_samples = min_samples.max(1);

    // Partition; later duplicates of a (ts) key supersede earlier ones.
    let mut groups: BTreeMap<(Metric, &str), BTreeMap<DateTime<Utc>, &Reading>> = BTreeMap::new();
    for r in readings.iter().filter(|r| r.value.is_finite()) {
        groups
            .entry((r.metric, r.station_id.as_str()))
            .or_default()
            .insert(r.ts, r);
    }

    let mut out = Vec::with_capacity(readings.len());
    for ((metric, _), series) in groups {
        let series: Vec<&Reading> = series.into_values().collect();
        let floor = sigma_floor.get(metric);
        if metric.is_circular() {
            out.extend(circular_group(&series, window, min_samples, floor));
        } else {
            out.extend(linear_group(&series, window, min_samples, floor));
        }
    }
    out
}

/// Start index of the window ending at `i` (inclusive), given a sorted series.
fn window_start(series: &[&Reading], start: usize, i: usize, window: Duration) -> usize {
    let lower = series[i].ts - window;
    let mut s = start;
    while s < i && series[s].ts <= lower {
        s += 1;
    }
    s
}

fn rolling_vol(deltas: &[Option<f64>], min_samples: usize) -> Option<f64> {
    let abs: Vec<f64> = deltas.iter().flatten().map(|d| d.abs()).collect();
    if abs.len() < min_samples {
        return None;
    }
    finite(abs.iter().sum::<f64>() / abs.len() as f64)
}

fn linear_group(
    series: &[&Reading],
    window: Duration,
    min_samples: usize,
    floor: f64,
) -> Vec<FeatureRow> {
    let mut rows = Vec::with_capacity(series.len());
    let mut deltas: Vec<Option<f64>> = Vec::with_capacity(series.len());
    let mut start = 0;

    for i in 0..series.len() {
        start = window_start(series, start, i, window);
        let v = series[i].value;
        let mut row = FeatureRow::bare(series[i]);

        let delta = if i > 0 { finite(v - series[i - 1].value) } else { None };
        deltas.push(delta);
        row.delta = delta;

        let win: Vec<f64> = series[start..=i].iter().map(|r| r.value).collect();
        if win.len() >= min_samples {
            let n = win.len() as f64;
            let mean = win.iter().sum::<f64>() / n;
            let var = win.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
            let sigma = var.sqrt().max(floor);

            let med = median_of(&win);
            let sigma_robust = med.and_then(|m| {
                let devs: Vec<f64> = win.iter().map(|x| (x - m).abs()).collect();
                median_of(&devs).map(|mad| (MAD_SCALE * mad).max(floor))
            });

            row.mu = finite(mean);
            row.median = med;
            row.sigma = finite(sigma);
            row.sigma_robust = sigma_robust.and_then(finite);
            row.z = row.mu.zip(row.sigma).and_then(|(m, s)| finite((v - m) / s));
            row.z_robust = row
                .median
                .zip(row.sigma_robust)
                .and_then(|(m, s)| finite((v - m) / s));
            row.rolling_vol = rolling_vol(&deltas[start..=i], min_samples);
        }
        rows.push(row);
    }
    rows
}

fn circular_group(
    series: &[&Reading],
    window: Duration,
    min_samples: usize,
    floor: f64,
) -> Vec<FeatureRow> {
    let mut rows = Vec::with_capacity(series.len());
    let mut deltas: Vec<Option<f64>> = Vec::with_capacity(series.len());
    let mut start = 0;

    for i in 0..series.len() {
        start = window_start(series, start, i, window);
        let v = series[i].value;
        let mut row = FeatureRow::bare(series[i]);

        let delta = if i > 0 {
            finite(angular_difference_deg(v, series[i - 1].value))
        } else {
            None
        };
        deltas.push(delta);
        row.delta = delta;

        let count = i + 1 - start;
        if count >= min_samples {
            if let Some(res) = Resultant::from_angles(series[start..=i].iter().map(|r| r.value)) {
                let mu = res.mean_deg();
                let sigma = res.circular_std_deg().max(floor);
                let z = finite(angular_difference_deg(v, mu) / sigma);

                row.mu = finite(mu);
                row.sigma = finite(sigma);
                row.sigma_robust = row.sigma;
                row.z = z;
                row.z_robust = z;
                row.rolling_vol = rolling_vol(&deltas[start..=i], min_samples);
            }
        }
        rows.push(row);
    }
    rows
}

/// Latest row per (metric, station), ordered by (metric, station).
pub fn latest_per_station(rows: &[FeatureRow]) -> Vec<FeatureRow> {
    let mut latest: BTreeMap<(Metric, &str), &FeatureRow> = BTreeMap::new();
    for row in rows {
        let key = (row.metric, row.station_id.as_str());
        match latest.get(&key) {
            Some(prev) if prev.ts >= row.ts => {}
            _ => {
                latest.insert(key, row);
            }
        }
    }
    latest.into_values().cloned().collect()
}
