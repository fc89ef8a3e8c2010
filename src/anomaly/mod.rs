/// Per-metric anomaly model pool.
///
/// Every metric owns its own isolation forest so that, say, rainfall's
/// heavy-tailed deltas never distort the temperature model. Until a metric's
/// model has been fit, scores come from a squashed effective z-score.

pub mod isolation_forest;

pub use isolation_forest::IsolationForest;

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::fmt;

use crate::config::{Calibration, ModelConfig};
use crate::features::FeatureRow;
use crate::logging::{self, Component};
use crate::model::Metric;

/// Fixed feature order of the model input vector.
pub const FEATURE_NAMES: [&str; 5] = ["z", "z_robust", "delta", "rolling_vol", "neighbor_gap"];

const MINMAX_EPSILON: f64 = 1e-9;

/// Model input for one row; missing or non-finite values become 0.0.
pub fn feature_vector(row: &FeatureRow) -> Vec<f64> {
    [row.z, row.z_robust, row.delta, row.rolling_vol, row.neighbor_gap]
        .into_iter()
        .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
        .collect()
}

/// tanh(z_eff / 3): bounded in [0, 1), monotonic in |z|.
pub fn cold_start_score(row: &FeatureRow) -> f64 {
    (row.z_eff() / 3.0).tanh()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreMethod {
    IsoForest,
    ZscoreFallback,
}

impl ScoreMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreMethod::IsoForest => "isoforest",
            ScoreMethod::ZscoreFallback => "zscore_fallback",
        }
    }
}

impl fmt::Display for ScoreMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scores for one batch, aligned with the input rows.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchScores {
    pub scores: Vec<f64>,
    pub method: ScoreMethod,
}

#[derive(Debug, Default)]
struct MetricModel {
    forest: Option<IsolationForest>,
    last_fit: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ModelPool {
    config: ModelConfig,
    models: HashMap<Metric, MetricModel>,
}

impl ModelPool {
    pub fn new(config: ModelConfig) -> Self {
        Self {
            config,
            models: HashMap::new(),
        }
    }

    pub fn is_fitted(&self, metric: Metric) -> bool {
        self.models
            .get(&metric)
            .is_some_and(|m| m.forest.is_some())
    }

    pub fn last_fit(&self, metric: Metric) -> Option<DateTime<Utc>> {
        self.models.get(&metric).and_then(|m| m.last_fit)
    }

    /// Drop a metric's model; the next tick starts cold.
    pub fn invalidate(&mut self, metric: Metric) {
        self.models.remove(&metric);
    }

    /// Use an externally trained forest for a metric.
    pub fn install(&mut self, metric: Metric, forest: IsolationForest, now: DateTime<Utc>) {
        let model = self.models.entry(metric).or_default();
        model.forest = Some(forest);
        model.last_fit = Some(now);
    }

    /// Fit when the metric has never been fit or its refit interval elapsed,
    /// and enough scorable rows are available. Returns true if a fit ran.
    pub fn fit_if_needed(&mut self, metric: Metric, training: &[FeatureRow], now: DateTime<Utc>) -> bool {
        let due = match self.last_fit(metric) {
            Some(at) if self.is_fitted(metric) => {
                now - at >= Duration::seconds(self.config.refit_every_seconds)
            }
            _ => true,
        };
        due && self.fit(metric, training, now)
    }

    /// Unconditional refit from the most recent `max_rows` scorable rows.
    fn fit(&mut self, metric: Metric, training: &[FeatureRow], now: DateTime<Utc>) -> bool {
        let mut rows: Vec<&FeatureRow> = training.iter().filter(|r| r.is_scorable()).collect();
        if rows.len() < self.config.min_rows.max(1) {
            return false;
        }
        rows.sort_by_key(|r| r.ts);
        let skip = rows.len().saturating_sub(self.config.max_rows.max(1));
        let matrix: Vec<Vec<f64>> = rows[skip..].iter().map(|r| feature_vector(r)).collect();

        let Some(forest) = IsolationForest::fit(
            &matrix,
            self.config.n_trees,
            self.config.sample_size,
            self.config.seed,
        ) else {
            return false;
        };

        logging::info(
            Component::Model,
            None,
            &format!("Fitted {} model on {} rows", metric, matrix.len()),
        );
        self.install(metric, forest, now);
        true
    }

    /// Score a batch of rows for one metric.
    ///
    /// `training` is only consulted when the fitted model's input width no
    /// longer matches the feature vector, in which case the metric is refit
    /// on the spot. Falls back to the cold-start score when no usable model
    /// exists.
    pub fn score(
        &mut self,
        metric: Metric,
        rows: &[FeatureRow],
        training: &[FeatureRow],
        now: DateTime<Utc>,
    ) -> BatchScores {
        let matrix: Vec<Vec<f64>> = rows.iter().map(feature_vector).collect();

        let width_ok = self
            .models
            .get(&metric)
            .and_then(|m| m.forest.as_ref())
            .map(|f| f.n_features() == FEATURE_NAMES.len());
        if width_ok == Some(false) {
            logging::warn(
                Component::Model,
                None,
                &format!("{} model width mismatch, refitting", metric),
            );
            self.invalidate(metric);
            self.fit(metric, training, now);
        }

        match self.models.get(&metric).and_then(|m| m.forest.as_ref()) {
            Some(forest) if !rows.is_empty() => BatchScores {
                scores: calibrate(forest, &matrix, self.config.calibration),
                method: ScoreMethod::IsoForest,
            },
            _ => BatchScores {
                scores: rows.iter().map(cold_start_score).collect(),
                method: ScoreMethod::ZscoreFallback,
            },
        }
    }
}

/// Map forest output to [0, 1], higher = more anomalous.
///
/// Batch min-max is relative to the rows scored together; a batch with no
/// spread (including a single row) uses the forest's absolute score.
fn calibrate(forest: &IsolationForest, matrix: &[Vec<f64>], calibration: Calibration) -> Vec<f64> {
    let raw = forest.score_samples(matrix);
    let (lo, hi) = raw
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    if calibration == Calibration::Absolute || hi - lo <= MINMAX_EPSILON {
        return raw.iter().map(|v| (-v).clamp(0.0, 1.0)).collect();
    }
    raw.iter()
        .map(|v| (1.0 - (v - lo) / (hi - lo + MINMAX_EPSILON)).clamp(0.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::features::compute_features;
    use crate::model::Reading;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 16, 12, 0, 0).unwrap()
    }

    fn row_with_z(z: f64) -> FeatureRow {
        let mut r = compute_features(
            &[Reading::new(now(), "S1", Metric::Humidity, 70.0)],
            90,
            1,
            &Settings::default().sigma_floor,
        )
        .remove(0);
        r.z = Some(z);
        r.z_robust = Some(z);
        r
    }

    /// Calm humidity history for several stations, with seeded jitter so
    /// no two feature vectors coincide.
    fn training_rows(n_per_station: usize) -> Vec<FeatureRow> {
        let mut rng = StdRng::seed_from_u64(17);
        let mut readings = Vec::new();
        for s in 0..6 {
            for i in 0..n_per_station {
                let ts = now() - Duration::minutes(5 * (n_per_station - i) as i64);
                let v = 70.0 + s as f64 * 0.5 + rng.random_range(-1.0..1.0);
                readings.push(Reading::new(ts, &format!("S{s}"), Metric::Humidity, v));
            }
        }
        compute_features(&readings, 90, 5, &Settings::default().sigma_floor)
    }

    fn small_config() -> ModelConfig {
        ModelConfig {
            min_rows: 50,
            n_trees: 40,
            sample_size: 64,
            ..ModelConfig::default()
        }
    }

    #[test]
    fn test_feature_vector_sanitizes_missing_and_non_finite() {
        let mut r = row_with_z(1.5);
        r.delta = Some(f64::NAN);
        r.neighbor_gap = None;
        r.rolling_vol = Some(0.3);
        assert_eq!(feature_vector(&r), vec![1.5, 1.5, 0.0, 0.3, 0.0]);
    }

    #[test]
    fn test_cold_start_is_monotonic_and_bounded() {
        let mut prev = -1.0;
        for z in [0.0, 0.5, 1.0, 2.0, 4.0, 10.0, 100.0] {
            let s = cold_start_score(&row_with_z(-z));
            assert!(s >= prev, "score decreased at |z|={z}");
            assert!((0.0..=1.0).contains(&s));
            prev = s;
        }
    }

    #[test]
    fn test_unfitted_pool_uses_fallback() {
        let mut pool = ModelPool::new(small_config());
        let rows = vec![row_with_z(0.5), row_with_z(3.0)];
        let out = pool.score(Metric::Humidity, &rows, &[], now());
        assert_eq!(out.method, ScoreMethod::ZscoreFallback);
        assert!(out.scores[1] > out.scores[0]);
    }

    #[test]
    fn test_fit_requires_min_rows() {
        let mut pool = ModelPool::new(ModelConfig { min_rows: 10_000, ..small_config() });
        assert!(!pool.fit_if_needed(Metric::Humidity, &training_rows(40), now()));
        assert!(!pool.is_fitted(Metric::Humidity));
    }

    #[test]
    fn test_refit_only_after_interval() {
        let mut pool = ModelPool::new(small_config());
        let training = training_rows(40);
        assert!(pool.fit_if_needed(Metric::Humidity, &training, now()));
        assert!(!pool.fit_if_needed(Metric::Humidity, &training, now() + Duration::minutes(30)));
        assert!(pool.fit_if_needed(Metric::Humidity, &training, now() + Duration::hours(1)));
        assert!(!pool.is_fitted(Metric::Rainfall), "metrics are independent");
    }

    #[test]
    fn test_fitted_batch_scores_span_unit_interval() {
        let mut pool = ModelPool::new(small_config());
        let training = training_rows(40);
        pool.fit_if_needed(Metric::Humidity, &training, now());

        // the two calmest training rows, then one far outside the training range
        let mut calm: Vec<FeatureRow> = training.iter().filter(|r| r.is_scorable()).cloned().collect();
        calm.sort_by(|a, b| a.z_eff().total_cmp(&b.z_eff()));
        let mut rows = calm[..2].to_vec();
        let mut spike = calm[0].clone();
        spike.z = Some(8.0);
        spike.z_robust = Some(8.0);
        spike.delta = Some(15.0);
        spike.rolling_vol = Some(4.0);
        rows.push(spike);

        let out = pool.score(Metric::Humidity, &rows, &training, now());
        assert_eq!(out.method, ScoreMethod::IsoForest);
        assert!(out.scores.iter().all(|s| (0.0..=1.0).contains(s)));
        assert!((out.scores[2] - 1.0).abs() < 1e-6, "spike scored {}", out.scores[2]);
        assert!(out.scores[0] < out.scores[2] && out.scores[1] < out.scores[2]);
    }

    #[test]
    fn test_width_mismatch_refits_from_training() {
        let mut pool = ModelPool::new(small_config());
        let narrow = IsolationForest::fit(&vec![vec![0.0, 1.0]; 10], 5, 8, 1).unwrap();
        pool.install(Metric::Humidity, narrow, now());

        let training = training_rows(40);
        let out = pool.score(Metric::Humidity, &[row_with_z(1.0)], &training, now());
        assert_eq!(out.method, ScoreMethod::IsoForest);
        assert!(pool.is_fitted(Metric::Humidity));
    }

    #[test]
    fn test_width_mismatch_without_data_falls_back() {
        let mut pool = ModelPool::new(small_config());
        let narrow = IsolationForest::fit(&vec![vec![0.0, 1.0]; 10], 5, 8, 1).unwrap();
        pool.install(Metric::Humidity, narrow, now());

        let out = pool.score(Metric::Humidity, &[row_with_z(1.0)], &[], now());
        assert_eq!(out.method, ScoreMethod::ZscoreFallback);
    }
}
