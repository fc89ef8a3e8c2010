/// Tick orchestrator.
///
/// One tick pulls a bounded slice of recent readings for every metric,
/// derives rolling features, attaches the neighbor gap on the latest
/// snapshot, scores it with the per-metric model pool, persists the scores
/// and hands the metric's window to the rule engine. Ticks never overlap.

use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::alert::RuleEngine;
use crate::anomaly::ModelPool;
use crate::config::Settings;
use crate::features::{FeatureRow, attach_neighbor_gap, compute_features, latest_per_station};
use crate::logging::{self, Component};
use crate::model::{Metric, Reading, Result, Score};
use crate::stations::{NeighborMap, SpatialIndex};
use crate::store::RecordStore;

/// Counters for one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub readings: usize,
    pub stations: usize,
    pub metrics: usize,
    pub scores: usize,
    pub alerts: usize,
}

pub struct Engine {
    settings: Settings,
    models: ModelPool,
    rules: RuleEngine,
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self {
            models: ModelPool::new(settings.model.clone()),
            rules: RuleEngine::new(settings.clone()),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn models(&self) -> &ModelPool {
        &self.models
    }

    pub fn models_mut(&mut self) -> &mut ModelPool {
        &mut self.models
    }

    pub fn rules_mut(&mut self) -> &mut RuleEngine {
        &mut self.rules
    }

    /// Rows to pull per metric: enough samples to fill one rolling window for
    /// every indexed station, plus a small edge buffer.
    pub fn row_budget(&self, index: &SpatialIndex) -> usize {
        let cadence = self.settings.cadence_minutes.max(1);
        let per_station = (self.settings.rolling_window_minutes / cadence + 4).max(6) as usize;
        index.len().max(1) * per_station
    }

    pub fn process_tick(
        &mut self,
        store: &mut dyn RecordStore,
        index: &SpatialIndex,
        now: DateTime<Utc>,
    ) -> Result<TickReport> {
        let budget = self.row_budget(index);

        let mut by_metric: BTreeMap<Metric, Vec<Reading>> = BTreeMap::new();
        for metric in Metric::ALL {
            let rows = store.latest_readings(metric, None, budget)?;
            if !rows.is_empty() {
                by_metric.insert(metric, rows);
            }
        }
        if by_metric.is_empty() {
            logging::debug(Component::Engine, None, "No readings, nothing to score");
            return Ok(TickReport::default());
        }

        let all: Vec<Reading> = by_metric.values().flatten().cloned().collect();
        let features = compute_features(
            &all,
            self.settings.rolling_window_minutes,
            self.settings.min_samples,
            &self.settings.sigma_floor,
        );
        logging::debug(
            Component::Features,
            None,
            &format!(
                "{} feature row(s) from {} reading(s), {} scorable",
                features.len(),
                all.len(),
                features.iter().filter(|r| r.is_scorable()).count()
            ),
        );

        let station_ids: BTreeSet<&str> = features.iter().map(|r| r.station_id.as_str()).collect();
        let neighbors = index.neighbor_map(station_ids.iter().copied(), self.settings.neighbor_k);
        let latest = latest_per_station(&features);

        let mut report = TickReport {
            readings: all.len(),
            stations: station_ids.len(),
            ..TickReport::default()
        };

        for (metric, window) in &by_metric {
            let metric = *metric;
            let training: Vec<FeatureRow> =
                features.iter().filter(|r| r.metric == metric).cloned().collect();
            let mut snapshot: Vec<FeatureRow> =
                latest.iter().filter(|r| r.metric == metric).cloned().collect();
            attach_neighbor_gap(&mut snapshot, &neighbors);

            let scores = self.score_snapshot(metric, &snapshot, &training, &neighbors, now);
            if !scores.is_empty() {
                store.write_scores(&scores)?;
                report.scores += scores.len();
                report.metrics += 1;
            }

            report.alerts += self.rules.evaluate(store, metric, window, now)?;
        }

        logging::log_tick_summary(report.stations, report.metrics, report.alerts);
        Ok(report)
    }

    /// Fit if due, score the scorable snapshot rows and build score records
    /// with neighbor-coherence diagnostics.
    fn score_snapshot(
        &mut self,
        metric: Metric,
        snapshot: &[FeatureRow],
        training: &[FeatureRow],
        neighbors: &NeighborMap,
        now: DateTime<Utc>,
    ) -> Vec<Score> {
        let scorable: Vec<FeatureRow> = snapshot.iter().filter(|r| r.is_scorable()).cloned().collect();
        if scorable.is_empty() {
            return Vec::new();
        }

        self.models.fit_if_needed(metric, training, now);
        let batch = self.models.score(metric, &scorable, training, now);

        let by_station: HashMap<&str, (f64, f64)> = scorable
            .iter()
            .zip(&batch.scores)
            .map(|(r, s)| (r.station_id.as_str(), (r.z.unwrap_or(0.0), *s)))
            .collect();

        scorable
            .iter()
            .zip(&batch.scores)
            .map(|(row, score)| {
                let anomalous_neighbors = neighbors
                    .get(&row.station_id)
                    .map(|nbs| {
                        nbs.iter()
                            .filter_map(|n| by_station.get(n.station_id.as_str()))
                            .filter(|(z, s)| {
                                z.abs() > self.settings.neighbor_z_threshold
                                    || *s > self.settings.neighbor_score_threshold
                            })
                            .count()
                    })
                    .unwrap_or(0);

                Score {
                    ts: row.ts,
                    station_id: row.station_id.clone(),
                    metric,
                    score: *score,
                    method: batch.method.to_string(),
                    extras: json!({
                        "z": row.z,
                        "z_robust": row.z_robust,
                        "neighbor_gap": row.neighbor_gap,
                        "anomalous": row.z_eff() >= self.settings.z_threshold,
                        "neighbor_flag": anomalous_neighbors > 0,
                        "neighbor_count_anom": anomalous_neighbors,
                    }),
                }
            })
            .collect()
    }
}
