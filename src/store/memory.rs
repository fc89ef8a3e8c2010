/// In-process record store.
///
/// Readings are held in ordered maps keyed by (metric, station, ts), so
/// duplicate keys supersede just as they do in the database. Used by the
/// test suites and for offline replay of exported data.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::model::{Alert, AlertType, Metric, NewAlert, Reading, Result, Score, Station};
use crate::store::RecordStore;

type ReadingKey = (Metric, String, DateTime<Utc>);

#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: BTreeMap<ReadingKey, f64>,
    stations: BTreeMap<String, Station>,
    scores: BTreeMap<ReadingKey, Score>,
    alerts: Vec<Alert>,
    next_alert_id: i64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored alert, in insertion order.
    pub fn alerts(&self) -> &[Alert] {
        &self.alerts
    }

    pub fn score(&self, metric: Metric, station_id: &str, ts: DateTime<Utc>) -> Option<&Score> {
        self.scores.get(&(metric, station_id.to_string(), ts))
    }

    pub fn score_count(&self) -> usize {
        self.scores.len()
    }

    fn collect<F>(&self, metric: Metric, keep: F) -> Vec<Reading>
    where
        F: Fn(&str, DateTime<Utc>) -> bool,
    {
        self.readings
            .iter()
            .filter(|((m, sid, ts), _)| *m == metric && keep(sid, *ts))
            .map(|((m, sid, ts), v)| Reading::new(*ts, sid, *m, *v))
            .collect()
    }
}

fn sort_by_time(rows: &mut [Reading]) {
    rows.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.station_id.cmp(&b.station_id)));
}

impl RecordStore for MemoryStore {
    fn latest_readings(
        &mut self,
        metric: Metric,
        station_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reading>> {
        let mut rows = self.collect(metric, |sid, _| station_id.is_none_or(|want| want == sid));
        sort_by_time(&mut rows);
        rows.reverse();
        rows.truncate(limit);
        Ok(rows)
    }

    fn readings_since(&mut self, metric: Metric, since: DateTime<Utc>) -> Result<Vec<Reading>> {
        let mut rows = self.collect(metric, |_, ts| ts >= since);
        sort_by_time(&mut rows);
        Ok(rows)
    }

    fn readings_between(
        &mut self,
        metric: Metric,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reading>> {
        let mut rows = self.collect(metric, |_, ts| ts >= since && ts < until);
        sort_by_time(&mut rows);
        Ok(rows)
    }

    fn write_readings(&mut self, rows: &[Reading]) -> Result<usize> {
        for r in rows {
            self.readings
                .insert((r.metric, r.station_id.clone(), r.ts), r.value);
        }
        Ok(rows.len())
    }

    fn all_stations(&mut self) -> Result<Vec<Station>> {
        Ok(self.stations.values().cloned().collect())
    }

    fn upsert_stations(&mut self, rows: &[Station]) -> Result<usize> {
        for s in rows {
            self.stations.insert(s.station_id.clone(), s.clone());
        }
        Ok(rows.len())
    }

    fn write_scores(&mut self, rows: &[Score]) -> Result<usize> {
        for s in rows {
            self.scores
                .insert((s.metric, s.station_id.clone(), s.ts), s.clone());
        }
        Ok(rows.len())
    }

    fn insert_alert(&mut self, alert: &NewAlert) -> Result<i64> {
        self.next_alert_id += 1;
        self.alerts.push(Alert {
            id: self.next_alert_id,
            ts: alert.ts,
            station_id: alert.station_id.clone(),
            metric: alert.metric,
            alert_type: alert.alert_type,
            severity: alert.severity,
            reason: alert.reason.clone(),
            payload: alert.payload.clone(),
        });
        Ok(self.next_alert_id)
    }

    fn last_alert_time(
        &mut self,
        station_id: &str,
        metric: Metric,
        alert_type: AlertType,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .alerts
            .iter()
            .filter(|a| a.station_id == station_id && a.metric == metric && a.alert_type == alert_type)
            .map(|a| a.ts)
            .max())
    }

    fn alerts_since(&mut self, since: DateTime<Utc>) -> Result<Vec<Alert>> {
        let mut rows: Vec<Alert> = self.alerts.iter().filter(|a| a.ts >= since).cloned().collect();
        rows.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| b.id.cmp(&a.id)));
        Ok(rows)
    }

    fn delete_alerts_range(
        &mut self,
        metric: Option<Metric>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64> {
        let before = self.alerts.len();
        self.alerts.retain(|a| {
            let in_range = a.ts >= since && a.ts < until;
            let metric_match = metric.is_none_or(|m| m == a.metric);
            !(in_range && metric_match)
        });
        Ok((before - self.alerts.len()) as u64)
    }
}
