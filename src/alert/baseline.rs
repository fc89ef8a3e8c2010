//! Per-station time-of-day temperature baseline.
//!
//! For every (station, local minute-of-day) bucket the baseline holds the
//! median and a 1.4826·MAD scale (floored) of the readings seen at that
//! minute over the lookback window. A bucket is kept only when it covers
//! at least `min_days` distinct local calendar days.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Timelike, Utc};
use std::collections::{BTreeSet, HashMap};

use crate::config::TemperatureConfig;
use crate::features::rolling::{MAD_SCALE, median_of};
use crate::logging::{self, Component};
use crate::model::{Metric, Reading, Result};
use crate::store::RecordStore;

/// Minute of the local day, 0..1440.
pub fn minute_of_day(ts: DateTime<Utc>, offset: FixedOffset) -> u32 {
    let local = ts.with_timezone(&offset);
    local.hour() * 60 + local.minute()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineEntry {
    pub mu: f64,
    pub sigma: f64,
    pub days: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TempBaseline {
    entries: HashMap<(String, u32), BaselineEntry>,
    offset: Option<FixedOffset>,
}

impl TempBaseline {
    pub fn build(readings: &[Reading], cfg: &TemperatureConfig, offset: FixedOffset) -> Self {
        let mut buckets: HashMap<(String, u32), (Vec<f64>, BTreeSet<NaiveDate>)> = HashMap::new();
        for r in readings
            .iter()
            .filter(|r| r.metric == Metric::Temperature && r.value.is_finite())
        {
            let bucket = buckets
                .entry((r.station_id.clone(), minute_of_day(r.ts, offset)))
                .or_default();
            bucket.0.push(r.value);
            bucket.1.insert(r.ts.with_timezone(&offset).date_naive());
        }

        let entries = buckets
            .into_iter()
            .filter(|(_, (_, days))| days.len() >= cfg.min_days.max(1))
            .filter_map(|(key, (values, days))| {
                let mu = median_of(&values)?;
                let devs: Vec<f64> = values.iter().map(|v| (v - mu).abs()).collect();
                let sigma = (MAD_SCALE * median_of(&devs)?).max(cfg.sigma_floor);
                Some((key, BaselineEntry { mu, sigma, days: days.len() }))
            })
            .collect();

        Self {
            entries,
            offset: Some(offset),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, station_id: &str, minute: u32) -> Option<&BaselineEntry> {
        self.entries.get(&(station_id.to_string(), minute))
    }

    /// Entry for the bucket a timestamp falls into.
    pub fn lookup(&self, station_id: &str, ts: DateTime<Utc>) -> Option<&BaselineEntry> {
        let offset = self.offset?;
        self.get(station_id, minute_of_day(ts, offset))
    }
}

/// Owned, periodically rebuilt baseline.
#[derive(Debug)]
pub struct BaselineCache {
    cfg: TemperatureConfig,
    offset: FixedOffset,
    baseline: Option<TempBaseline>,
    built_at: Option<DateTime<Utc>>,
}

impl BaselineCache {
    pub fn new(cfg: TemperatureConfig, offset: FixedOffset) -> Self {
        Self {
            cfg,
            offset,
            baseline: None,
            built_at: None,
        }
    }

    pub fn current(&self) -> Option<&TempBaseline> {
        self.baseline.as_ref()
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Forget the baseline; the next `ensure` rebuilds it.
    pub fn invalidate(&mut self) {
        self.baseline = None;
        self.built_at = None;
    }

    /// Rebuild when missing or older than the rebuild interval, then return
    /// the baseline if it has any valid bucket. Readings later than `now`
    /// are ignored so historical replays see only their own past.
    pub fn ensure(
        &mut self,
        store: &mut dyn RecordStore,
        now: DateTime<Utc>,
    ) -> Result<Option<&TempBaseline>> {
        let fresh = self
            .built_at
            .is_some_and(|at| now >= at && now - at < Duration::minutes(self.cfg.rebuild_every_minutes));

        if !fresh {
            let since = now - Duration::days(self.cfg.lookback_days);
            let mut history = store.readings_since(Metric::Temperature, since)?;
            history.retain(|r| r.ts <= now);

            let baseline = TempBaseline::build(&history, &self.cfg, self.offset);
            logging::info(
                Component::Rules,
                None,
                &format!(
                    "Temperature baseline rebuilt: {} valid buckets from {} readings",
                    baseline.len(),
                    history.len()
                ),
            );
            self.baseline = (!baseline.is_empty()).then_some(baseline);
            self.built_at = Some(now);
        }

        Ok(self.baseline.as_ref())
    }
}
