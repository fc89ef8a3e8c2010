/// Single-worker daemon loop.
///
/// Each iteration optionally rebuilds the spatial index (first tick and
/// every Nth tick after), runs one engine tick, then sleeps the poll
/// interval. Any error is logged and retried after a capped exponential
/// backoff; a failed tick never ends the process.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::config::Settings;
use crate::engine::{Engine, TickReport};
use crate::logging::{self, Component};
use crate::model::Result;
use crate::stations::SpatialIndex;
use crate::store::RecordStore;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Double the backoff, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

pub struct Daemon {
    engine: Engine,
    index: SpatialIndex,
    tick: u64,
    backoff: Duration,
}

impl Daemon {
    pub fn new(settings: Settings) -> Self {
        Self {
            engine: Engine::new(settings),
            index: SpatialIndex::new(),
            tick: 0,
            backoff: INITIAL_BACKOFF,
        }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Completed ticks since start.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn rebuild_due(&self) -> bool {
        let every = self.engine.settings().index_rebuild_every_ticks.max(1);
        self.tick % every == 0
    }

    /// Reload stations from the store and rebuild the neighbor index.
    pub fn rebuild_index(&mut self, store: &mut dyn RecordStore) -> Result<usize> {
        let stations = store.all_stations()?;
        self.index.rebuild(&stations);
        Ok(self.index.len())
    }

    /// One iteration without sleeping: rebuild if due, then process a tick.
    pub fn run_once(&mut self, store: &mut dyn RecordStore, now: DateTime<Utc>) -> Result<TickReport> {
        if self.rebuild_due() {
            self.rebuild_index(store)?;
        }
        let report = self.engine.process_tick(store, &self.index, now)?;
        self.tick += 1;
        Ok(report)
    }

    /// Record the outcome of an iteration and return how long to sleep.
    pub fn after_iteration(&mut self, outcome: &Result<TickReport>) -> Duration {
        let settings = self.engine.settings();
        match outcome {
            Ok(report) => {
                logging::debug(
                    Component::Daemon,
                    None,
                    &format!("Loop ok: tick={}, readings={}", self.tick, report.readings),
                );
                self.backoff = INITIAL_BACKOFF;
                Duration::from_secs(settings.poll_interval_seconds)
            }
            Err(e) => {
                logging::log_store_failure("daemon iteration", e);
                let max = Duration::from_secs(settings.max_backoff_seconds.max(1));
                let sleep = self.backoff.min(max);
                self.backoff = next_backoff(self.backoff, max);
                sleep
            }
        }
    }

    /// Run until `should_stop` is set.
    pub fn run(&mut self, store: &mut dyn RecordStore, should_stop: &AtomicBool) {
        let s = self.engine.settings();
        logging::info(
            Component::Daemon,
            None,
            &format!(
                "Daemon started: poll every {}s, neighbor_k={}, window={}m",
                s.poll_interval_seconds, s.neighbor_k, s.rolling_window_minutes
            ),
        );

        while !should_stop.load(Ordering::Relaxed) {
            let outcome = self.run_once(store, Utc::now());
            let sleep = self.after_iteration(&outcome);
            thread::sleep(sleep);
        }

        logging::info(Component::Daemon, None, "Daemon stopped cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Metric, Reading, Station, WxError};
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    #[test]
    fn test_backoff_doubles_to_cap() {
        let max = Duration::from_secs(60);
        let mut b = INITIAL_BACKOFF;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(b.as_secs());
            b = next_backoff(b, max);
        }
        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 60, 60]);
    }

    #[test]
    fn test_failure_then_success_resets_backoff() {
        let mut daemon = Daemon::new(Settings::default());
        let err: Result<TickReport> = Err(WxError::Store("connection reset".into()));
        assert_eq!(daemon.after_iteration(&err), Duration::from_secs(1));
        assert_eq!(daemon.after_iteration(&err), Duration::from_secs(2));
        assert_eq!(daemon.backoff(), Duration::from_secs(4));

        let ok = daemon.after_iteration(&Ok(TickReport::default()));
        assert_eq!(ok, Duration::from_secs(60));
        assert_eq!(daemon.backoff(), INITIAL_BACKOFF);
    }

    #[test]
    fn test_index_rebuilt_on_first_and_every_nth_tick() {
        let settings = Settings {
            index_rebuild_every_ticks: 3,
            ..Settings::default()
        };
        let mut daemon = Daemon::new(settings);
        let mut store = MemoryStore::new();
        store
            .upsert_stations(&[
                Station::new("S1", "One", 1.30, 103.80),
                Station::new("S2", "Two", 1.31, 103.81),
            ])
            .unwrap();
        let now = Utc.with_ymd_and_hms(2025, 9, 16, 0, 0, 0).unwrap();
        store
            .write_readings(&[Reading::new(now, "S1", Metric::Humidity, 80.0)])
            .unwrap();

        daemon.run_once(&mut store, now).unwrap();
        assert_eq!(daemon.index().len(), 2);

        // a new station appears; it is picked up only on tick 3
        store
            .upsert_stations(&[Station::new("S3", "Three", 1.32, 103.82)])
            .unwrap();
        daemon.run_once(&mut store, now).unwrap();
        daemon.run_once(&mut store, now).unwrap();
        assert_eq!(daemon.index().len(), 2);
        daemon.run_once(&mut store, now).unwrap();
        assert_eq!(daemon.index().len(), 3);
        assert_eq!(daemon.tick(), 4);
    }

    #[test]
    fn test_run_returns_once_stop_is_set() {
        let mut daemon = Daemon::new(Settings::default());
        let mut store = MemoryStore::new();
        let stop = AtomicBool::new(true);
        daemon.run(&mut store, &stop);
        assert_eq!(daemon.tick(), 0);
    }
}
