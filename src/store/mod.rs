/// Record store contract consumed by the pipeline.
///
/// The storage engine itself is an external collaborator; the pipeline only
/// relies on the operations below. Two implementations ship with the crate:
/// `memory::MemoryStore` keeps ordered in-process maps for tests and offline
/// replay; `postgres::PgStore` runs a synchronous client over the `wx` schema.

pub mod memory;
pub mod postgres;

pub use self::memory::MemoryStore;
pub use self::postgres::PgStore;

use chrono::{DateTime, Utc};

use crate::model::{Alert, AlertType, Metric, NewAlert, Reading, Result, Score, Station};

pub trait RecordStore {
    /// Most recent readings of one metric, newest first, optionally for a
    /// single station.
    fn latest_readings(
        &mut self,
        metric: Metric,
        station_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Reading>>;

    /// All readings of one metric with `ts >= since`, oldest first.
    fn readings_since(&mut self, metric: Metric, since: DateTime<Utc>) -> Result<Vec<Reading>>;

    /// Readings of one metric with `since <= ts < until`, oldest first.
    fn readings_between(
        &mut self,
        metric: Metric,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Reading>>;

    /// Insert readings; a duplicate (ts, station, metric) supersedes.
    fn write_readings(&mut self, rows: &[Reading]) -> Result<usize>;

    fn all_stations(&mut self) -> Result<Vec<Station>>;

    fn upsert_stations(&mut self, rows: &[Station]) -> Result<usize>;

    fn write_scores(&mut self, rows: &[Score]) -> Result<usize>;

    /// Append an alert and return its id.
    fn insert_alert(&mut self, alert: &NewAlert) -> Result<i64>;

    /// Timestamp of the most recent alert of this (station, metric, type).
    fn last_alert_time(
        &mut self,
        station_id: &str,
        metric: Metric,
        alert_type: AlertType,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Alerts with `ts >= since`, newest first.
    fn alerts_since(&mut self, since: DateTime<Utc>) -> Result<Vec<Alert>>;

    /// Delete alerts in `since <= ts < until`, for one metric or all.
    fn delete_alerts_range(
        &mut self,
        metric: Option<Metric>,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64>;
}
