//! Cooldown-based de-duplication against the alert log.
//!
//! Elapsed time is measured between reading timestamps, not wall-clock, so
//! re-evaluating the same tick twice (or replaying history) sees an elapsed
//! time of zero and stays suppressed.

use chrono::{DateTime, Duration, Utc};

use crate::logging::{self, Component};
use crate::model::{AlertType, Metric, NewAlert, Result};
use crate::store::RecordStore;

/// True when no alert of this (station, metric, type) exists within
/// `minutes` before `ts`.
pub fn cooldown_ok(
    store: &mut dyn RecordStore,
    station_id: &str,
    metric: Metric,
    alert_type: AlertType,
    ts: DateTime<Utc>,
    minutes: i64,
) -> Result<bool> {
    let last = store.last_alert_time(station_id, metric, alert_type)?;
    Ok(match last {
        None => true,
        Some(last) => ts - last >= Duration::minutes(minutes),
    })
}

/// Append `alert` unless its cooldown is still running. Returns whether it
/// was written.
pub fn emit(store: &mut dyn RecordStore, alert: &NewAlert, minutes: i64) -> Result<bool> {
    if !cooldown_ok(
        store,
        &alert.station_id,
        alert.metric,
        alert.alert_type,
        alert.ts,
        minutes,
    )? {
        logging::debug(
            Component::Rules,
            Some(&alert.station_id),
            &format!("{} suppressed by {}m cooldown", alert.alert_type, minutes),
        );
        return Ok(false);
    }

    let id = store.insert_alert(alert)?;
    logging::info(
        Component::Rules,
        Some(&alert.station_id),
        &format!("{} #{} [{}]: {}", alert.alert_type, id, alert.metric, alert.reason),
    );
    Ok(true)
}
