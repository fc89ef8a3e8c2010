/// Historical alert replay.
///
/// Recreates alerts for a past range by walking every distinct reading
/// timestamp in order and running the live rule engine on the trailing
/// window ending there. Cooldowns work off reading timestamps, so a replay
/// produces the same alerts the live loop would have.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use std::collections::BTreeSet;

use crate::alert::RuleEngine;
use crate::config::Settings;
use crate::logging::{self, Component};
use crate::model::{Metric, Reading, Result, WxError};
use crate::store::RecordStore;

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y/%m/%d"];

const NAIVE_FORMATS: [&str; 8] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y/%m/%dT%H:%M:%S",
    "%Y/%m/%dT%H:%M",
];

const ZONED_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"];

// ---------------------------------------------------------------------------
// Range parsing
// ---------------------------------------------------------------------------

fn parse_date_only(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(s, f).ok())
}

fn local_to_utc(naive: NaiveDateTime, offset: FixedOffset, raw: &str) -> Result<DateTime<Utc>> {
    offset
        .from_local_datetime(&naive)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| WxError::InvalidTimestamp(raw.to_string()))
}

fn local_midnight(date: NaiveDate, offset: FixedOffset, raw: &str) -> Result<DateTime<Utc>> {
    local_to_utc(date.and_time(chrono::NaiveTime::MIN), offset, raw)
}

/// Parse one instant. Inputs without a zone are local to `offset`.
pub fn parse_instant(s: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let raw = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(dt) = ZONED_FORMATS
        .iter()
        .find_map(|f| DateTime::parse_from_str(raw, f).ok())
    {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Some(naive) = NAIVE_FORMATS
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(raw, f).ok())
    {
        return local_to_utc(naive, offset, raw);
    }
    if let Some(date) = parse_date_only(raw) {
        return local_midnight(date, offset, raw);
    }
    Err(WxError::InvalidTimestamp(raw.to_string()))
}

/// End bound: a bare date means "through the end of that local day".
fn parse_end(s: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    match parse_date_only(s) {
        Some(date) => Ok(local_midnight(date, offset, s)? + Duration::days(1)),
        None => parse_instant(s, offset),
    }
}

/// Split `"A to B"` (case-insensitive) into its halves.
fn split_to(s: &str) -> Option<(&str, &str)> {
    let lower = s.to_ascii_lowercase();
    let at = lower.find(" to ")?;
    Some((s[..at].trim(), s[at + 4..].trim()))
}

/// Parse a human range into `[since, until)` UTC.
///
/// Accepted shapes: `"A to B"`, two arguments `A B`, or a single value
/// (a bare date covers that whole local day, an instant covers 24 hours
/// from it). A bare end date is inclusive.
pub fn parse_range(args: &[&str], offset: FixedOffset) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let joined = args.first().and_then(|first| split_to(first));
    let (since, until) = match (joined, args) {
        (Some((a, b)), _) => (parse_instant(a, offset)?, parse_end(b, offset)?),
        (None, []) => {
            return Err(WxError::InvalidRange(
                "provide a range, e.g. '2025/09/17 to 2025/09/18'".into(),
            ));
        }
        (None, [single]) => {
            let since = parse_instant(single, offset)?;
            (since, since + Duration::days(1))
        }
        (None, [a, b, ..]) => (parse_instant(a, offset)?, parse_end(b, offset)?),
    };

    if until <= since {
        return Err(WxError::InvalidRange(format!(
            "end {} is not after start {}",
            until, since
        )));
    }
    Ok((since, until))
}

// ---------------------------------------------------------------------------
// Replay
// ---------------------------------------------------------------------------

/// Rebuild alerts for `metrics` over `[since, until)`. Returns the number of
/// alerts written. With `delete_existing`, alerts already stored for those
/// metrics in the range are removed first.
pub fn replay(
    store: &mut dyn RecordStore,
    settings: &Settings,
    metrics: &[Metric],
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    delete_existing: bool,
) -> Result<usize> {
    if until <= since {
        return Err(WxError::InvalidRange(format!("{} .. {}", since, until)));
    }
    let window = Duration::minutes(settings.rolling_window_minutes.max(1));
    let mut rules = RuleEngine::new(settings.clone());
    let mut total = 0;

    for &metric in metrics {
        if delete_existing {
            let deleted = store.delete_alerts_range(Some(metric), since, until)?;
            if deleted > 0 {
                logging::info(
                    Component::Replay,
                    None,
                    &format!("Deleted {} existing {} alert(s)", deleted, metric),
                );
            }
        }

        // Readings just before the range give the first ticks their history.
        let readings = store.readings_between(metric, since - window, until)?;
        let written = replay_metric(store, &mut rules, metric, &readings, since, window)?;
        logging::info(
            Component::Replay,
            None,
            &format!("{}: {} alert(s) from {} readings", metric, written, readings.len()),
        );
        total += written;
    }
    Ok(total)
}

fn replay_metric(
    store: &mut dyn RecordStore,
    rules: &mut RuleEngine,
    metric: Metric,
    readings: &[Reading],
    since: DateTime<Utc>,
    window: Duration,
) -> Result<usize> {
    let mut sorted: Vec<&Reading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.ts);

    let mut written = 0;
    let mut start = 0;
    let mut i = 0;
    while i < sorted.len() {
        let t = sorted[i].ts;
        let mut end = i;
        while end < sorted.len() && sorted[end].ts == t {
            end += 1;
        }
        if t >= since {
            while sorted[start].ts <= t - window {
                start += 1;
            }
            // Only stations reporting at t are evaluated at t.
            let reporting: BTreeSet<&str> =
                sorted[i..end].iter().map(|r| r.station_id.as_str()).collect();
            let tick: Vec<Reading> = sorted[start..end]
                .iter()
                .filter(|r| reporting.contains(r.station_id.as_str()))
                .map(|r| (*r).clone())
                .collect();
            written += rules.evaluate(store, metric, &tick, t)?;
        }
        i = end;
    }
    Ok(written)
}
