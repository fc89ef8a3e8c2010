/// Rainfall summaries over stored readings.
///
/// Read-only groupings of the rainfall series for reporting: the latest wet
/// ticks, per-station totals for each local calendar day, and continuous
/// wet spells. Everything is computed from `RecordStore::readings_between`,
/// so the in-memory and PostgreSQL stores give identical answers.
///
/// Times are reported in the configured local offset. Stations missing
/// from the station table are labelled with their id.

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::logging::{self, Component};
use crate::model::{Metric, Reading, Result};
use crate::store::RecordStore;

/// One non-zero rainfall reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RainTick {
    pub ts: DateTime<FixedOffset>,
    pub station_id: String,
    pub station: String,
    pub mm: f64,
}

/// Rain at one station over one local calendar day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRainTotal {
    pub day: NaiveDate,
    pub station_id: String,
    pub station: String,
    pub mm_total: f64,
}

/// A run of consecutive wet ticks at one station.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RainEpisode {
    pub station_id: String,
    pub station: String,
    /// First and last wet tick, inclusive.
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    pub mm_total: f64,
    pub minutes_wet: i64,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn is_wet(r: &Reading) -> bool {
    r.value.is_finite() && r.value > 0.0
}

/// station_id -> display name
fn station_names(store: &mut dyn RecordStore) -> Result<HashMap<String, String>> {
    Ok(store
        .all_stations()?
        .into_iter()
        .map(|s| (s.station_id, s.name))
        .collect())
}

fn display_name(names: &HashMap<String, String>, station_id: &str) -> String {
    names
        .get(station_id)
        .filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| station_id.to_string())
}

/// The `limit` most recent wet ticks in `[since, until)`, newest first.
pub fn recent_rain_ticks(
    store: &mut dyn RecordStore,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
    offset: FixedOffset,
) -> Result<Vec<RainTick>> {
    let names = station_names(store)?;
    let rows = store.readings_between(Metric::Rainfall, since, until)?;

    let mut ticks: Vec<RainTick> = rows
        .iter()
        .filter(|r| is_wet(r))
        .map(|r| RainTick {
            ts: r.ts.with_timezone(&offset),
            station_id: r.station_id.clone(),
            station: display_name(&names, &r.station_id),
            mm: r.value,
        })
        .collect();
    ticks.sort_by(|a, b| b.ts.cmp(&a.ts).then_with(|| a.station_id.cmp(&b.station_id)));
    ticks.truncate(limit);
    Ok(ticks)
}

/// Per-station totals for each local day with any rain, newest day first
/// and wettest station first within a day. Totals are rounded to 0.01mm.
pub fn daily_rain_totals(
    store: &mut dyn RecordStore,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    offset: FixedOffset,
) -> Result<Vec<DailyRainTotal>> {
    let names = station_names(store)?;
    let rows = store.readings_between(Metric::Rainfall, since, until)?;

    let mut sums: BTreeMap<(NaiveDate, &str), f64> = BTreeMap::new();
    for r in rows.iter().filter(|r| r.value.is_finite()) {
        let day = r.ts.with_timezone(&offset).date_naive();
        *sums.entry((day, r.station_id.as_str())).or_insert(0.0) += r.value;
    }

    let mut totals: Vec<DailyRainTotal> = sums
        .into_iter()
        .filter(|(_, mm)| *mm > 0.0)
        .map(|((day, station_id), mm)| DailyRainTotal {
            day,
            station_id: station_id.to_string(),
            station: display_name(&names, station_id),
            mm_total: round2(mm),
        })
        .collect();
    totals.sort_by(|a, b| {
        b.day
            .cmp(&a.day)
            .then_with(|| b.mm_total.total_cmp(&a.mm_total))
            .then_with(|| a.station_id.cmp(&b.station_id))
    });
    Ok(totals)
}

/// Continuous wet spells per station, most recent start first.
///
/// A spell ends at the first calm (zero) tick, or where the next wet tick
/// is more than one cadence later. Each wet tick counts `cadence_minutes`
/// towards `minutes_wet`.
pub fn rain_episodes(
    store: &mut dyn RecordStore,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    cadence_minutes: i64,
    offset: FixedOffset,
) -> Result<Vec<RainEpisode>> {
    let names = station_names(store)?;
    let rows = store.readings_between(Metric::Rainfall, since, until)?;
    let cadence = Duration::minutes(cadence_minutes.max(1));

    let mut by_station: BTreeMap<&str, Vec<&Reading>> = BTreeMap::new();
    for r in rows.iter().filter(|r| r.value.is_finite()) {
        by_station.entry(r.station_id.as_str()).or_default().push(r);
    }

    let mut episodes = Vec::new();
    for (station_id, mut series) in by_station {
        series.sort_by_key(|r| r.ts);

        // (start, end, mm, wet ticks)
        let mut open: Option<(DateTime<Utc>, DateTime<Utc>, f64, i64)> = None;
        for r in series {
            open = match open {
                Some((start, end, mm, n)) if is_wet(r) && r.ts - end <= cadence => {
                    Some((start, r.ts, mm + r.value, n + 1))
                }
                current => {
                    if let Some(spell) = current {
                        episodes.push((station_id, spell));
                    }
                    is_wet(r).then_some((r.ts, r.ts, r.value, 1))
                }
            };
        }
        if let Some(spell) = open {
            episodes.push((station_id, spell));
        }
    }

    let mut out: Vec<RainEpisode> = episodes
        .into_iter()
        .map(|(station_id, (start, end, mm, n))| RainEpisode {
            station_id: station_id.to_string(),
            station: display_name(&names, station_id),
            start: start.with_timezone(&offset),
            end: end.with_timezone(&offset),
            mm_total: round2(mm),
            minutes_wet: n * cadence.num_minutes(),
        })
        .collect();
    out.sort_by(|a, b| b.start.cmp(&a.start).then_with(|| a.station_id.cmp(&b.station_id)));

    logging::debug(
        Component::Analytics,
        None,
        &format!("{} rain episode(s) between {} and {}", out.len(), since, until),
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Station;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn sgt() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    /// 2025-09-16 14:00 UTC is 22:00 local.
    fn t(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 16, 14, 0, 0).unwrap() + Duration::minutes(min)
    }

    fn rain(store: &mut MemoryStore, station: &str, start_min: i64, values: &[f64]) {
        let rows: Vec<Reading> = values
            .iter()
            .enumerate()
            .map(|(i, v)| Reading::new(t(start_min + 5 * i as i64), station, Metric::Rainfall, *v))
            .collect();
        store.write_readings(&rows).unwrap();
    }

    fn store_with_stations() -> MemoryStore {
        let mut store = MemoryStore::new();
        store
            .upsert_stations(&[
                Station::new("S50", "Clementi Road", 1.3337, 103.7768),
                Station::new("S24", "Upper Changi Road North", 1.3678, 103.9826),
            ])
            .unwrap();
        store
    }

    #[test]
    fn test_recent_ticks_newest_first_and_limited() {
        let mut store = store_with_stations();
        rain(&mut store, "S50", 0, &[0.0, 0.4, 0.2, 0.0, 0.6]);
        rain(&mut store, "S99", 0, &[0.0, 0.0, 1.0]);

        let ticks = recent_rain_ticks(&mut store, t(0), t(60), 3, sgt()).unwrap();
        let got: Vec<(i64, &str, f64)> = ticks
            .iter()
            .map(|k| ((k.ts.with_timezone(&Utc) - t(0)).num_minutes(), k.station.as_str(), k.mm))
            .collect();
        assert_eq!(
            got,
            vec![(20, "Clementi Road", 0.6), (10, "Clementi Road", 0.2), (10, "S99", 1.0)]
        );
        assert_eq!(ticks[0].ts.offset(), &sgt());
    }

    #[test]
    fn test_daily_totals_bucket_by_local_day() {
        let mut store = store_with_stations();
        // 23:50 and 23:55 local on the 16th, then 00:00 and 00:05 on the 17th
        rain(&mut store, "S50", 110, &[0.25, 0.25, 1.0, 0.5]);
        rain(&mut store, "S24", 120, &[2.0]);
        rain(&mut store, "S24", 0, &[0.0, 0.0]);

        let totals = daily_rain_totals(&mut store, t(0), t(240), sgt()).unwrap();
        let got: Vec<(String, &str, f64)> = totals
            .iter()
            .map(|d| (d.day.to_string(), d.station_id.as_str(), d.mm_total))
            .collect();
        assert_eq!(
            got,
            vec![
                ("2025-09-17".to_string(), "S24", 2.0),
                ("2025-09-17".to_string(), "S50", 1.5),
                ("2025-09-16".to_string(), "S50", 0.5),
            ]
        );
    }

    #[test]
    fn test_episodes_split_on_calm_tick_and_gap() {
        let mut store = store_with_stations();
        // wet 0..10, calm at 15, wet 20..25, then a 30 minute hole and wet at 60
        rain(&mut store, "S50", 0, &[0.2, 0.3, 0.1, 0.0, 1.0, 0.5]);
        rain(&mut store, "S50", 60, &[0.4]);

        let eps = rain_episodes(&mut store, t(0), t(120), 5, sgt()).unwrap();
        let got: Vec<(i64, i64, f64, i64)> = eps
            .iter()
            .map(|e| {
                (
                    (e.start.with_timezone(&Utc) - t(0)).num_minutes(),
                    (e.end.with_timezone(&Utc) - t(0)).num_minutes(),
                    e.mm_total,
                    e.minutes_wet,
                )
            })
            .collect();
        assert_eq!(got, vec![(60, 60, 0.4, 5), (20, 25, 1.5, 10), (0, 10, 0.6, 15)]);
        assert!(eps.iter().all(|e| e.station == "Clementi Road"));
    }

    #[test]
    fn test_dry_range_has_no_episodes_or_totals() {
        let mut store = store_with_stations();
        rain(&mut store, "S24", 0, &[0.0; 12]);
        assert!(rain_episodes(&mut store, t(0), t(60), 5, sgt()).unwrap().is_empty());
        assert!(daily_rain_totals(&mut store, t(0), t(60), sgt()).unwrap().is_empty());
        assert!(recent_rain_ticks(&mut store, t(0), t(60), 10, sgt()).unwrap().is_empty());
    }
}
