/// Core data types for the weather-station anomaly service.
///
/// This module defines the shared domain model imported by all other modules:
/// readings, stations, persisted scores, alerts, the alert taxonomy, and the
/// crate error type. It contains no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Telemetry channels reported by every station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Air temperature, °C.
    Temperature,
    /// Rainfall accumulated over the reporting interval, mm per 5 minutes.
    Rainfall,
    /// Relative humidity, %.
    Humidity,
    /// Wind speed, knots.
    WindSpeed,
    /// Wind direction, degrees clockwise from north.
    WindDirection,
}

impl Metric {
    pub const ALL: [Metric; 5] = [
        Metric::Temperature,
        Metric::Rainfall,
        Metric::Humidity,
        Metric::WindDirection,
        Metric::WindSpeed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Rainfall => "rainfall",
            Metric::Humidity => "humidity",
            Metric::WindSpeed => "wind_speed",
            Metric::WindDirection => "wind_direction",
        }
    }

    /// Directional quantities never use linear mean/variance.
    pub fn is_circular(&self) -> bool {
        matches!(self, Metric::WindDirection)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = WxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "temperature" | "temp" => Ok(Metric::Temperature),
            "rainfall" | "rain" => Ok(Metric::Rainfall),
            "humidity" => Ok(Metric::Humidity),
            "wind_speed" => Ok(Metric::WindSpeed),
            "wind_direction" | "wind_dir" => Ok(Metric::WindDirection),
            other => Err(WxError::InvalidMetric(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Readings and stations
// ---------------------------------------------------------------------------

/// A single raw observation. Uniquely keyed by (ts, station_id, metric);
/// re-ingesting the same key supersedes the stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub ts: DateTime<Utc>,
    pub station_id: String,
    pub metric: Metric,
    pub value: f64,
}

impl Reading {
    pub fn new(ts: DateTime<Utc>, station_id: &str, metric: Metric, value: f64) -> Self {
        Self {
            ts,
            station_id: station_id.to_string(),
            metric,
            value,
        }
    }
}

/// Station metadata. Only stations with coordinates join the neighbor graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub name: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Station {
    pub fn new(station_id: &str, name: &str, latitude: f64, longitude: f64) -> Self {
        Self {
            station_id: station_id.to_string(),
            name: name.to_string(),
            latitude: Some(latitude),
            longitude: Some(longitude),
        }
    }

    /// Finite (lat, lon) pair, if both are present.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

/// Persisted anomaly score for one (ts, station, metric). Higher is more
/// anomalous, scaled to [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub ts: DateTime<Utc>,
    pub station_id: String,
    pub metric: Metric,
    pub score: f64,
    pub method: String,
    pub extras: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Fixed alert taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertType {
    /// Generic sustained-delta alert.
    Alert,
    RainOnset,
    RainIntense,
    RainEasing,
    RainStop,
    WindStrong,
    WindVeryStrong,
    TempHighUnusual,
    TempLowUnusual,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Alert => "ALERT",
            AlertType::RainOnset => "RAIN_ONSET",
            AlertType::RainIntense => "RAIN_INTENSE",
            AlertType::RainEasing => "RAIN_EASING",
            AlertType::RainStop => "RAIN_STOP",
            AlertType::WindStrong => "WIND_STRONG",
            AlertType::WindVeryStrong => "WIND_VERY_STRONG",
            AlertType::TempHighUnusual => "TEMP_HIGH_UNUSUAL",
            AlertType::TempLowUnusual => "TEMP_LOW_UNUSUAL",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = WxError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let t = match s {
            "ALERT" => AlertType::Alert,
            "RAIN_ONSET" => AlertType::RainOnset,
            "RAIN_INTENSE" => AlertType::RainIntense,
            "RAIN_EASING" => AlertType::RainEasing,
            "RAIN_STOP" => AlertType::RainStop,
            "WIND_STRONG" => AlertType::WindStrong,
            "WIND_VERY_STRONG" => AlertType::WindVeryStrong,
            "TEMP_HIGH_UNUSUAL" => AlertType::TempHighUnusual,
            "TEMP_LOW_UNUSUAL" => AlertType::TempLowUnusual,
            other => return Err(WxError::Store(format!("unknown alert type '{}'", other))),
        };
        Ok(t)
    }
}

/// An alert about to be appended to the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAlert {
    pub ts: DateTime<Utc>,
    pub station_id: String,
    pub metric: Metric,
    pub alert_type: AlertType,
    pub severity: f64,
    pub reason: String,
    pub payload: serde_json::Value,
}

/// An alert as stored in the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub ts: DateTime<Utc>,
    pub station_id: String,
    pub metric: Metric,
    pub alert_type: AlertType,
    pub severity: f64,
    pub reason: String,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the store, configuration, and replay layers.
///
/// Nothing in the feature/scoring/rule path returns these for numeric or
/// data-sufficiency problems; those degrade to `None` or fallbacks.
#[derive(Debug, thiserror::Error)]
pub enum WxError {
    #[error("store error: {0}")]
    Store(String),
    #[error("database error: {0}")]
    Database(#[from] postgres::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("unknown metric '{0}'")]
    InvalidMetric(String),
    #[error("invalid timestamp '{0}'")]
    InvalidTimestamp(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),
}

pub type Result<T> = std::result::Result<T, WxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_round_trip_through_from_str() {
        for metric in Metric::ALL {
            let parsed: Metric = metric.as_str().parse().expect("canonical name should parse");
            assert_eq!(parsed, metric);
        }
        assert_eq!("rain".parse::<Metric>().unwrap(), Metric::Rainfall);
        assert_eq!("wind_dir".parse::<Metric>().unwrap(), Metric::WindDirection);
        assert!("pressure".parse::<Metric>().is_err());
    }

    #[test]
    fn test_only_wind_direction_is_circular() {
        let circular: Vec<_> = Metric::ALL.iter().filter(|m| m.is_circular()).collect();
        assert_eq!(circular, vec![&Metric::WindDirection]);
    }

    #[test]
    fn test_alert_type_serializes_as_taxonomy_string() {
        let json = serde_json::to_string(&AlertType::WindVeryStrong).unwrap();
        assert_eq!(json, "\"WIND_VERY_STRONG\"");
        assert_eq!("RAIN_STOP".parse::<AlertType>().unwrap(), AlertType::RainStop);
    }

    fn parse_pair(metric: &str, kind: &str) -> Result<(Metric, AlertType)> {
        Ok((metric.parse()?, kind.parse()?))
    }

    #[test]
    fn test_parse_errors_propagate_through_crate_result() {
        assert_eq!(
            parse_pair("wind_speed", "WIND_STRONG").unwrap(),
            (Metric::WindSpeed, AlertType::WindStrong)
        );
        assert!(matches!(
            parse_pair("pressure", "ALERT"),
            Err(WxError::InvalidMetric(_))
        ));
        assert!(matches!(
            parse_pair("rainfall", "RAIN_MAYBE"),
            Err(WxError::Store(_))
        ));
    }

    #[test]
    fn test_station_without_coordinates_has_none() {
        let mut s = Station::new("S1", "Somewhere", 1.3, 103.8);
        assert_eq!(s.coordinates(), Some((1.3, 103.8)));
        s.longitude = None;
        assert_eq!(s.coordinates(), None);
        s.longitude = Some(f64::NAN);
        assert_eq!(s.coordinates(), None);
    }
}
