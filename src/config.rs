/// Service configuration loaded from `wxguard.toml`.
///
/// Every field has a default, so a partial (or missing) file is valid.
/// Per-metric knobs live in `PerMetric<T>` tables:
///
/// ```toml
/// rolling_window_minutes = 90
///
/// [simple_delta_threshold]
/// temperature = 0.8
/// wind_direction = 35.0
///
/// [rain]
/// onset_tick_mm = 0.2
/// ```

use serde::{Deserialize, Deserializer};
use std::fs;
use std::path::Path;

use crate::model::{Metric, Result, WxError};

// ============================================================================
// Per-metric tables
// ============================================================================

/// One value per metric.
#[derive(Debug, Clone, PartialEq)]
pub struct PerMetric<T> {
    pub temperature: T,
    pub rainfall: T,
    pub humidity: T,
    pub wind_speed: T,
    pub wind_direction: T,
}

impl<T: Copy> PerMetric<T> {
    pub fn get(&self, metric: Metric) -> T {
        match metric {
            Metric::Temperature => self.temperature,
            Metric::Rainfall => self.rainfall,
            Metric::Humidity => self.humidity,
            Metric::WindSpeed => self.wind_speed,
            Metric::WindDirection => self.wind_direction,
        }
    }
}

/// A per-metric table as written in the file; absent metrics are `None`.
#[derive(Debug, Deserialize)]
struct PerMetricTable<T> {
    temperature: Option<T>,
    rainfall: Option<T>,
    humidity: Option<T>,
    wind_speed: Option<T>,
    wind_direction: Option<T>,
}

impl<T> PerMetricTable<T> {
    fn over(self, base: PerMetric<T>) -> PerMetric<T> {
        PerMetric {
            temperature: self.temperature.unwrap_or(base.temperature),
            rainfall: self.rainfall.unwrap_or(base.rainfall),
            humidity: self.humidity.unwrap_or(base.humidity),
            wind_speed: self.wind_speed.unwrap_or(base.wind_speed),
            wind_direction: self.wind_direction.unwrap_or(base.wind_direction),
        }
    }
}

fn merge_table<'de, D, T>(deserializer: D, base: PerMetric<T>) -> std::result::Result<PerMetric<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    PerMetricTable::deserialize(deserializer).map(|table| table.over(base))
}

fn sigma_floor_table<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<PerMetric<f64>, D::Error> {
    merge_table(d, default_sigma_floor())
}

fn simple_delta_threshold_table<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<PerMetric<f64>, D::Error> {
    merge_table(d, default_simple_delta_threshold())
}

fn simple_sustained_ticks_table<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<PerMetric<usize>, D::Error> {
    merge_table(d, default_simple_sustained_ticks())
}

fn delta_min_table<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<PerMetric<f64>, D::Error> {
    merge_table(d, default_delta_min())
}

fn default_sigma_floor() -> PerMetric<f64> {
    // Floors keep z finite when a window is nearly constant.
    PerMetric {
        temperature: 0.15,
        rainfall: 0.01,
        humidity: 0.5,
        wind_speed: 0.3,
        wind_direction: 5.0,
    }
}

fn default_simple_delta_threshold() -> PerMetric<f64> {
    PerMetric {
        temperature: 0.8,     // °C change vs previous tick
        rainfall: 0.2,        // mm in current 5-min reading
        humidity: 5.0,        // % RH
        wind_speed: 3.0,      // knots
        wind_direction: 35.0, // degrees, shortest arc
    }
}

fn default_simple_sustained_ticks() -> PerMetric<usize> {
    PerMetric {
        temperature: 2,
        rainfall: 1,
        humidity: 2,
        wind_speed: 2,
        wind_direction: 2,
    }
}

fn default_delta_min() -> PerMetric<f64> {
    PerMetric {
        temperature: 0.2,
        rainfall: 0.05,
        humidity: 1.0,
        wind_speed: 0.5,
        wind_direction: 8.0,
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Cooldown minutes per rule family.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub generic_minutes: i64,
    pub wind_minutes: i64,
    pub rain_minutes: i64,
    pub temperature_minutes: i64,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            generic_minutes: 3,
            wind_minutes: 10,
            rain_minutes: 20,
            temperature_minutes: 30,
        }
    }
}

/// Rain event thresholds. "Window" sums cover `trend_window` ticks (≈15 min).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RainConfig {
    pub trend_window: usize,
    pub onset_k: usize,
    pub onset_tick_mm: f64,
    pub onset_sum_mm: f64,
    pub intense_tick_mm: f64,
    pub intense_sum_mm: f64,
    pub calm_mm: f64,
    pub easing_drop_fraction: f64,
    pub stop_quiet_intervals: usize,
    pub stop_lookback_intervals: usize,
}

impl Default for RainConfig {
    fn default() -> Self {
        Self {
            trend_window: 3,
            onset_k: 2,
            onset_tick_mm: 0.2,
            onset_sum_mm: 0.5,
            intense_tick_mm: 2.0,
            intense_sum_mm: 3.0,
            calm_mm: 0.05,
            easing_drop_fraction: 0.5,
            stop_quiet_intervals: 2,
            stop_lookback_intervals: 6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindConfig {
    pub strong_kn: f64,
    pub very_strong_kn: f64,
    pub sustain_ticks: usize,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            strong_kn: 12.0,
            very_strong_kn: 20.0,
            sustain_ticks: 2,
        }
    }
}

/// Time-of-day temperature baseline and rule thresholds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub lookback_days: i64,
    pub min_days: usize,
    pub sigma_floor: f64,
    pub rebuild_every_minutes: i64,
    pub z_high: f64,
    /// Magnitude; a tick qualifies as low when z <= -z_low.
    pub z_low: f64,
    pub sustain_ticks: usize,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            lookback_days: 21,
            min_days: 7,
            sigma_floor: 0.4,
            rebuild_every_minutes: 180,
            z_high: 3.0,
            z_low: 3.0,
            sustain_ticks: 2,
        }
    }
}

/// Score scaling used once a model is fitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Calibration {
    /// Min-max over the scored batch, inverted.
    BatchMinMax,
    /// The forest's own anomaly score, stable across ticks.
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub refit_every_seconds: i64,
    pub min_rows: usize,
    pub max_rows: usize,
    pub n_trees: usize,
    pub sample_size: usize,
    pub seed: u64,
    pub calibration: Calibration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            refit_every_seconds: 3600,
            min_rows: 200,
            max_rows: 20_000,
            n_trees: 150,
            sample_size: 256,
            seed: 42,
            calibration: Calibration::BatchMinMax,
        }
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub poll_interval_seconds: u64,
    pub rolling_window_minutes: i64,
    /// Upstream reporting cadence; sizes the per-tick row budget.
    pub cadence_minutes: i64,
    pub min_samples: usize,
    pub neighbor_k: usize,
    pub z_threshold: f64,
    pub neighbor_z_threshold: f64,
    pub neighbor_score_threshold: f64,
    pub index_rebuild_every_ticks: u64,
    pub max_backoff_seconds: u64,
    /// Offset used for minute-of-day buckets and date parsing.
    pub local_utc_offset_hours: i32,
    #[serde(default = "default_sigma_floor", deserialize_with = "sigma_floor_table")]
    pub sigma_floor: PerMetric<f64>,
    #[serde(
        default = "default_simple_delta_threshold",
        deserialize_with = "simple_delta_threshold_table"
    )]
    pub simple_delta_threshold: PerMetric<f64>,
    #[serde(
        default = "default_simple_sustained_ticks",
        deserialize_with = "simple_sustained_ticks_table"
    )]
    pub simple_sustained_ticks: PerMetric<usize>,
    #[serde(default = "default_delta_min", deserialize_with = "delta_min_table")]
    pub delta_min: PerMetric<f64>,
    pub cooldown: CooldownConfig,
    pub rain: RainConfig,
    pub wind: WindConfig,
    pub temperature: TemperatureConfig,
    pub model: ModelConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            poll_interval_seconds: 60,
            rolling_window_minutes: 90,
            cadence_minutes: 5,
            min_samples: 5,
            neighbor_k: 4,
            z_threshold: 2.0,
            neighbor_z_threshold: 2.0,
            neighbor_score_threshold: 0.7,
            index_rebuild_every_ticks: 10,
            max_backoff_seconds: 60,
            local_utc_offset_hours: 8,
            sigma_floor: default_sigma_floor(),
            simple_delta_threshold: default_simple_delta_threshold(),
            simple_sustained_ticks: default_simple_sustained_ticks(),
            delta_min: default_delta_min(),
            cooldown: CooldownConfig::default(),
            rain: RainConfig::default(),
            wind: WindConfig::default(),
            temperature: TemperatureConfig::default(),
            model: ModelConfig::default(),
        }
    }
}

impl Settings {
    /// Rejects values that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(WxError::Config(msg.to_string()));

        if self.rolling_window_minutes <= 0 {
            return fail("rolling_window_minutes must be positive");
        }
        if self.cadence_minutes <= 0 {
            return fail("cadence_minutes must be positive");
        }
        if self.neighbor_k == 0 {
            return fail("neighbor_k must be at least 1");
        }
        if self.min_samples == 0 {
            return fail("min_samples must be at least 1");
        }
        if self.wind.strong_kn >= self.wind.very_strong_kn {
            return fail("wind.strong_kn must be below wind.very_strong_kn");
        }
        if !(self.rain.easing_drop_fraction > 0.0 && self.rain.easing_drop_fraction < 1.0) {
            return fail("rain.easing_drop_fraction must lie in (0, 1)");
        }
        if self.rain.trend_window == 0 || self.rain.stop_quiet_intervals == 0 {
            return fail("rain windows must be at least one tick");
        }
        if self.model.n_trees == 0 || self.model.sample_size < 2 {
            return fail("model needs at least one tree and a sample size of 2");
        }
        Ok(())
    }

    /// Local offset for minute-of-day bucketing.
    pub fn local_offset(&self) -> chrono::FixedOffset {
        use chrono::Offset;
        chrono::FixedOffset::east_opt(self.local_utc_offset_hours * 3600)
            .unwrap_or_else(|| chrono::Utc.fix())
    }
}

/// Load settings from a TOML file. A missing file yields defaults.
pub fn load_settings<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)?;
    let settings = parse_settings(&content)?;
    Ok(settings)
}

/// Parse and validate settings from TOML text.
pub fn parse_settings(content: &str) -> Result<Settings> {
    let settings: Settings = toml::from_str(content)?;
    settings.validate()?;
    Ok(settings)
}

// ============================================================================
// Tests
// ============================================================================
