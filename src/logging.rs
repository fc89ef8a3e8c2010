/// Structured logging for the weather anomaly service
///
/// Provides context-rich logging with component and station identifiers.
/// Entries are emitted as `tracing` events carrying `component` and `station`
/// fields; `init_logger` installs a fmt subscriber writing either to the
/// console or appending to a file for daemon operation.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Engine,
    Features,
    Model,
    Rules,
    Stations,
    Store,
    Daemon,
    Replay,
    Analytics,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Engine => write!(f, "ENGINE"),
            Component::Features => write!(f, "FEAT"),
            Component::Model => write!(f, "MODEL"),
            Component::Rules => write!(f, "RULES"),
            Component::Stations => write!(f, "STN"),
            Component::Store => write!(f, "DB"),
            Component::Daemon => write!(f, "SYS"),
            Component::Replay => write!(f, "REPLAY"),
            Component::Analytics => write!(f, "STATS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - store briefly unavailable, nothing to do but retry
    Expected,
    /// Unexpected failure - schema drift, bad query, or a bug
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Install the global subscriber. A second call is a no-op.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let filter: LevelFilter = min_level.into();

    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
                None
            }
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false);

    let installed = match (file, console_timestamps) {
        (Some(f), _) => builder.with_ansi(false).with_writer(Mutex::new(f)).try_init(),
        (None, true) => builder.with_writer(std::io::stderr).try_init(),
        (None, false) => builder.without_time().with_writer(std::io::stderr).try_init(),
    };

    // Already installed (tests, or a binary calling twice) is fine.
    let _ = installed;
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(component: Component, station_id: Option<&str>, message: &str) {
    tracing::info!(component = %component, station = station_id.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(component: Component, station_id: Option<&str>, message: &str) {
    tracing::warn!(component = %component, station = station_id.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(component: Component, station_id: Option<&str>, message: &str) {
    tracing::error!(component = %component, station = station_id.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(component: Component, station_id: Option<&str>, message: &str) {
    tracing::debug!(component = %component, station = station_id.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a record-store failure from its rendered message
pub fn classify_store_failure(error_message: &str) -> FailureType {
    let lower = error_message.to_lowercase();

    if lower.contains("connection refused")
        || lower.contains("connection reset")
        || lower.contains("timed out")
        || lower.contains("timeout")
    {
        FailureType::Expected
    }
    // Query or schema problems won't fix themselves on retry
    else if lower.contains("syntax error")
        || lower.contains("does not exist")
        || lower.contains("unknown alert type")
    {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a store failure with automatic classification
pub fn log_store_failure(operation: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_store_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(Component::Store, None, &message),
        FailureType::Unexpected => error(Component::Store, None, &message),
        FailureType::Unknown => warn(Component::Store, None, &message),
    }
}

// ---------------------------------------------------------------------------
// Tick Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of one orchestrator tick
pub fn log_tick_summary(stations: usize, metrics: usize, alerts: usize) {
    let message = format!(
        "Scored {} stations across {} metrics, {} alert(s) raised",
        stations, metrics, alerts
    );

    if stations == 0 {
        debug(Component::Engine, None, &message);
    } else {
        info(Component::Engine, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_and_component_labels() {
        assert_eq!(LogLevel::Warning.to_string(), "WARN");
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(Component::Features.to_string(), "FEAT");
        assert_eq!(Component::Store.to_string(), "DB");
    }

    #[test]
    fn test_log_level_maps_to_filter() {
        assert_eq!(LevelFilter::from(LogLevel::Warning), LevelFilter::WARN);
        assert_eq!(LevelFilter::from(LogLevel::Debug), LevelFilter::DEBUG);
    }

    #[test]
    fn test_failure_classification() {
        let transient = "database error: error connecting to server: Connection refused";
        assert_eq!(classify_store_failure(transient), FailureType::Expected);

        let schema = "database error: relation \"wx.readings\" does not exist";
        assert_eq!(classify_store_failure(schema), FailureType::Unexpected);

        assert_eq!(classify_store_failure("something odd"), FailureType::Unknown);
    }

    #[test]
    fn test_init_logger_twice_does_not_panic() {
        init_logger(LogLevel::Info, None, false);
        init_logger(LogLevel::Debug, None, true);
        info(Component::Daemon, None, "logger initialized");
    }
}
