/// wxguard daemon entry point.
///
/// Environment:
/// - DATABASE_URL        Postgres connection string (required, `.env` is read)
/// - WXGUARD_CONFIG      settings file (default wxguard.toml)
/// - WXGUARD_STATIONS    station seed file (default stations.toml)
/// - WXGUARD_LOG_LEVEL   debug|info|warn|error (default info)
/// - WXGUARD_LOG_FILE    append logs here instead of stderr

use std::env;
use std::path::Path;
use std::process;
use std::sync::atomic::AtomicBool;

use wxguard_service::config::load_settings;
use wxguard_service::daemon::Daemon;
use wxguard_service::logging::{self, Component, LogLevel};
use wxguard_service::stations::load_station_file;
use wxguard_service::store::{PgStore, RecordStore};

fn log_level_from_env() -> LogLevel {
    match env::var("WXGUARD_LOG_LEVEL")
        .unwrap_or_default()
        .to_ascii_lowercase()
        .as_str()
    {
        "debug" => LogLevel::Debug,
        "warn" | "warning" => LogLevel::Warning,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn seed_stations(store: &mut PgStore, path: &str) {
    if !Path::new(path).exists() {
        logging::info(
            Component::Stations,
            None,
            &format!("No station file at {}, using stations already stored", path),
        );
        return;
    }
    match load_station_file(path).and_then(|stations| store.upsert_stations(&stations)) {
        Ok(n) => logging::info(
            Component::Stations,
            None,
            &format!("Seeded {} station(s) from {}", n, path),
        ),
        Err(e) => logging::log_store_failure("station seeding", &e),
    }
}

fn main() {
    dotenv::dotenv().ok();

    let log_file = env::var("WXGUARD_LOG_FILE").ok();
    let level = log_level_from_env();
    logging::init_logger(level, log_file.as_deref(), log_file.is_none());
    logging::info(
        Component::Daemon,
        None,
        &format!(
            "Logging at {} to {}",
            level,
            log_file.as_deref().unwrap_or("stderr")
        ),
    );

    let config_path = env::var("WXGUARD_CONFIG").unwrap_or_else(|_| "wxguard.toml".to_string());
    let settings = match load_settings(&config_path) {
        Ok(s) => s,
        Err(e) => {
            logging::error(
                Component::Daemon,
                None,
                &format!("Invalid configuration in {}: {}", config_path, e),
            );
            process::exit(2);
        }
    };

    let Ok(database_url) = env::var("DATABASE_URL") else {
        logging::error(Component::Daemon, None, "DATABASE_URL must be set");
        process::exit(2);
    };
    let mut store = match PgStore::connect(&database_url) {
        Ok(store) => store,
        Err(e) => {
            logging::error(
                Component::Store,
                None,
                &format!("Failed to connect to PostgreSQL: {}", e),
            );
            process::exit(1);
        }
    };

    let stations_path =
        env::var("WXGUARD_STATIONS").unwrap_or_else(|_| "stations.toml".to_string());
    seed_stations(&mut store, &stations_path);

    // Nothing in this binary sets the flag; the service manager ends the
    // process with SIGTERM. Embedders call `Daemon::run` with their own.
    let stop = AtomicBool::new(false);
    let mut daemon = Daemon::new(settings);
    daemon.run(&mut store, &stop);
}
