/// Recreate alerts for a historical range from stored readings.
///
/// Usage:
///   replay_alerts <metric|all> <since> [until] [--keep-existing]
///   replay_alerts rainfall "2025/09/16 to 2025/09/18"
///   replay_alerts all 2025-09-16
///
/// Existing alerts for the selected metrics in the range are deleted first
/// unless --keep-existing is given; cooldown then suppresses duplicates.

use std::env;
use std::process;

use wxguard_service::config::load_settings;
use wxguard_service::logging::{self, LogLevel};
use wxguard_service::model::{Metric, Result, WxError};
use wxguard_service::replay::{parse_range, replay};
use wxguard_service::store::PgStore;

struct Args {
    metrics: Vec<Metric>,
    range: Vec<String>,
    keep_existing: bool,
}

fn usage() {
    eprintln!(
        "Usage:\n  replay_alerts <metric|all> <since> [until] [--keep-existing]\n\n\
         Metrics: {}\n\
         Ranges:  2025-09-16 | \"2025/09/16 to 2025/09/18\" | \"2025-09-16 06:00\" \"2025-09-16 18:00\"",
        Metric::ALL.map(|m| m.as_str()).join(", ")
    );
}

fn parse_args(raw: Vec<String>) -> Result<Args> {
    let mut keep_existing = false;
    let mut positional = Vec::new();
    for arg in raw {
        match arg.as_str() {
            "--keep-existing" => keep_existing = true,
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let metric = positional
        .next()
        .ok_or_else(|| WxError::InvalidRange("missing metric".into()))?;
    let metrics = if metric.eq_ignore_ascii_case("all") {
        Metric::ALL.to_vec()
    } else {
        vec![metric.parse::<Metric>()?]
    };

    Ok(Args {
        metrics,
        range: positional.collect(),
        keep_existing,
    })
}

fn run(args: Args) -> Result<usize> {
    let config_path = env::var("WXGUARD_CONFIG").unwrap_or_else(|_| "wxguard.toml".to_string());
    let settings = load_settings(&config_path)?;

    let range: Vec<&str> = args.range.iter().map(String::as_str).collect();
    let (since, until) = parse_range(&range, settings.local_offset())?;

    let database_url = env::var("DATABASE_URL")
        .map_err(|_| WxError::Config("DATABASE_URL must be set".into()))?;
    let mut store = PgStore::connect(&database_url)?;

    println!(
        "Replaying {} from {} to {}",
        args.metrics
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        since,
        until
    );
    replay(
        &mut store,
        &settings,
        &args.metrics,
        since,
        until,
        !args.keep_existing,
    )
}

fn main() {
    dotenv::dotenv().ok();
    logging::init_logger(LogLevel::Info, None, false);

    let raw: Vec<String> = env::args().skip(1).collect();
    if raw.is_empty() || raw.iter().any(|a| a == "-h" || a == "--help") {
        usage();
        process::exit(if raw.is_empty() { 2 } else { 0 });
    }

    let args = match parse_args(raw) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            usage();
            process::exit(2);
        }
    };

    match run(args) {
        Ok(n) => println!("Inserted {} alert(s).", n),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
