#![forbid(unsafe_code)]

use rk_core::ReconcileOptions;
use rk_storage::{SqliteStore, StoreError};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RunnerConfig {
    db: PathBuf,
    dry_run: bool,
    plan_only: bool,
    busy_timeout_ms: u64,
    compact: bool,
}

fn usage() -> &'static str {
    "rekey: fold duplicate rows of a corrupted store back onto their canonical ids\n\n\
USAGE:\n\
  rekey --db PATH [--dry-run] [--plan] [--busy-timeout-ms MS] [--compact]\n\n\
ENVIRONMENT:\n\
  REKEY_DB, REKEY_DRY_RUN, REKEY_BUSY_TIMEOUT_MS, REKEY_LOG (default: info)\n\n\
NOTES:\n\
  - the whole repair runs in one exclusive transaction; any error leaves the store as it was.\n\
  - `--dry-run` runs every stage and verification, then rolls back.\n\
  - `--plan` prints the repair plan without opening a write transaction.\n\
  - the JSON report goes to stdout, logs go to stderr.\n"
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn truthy(value: &str) -> bool {
    matches!(
        value.to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// `Ok(None)` means help was requested.
fn parse_args_from(
    args: &[String],
    env: impl Fn(&str) -> Option<String>,
) -> Result<Option<RunnerConfig>, String> {
    if args.iter().any(|a| a == "-h" || a == "--help") {
        return Ok(None);
    }

    let mut db: Option<PathBuf> = env("REKEY_DB").map(PathBuf::from);
    let mut dry_run = env("REKEY_DRY_RUN").is_some_and(|v| truthy(&v));
    let mut busy_timeout_ms = match env("REKEY_BUSY_TIMEOUT_MS") {
        Some(v) => v
            .parse::<u64>()
            .map_err(|_| "REKEY_BUSY_TIMEOUT_MS must be an integer (milliseconds)")?,
        None => DEFAULT_BUSY_TIMEOUT_MS,
    };
    let mut plan_only = false;
    let mut compact = false;

    let mut i = 0usize;
    while i < args.len() {
        match args[i].as_str() {
            "--db" => {
                i += 1;
                let v = args.get(i).ok_or("--db requires PATH")?;
                db = Some(PathBuf::from(v));
            }
            "--busy-timeout-ms" => {
                i += 1;
                let v = args.get(i).ok_or("--busy-timeout-ms requires MS")?;
                busy_timeout_ms = v
                    .parse::<u64>()
                    .map_err(|_| "--busy-timeout-ms must be an integer (milliseconds)")?;
            }
            "--dry-run" => dry_run = true,
            "--plan" => plan_only = true,
            "--compact" => compact = true,
            other => return Err(format!("unknown argument: {other}\n\n{}", usage())),
        }
        i += 1;
    }

    let db = db.ok_or_else(|| format!("--db PATH (or REKEY_DB) is required\n\n{}", usage()))?;
    Ok(Some(RunnerConfig {
        db,
        dry_run,
        plan_only,
        busy_timeout_ms,
        compact,
    }))
}

fn parse_args() -> Result<RunnerConfig, String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    match parse_args_from(&args, env_var)? {
        Some(cfg) => Ok(cfg),
        None => {
            print!("{}", usage());
            std::process::exit(0);
        }
    }
}

fn init_logging() {
    let filter = env_var("REKEY_LOG")
        .and_then(|spec| EnvFilter::try_new(spec).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Runs one repair (or plan) and returns the JSON document for stdout.
fn run(cfg: &RunnerConfig) -> Result<String, StoreError> {
    let mut store = SqliteStore::open(&cfg.db)?;
    store.set_busy_timeout(Duration::from_millis(cfg.busy_timeout_ms))?;

    let document = if cfg.plan_only {
        serde_json::to_value(store.plan()?)
    } else {
        let report = store.reconcile_with(ReconcileOptions {
            dry_run: cfg.dry_run,
        })?;
        tracing::info!(
            duplicates = report.duplicates_detected(),
            rewritten = report.rows_rewritten(),
            purged = report.rows_purged(),
            committed = report.committed,
            "reconcile finished"
        );
        serde_json::to_value(&report)
    };
    let document =
        document.map_err(|_| StoreError::InvalidInput("report is not serializable"))?;

    let text = if cfg.compact {
        serde_json::to_string(&document)
    } else {
        serde_json::to_string_pretty(&document)
    };
    text.map_err(|_| StoreError::InvalidInput("report is not serializable"))
}

fn main() {
    let cfg = parse_args().unwrap_or_else(|e| {
        eprintln!("{e}");
        std::process::exit(2);
    });
    init_logging();

    match run(&cfg) {
        Ok(document) => println!("{document}"),
        Err(err) => {
            tracing::error!(code = err.code(), "reconcile aborted; store left unchanged");
            eprintln!("error[{}]: {err}", err.code());
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests;
