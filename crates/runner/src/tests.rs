#![forbid(unsafe_code)]

use super::*;
use rk_core::{Cell, EntityKind};
use serde_json::Value;
use std::collections::BTreeMap;

fn args(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>();
    move |name: &str| map.get(name).cloned()
}

fn seeded_store(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("rekey.db");
    let mut store = SqliteStore::create(&path).expect("create store");
    let class = [Cell::from("java.lang.String"), Cell::Integer(7)];
    store
        .insert_row(EntityKind::Class, Some(1), &class)
        .expect("insert class");
    store
        .insert_row(EntityKind::Class, Some(21), &class)
        .expect("insert duplicate class");
    store
        .insert_row(EntityKind::String, Some(10), &[Cell::from("x"), Cell::Integer(8)])
        .expect("insert string");
    store
        .insert_row(EntityKind::Value, Some(40), &[Cell::Integer(21), Cell::Integer(10)])
        .expect("insert value");
    path
}

#[test]
fn flags_override_environment() {
    let env = env_from(&[("REKEY_DB", "/env.db"), ("REKEY_BUSY_TIMEOUT_MS", "250")]);
    let cfg = parse_args_from(&args(&["--db", "/flag.db", "--busy-timeout-ms", "900"]), env)
        .expect("parse")
        .expect("config");
    assert_eq!(cfg.db, PathBuf::from("/flag.db"));
    assert_eq!(cfg.busy_timeout_ms, 900);
    assert!(!cfg.dry_run);
}

#[test]
fn environment_fills_missing_flags() {
    let env = env_from(&[("REKEY_DB", "/env.db"), ("REKEY_DRY_RUN", "yes")]);
    let cfg = parse_args_from(&args(&["--compact"]), env)
        .expect("parse")
        .expect("config");
    assert_eq!(
        cfg,
        RunnerConfig {
            db: PathBuf::from("/env.db"),
            dry_run: true,
            plan_only: false,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            compact: true,
        }
    );
}

#[test]
fn usage_errors_are_reported() {
    let none = env_from(&[]);
    assert!(
        parse_args_from(&args(&[]), &none)
            .expect_err("db required")
            .contains("--db PATH")
    );
    assert!(
        parse_args_from(&args(&["--db"]), &none)
            .expect_err("missing value")
            .contains("requires PATH")
    );
    assert!(
        parse_args_from(&args(&["--db", "x", "--busy-timeout-ms", "soon"]), &none)
            .expect_err("not a number")
            .contains("must be an integer")
    );
    assert!(
        parse_args_from(&args(&["--db", "x", "--force"]), &none)
            .expect_err("unknown flag")
            .starts_with("unknown argument: --force")
    );
    assert_eq!(parse_args_from(&args(&["--help"]), &none), Ok(None));
}

#[test]
fn run_prints_a_committed_report() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = RunnerConfig {
        db: seeded_store(dir.path()),
        dry_run: false,
        plan_only: false,
        busy_timeout_ms: 100,
        compact: true,
    };

    let text = run(&cfg).expect("run");
    assert!(!text.contains('\n'));
    let report: Value = serde_json::from_str(&text).expect("parse report");
    assert_eq!(report["committed"], true);
    assert_eq!(report["entities"][0]["rows_purged"], 1);

    let again: Value = serde_json::from_str(&run(&cfg).expect("second run")).expect("parse");
    assert_eq!(again["entities"][0]["duplicates_detected"], 0);
}

#[test]
fn plan_mode_leaves_the_store_alone() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = RunnerConfig {
        db: seeded_store(dir.path()),
        dry_run: false,
        plan_only: true,
        busy_timeout_ms: 100,
        compact: false,
    };

    let plan: Value = serde_json::from_str(&run(&cfg).expect("plan")).expect("parse plan");
    assert_eq!(plan["order"][0], "class");
    assert_eq!(plan["tables"][0]["remap"]["entries"][0]["duplicate_id"], 21);

    let store = SqliteStore::open(&cfg.db).expect("reopen");
    assert_eq!(store.count_rows(EntityKind::Class).expect("count"), 2);
}

#[test]
fn missing_database_is_an_engine_error() {
    let dir = tempfile::tempdir().expect("temp dir");
    let cfg = RunnerConfig {
        db: dir.path().join("absent.db"),
        dry_run: false,
        plan_only: false,
        busy_timeout_ms: 100,
        compact: true,
    };
    assert_eq!(run(&cfg).expect_err("missing store").code(), "IO");
}
