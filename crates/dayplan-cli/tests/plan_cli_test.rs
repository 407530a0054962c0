//! End-to-end tests for the `dayplan` binary.
//!
//! Each run gets an empty `XDG_CONFIG_HOME` so a developer's own config file
//! never leaks in. The PostgreSQL tests use a fresh database from
//! `dayplan-test-utils`.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

use dayplan_test_utils::{create_test_db, drop_test_db, pg_url};

const ANCHORS: &str = r#"
[[anchors]]
id = "calc"
title = "Calculus"
start = "2030-01-15T09:00:00"
end = "2030-01-15T10:00:00"
location = "North Campus"
type = "class"
"#;

// -----------------------------------------------------------------------
// Helpers
// -----------------------------------------------------------------------

fn dayplan(config_home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dayplan"))
        .args(args)
        .env("XDG_CONFIG_HOME", config_home)
        .env_remove("DAYPLAN_DATABASE_URL")
        .env_remove("DAYPLAN_ANCHORS_FILE")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run dayplan binary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

fn anchors_file(dir: &TempDir) -> String {
    let path = dir.path().join("anchors.toml");
    std::fs::write(&path, ANCHORS).unwrap();
    path.to_string_lossy().into_owned()
}

// -----------------------------------------------------------------------
// Without a database
// -----------------------------------------------------------------------

#[test]
fn init_writes_config_once() {
    let tmp = TempDir::new().unwrap();

    let out = dayplan(
        tmp.path(),
        &["init", "--db-url", "postgresql://db:5432/dayplan", "--home", "Maple St"],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    let written = std::fs::read_to_string(tmp.path().join("dayplan/config.toml")).unwrap();
    assert!(written.contains("postgresql://db:5432/dayplan"), "{written}");
    assert!(written.contains("Maple St"), "{written}");

    let again = dayplan(tmp.path(), &["init"]);
    assert!(!again.status.success());
    assert!(stderr(&again).contains("already exists"), "{}", stderr(&again));
}

#[test]
fn generate_in_memory_prints_chain() {
    let tmp = TempDir::new().unwrap();
    let anchors = anchors_file(&tmp);

    let out = dayplan(
        tmp.path(),
        &[
            "plan", "generate", "--in-memory", "--user", "u1", "--date", "2030-01-15",
            "--wake", "07:00", "--sleep", "23:00", "--energy", "medium", "--anchors", &anchors,
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));

    let text = stdout(&out);
    assert!(text.contains("Plan generated."), "{text}");
    assert!(text.contains("Chain chain-calc (deadline 09:00)"), "{text}");
    assert!(text.contains("08:40-09:00  chain-calc-travel-there"), "{text}");
    assert!(text.contains("08:40  for calc"), "{text}");
}

#[test]
fn generate_without_anchors_needs_manual_anchor() {
    let tmp = TempDir::new().unwrap();
    let base = [
        "plan", "generate", "--in-memory", "--user", "u1", "--date", "2030-01-15", "--wake",
        "07:00", "--sleep", "23:00", "--energy", "low",
    ];

    let out = dayplan(tmp.path(), &base);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("manual anchor is required"), "{}", stderr(&out));

    let mut with_manual = base.to_vec();
    with_manual.extend([
        "--manual-title", "Dentist", "--manual-start", "14:00", "--manual-end", "14:45",
    ]);
    let out = dayplan(tmp.path(), &with_manual);
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains("chain-manual-prep"), "{}", stdout(&out));
}

// -----------------------------------------------------------------------
// Against PostgreSQL
// -----------------------------------------------------------------------

#[tokio::test]
async fn generate_show_and_reorder_against_postgres() {
    let (pool, db_name) = create_test_db().await;
    let url = format!("{}/{db_name}", pg_url().await);
    let tmp = TempDir::new().unwrap();
    let anchors = anchors_file(&tmp);

    let out = dayplan(
        tmp.path(),
        &[
            "--database-url", &url, "plan", "generate", "--user", "u1", "--date", "2030-01-15",
            "--wake", "07:00", "--sleep", "23:00", "--energy", "medium", "--anchors", &anchors,
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));

    let out = dayplan(
        tmp.path(),
        &["--database-url", &url, "plan", "show", "--user", "u1", "--date", "2030-01-15", "--json"],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    let plan: serde_json::Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(plan["chains"][0]["chain_id"], "chain-calc");
    assert_eq!(plan["chains"][0]["metadata"]["reconstructed_from_time_blocks"], true);

    let out = dayplan(
        tmp.path(),
        &[
            "--database-url", &url, "plan", "reorder", "--user", "u1", "--date", "2030-01-15",
            "chain-calc-travel-there", "chain-calc-prep",
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    let text = stdout(&out);
    assert!(text.contains("08:30-08:50  chain-calc-travel-there"), "{text}");
    assert!(text.contains("08:50-09:00  chain-calc-prep"), "{text}");

    let plans = dayplan_db::queries::plans::list_daily_plans(&pool, "u1").await.unwrap();
    let blocks = dayplan_db::queries::time_blocks::list_time_blocks_for_plan(&pool, plans[0].id)
        .await
        .unwrap();
    let block_id = blocks[0].id.to_string();
    let out = dayplan(
        tmp.path(),
        &[
            "--database-url", &url, "block", "merge-metadata", "--user", "u1", &block_id,
            r#"{"note": "bring charger"}"#,
        ],
    );
    assert!(out.status.success(), "{}", stderr(&out));
    assert!(stdout(&out).contains("bring charger"), "{}", stdout(&out));

    pool.close().await;
    drop_test_db(&db_name).await;
}
