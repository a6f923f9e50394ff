//! Tests for SQLite store implementation.

use chrono::{DateTime, Duration, TimeZone, Utc};
use rusqlite::{params, Connection};
use runwatch_core::{Job, Step, WorkflowRun};

use super::super::{StateStore, StoreError};
use super::{parse_instant, SqliteStore, CURRENT_SCHEMA_VERSION};

use proptest::prelude::*;

fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, minute, 0).unwrap()
}

fn run(id: u64, status: &str, conclusion: Option<&str>, updated: DateTime<Utc>) -> WorkflowRun {
    WorkflowRun {
        id,
        name: Some("CI".to_string()),
        status: Some(status.to_string()),
        conclusion: conclusion.map(str::to_string),
        head_branch: Some("main".to_string()),
        head_sha: Some("abc123".to_string()),
        created_at: Some(at(0)),
        updated_at: Some(updated),
    }
}

fn job(id: u64, conclusion: Option<&str>) -> Job {
    Job {
        id,
        run_id: Some(1),
        name: Some("build".to_string()),
        status: Some("in_progress".to_string()),
        conclusion: conclusion.map(str::to_string),
        started_at: Some(at(1)),
        completed_at: None,
        steps: Vec::new(),
    }
}

fn step(name: &str) -> Step {
    Step {
        name: name.to_string(),
        number: Some(1),
        status: Some("in_progress".to_string()),
        conclusion: None,
        started_at: Some(at(2)),
        completed_at: None,
    }
}

#[tokio::test]
async fn test_checkpoint_absent_on_fresh_database() {
    let store = SqliteStore::new_in_memory().unwrap();
    assert_eq!(store.get_checkpoint().await.unwrap(), None);
}

#[tokio::test]
async fn test_checkpoint_roundtrip() {
    let store = SqliteStore::new_in_memory().unwrap();
    let checkpoint = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() + Duration::milliseconds(250);

    let effective = store.set_checkpoint(checkpoint).await.unwrap();

    assert_eq!(effective, checkpoint);
    assert_eq!(store.get_checkpoint().await.unwrap(), Some(checkpoint));
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let store = SqliteStore::new_in_memory().unwrap();
    store.set_checkpoint(at(30)).await.unwrap();

    let effective = store.set_checkpoint(at(10)).await.unwrap();

    assert_eq!(effective, at(30));
    assert_eq!(store.get_checkpoint().await.unwrap(), Some(at(30)));

    let effective = store.set_checkpoint(at(45)).await.unwrap();
    assert_eq!(effective, at(45));
}

#[tokio::test]
async fn test_insert_run_is_insert_only() {
    let store = SqliteStore::new_in_memory().unwrap();
    let first = run(1, "in_progress", None, at(5));

    assert!(store.insert_run_if_absent(&first).await.unwrap());

    let second = run(1, "completed", Some("success"), at(9));
    assert!(!store.insert_run_if_absent(&second).await.unwrap());

    let stored = store.get_run(1).await.unwrap().unwrap();
    assert_eq!(stored, first);
}

#[tokio::test]
async fn test_get_run_missing_returns_none() {
    let store = SqliteStore::new_in_memory().unwrap();
    assert_eq!(store.get_run(99).await.unwrap(), None);
}

#[tokio::test]
async fn test_update_run_status_overwrites_status_fields() {
    let store = SqliteStore::new_in_memory().unwrap();
    store
        .insert_run_if_absent(&run(1, "in_progress", None, at(5)))
        .await
        .unwrap();

    let finished = run(1, "completed", Some("failure"), at(9));
    store.update_run_status(&finished).await.unwrap();

    let stored = store.get_run(1).await.unwrap().unwrap();
    assert_eq!(stored.status.as_deref(), Some("completed"));
    assert_eq!(stored.conclusion.as_deref(), Some("failure"));
    assert_eq!(stored.updated_at, Some(at(9)));
    assert_eq!(stored.head_branch.as_deref(), Some("main"));
}

#[tokio::test]
async fn test_update_run_status_of_unknown_run_fails() {
    let store = SqliteStore::new_in_memory().unwrap();
    let err = store
        .update_run_status(&run(5, "completed", None, at(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Storage { .. }));
}

#[tokio::test]
async fn test_job_flags() {
    let store = SqliteStore::new_in_memory().unwrap();

    assert!(!store.job_exists(10).await.unwrap());
    assert!(!store.is_job_completion_recorded(10).await.unwrap());

    assert!(store.insert_job_if_absent(&job(10, None), 1).await.unwrap());
    assert!(!store.insert_job_if_absent(&job(10, Some("success")), 1).await.unwrap());
    assert!(store.job_exists(10).await.unwrap());
    assert!(!store.is_job_completion_recorded(10).await.unwrap());

    store.mark_job_completion_recorded(10).await.unwrap();
    assert!(store.is_job_completion_recorded(10).await.unwrap());

    // First observation wins for the stored fields
    let conn = store.conn.lock().unwrap();
    let (run_id, conclusion): (i64, Option<String>) = conn
        .query_row(
            "SELECT run_id, conclusion FROM jobs WHERE id = 10",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(run_id, 1);
    assert_eq!(conclusion, None);
}

#[tokio::test]
async fn test_step_flags_are_keyed_by_job_and_name() {
    let store = SqliteStore::new_in_memory().unwrap();

    assert!(store.insert_step_if_absent(&step("build"), 10).await.unwrap());
    assert!(!store.insert_step_if_absent(&step("build"), 10).await.unwrap());
    assert!(store.insert_step_if_absent(&step("build"), 11).await.unwrap());
    assert!(store.insert_step_if_absent(&step("test"), 10).await.unwrap());

    assert!(store.step_exists(10, "build").await.unwrap());
    assert!(!store.step_exists(10, "deploy").await.unwrap());

    store.mark_step_completion_recorded(10, "build").await.unwrap();
    assert!(store.is_step_completion_recorded(10, "build").await.unwrap());
    assert!(!store.is_step_completion_recorded(11, "build").await.unwrap());
    assert!(!store.is_step_completion_recorded(10, "test").await.unwrap());
    assert!(!store.is_step_completion_recorded(12, "missing").await.unwrap());
}

#[tokio::test]
async fn test_ids_beyond_i64_are_rejected() {
    let store = SqliteStore::new_in_memory().unwrap();
    let err = store.job_exists(u64::MAX).await.unwrap_err();
    assert!(matches!(err, StoreError::Storage { .. }));
}

#[tokio::test]
async fn test_initialize_schema_is_idempotent() {
    let store = SqliteStore::new_in_memory().unwrap();
    store
        .insert_run_if_absent(&run(1, "queued", None, at(1)))
        .await
        .unwrap();

    store.initialize_schema().await.unwrap();
    store.initialize_schema().await.unwrap();

    assert!(store.get_run(1).await.unwrap().is_some());
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("state.db");

    {
        let store = SqliteStore::new(&path).unwrap();
        store.set_checkpoint(at(20)).await.unwrap();
        store.insert_job_if_absent(&job(10, None), 1).await.unwrap();
        store.mark_job_completion_recorded(10).await.unwrap();
    }

    let store = SqliteStore::new(&path).unwrap();
    assert_eq!(store.get_checkpoint().await.unwrap(), Some(at(20)));
    assert!(store.is_job_completion_recorded(10).await.unwrap());
}

#[test]
fn test_schema_version_is_set() {
    let store = SqliteStore::new_in_memory().unwrap();
    let conn = store.conn.lock().unwrap();
    let version: i64 = conn
        .query_row("SELECT version FROM schema_version WHERE id = 1", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

#[test]
fn test_rejects_newer_schema_version() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    drop(SqliteStore::new(&path).unwrap());
    {
        let conn = Connection::open(&path).unwrap();
        conn.execute(
            "UPDATE schema_version SET version = ?1 WHERE id = 1",
            params![CURRENT_SCHEMA_VERSION + 1],
        )
        .unwrap();
    }

    let result = SqliteStore::new(&path);
    assert!(matches!(result, Err(StoreError::Storage { .. })));
}

/// A database written by the legacy poller has the v1 tables, no
/// schema_version row, and Java-formatted timestamps.
#[tokio::test]
async fn test_adopts_legacy_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.db");

    {
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE workflow_runs (id INTEGER PRIMARY KEY, status TEXT, conclusion TEXT,
                headBranch TEXT, headSha TEXT, completed_at TEXT);
            CREATE TABLE meta (key TEXT PRIMARY KEY, value TEXT);
            CREATE TABLE jobs (id INTEGER PRIMARY KEY, run_id INTEGER, name TEXT, status TEXT,
                conclusion TEXT, completed_at TEXT, completed INTEGER DEFAULT 0);
            CREATE TABLE steps (job_id INTEGER, name TEXT, status TEXT, conclusion TEXT,
                completed_at TEXT, completed INTEGER DEFAULT 0, UNIQUE(job_id, name));
            INSERT INTO meta VALUES ('last_checkpoint', '2024-05-01T12:00+02:00[Europe/Amsterdam]');
            INSERT INTO workflow_runs VALUES (1, 'completed', 'success', 'main', 'abc', '2024-05-01T09:30:15Z');
            INSERT INTO jobs (id, run_id, name, status, conclusion, completed) VALUES (10, 1, 'build', 'completed', 'success', 1);
            "#,
        )
        .unwrap();
    }

    let store = SqliteStore::new(&path).unwrap();

    assert_eq!(store.get_checkpoint().await.unwrap(), Some(at(0)));
    let stored = store.get_run(1).await.unwrap().unwrap();
    assert_eq!(stored.name, None);
    assert_eq!(
        stored.updated_at,
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 15).unwrap())
    );
    assert!(store.is_job_completion_recorded(10).await.unwrap());
}

#[test]
fn test_parse_instant_rejects_garbage() {
    let err = parse_instant("yesterday", "checkpoint").unwrap_err();
    assert!(matches!(err, StoreError::Corruption { .. }));
}

#[test]
fn test_parse_instant_accepts_minute_precision_utc() {
    assert_eq!(parse_instant("2024-05-01T10:07Z", "t").unwrap(), at(7));
}

proptest! {
    /// Property: the stored checkpoint after each write is the running maximum.
    #[test]
    fn checkpoint_is_running_maximum(offsets in proptest::collection::vec(0i64..100_000, 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = SqliteStore::new_in_memory().unwrap();
            let base = at(0);
            let mut expected = None;

            for offset in &offsets {
                let candidate = base + Duration::seconds(*offset);
                expected = Some(expected.map_or(candidate, |e: DateTime<Utc>| e.max(candidate)));

                let effective = store.set_checkpoint(candidate).await.unwrap();
                assert_eq!(Some(effective), expected);
                assert_eq!(store.get_checkpoint().await.unwrap(), expected);
            }
        });
    }
}
