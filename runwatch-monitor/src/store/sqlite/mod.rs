//! SQLite implementation of `StateStore`.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`. Migrations run sequentially from the
//! current version to the target version.
//!
//! Version 1 is the layout written by the legacy poller, created with
//! `IF NOT EXISTS`, so an existing `state.db` from that tool is adopted in
//! place and upgraded by the later migrations.

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use runwatch_core::{Job, Step, WorkflowRun};
use tracing::{debug, warn};

use super::{StateStore, StoreError};

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 2;

const CHECKPOINT_KEY: &str = "last_checkpoint";

/// SQLite-backed state store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime.
pub struct SqliteStore {
    /// Exposed to tests for inspecting raw rows.
    pub(crate) conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the state database at the given path and bring its
    /// schema up to date.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL` for crash safety
    /// - `synchronous = FULL` so a committed write survives power loss
    /// - `busy_timeout = 5000ms` in case another process holds the file
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();

        let path_str = path_ref.to_string_lossy();
        if path_str != ":memory:" && !path_str.is_empty() {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", format!("{}: {}", path_str, e)))?;

        // In-memory databases report "memory" as their journal mode.
        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e))?;

        let is_in_memory = path_str == ":memory:";
        if !(journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory")))
        {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the filesystem may not \
                     support shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e))?;

        Self::initialize(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create a new in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::new(":memory:")
    }

    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e))?;

        // 0 if the table is empty: fresh database or one written by the legacy poller
        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e))?
            .unwrap_or(0);

        Self::run_migrations(conn, current_version)
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS workflow_runs (
                    id INTEGER PRIMARY KEY,
                    status TEXT,
                    conclusion TEXT,
                    headBranch TEXT,
                    headSha TEXT,
                    -- last observed updated_at of the run
                    completed_at TEXT
                );

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT
                );

                CREATE TABLE IF NOT EXISTS jobs (
                    id INTEGER PRIMARY KEY,
                    run_id INTEGER,
                    name TEXT,
                    status TEXT,
                    conclusion TEXT,
                    completed_at TEXT,
                    completed INTEGER DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS steps (
                    job_id INTEGER,
                    name TEXT,
                    status TEXT,
                    conclusion TEXT,
                    completed_at TEXT,
                    completed INTEGER DEFAULT 0,
                    UNIQUE(job_id, name)
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e))?;
        }

        // Migration from version 1 to version 2: keep the display fields the
        // event log prints, and index jobs by run.
        if from_version < 2 {
            conn.execute_batch(
                r#"
                BEGIN;
                ALTER TABLE workflow_runs ADD COLUMN name TEXT;
                ALTER TABLE workflow_runs ADD COLUMN created_at TEXT;
                ALTER TABLE jobs ADD COLUMN started_at TEXT;
                ALTER TABLE steps ADD COLUMN started_at TEXT;
                CREATE INDEX IF NOT EXISTS idx_jobs_run_id ON jobs(run_id);
                COMMIT;
                "#,
            )
            .map_err(|e| StoreError::storage("migration v2", e))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e))?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|_| StoreError::storage(operation, "connection mutex poisoned"))?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::storage(operation, e))?
    }
}

// =============================================================================
// Conversion helpers
// =============================================================================

/// Convert a provider id (u64) to i64 for SQLite storage.
///
/// Returns an error if the id exceeds i64::MAX, which would cause silent
/// overflow with `as i64`.
fn id_to_i64(id: u64, operation: &'static str) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| {
        StoreError::storage(
            operation,
            format!("id {} exceeds maximum storable value ({})", id, i64::MAX),
        )
    })
}

fn i64_to_id(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::corruption(format!("negative id {}", value)))
}

pub(crate) fn format_instant(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse a stored instant.
///
/// Besides RFC 3339, accepts the forms the legacy poller wrote: an ISO
/// offset date-time optionally followed by a bracketed zone id
/// (`2024-05-01T12:00+02:00[Europe/Amsterdam]`), with seconds omitted when
/// they are zero.
pub(crate) fn parse_instant(value: &str, what: &str) -> Result<DateTime<Utc>, StoreError> {
    let trimmed = match value.find('[') {
        Some(idx) => &value[..idx],
        None => value,
    };

    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let normalized = match trimmed.strip_suffix('Z') {
        Some(rest) => format!("{}+00:00", rest),
        None => trimmed.to_string(),
    };
    DateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M%:z")
        .map(|parsed| parsed.with_timezone(&Utc))
        .or_else(|_| {
            // Offset-less values are taken as UTC
            NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f").map(|n| n.and_utc())
        })
        .map_err(|_| StoreError::corruption(format!("{} timestamp {:?}", what, value)))
}

fn parse_optional_instant(
    value: Option<String>,
    what: &str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    value.map(|v| parse_instant(&v, what)).transpose()
}

// =============================================================================
// StateStore trait implementation
// =============================================================================

#[async_trait]
impl StateStore for SqliteStore {
    async fn initialize_schema(&self) -> Result<(), StoreError> {
        self.with_conn("initialize_schema", Self::initialize).await
    }

    async fn get_checkpoint(&self) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.with_conn("get_checkpoint", |conn| {
            let value: Option<String> = conn
                .query_row(
                    "SELECT value FROM meta WHERE key = ?1",
                    params![CHECKPOINT_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("get_checkpoint", e))?
                .flatten();

            parse_optional_instant(value, "checkpoint")
        })
        .await
    }

    async fn set_checkpoint(&self, at: DateTime<Utc>) -> Result<DateTime<Utc>, StoreError> {
        self.with_conn("set_checkpoint", move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| StoreError::storage("set_checkpoint", e))?;

            let existing: Option<String> = tx
                .query_row(
                    "SELECT value FROM meta WHERE key = ?1",
                    params![CHECKPOINT_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("set_checkpoint", e))?
                .flatten();

            if let Some(existing) = parse_optional_instant(existing, "checkpoint")? {
                if existing > at {
                    warn!(
                        "Ignoring checkpoint {} older than stored checkpoint {}",
                        format_instant(&at),
                        format_instant(&existing)
                    );
                    return Ok(existing);
                }
            }

            tx.execute(
                "INSERT INTO meta (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![CHECKPOINT_KEY, format_instant(&at)],
            )
            .map_err(|e| StoreError::storage("set_checkpoint", e))?;

            tx.commit()
                .map_err(|e| StoreError::storage("set_checkpoint", e))?;

            debug!("Checkpoint advanced to {}", format_instant(&at));
            Ok(at)
        })
        .await
    }

    async fn get_run(&self, id: u64) -> Result<Option<WorkflowRun>, StoreError> {
        let run_id = id_to_i64(id, "get_run")?;

        self.with_conn("get_run", move |conn| {
            type RunRow = (
                i64,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
                Option<String>,
            );

            let row: Option<RunRow> = conn
                .query_row(
                    "SELECT id, name, status, conclusion, headBranch, headSha, created_at, completed_at
                     FROM workflow_runs WHERE id = ?1",
                    params![run_id],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                            row.get(7)?,
                        ))
                    },
                )
                .optional()
                .map_err(|e| StoreError::storage("get_run", e))?;

            row.map(
                |(id, name, status, conclusion, head_branch, head_sha, created_at, updated_at)| {
                    Ok(WorkflowRun {
                        id: i64_to_id(id)?,
                        name,
                        status,
                        conclusion,
                        head_branch,
                        head_sha,
                        created_at: parse_optional_instant(created_at, "run created_at")?,
                        updated_at: parse_optional_instant(updated_at, "run updated_at")?,
                    })
                },
            )
            .transpose()
        })
        .await
    }

    async fn insert_run_if_absent(&self, run: &WorkflowRun) -> Result<bool, StoreError> {
        let run_id = id_to_i64(run.id, "insert_run_if_absent")?;
        let run = run.clone();

        self.with_conn("insert_run_if_absent", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO workflow_runs
                     (id, name, status, conclusion, headBranch, headSha, created_at, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        run_id,
                        run.name,
                        run.status,
                        run.conclusion,
                        run.head_branch,
                        run.head_sha,
                        run.created_at.as_ref().map(format_instant),
                        run.updated_at.as_ref().map(format_instant),
                    ],
                )
                .map_err(|e| StoreError::storage("insert_run_if_absent", e))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn update_run_status(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let run_id = id_to_i64(run.id, "update_run_status")?;
        let status = run.status.clone();
        let conclusion = run.conclusion.clone();
        let updated_at = run.updated_at.as_ref().map(format_instant);

        self.with_conn("update_run_status", move |conn| {
            let updated = conn
                .execute(
                    "UPDATE workflow_runs SET status = ?1, conclusion = ?2, completed_at = ?3
                     WHERE id = ?4",
                    params![status, conclusion, updated_at, run_id],
                )
                .map_err(|e| StoreError::storage("update_run_status", e))?;

            if updated == 0 {
                return Err(StoreError::storage(
                    "update_run_status",
                    format!("run {} not found", run_id),
                ));
            }
            Ok(())
        })
        .await
    }

    async fn job_exists(&self, job_id: u64) -> Result<bool, StoreError> {
        let job_id = id_to_i64(job_id, "job_exists")?;

        self.with_conn("job_exists", move |conn| {
            conn.query_row("SELECT 1 FROM jobs WHERE id = ?1", params![job_id], |_| Ok(()))
                .optional()
                .map(|row| row.is_some())
                .map_err(|e| StoreError::storage("job_exists", e))
        })
        .await
    }

    async fn insert_job_if_absent(&self, job: &Job, run_id: u64) -> Result<bool, StoreError> {
        let job_id = id_to_i64(job.id, "insert_job_if_absent")?;
        let run_id = id_to_i64(run_id, "insert_job_if_absent")?;
        let name = job.name.clone();
        let status = job.status.clone();
        let conclusion = job.conclusion.clone();
        let started_at = job.started_at.as_ref().map(format_instant);
        let completed_at = job.completed_at.as_ref().map(format_instant);

        self.with_conn("insert_job_if_absent", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO jobs
                     (id, run_id, name, status, conclusion, started_at, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![job_id, run_id, name, status, conclusion, started_at, completed_at],
                )
                .map_err(|e| StoreError::storage("insert_job_if_absent", e))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn is_job_completion_recorded(&self, job_id: u64) -> Result<bool, StoreError> {
        let job_id = id_to_i64(job_id, "is_job_completion_recorded")?;

        self.with_conn("is_job_completion_recorded", move |conn| {
            let completed: Option<Option<i64>> = conn
                .query_row(
                    "SELECT completed FROM jobs WHERE id = ?1",
                    params![job_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("is_job_completion_recorded", e))?;
            Ok(completed.flatten() == Some(1))
        })
        .await
    }

    async fn mark_job_completion_recorded(&self, job_id: u64) -> Result<(), StoreError> {
        let job_id = id_to_i64(job_id, "mark_job_completion_recorded")?;

        self.with_conn("mark_job_completion_recorded", move |conn| {
            conn.execute("UPDATE jobs SET completed = 1 WHERE id = ?1", params![job_id])
                .map_err(|e| StoreError::storage("mark_job_completion_recorded", e))?;
            Ok(())
        })
        .await
    }

    async fn step_exists(&self, job_id: u64, name: &str) -> Result<bool, StoreError> {
        let job_id = id_to_i64(job_id, "step_exists")?;
        let name = name.to_string();

        self.with_conn("step_exists", move |conn| {
            conn.query_row(
                "SELECT 1 FROM steps WHERE job_id = ?1 AND name = ?2",
                params![job_id, name],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(|e| StoreError::storage("step_exists", e))
        })
        .await
    }

    async fn insert_step_if_absent(&self, step: &Step, job_id: u64) -> Result<bool, StoreError> {
        let job_id = id_to_i64(job_id, "insert_step_if_absent")?;
        let step = step.clone();

        self.with_conn("insert_step_if_absent", move |conn| {
            let inserted = conn
                .execute(
                    "INSERT OR IGNORE INTO steps
                     (job_id, name, status, conclusion, started_at, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        job_id,
                        step.name,
                        step.status,
                        step.conclusion,
                        step.started_at.as_ref().map(format_instant),
                        step.completed_at.as_ref().map(format_instant),
                    ],
                )
                .map_err(|e| StoreError::storage("insert_step_if_absent", e))?;
            Ok(inserted > 0)
        })
        .await
    }

    async fn is_step_completion_recorded(
        &self,
        job_id: u64,
        name: &str,
    ) -> Result<bool, StoreError> {
        let job_id = id_to_i64(job_id, "is_step_completion_recorded")?;
        let name = name.to_string();

        self.with_conn("is_step_completion_recorded", move |conn| {
            let completed: Option<Option<i64>> = conn
                .query_row(
                    "SELECT completed FROM steps WHERE job_id = ?1 AND name = ?2",
                    params![job_id, name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoreError::storage("is_step_completion_recorded", e))?;
            Ok(completed.flatten() == Some(1))
        })
        .await
    }

    async fn mark_step_completion_recorded(
        &self,
        job_id: u64,
        name: &str,
    ) -> Result<(), StoreError> {
        let job_id = id_to_i64(job_id, "mark_step_completion_recorded")?;
        let name = name.to_string();

        self.with_conn("mark_step_completion_recorded", move |conn| {
            conn.execute(
                "UPDATE steps SET completed = 1 WHERE job_id = ?1 AND name = ?2",
                params![job_id, name],
            )
            .map_err(|e| StoreError::storage("mark_step_completion_recorded", e))?;
            Ok(())
        })
        .await
    }
}
