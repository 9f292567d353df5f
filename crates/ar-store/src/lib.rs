//! SQLite-backed document store for the armada control plane.
//!
//! One table per entity, every lookup path from the persisted-layout contract
//! materialized as a SQL index. All access goes through [`StoreDb`], a thin
//! handle over an async SQLite connection: each `conn.call` runs on the
//! connection's worker thread and is its own transaction, and every multi-row
//! step (batch deletes, lease compare-and-swap, the rate-limit upsert) is a
//! single call so it commits or aborts as a unit.

use std::path::Path;

use tokio_rusqlite::Connection;

mod audit;
mod deletion;
mod page;
mod projects;
mod rate_limit;
mod retention;
mod run_events;
mod runner_jobs;
mod runners;
mod runs;
mod tasks;
mod users;
mod wiring;

pub use page::{decode_cursor, encode_cursor, Page};
pub use rate_limit::RateLimitOutcome;
pub use runners::HeartbeatPatch;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<StoreError> for ar_core::CoreError {
    fn from(err: StoreError) -> Self {
        ar_core::CoreError::internal(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Enum <-> SQLite string helpers
// ---------------------------------------------------------------------------

pub(crate) fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

pub(crate) fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

// ---------------------------------------------------------------------------
// StoreDb
// ---------------------------------------------------------------------------

/// Async SQLite-backed store. Cheap to clone; all clones share the same
/// underlying connection worker.
#[derive(Clone)]
pub struct StoreDb {
    conn: Connection,
}

impl StoreDb {
    /// Open (or create) a database at the given file path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref()).await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create a purely in-memory database (useful for tests).
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let db = Self { conn };
        db.init_schema().await?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Schema
    // -----------------------------------------------------------------------

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA busy_timeout=5000;
                    PRAGMA temp_store=MEMORY;

                    CREATE TABLE IF NOT EXISTS users (
                        id               TEXT PRIMARY KEY,
                        token_identifier TEXT NOT NULL UNIQUE,
                        name             TEXT,
                        email            TEXT,
                        picture_url      TEXT,
                        role             TEXT NOT NULL,
                        created_at       INTEGER NOT NULL,
                        updated_at       INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS users_by_token_identifier
                        ON users(token_identifier);

                    CREATE TABLE IF NOT EXISTS projects (
                        id               TEXT PRIMARY KEY,
                        name             TEXT NOT NULL,
                        status           TEXT NOT NULL,
                        owner_user_id    TEXT NOT NULL,
                        runner_repo_path TEXT,
                        created_at       INTEGER NOT NULL
                    );

                    CREATE TABLE IF NOT EXISTS project_members (
                        id         TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        user_id    TEXT NOT NULL,
                        role       TEXT NOT NULL,
                        created_at INTEGER NOT NULL
                    );
                    CREATE UNIQUE INDEX IF NOT EXISTS project_members_by_project_user
                        ON project_members(project_id, user_id);

                    CREATE TABLE IF NOT EXISTS project_policies (
                        id             TEXT PRIMARY KEY,
                        project_id     TEXT NOT NULL UNIQUE,
                        retention_days INTEGER NOT NULL,
                        created_at     INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS project_policies_by_project
                        ON project_policies(project_id);

                    CREATE TABLE IF NOT EXISTS project_configs (
                        id          TEXT PRIMARY KEY,
                        project_id  TEXT NOT NULL,
                        config_type TEXT NOT NULL,
                        payload     TEXT NOT NULL,
                        created_at  INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS project_configs_by_project_type
                        ON project_configs(project_id, config_type);

                    CREATE TABLE IF NOT EXISTS providers (
                        id         TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        kind       TEXT NOT NULL,
                        settings   TEXT NOT NULL,
                        created_at INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS providers_by_project
                        ON providers(project_id);

                    CREATE TABLE IF NOT EXISTS runs (
                        id                   TEXT PRIMARY KEY,
                        project_id           TEXT NOT NULL,
                        kind                 TEXT NOT NULL,
                        status               TEXT NOT NULL,
                        title                TEXT,
                        host                 TEXT,
                        initiated_by_user_id TEXT NOT NULL,
                        started_at           INTEGER NOT NULL,
                        finished_at          INTEGER,
                        error_message        TEXT
                    );
                    CREATE INDEX IF NOT EXISTS runs_by_project_started_at
                        ON runs(project_id, started_at);
                    CREATE INDEX IF NOT EXISTS runs_by_project_host_started_at
                        ON runs(project_id, host, started_at);
                    CREATE INDEX IF NOT EXISTS runs_by_project_host_kind_started_at
                        ON runs(project_id, host, kind, started_at);

                    CREATE TABLE IF NOT EXISTS run_events (
                        id         TEXT PRIMARY KEY,
                        project_id TEXT NOT NULL,
                        run_id     TEXT NOT NULL,
                        ts         INTEGER NOT NULL,
                        level      TEXT NOT NULL,
                        message    TEXT NOT NULL,
                        data       TEXT,
                        redacted   INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS run_events_by_project_ts
                        ON run_events(project_id, ts);
                    CREATE INDEX IF NOT EXISTS run_events_by_run_ts
                        ON run_events(run_id, ts);

                    CREATE TABLE IF NOT EXISTS runners (
                        id           TEXT PRIMARY KEY,
                        project_id   TEXT NOT NULL,
                        runner_name  TEXT NOT NULL,
                        last_seen_at INTEGER NOT NULL,
                        last_status  TEXT NOT NULL,
                        version      TEXT,
                        capabilities TEXT,
                        created_at   INTEGER NOT NULL
                    );
                    CREATE UNIQUE INDEX IF NOT EXISTS runners_by_project_runner
                        ON runners(project_id, runner_name);
                    CREATE INDEX IF NOT EXISTS runners_by_project
                        ON runners(project_id);

                    CREATE TABLE IF NOT EXISTS runner_tokens (
                        id                 TEXT PRIMARY KEY,
                        project_id         TEXT NOT NULL,
                        runner_id          TEXT NOT NULL,
                        token_hash         TEXT NOT NULL,
                        created_by_user_id TEXT NOT NULL,
                        created_at         INTEGER NOT NULL,
                        expires_at         INTEGER,
                        revoked_at         INTEGER,
                        last_used_at       INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS runner_tokens_by_project
                        ON runner_tokens(project_id);
                    CREATE INDEX IF NOT EXISTS runner_tokens_by_token_hash
                        ON runner_tokens(token_hash);

                    CREATE TABLE IF NOT EXISTS secret_wiring (
                        id               TEXT PRIMARY KEY,
                        project_id       TEXT NOT NULL,
                        host_name        TEXT NOT NULL,
                        secret_name      TEXT NOT NULL,
                        scope            TEXT NOT NULL,
                        status           TEXT NOT NULL,
                        required         INTEGER NOT NULL,
                        last_verified_at INTEGER,
                        updated_at       INTEGER NOT NULL
                    );
                    CREATE UNIQUE INDEX IF NOT EXISTS secret_wiring_by_project_host_secret
                        ON secret_wiring(project_id, host_name, secret_name);
                    CREATE INDEX IF NOT EXISTS secret_wiring_by_project_host
                        ON secret_wiring(project_id, host_name);

                    CREATE TABLE IF NOT EXISTS audit_logs (
                        id         TEXT PRIMARY KEY,
                        ts         INTEGER NOT NULL,
                        user_id    TEXT NOT NULL,
                        project_id TEXT,
                        action     TEXT NOT NULL,
                        target     TEXT,
                        data       TEXT
                    );
                    CREATE INDEX IF NOT EXISTS audit_logs_by_project_ts
                        ON audit_logs(project_id, ts);

                    CREATE TABLE IF NOT EXISTS rate_limits (
                        id           TEXT PRIMARY KEY,
                        key          TEXT NOT NULL UNIQUE,
                        window_start INTEGER NOT NULL,
                        count        INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS rate_limits_by_key
                        ON rate_limits(key);

                    CREATE TABLE IF NOT EXISTS project_deletion_tokens (
                        id                 TEXT PRIMARY KEY,
                        project_id         TEXT NOT NULL,
                        token_hash         TEXT NOT NULL,
                        created_by_user_id TEXT NOT NULL,
                        created_at         INTEGER NOT NULL,
                        expires_at         INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS project_deletion_tokens_by_project
                        ON project_deletion_tokens(project_id);

                    CREATE TABLE IF NOT EXISTS project_deletion_jobs (
                        id               TEXT PRIMARY KEY,
                        project_id       TEXT NOT NULL,
                        status           TEXT NOT NULL,
                        stage            TEXT NOT NULL,
                        processed        INTEGER NOT NULL,
                        created_at       INTEGER NOT NULL,
                        updated_at       INTEGER NOT NULL,
                        completed_at     INTEGER,
                        last_error       TEXT,
                        lease_id         TEXT,
                        lease_expires_at INTEGER
                    );
                    CREATE INDEX IF NOT EXISTS project_deletion_jobs_by_project_status
                        ON project_deletion_jobs(project_id, status);

                    CREATE TABLE IF NOT EXISTS retention_sweeps (
                        id               TEXT PRIMARY KEY,
                        key              TEXT NOT NULL UNIQUE,
                        cursor           TEXT,
                        lease_id         TEXT,
                        lease_expires_at INTEGER,
                        updated_at       INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS retention_sweeps_by_key
                        ON retention_sweeps(key);

                    CREATE TABLE IF NOT EXISTS runner_jobs (
                        id                  TEXT PRIMARY KEY,
                        project_id          TEXT NOT NULL,
                        run_id              TEXT NOT NULL,
                        target_runner_id    TEXT NOT NULL,
                        kind                TEXT NOT NULL,
                        status              TEXT NOT NULL,
                        payload_meta        TEXT,
                        sealed_input_b64    TEXT,
                        sealed_input_alg    TEXT,
                        sealed_input_key_id TEXT,
                        result_json         TEXT,
                        created_at          INTEGER NOT NULL,
                        updated_at          INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS runner_jobs_by_project
                        ON runner_jobs(project_id);
                    CREATE INDEX IF NOT EXISTS runner_jobs_by_runner_status
                        ON runner_jobs(target_runner_id, status);

                    CREATE TABLE IF NOT EXISTS scheduled_tasks (
                        id         TEXT PRIMARY KEY,
                        due_at     INTEGER NOT NULL,
                        task       TEXT NOT NULL,
                        created_at INTEGER NOT NULL
                    );
                    CREATE INDEX IF NOT EXISTS scheduled_tasks_by_due_at
                        ON scheduled_tasks(due_at);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }
}
