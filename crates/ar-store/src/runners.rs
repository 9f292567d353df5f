//! Runner registry and runner tokens.

use ar_core::types::{Runner, RunnerStatus, RunnerToken};
use uuid::Uuid;

use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const RUNNER_COLUMNS: &str =
    "id, project_id, runner_name, last_seen_at, last_status, version, capabilities, created_at";
const TOKEN_COLUMNS: &str = "id, project_id, runner_id, token_hash, created_by_user_id,
    created_at, expires_at, revoked_at, last_used_at";

/// Validated heartbeat fields applied to the `(project_id, runner_name)` row.
#[derive(Debug, Clone)]
pub struct HeartbeatPatch {
    pub last_status: RunnerStatus,
    pub version: Option<String>,
    pub capabilities: Option<serde_json::Value>,
}

impl StoreDb {
    // -----------------------------------------------------------------------
    // Runners
    // -----------------------------------------------------------------------

    /// Upsert a runner on `(project_id, runner_name)` and return its id.
    /// Creates the row on first heartbeat.
    pub async fn upsert_runner_heartbeat(
        &self,
        project_id: Uuid,
        runner_name: &str,
        patch: HeartbeatPatch,
        now: i64,
    ) -> Result<Uuid, StoreError> {
        let project_id = project_id.to_string();
        let runner_name = runner_name.to_string();
        let status = enum_to_sql(&patch.last_status);
        let version = patch.version;
        let capabilities = patch.capabilities.map(|c| c.to_string());
        let new_id = Uuid::new_v4();

        self.conn()
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let existing: Option<String> = {
                    let mut stmt = tx.prepare(
                        "SELECT id FROM runners WHERE project_id = ?1 AND runner_name = ?2",
                    )?;
                    let mut rows = stmt.query(rusqlite::params![project_id, runner_name])?;
                    match rows.next()? {
                        Some(row) => Some(row.get(0)?),
                        None => None,
                    }
                };
                let id = match existing {
                    Some(id) => {
                        tx.execute(
                            "UPDATE runners SET last_seen_at = ?2, last_status = ?3,
                                version = ?4, capabilities = ?5
                             WHERE id = ?1",
                            rusqlite::params![id, now, status, version, capabilities],
                        )?;
                        id
                    }
                    None => {
                        tx.execute(
                            "INSERT INTO runners (id, project_id, runner_name, last_seen_at,
                                last_status, version, capabilities, created_at)
                             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                            rusqlite::params![
                                new_id.to_string(),
                                project_id,
                                runner_name,
                                now,
                                status,
                                version,
                                capabilities,
                                now
                            ],
                        )?;
                        new_id.to_string()
                    }
                };
                tx.commit()?;
                Ok(Uuid::parse_str(&id).expect("valid uuid"))
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_runner(&self, id: Uuid) -> Result<Option<Runner>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {RUNNER_COLUMNS} FROM runners WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_runner(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_runner_by_name(
        &self,
        project_id: Uuid,
        runner_name: &str,
    ) -> Result<Option<Runner>, StoreError> {
        let project_id = project_id.to_string();
        let runner_name = runner_name.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUNNER_COLUMNS} FROM runners
                     WHERE project_id = ?1 AND runner_name = ?2"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id, runner_name])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_runner(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn list_runners_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Runner>, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUNNER_COLUMNS} FROM runners
                     WHERE project_id = ?1 ORDER BY runner_name"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_runner(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_runners_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("runners", project_id, limit).await
    }

    // -----------------------------------------------------------------------
    // Runner tokens
    // -----------------------------------------------------------------------

    pub async fn insert_runner_token(&self, token: &RunnerToken) -> Result<(), StoreError> {
        let id = token.id.to_string();
        let project_id = token.project_id.to_string();
        let runner_id = token.runner_id.to_string();
        let token_hash = token.token_hash.clone();
        let created_by = token.created_by_user_id.to_string();
        let created_at = token.created_at;
        let expires_at = token.expires_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO runner_tokens (id, project_id, runner_id, token_hash,
                        created_by_user_id, created_at, expires_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    rusqlite::params![
                        id, project_id, runner_id, token_hash, created_by, created_at, expires_at
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_runner_token(&self, id: Uuid) -> Result<Option<RunnerToken>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM runner_tokens WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_token(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_runner_token_by_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<RunnerToken>, StoreError> {
        let token_hash = token_hash.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM runner_tokens WHERE token_hash = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![token_hash])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_token(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn list_runner_tokens_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<RunnerToken>, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM runner_tokens
                     WHERE project_id = ?1 ORDER BY created_at DESC"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_token(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn revoke_runner_token(&self, id: Uuid, now: i64) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE runner_tokens SET revoked_at = ?2
                     WHERE id = ?1 AND revoked_at IS NULL",
                    rusqlite::params![id, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn touch_runner_token(&self, id: Uuid, now: i64) -> Result<(), StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE runner_tokens SET last_used_at = ?2 WHERE id = ?1",
                    rusqlite::params![id, now],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_runner_tokens_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("runner_tokens", project_id, limit).await
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_runner(row: &rusqlite::Row<'_>) -> rusqlite::Result<Runner> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let status_str: String = row.get(4)?;
    let capabilities_str: Option<String> = row.get(6)?;
    Ok(Runner {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        runner_name: row.get(2)?,
        last_seen_at: row.get(3)?,
        last_status: enum_from_sql::<RunnerStatus>(&status_str),
        version: row.get(5)?,
        capabilities: capabilities_str.map(|s| serde_json::from_str(&s).expect("valid json")),
        created_at: row.get(7)?,
    })
}

fn row_to_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunnerToken> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let runner_str: String = row.get(2)?;
    let created_by_str: String = row.get(4)?;
    Ok(RunnerToken {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        runner_id: Uuid::parse_str(&runner_str).expect("valid uuid"),
        token_hash: row.get(3)?,
        created_by_user_id: Uuid::parse_str(&created_by_str).expect("valid uuid"),
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
        revoked_at: row.get(7)?,
        last_used_at: row.get(8)?,
    })
}
