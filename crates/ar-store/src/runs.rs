//! Run rows: one per unit of tracked work, created `running`, finished once.

use ar_core::types::{Run, RunKind, RunStatus};
use uuid::Uuid;

use crate::page::{decode_cursor, Page};
use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const RUN_COLUMNS: &str = "id, project_id, kind, status, title, host, initiated_by_user_id,
    started_at, finished_at, error_message";

impl StoreDb {
    pub async fn insert_run(&self, run: &Run) -> Result<(), StoreError> {
        let id = run.id.to_string();
        let project_id = run.project_id.to_string();
        let kind = enum_to_sql(&run.kind);
        let status = enum_to_sql(&run.status);
        let title = run.title.clone();
        let host = run.host.clone();
        let initiated_by = run.initiated_by_user_id.to_string();
        let started_at = run.started_at;
        let finished_at = run.finished_at;
        let error_message = run.error_message.clone();

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO runs (id, project_id, kind, status, title, host,
                        initiated_by_user_id, started_at, finished_at, error_message)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
                    rusqlite::params![
                        id,
                        project_id,
                        kind,
                        status,
                        title,
                        host,
                        initiated_by,
                        started_at,
                        finished_at,
                        error_message
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_run(&self, id: Uuid) -> Result<Option<Run>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {RUN_COLUMNS} FROM runs WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_run(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Transition a `running` run to a terminal status in one statement.
    /// Returns false when the run was not in `running` (already terminal),
    /// leaving the row untouched.
    pub async fn finish_run(
        &self,
        id: Uuid,
        status: RunStatus,
        finished_at: i64,
        error_message: Option<String>,
    ) -> Result<bool, StoreError> {
        let id = id.to_string();
        let status = enum_to_sql(&status);
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE runs SET status = ?2, finished_at = ?3, error_message = ?4
                     WHERE id = ?1 AND status = 'running'",
                    rusqlite::params![id, status, finished_at, error_message],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Page a project's runs, newest first, via the
    /// `(project_id, started_at)` index.
    pub async fn page_runs_by_project(
        &self,
        project_id: Uuid,
        cursor: Option<String>,
        num_items: usize,
    ) -> Result<Page<Run>, StoreError> {
        let project_id = project_id.to_string();
        let after = cursor.as_deref().and_then(decode_cursor);
        let rows = self
            .conn()
            .call(move |conn| {
                let (cursor_ts, cursor_id) = after.unwrap_or((i64::MAX, String::new()));
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs
                     WHERE project_id = ?1
                       AND (started_at < ?2 OR (started_at = ?2 AND id < ?3))
                     ORDER BY started_at DESC, id DESC
                     LIMIT ?4"
                ))?;
                // An absent cursor means "from the top": MAX ts with an empty
                // id would exclude rows at exactly MAX, so widen the id bound.
                let cursor_id = if cursor_id.is_empty() {
                    "\u{10FFFF}".to_string()
                } else {
                    cursor_id
                };
                let mut rows =
                    stmt.query(rusqlite::params![project_id, cursor_ts, cursor_id, num_items as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_run(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)?;

        Ok(Page::from_rows(rows, num_items, |run| (run.started_at, run.id)))
    }

    /// Terminal runs started before `cutoff`, oldest first. The sweeper
    /// drains each run's events before deleting the row itself.
    pub async fn list_old_terminal_runs(
        &self,
        project_id: Uuid,
        cutoff: i64,
        limit: usize,
    ) -> Result<Vec<Run>, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {RUN_COLUMNS} FROM runs
                     WHERE project_id = ?1 AND started_at < ?2 AND status != 'running'
                     ORDER BY started_at ASC
                     LIMIT ?3"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id, cutoff, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_run(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_run_row(&self, id: Uuid) -> Result<usize, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM runs WHERE id = ?1", rusqlite::params![id])?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Erasure batch: delete via the `(project_id, started_at)` index.
    pub async fn delete_runs_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM runs WHERE id IN (
                        SELECT id FROM runs WHERE project_id = ?1
                        ORDER BY started_at LIMIT ?2)",
                    rusqlite::params![project_id, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let kind_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let initiated_str: String = row.get(6)?;
    Ok(Run {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        kind: enum_from_sql::<RunKind>(&kind_str),
        status: enum_from_sql::<RunStatus>(&status_str),
        title: row.get(4)?,
        host: row.get(5)?,
        initiated_by_user_id: Uuid::parse_str(&initiated_str).expect("valid uuid"),
        started_at: row.get(7)?,
        finished_at: row.get(8)?,
        error_message: row.get(9)?,
    })
}
