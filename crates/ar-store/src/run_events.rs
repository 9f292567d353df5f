//! Append-only run events, indexed by `(project_id, ts)` and `(run_id, ts)`.

use ar_core::types::RunEvent;
use uuid::Uuid;

use crate::page::{decode_cursor, Page};
use crate::{StoreDb, StoreError};

const EVENT_COLUMNS: &str = "id, project_id, run_id, ts, level, message, data, redacted";

impl StoreDb {
    /// Insert a batch of already-validated events in one transaction.
    pub async fn insert_run_events(&self, events: Vec<RunEvent>) -> Result<(), StoreError> {
        if events.is_empty() {
            return Ok(());
        }
        self.conn()
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO run_events (id, project_id, run_id, ts, level, message,
                            data, redacted)
                         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                    )?;
                    for event in &events {
                        stmt.execute(rusqlite::params![
                            event.id.to_string(),
                            event.project_id.to_string(),
                            event.run_id.to_string(),
                            event.ts,
                            event.level,
                            event.message,
                            event.data.as_ref().map(|d| d.to_string()),
                            event.redacted,
                        ])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Page a run's events, newest first, via the `(run_id, ts)` index.
    pub async fn page_run_events_by_run(
        &self,
        run_id: Uuid,
        cursor: Option<String>,
        num_items: usize,
    ) -> Result<Page<RunEvent>, StoreError> {
        let run_id = run_id.to_string();
        let after = cursor.as_deref().and_then(decode_cursor);
        let rows = self
            .conn()
            .call(move |conn| {
                let (cursor_ts, cursor_id) = after.unwrap_or((i64::MAX, String::new()));
                let cursor_id = if cursor_id.is_empty() {
                    "\u{10FFFF}".to_string()
                } else {
                    cursor_id
                };
                let mut stmt = conn.prepare(&format!(
                    "SELECT {EVENT_COLUMNS} FROM run_events
                     WHERE run_id = ?1
                       AND (ts < ?2 OR (ts = ?2 AND id < ?3))
                     ORDER BY ts DESC, id DESC
                     LIMIT ?4"
                ))?;
                let mut rows =
                    stmt.query(rusqlite::params![run_id, cursor_ts, cursor_id, num_items as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_event(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)?;

        Ok(Page::from_rows(rows, num_items, |event| (event.ts, event.id)))
    }

    /// Erasure batch: delete via the `(project_id, ts)` index.
    pub async fn delete_run_events_by_project_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM run_events WHERE id IN (
                        SELECT id FROM run_events WHERE project_id = ?1
                        ORDER BY ts LIMIT ?2)",
                    rusqlite::params![project_id, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Retention batch: events older than `cutoff`, oldest first.
    pub async fn delete_old_run_events_by_project(
        &self,
        project_id: Uuid,
        cutoff: i64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM run_events WHERE id IN (
                        SELECT id FROM run_events
                        WHERE project_id = ?1 AND ts < ?2
                        ORDER BY ts LIMIT ?3)",
                    rusqlite::params![project_id, cutoff, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Drain a single run's events via the `(run_id, ts)` index.
    pub async fn delete_run_events_by_run_batch(
        &self,
        run_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let run_id = run_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM run_events WHERE id IN (
                        SELECT id FROM run_events WHERE run_id = ?1
                        ORDER BY ts LIMIT ?2)",
                    rusqlite::params![run_id, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn count_run_events_by_run(&self, run_id: Uuid) -> Result<i64, StoreError> {
        let run_id = run_id.to_string();
        self.conn()
            .call(move |conn| {
                let count = conn
                    .prepare("SELECT COUNT(*) FROM run_events WHERE run_id = ?1")?
                    .query_row(rusqlite::params![run_id], |r| r.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::Db)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunEvent> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let run_str: String = row.get(2)?;
    let data_str: Option<String> = row.get(6)?;
    Ok(RunEvent {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        run_id: Uuid::parse_str(&run_str).expect("valid uuid"),
        ts: row.get(3)?,
        level: row.get(4)?,
        message: row.get(5)?,
        data: data_str.map(|s| serde_json::from_str(&s).expect("valid json")),
        redacted: row.get(7)?,
    })
}
