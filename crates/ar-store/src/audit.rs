//! Append-only audit log, indexed by `(project_id, ts)`.

use ar_core::types::AuditLog;
use uuid::Uuid;

use crate::page::{decode_cursor, Page};
use crate::{StoreDb, StoreError};

const AUDIT_COLUMNS: &str = "id, ts, user_id, project_id, action, target, data";

impl StoreDb {
    pub async fn insert_audit_log(&self, entry: &AuditLog) -> Result<(), StoreError> {
        let id = entry.id.to_string();
        let ts = entry.ts;
        let user_id = entry.user_id.to_string();
        let project_id = entry.project_id.map(|p| p.to_string());
        let action = entry.action.clone();
        let target = entry.target.clone();
        let data = entry.data.as_ref().map(|d| d.to_string());

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO audit_logs (id, ts, user_id, project_id, action, target, data)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    rusqlite::params![id, ts, user_id, project_id, action, target, data],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Page a project's audit entries, newest first.
    pub async fn page_audit_logs_by_project(
        &self,
        project_id: Uuid,
        cursor: Option<String>,
        num_items: usize,
    ) -> Result<Page<AuditLog>, StoreError> {
        let project_id = project_id.to_string();
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
                    "SELECT {AUDIT_COLUMNS} FROM audit_logs
                     WHERE project_id = ?1
                       AND (ts < ?2 OR (ts = ?2 AND id < ?3))
                     ORDER BY ts DESC, id DESC
                     LIMIT ?4"
                ))?;
                let mut rows = stmt
                    .query(rusqlite::params![project_id, cursor_ts, cursor_id, num_items as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_audit(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)?;

        Ok(Page::from_rows(rows, num_items, |entry| (entry.ts, entry.id)))
    }

    /// Erasure batch: delete via the `(project_id, ts)` index.
    pub async fn delete_audit_logs_by_project_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM audit_logs WHERE id IN (
                        SELECT id FROM audit_logs WHERE project_id = ?1
                        ORDER BY ts LIMIT ?2)",
                    rusqlite::params![project_id, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Retention batch: entries older than `cutoff`, oldest first.
    pub async fn delete_old_audit_logs_by_project(
        &self,
        project_id: Uuid,
        cutoff: i64,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM audit_logs WHERE id IN (
                        SELECT id FROM audit_logs
                        WHERE project_id = ?1 AND ts < ?2
                        ORDER BY ts LIMIT ?3)",
                    rusqlite::params![project_id, cutoff, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditLog> {
    let id_str: String = row.get(0)?;
    let user_str: String = row.get(2)?;
    let project_str: Option<String> = row.get(3)?;
    let data_str: Option<String> = row.get(6)?;
    Ok(AuditLog {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        ts: row.get(1)?,
        user_id: Uuid::parse_str(&user_str).expect("valid uuid"),
        project_id: project_str.map(|s| Uuid::parse_str(&s).expect("valid uuid")),
        action: row.get(4)?,
        target: row.get(5)?,
        data: data_str.map(|s| serde_json::from_str(&s).expect("valid json")),
    })
}
