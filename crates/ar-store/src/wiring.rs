//! Secret-wiring rows, upserted by `(project_id, host_name, secret_name)`.

use ar_core::types::{SecretWiring, WiringScope, WiringStatus};
use uuid::Uuid;

use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const WIRING_COLUMNS: &str = "id, project_id, host_name, secret_name, scope, status, required,
    last_verified_at, updated_at";

impl StoreDb {
    pub async fn upsert_secret_wiring(&self, wiring: &SecretWiring) -> Result<(), StoreError> {
        let id = wiring.id.to_string();
        let project_id = wiring.project_id.to_string();
        let host_name = wiring.host_name.clone();
        let secret_name = wiring.secret_name.clone();
        let scope = enum_to_sql(&wiring.scope);
        let status = enum_to_sql(&wiring.status);
        let required = wiring.required;
        let last_verified_at = wiring.last_verified_at;
        let updated_at = wiring.updated_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO secret_wiring (id, project_id, host_name, secret_name, scope,
                        status, required, last_verified_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)
                     ON CONFLICT(project_id, host_name, secret_name) DO UPDATE SET
                        scope = excluded.scope,
                        status = excluded.status,
                        required = excluded.required,
                        last_verified_at = excluded.last_verified_at,
                        updated_at = excluded.updated_at",
                    rusqlite::params![
                        id,
                        project_id,
                        host_name,
                        secret_name,
                        scope,
                        status,
                        required,
                        last_verified_at,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn list_secret_wiring_by_project_host(
        &self,
        project_id: Uuid,
        host_name: &str,
    ) -> Result<Vec<SecretWiring>, StoreError> {
        let project_id = project_id.to_string();
        let host_name = host_name.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {WIRING_COLUMNS} FROM secret_wiring
                     WHERE project_id = ?1 AND host_name = ?2
                     ORDER BY secret_name"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id, host_name])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_wiring(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_secret_wiring_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("secret_wiring", project_id, limit).await
    }
}

fn row_to_wiring(row: &rusqlite::Row<'_>) -> rusqlite::Result<SecretWiring> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let scope_str: String = row.get(4)?;
    let status_str: String = row.get(5)?;
    Ok(SecretWiring {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        host_name: row.get(2)?,
        secret_name: row.get(3)?,
        scope: enum_from_sql::<WiringScope>(&scope_str),
        status: enum_from_sql::<WiringStatus>(&status_str),
        required: row.get(6)?,
        last_verified_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}
