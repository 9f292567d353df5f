//! The retention-sweep singleton row.

use ar_core::types::RetentionSweep;
use uuid::Uuid;

use crate::{StoreDb, StoreError};

const SWEEP_COLUMNS: &str = "id, key, cursor, lease_id, lease_expires_at, updated_at";

impl StoreDb {
    /// Fetch the singleton coordinator row, creating it on first use.
    pub async fn get_or_create_retention_sweep(
        &self,
        key: &str,
        now: i64,
    ) -> Result<RetentionSweep, StoreError> {
        let key = key.to_string();
        let new_id = Uuid::new_v4().to_string();
        self.conn()
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                tx.execute(
                    "INSERT INTO retention_sweeps (id, key, updated_at)
                     VALUES (?1,?2,?3)
                     ON CONFLICT(key) DO NOTHING",
                    rusqlite::params![new_id, key, now],
                )?;
                let row = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {SWEEP_COLUMNS} FROM retention_sweeps WHERE key = ?1"
                    ))?;
                    stmt.query_row(rusqlite::params![key], row_to_sweep)?
                };
                tx.commit()?;
                Ok(row)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Lease compare-and-swap on the singleton. Succeeds when no live lease
    /// exists, or when `carried_lease_id` matches the current holder (a sweep
    /// continuation renewing its own lease).
    pub async fn try_acquire_sweep_lease(
        &self,
        key: &str,
        lease_id: &str,
        carried_lease_id: Option<&str>,
        lease_expires_at: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let key = key.to_string();
        let lease_id = lease_id.to_string();
        let carried = carried_lease_id.map(|s| s.to_string());
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE retention_sweeps
                     SET lease_id = ?2, lease_expires_at = ?3, updated_at = ?4
                     WHERE key = ?1
                       AND (lease_expires_at IS NULL
                            OR lease_expires_at <= ?4
                            OR lease_id = ?5)",
                    rusqlite::params![key, lease_id, lease_expires_at, now, carried],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Write the continuation cursor while keeping the lease (budget
    /// exhausted mid-listing; a follow-up sweep is scheduled).
    pub async fn save_sweep_cursor(
        &self,
        key: &str,
        lease_id: &str,
        cursor: Option<String>,
        lease_expires_at: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let key = key.to_string();
        let lease_id = lease_id.to_string();
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE retention_sweeps
                     SET cursor = ?3, lease_expires_at = ?4, updated_at = ?5
                     WHERE key = ?1 AND lease_id = ?2",
                    rusqlite::params![key, lease_id, cursor, lease_expires_at, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Finish a sweep: clear the cursor (or leave a partial one) and release
    /// the lease. Guarded by the caller's lease.
    pub async fn release_sweep_lease(
        &self,
        key: &str,
        lease_id: &str,
        cursor: Option<String>,
        now: i64,
    ) -> Result<bool, StoreError> {
        let key = key.to_string();
        let lease_id = lease_id.to_string();
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE retention_sweeps
                     SET cursor = ?3, lease_id = NULL, lease_expires_at = NULL, updated_at = ?4
                     WHERE key = ?1 AND lease_id = ?2",
                    rusqlite::params![key, lease_id, cursor, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }
}

fn row_to_sweep(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetentionSweep> {
    let id_str: String = row.get(0)?;
    Ok(RetentionSweep {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        key: row.get(1)?,
        cursor: row.get(2)?,
        lease_id: row.get(3)?,
        lease_expires_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}
