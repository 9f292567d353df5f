//! Project-deletion tokens and the erasure job row.
//!
//! The job row is the erasure machine's single source of truth. Every write
//! that matters for mutual exclusion is a guarded single-statement update:
//! lease acquisition only succeeds against an expired lease, and progress
//! writes only succeed while the caller still holds the lease it minted.

use ar_core::types::{
    DeletionJobStatus, DeletionStage, ProjectDeletionJob, ProjectDeletionToken,
};
use uuid::Uuid;

use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const TOKEN_COLUMNS: &str =
    "id, project_id, token_hash, created_by_user_id, created_at, expires_at";
const JOB_COLUMNS: &str = "id, project_id, status, stage, processed, created_at, updated_at,
    completed_at, last_error, lease_id, lease_expires_at";

impl StoreDb {
    // -----------------------------------------------------------------------
    // Deletion tokens
    // -----------------------------------------------------------------------

    pub async fn insert_deletion_token(
        &self,
        token: &ProjectDeletionToken,
    ) -> Result<(), StoreError> {
        let id = token.id.to_string();
        let project_id = token.project_id.to_string();
        let token_hash = token.token_hash.clone();
        let created_by = token.created_by_user_id.to_string();
        let created_at = token.created_at;
        let expires_at = token.expires_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO project_deletion_tokens (id, project_id, token_hash,
                        created_by_user_id, created_at, expires_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![id, project_id, token_hash, created_by, created_at, expires_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn list_deletion_tokens_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<ProjectDeletionToken>, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM project_deletion_tokens WHERE project_id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_deletion_token(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Remove every deletion token for the project (issue-time reset and
    /// confirm-time consumption both land here).
    pub async fn delete_deletion_tokens_for_project(
        &self,
        project_id: Uuid,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM project_deletion_tokens WHERE project_id = ?1",
                    rusqlite::params![project_id],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_deletion_tokens_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("project_deletion_tokens", project_id, limit).await
    }

    // -----------------------------------------------------------------------
    // Deletion jobs
    // -----------------------------------------------------------------------

    pub async fn insert_deletion_job(&self, job: &ProjectDeletionJob) -> Result<(), StoreError> {
        let id = job.id.to_string();
        let project_id = job.project_id.to_string();
        let status = enum_to_sql(&job.status);
        let stage = enum_to_sql(&job.stage);
        let processed = job.processed;
        let created_at = job.created_at;
        let updated_at = job.updated_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO project_deletion_jobs (id, project_id, status, stage, processed,
                        created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7)",
                    rusqlite::params![id, project_id, status, stage, processed, created_at, updated_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_deletion_job(
        &self,
        id: Uuid,
    ) -> Result<Option<ProjectDeletionJob>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM project_deletion_jobs WHERE id = ?1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_deletion_job(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// A `pending` or `running` job for the project, if one exists. Excludes
    /// any second confirmation while the machine is working.
    pub async fn find_active_deletion_job(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectDeletionJob>, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {JOB_COLUMNS} FROM project_deletion_jobs
                     WHERE project_id = ?1 AND status IN ('pending', 'running')
                     LIMIT 1"
                ))?;
                let mut rows = stmt.query(rusqlite::params![project_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_deletion_job(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Lease compare-and-swap. Succeeds only when the job is non-terminal and
    /// holds no live lease; installs `lease_id` and flips to `running`.
    pub async fn try_acquire_job_lease(
        &self,
        job_id: Uuid,
        lease_id: &str,
        lease_expires_at: i64,
        now: i64,
    ) -> Result<bool, StoreError> {
        let job_id = job_id.to_string();
        let lease_id = lease_id.to_string();
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE project_deletion_jobs
                     SET status = 'running', lease_id = ?2, lease_expires_at = ?3,
                         last_error = NULL, updated_at = ?4
                     WHERE id = ?1
                       AND status IN ('pending', 'running')
                       AND (lease_expires_at IS NULL OR lease_expires_at <= ?4)",
                    rusqlite::params![job_id, lease_id, lease_expires_at, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Commit one step's progress and release the lease. Guarded by the
    /// caller's lease: a stale worker writes nothing.
    pub async fn commit_job_step(
        &self,
        job_id: Uuid,
        lease_id: &str,
        stage: DeletionStage,
        processed: i64,
        status: DeletionJobStatus,
        completed_at: Option<i64>,
        now: i64,
    ) -> Result<bool, StoreError> {
        let job_id = job_id.to_string();
        let lease_id = lease_id.to_string();
        let stage = enum_to_sql(&stage);
        let status = enum_to_sql(&status);
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE project_deletion_jobs
                     SET stage = ?3, processed = ?4, status = ?5, completed_at = ?6,
                         lease_id = NULL, lease_expires_at = NULL, updated_at = ?7
                     WHERE id = ?1 AND lease_id = ?2",
                    rusqlite::params![job_id, lease_id, stage, processed, status, completed_at, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Record a step failure. Terminal and sticky; clears the lease.
    pub async fn fail_deletion_job(
        &self,
        job_id: Uuid,
        error: &str,
        now: i64,
    ) -> Result<(), StoreError> {
        let job_id = job_id.to_string();
        let error = error.to_string();
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE project_deletion_jobs
                     SET status = 'failed', last_error = ?2,
                         lease_id = NULL, lease_expires_at = NULL, updated_at = ?3
                     WHERE id = ?1 AND status NOT IN ('completed', 'failed')",
                    rusqlite::params![job_id, error, now],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_deletion_token(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectDeletionToken> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let created_by_str: String = row.get(3)?;
    Ok(ProjectDeletionToken {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        token_hash: row.get(2)?,
        created_by_user_id: Uuid::parse_str(&created_by_str).expect("valid uuid"),
        created_at: row.get(4)?,
        expires_at: row.get(5)?,
    })
}

fn row_to_deletion_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectDeletionJob> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let status_str: String = row.get(2)?;
    let stage_str: String = row.get(3)?;
    Ok(ProjectDeletionJob {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        status: enum_from_sql::<DeletionJobStatus>(&status_str),
        stage: enum_from_sql::<DeletionStage>(&stage_str),
        processed: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
        completed_at: row.get(7)?,
        last_error: row.get(8)?,
        lease_id: row.get(9)?,
        lease_expires_at: row.get(10)?,
    })
}
