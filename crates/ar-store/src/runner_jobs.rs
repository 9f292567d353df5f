//! Runner-job queue rows.
//!
//! Lifecycle: `reserved` (enqueue) → `queued` (finalize attaches the sealed
//! input) → `running` (runner claims) → `done` (result recorded). Each
//! transition is a guarded single statement so a raced duplicate call loses
//! cleanly.

use ar_core::types::{RunnerJob, RunnerJobStatus};
use uuid::Uuid;

use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const JOB_COLUMNS: &str = "id, project_id, run_id, target_runner_id, kind, status, payload_meta,
    sealed_input_b64, sealed_input_alg, sealed_input_key_id, result_json, created_at, updated_at";

impl StoreDb {
    pub async fn insert_runner_job(&self, job: &RunnerJob) -> Result<(), StoreError> {
        let id = job.id.to_string();
        let project_id = job.project_id.to_string();
        let run_id = job.run_id.to_string();
        let target_runner_id = job.target_runner_id.to_string();
        let kind = job.kind.clone();
        let status = enum_to_sql(&job.status);
        let payload_meta = job.payload_meta.as_ref().map(|v| v.to_string());
        let created_at = job.created_at;
        let updated_at = job.updated_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO runner_jobs (id, project_id, run_id, target_runner_id, kind,
                        status, payload_meta, created_at, updated_at)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                    rusqlite::params![
                        id,
                        project_id,
                        run_id,
                        target_runner_id,
                        kind,
                        status,
                        payload_meta,
                        created_at,
                        updated_at
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_runner_job(&self, id: Uuid) -> Result<Option<RunnerJob>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {JOB_COLUMNS} FROM runner_jobs WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_job(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Attach the sealed input and make the job visible to the runner.
    /// Only legal from `reserved`.
    pub async fn finalize_runner_job(
        &self,
        id: Uuid,
        sealed_input_b64: &str,
        sealed_input_alg: &str,
        sealed_input_key_id: &str,
        now: i64,
    ) -> Result<bool, StoreError> {
        let id = id.to_string();
        let sealed_input_b64 = sealed_input_b64.to_string();
        let sealed_input_alg = sealed_input_alg.to_string();
        let sealed_input_key_id = sealed_input_key_id.to_string();
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE runner_jobs
                     SET status = 'queued', sealed_input_b64 = ?2, sealed_input_alg = ?3,
                         sealed_input_key_id = ?4, updated_at = ?5
                     WHERE id = ?1 AND status = 'reserved'",
                    rusqlite::params![id, sealed_input_b64, sealed_input_alg, sealed_input_key_id, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Claim the oldest `queued` job addressed to this runner, flipping it to
    /// `running` in the same transaction.
    pub async fn claim_next_runner_job(
        &self,
        target_runner_id: Uuid,
        now: i64,
    ) -> Result<Option<RunnerJob>, StoreError> {
        let target_runner_id = target_runner_id.to_string();
        self.conn()
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let job = {
                    let mut stmt = tx.prepare(&format!(
                        "SELECT {JOB_COLUMNS} FROM runner_jobs
                         WHERE target_runner_id = ?1 AND status = 'queued'
                         ORDER BY created_at ASC
                         LIMIT 1"
                    ))?;
                    let mut rows = stmt.query(rusqlite::params![target_runner_id])?;
                    match rows.next()? {
                        Some(row) => Some(row_to_job(row)?),
                        None => None,
                    }
                };
                if let Some(ref job) = job {
                    tx.execute(
                        "UPDATE runner_jobs SET status = 'running', updated_at = ?2
                         WHERE id = ?1",
                        rusqlite::params![job.id.to_string(), now],
                    )?;
                }
                tx.commit()?;
                Ok(job.map(|mut j| {
                    j.status = RunnerJobStatus::Running;
                    j.updated_at = now;
                    j
                }))
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Record the runner's result. Legal from `running` (the normal path) or
    /// `queued` (a runner that skipped the claim step on redelivery).
    pub async fn complete_runner_job(
        &self,
        id: Uuid,
        result_json: &serde_json::Value,
        now: i64,
    ) -> Result<bool, StoreError> {
        let id = id.to_string();
        let result_json = result_json.to_string();
        self.conn()
            .call(move |conn| {
                let changed = conn.execute(
                    "UPDATE runner_jobs
                     SET status = 'done', result_json = ?2, updated_at = ?3
                     WHERE id = ?1 AND status IN ('queued', 'running')",
                    rusqlite::params![id, result_json, now],
                )?;
                Ok(changed == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_runner_jobs_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("runner_jobs", project_id, limit).await
    }
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunnerJob> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let run_str: String = row.get(2)?;
    let runner_str: String = row.get(3)?;
    let status_str: String = row.get(5)?;
    let payload_meta_str: Option<String> = row.get(6)?;
    let result_str: Option<String> = row.get(10)?;
    Ok(RunnerJob {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        run_id: Uuid::parse_str(&run_str).expect("valid uuid"),
        target_runner_id: Uuid::parse_str(&runner_str).expect("valid uuid"),
        kind: row.get(4)?,
        status: enum_from_sql::<RunnerJobStatus>(&status_str),
        payload_meta: payload_meta_str.map(|s| serde_json::from_str(&s).expect("valid json")),
        sealed_input_b64: row.get(7)?,
        sealed_input_alg: row.get(8)?,
        sealed_input_key_id: row.get(9)?,
        result_json: result_str.map(|s| serde_json::from_str(&s).expect("valid json")),
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}
