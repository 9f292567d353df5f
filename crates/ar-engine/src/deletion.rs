//! The project-erasure state machine.
//!
//! Erasure is a walk over the project's tables in a fixed stage order, one
//! bounded batch per step, driven by delayed self-callbacks. The job row
//! carries the machine state (`stage`, `processed`, `status`) plus a 60 s
//! lease that keeps concurrent redeliveries from double-executing a step.

use ar_core::crypto::{constant_time_eq, generate_lease_id, generate_token, sha256_hex};
use ar_core::types::{
    has_active_lease, DeletionJobStatus, DeletionStage, ProjectDeletionJob, ProjectDeletionToken,
    TaskPayload,
};
use ar_core::{now_ms, CoreError};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::{Engine, DELETE_BATCH_SIZE, DELETION_TOKEN_TTL_MS, JOB_STEP_DELAY_MS, LEASE_TTL_MS};

/// Issued by `delete_start`; the plaintext token appears nowhere else.
#[derive(Debug, Clone, Serialize)]
pub struct DeleteStartReceipt {
    pub token: String,
    pub expires_at: i64,
}

/// Live machine state as shown to project members.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionStatus {
    pub job_id: Uuid,
    pub project_id: Uuid,
    pub status: DeletionJobStatus,
    pub stage: DeletionStage,
    pub processed: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
}

/// What one `run_deletion_job_step` invocation accomplished.
#[derive(Debug, Clone, Serialize)]
pub struct DeletionStepReport {
    pub status: DeletionJobStatus,
    pub stage: DeletionStage,
    pub deleted: i64,
}

fn report(status: DeletionJobStatus, stage: DeletionStage, deleted: i64) -> DeletionStepReport {
    DeletionStepReport { status, stage, deleted }
}

impl Engine {
    // -----------------------------------------------------------------------
    // Triggering protocol
    // -----------------------------------------------------------------------

    /// `project_deletion.delete_start` — admin-only, 10/min. Issues a fresh
    /// one-shot confirmation token (15 min TTL), dropping any earlier unused
    /// ones for the project.
    pub async fn delete_start(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
    ) -> Result<DeleteStartReceipt, CoreError> {
        let user = self.ensure_user(identity).await?;
        let (project, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(&format!("project_deletion.start:{}", user.id), limits::DELETE_START)
            .await?;

        self.store().delete_deletion_tokens_for_project(project_id).await?;

        let now = now_ms();
        let token = generate_token()?;
        let expires_at = now + DELETION_TOKEN_TTL_MS;
        self.store()
            .insert_deletion_token(&ProjectDeletionToken {
                id: Uuid::new_v4(),
                project_id,
                token_hash: sha256_hex(&token),
                created_by_user_id: user.id,
                created_at: now,
                expires_at,
            })
            .await?;

        self.record_audit(
            user.id,
            Some(project_id),
            "project.delete_start",
            Some(project.name.clone()),
            None,
        )
        .await?;

        Ok(DeleteStartReceipt { token, expires_at })
    }

    /// `project_deletion.delete_confirm` — admin-only, 10/min. Verifies the
    /// typed confirmation string and the token digest (constant-time), then
    /// creates the job and schedules its first step.
    pub async fn delete_confirm(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        token: &str,
        confirmation: &str,
    ) -> Result<Uuid, CoreError> {
        let user = self.ensure_user(identity).await?;
        let (project, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("project_deletion.confirm:{}", user.id),
            limits::DELETE_CONFIRM,
        )
        .await?;

        let expected = format!("delete {}", project.name);
        if confirmation.trim() != expected {
            return Err(CoreError::conflict("confirmation text does not match"));
        }

        // Compare against every live token without short-circuiting, so the
        // timing of a rejection says nothing about which row came close.
        let now = now_ms();
        let presented_hash = sha256_hex(token.trim());
        let mut matched = false;
        for row in self.store().list_deletion_tokens_for_project(project_id).await? {
            let live = row.expires_at > now;
            matched |= live & constant_time_eq(&presented_hash, &row.token_hash);
        }
        if !matched {
            return Err(CoreError::conflict("invalid or expired confirmation token"));
        }

        if self.store().find_active_deletion_job(project_id).await?.is_some() {
            return Err(CoreError::conflict("project deletion already running"));
        }

        let job = ProjectDeletionJob {
            id: Uuid::new_v4(),
            project_id,
            status: DeletionJobStatus::Pending,
            stage: DeletionStage::RunEvents,
            processed: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            last_error: None,
            lease_id: None,
            lease_expires_at: None,
        };
        self.store().insert_deletion_job(&job).await?;
        self.store().delete_deletion_tokens_for_project(project_id).await?;

        self.record_audit(
            user.id,
            Some(project_id),
            "project.delete_confirm",
            Some(project.name.clone()),
            Some(json!({"job_id": job.id})),
        )
        .await?;

        self.run_after(JOB_STEP_DELAY_MS, TaskPayload::RunDeletionJobStep { job_id: job.id })
            .await?;

        tracing::info!(project_id = %project_id, job_id = %job.id, "project erasure confirmed");
        Ok(job.id)
    }

    /// `project_deletion.delete_status` — readable by any project member;
    /// once the project row itself is gone (late stages and afterwards), any
    /// authenticated caller may read the terminal state.
    pub async fn delete_status(
        &self,
        identity: Option<&Identity>,
        job_id: Uuid,
    ) -> Result<DeletionStatus, CoreError> {
        let user = self.ensure_user(identity).await?;
        let job = self
            .store()
            .get_deletion_job(job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("deletion job not found"))?;

        match self.require_project_access(&user, job.project_id).await {
            Ok(_) => {}
            // The machine deletes the project row near the end; the job
            // outlives it so the poller can observe `completed`.
            Err(CoreError::NotFound(_)) => {}
            Err(err) => return Err(err),
        }

        Ok(DeletionStatus {
            job_id: job.id,
            project_id: job.project_id,
            status: job.status,
            stage: job.stage,
            processed: job.processed,
            updated_at: job.updated_at,
            completed_at: job.completed_at,
            last_error: job.last_error,
        })
    }

    // -----------------------------------------------------------------------
    // Step execution
    // -----------------------------------------------------------------------

    /// One machine step: acquire the lease, drain one batch of the current
    /// stage, advance, release, reschedule. Redeliveries while a lease is
    /// live report `running` with zero progress. Failures are recorded on
    /// the job row, never propagated.
    pub async fn run_deletion_job_step(
        &self,
        job_id: Uuid,
    ) -> Result<DeletionStepReport, CoreError> {
        let now = now_ms();
        let Some(job) = self.store().get_deletion_job(job_id).await? else {
            return Ok(report(DeletionJobStatus::Failed, DeletionStage::Done, 0));
        };
        if job.status.is_terminal() {
            return Ok(report(job.status, job.stage, 0));
        }
        if has_active_lease(job.lease_expires_at, now) {
            return Ok(report(DeletionJobStatus::Running, job.stage, 0));
        }

        let lease_id = generate_lease_id()?;
        if !self
            .store()
            .try_acquire_job_lease(job_id, &lease_id, now + LEASE_TTL_MS, now)
            .await?
        {
            return Ok(report(DeletionJobStatus::Running, job.stage, 0));
        }
        // Re-read and verify ownership; a raced worker may have won between
        // our read and the swap.
        let job = self
            .store()
            .get_deletion_job(job_id)
            .await?
            .ok_or_else(|| CoreError::internal("deletion job vanished mid-step"))?;
        if job.lease_id.as_deref() != Some(lease_id.as_str()) {
            return Ok(report(DeletionJobStatus::Running, job.stage, 0));
        }

        match self.execute_stage_batch(job.project_id, job.stage).await {
            Ok((deleted, stage_complete)) => {
                let next_stage = if stage_complete { job.stage.next() } else { job.stage };
                let done = next_stage == DeletionStage::Done;
                let status = if done {
                    DeletionJobStatus::Completed
                } else {
                    DeletionJobStatus::Running
                };
                let processed = job.processed + deleted as i64;
                let committed = self
                    .store()
                    .commit_job_step(
                        job_id,
                        &lease_id,
                        next_stage,
                        processed,
                        status,
                        done.then(now_ms),
                        now_ms(),
                    )
                    .await?;
                if !committed {
                    return Ok(report(DeletionJobStatus::Running, job.stage, 0));
                }

                if done {
                    tracing::info!(%job_id, processed, "project erasure completed");
                } else if let Err(error) = self
                    .run_after(JOB_STEP_DELAY_MS, TaskPayload::RunDeletionJobStep { job_id })
                    .await
                {
                    self.store()
                        .fail_deletion_job(job_id, &error.to_string(), now_ms())
                        .await?;
                    return Ok(report(DeletionJobStatus::Failed, next_stage, deleted as i64));
                }
                Ok(report(status, next_stage, deleted as i64))
            }
            Err(error) => {
                tracing::warn!(%job_id, stage = ?job.stage, %error, "deletion step failed");
                self.store()
                    .fail_deletion_job(job_id, &error.to_string(), now_ms())
                    .await?;
                Ok(report(DeletionJobStatus::Failed, job.stage, 0))
            }
        }
    }

    /// Drain one batch of the given stage. Returns `(deleted, complete)`;
    /// a stage is complete when its batch came back short.
    async fn execute_stage_batch(
        &self,
        project_id: Uuid,
        stage: DeletionStage,
    ) -> Result<(usize, bool), CoreError> {
        let store = self.store();
        let batch = DELETE_BATCH_SIZE;
        let (deleted, complete) = match stage {
            DeletionStage::RunEvents => {
                let n = store.delete_run_events_by_project_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::Runs => {
                let n = store.delete_runs_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::Providers => {
                let n = store.delete_providers_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::ProjectConfigs => {
                let n = store.delete_project_configs_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::ProjectMembers => {
                let n = store.delete_project_members_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::AuditLogs => {
                let n = store.delete_audit_logs_by_project_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::ProjectPolicies => {
                let n = store.delete_project_policies_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::ProjectDeletionTokens => {
                let n = store.delete_deletion_tokens_batch(project_id, batch).await?;
                (n, n < batch)
            }
            DeletionStage::Project => {
                // Final stage: drain the runner-scoped tables and secret
                // wiring within the same batch budget, then drop the project
                // row itself. The stage repeats until everything fits.
                let mut deleted = 0;
                for drain in [
                    StoreDrain::Runners,
                    StoreDrain::RunnerTokens,
                    StoreDrain::RunnerJobs,
                    StoreDrain::SecretWiring,
                ] {
                    let room = batch - deleted;
                    if room == 0 {
                        return Ok((deleted, false));
                    }
                    deleted += drain.run(store, project_id, room).await?;
                }
                if deleted == batch {
                    return Ok((deleted, false));
                }
                deleted += store.delete_project_row(project_id).await?;
                (deleted, true)
            }
            DeletionStage::Done => (0, true),
        };
        Ok((deleted, complete))
    }
}

/// The satellite tables drained inside the `project` stage.
#[derive(Clone, Copy)]
enum StoreDrain {
    Runners,
    RunnerTokens,
    RunnerJobs,
    SecretWiring,
}

impl StoreDrain {
    async fn run(
        self,
        store: &ar_store::StoreDb,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, CoreError> {
        let n = match self {
            StoreDrain::Runners => store.delete_runners_batch(project_id, limit).await?,
            StoreDrain::RunnerTokens => store.delete_runner_tokens_batch(project_id, limit).await?,
            StoreDrain::RunnerJobs => store.delete_runner_jobs_batch(project_id, limit).await?,
            StoreDrain::SecretWiring => store.delete_secret_wiring_batch(project_id, limit).await?,
        };
        Ok(n)
    }
}
