//! The runner-command queue and sealed-input protocol.
//!
//! Reserve-and-finalize: `enqueue` creates the run and a `reserved` job and
//! echoes the target runner's advertised sealing key; the caller encrypts
//! its sensitive payload client-side and `finalize` attaches the ciphertext,
//! making the job visible to the runner. The control plane never sees the
//! plaintext — metadata is scanned to keep secrets from leaking in around
//! the sealed channel.

use ar_core::types::{
    Run, RunEvent, RunKind, Runner, RunnerJob, RunnerJobStatus, RunStatus, SealingKey,
};
use ar_core::validate::{
    assert_no_secret_like_keys, assert_payload_meta_bounds, sanitize_error_message,
    SEALED_INPUT_MAX_B64,
};
use ar_core::{now_ms, CoreError};
use serde::Serialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::Engine;

/// Enqueue response: the job handle plus the sealing material to encrypt
/// under (when the runner advertises any).
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueReceipt {
    pub job_id: Uuid,
    pub run_id: Uuid,
    pub sealing: Option<SealingKey>,
}

/// Result-ingestion response.
#[derive(Debug, Clone, Serialize)]
pub struct TakeResultReceipt {
    pub run_id: Uuid,
    pub status: RunStatus,
}

impl Engine {
    /// `runner_jobs.enqueue` — admin-only, 60/min.
    ///
    /// `sealed_input_keys` names the payload fields the caller intends to
    /// seal; a non-empty list against a runner with no advertised sealing
    /// capability is a conflict before anything is written.
    pub async fn enqueue_runner_command(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        target_runner_id: Uuid,
        kind: &str,
        payload_meta: Option<Value>,
        sealed_input_keys: Option<Vec<String>>,
    ) -> Result<EnqueueReceipt, CoreError> {
        let user = self.ensure_user(identity).await?;
        let (_, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("runner_jobs.enqueue:{}", user.id),
            limits::RUNNER_JOBS_ENQUEUE,
        )
        .await?;

        let kind = kind.trim();
        if kind.is_empty() {
            return Err(CoreError::conflict("job kind must be non-empty"));
        }
        if let Some(meta) = &payload_meta {
            assert_no_secret_like_keys(meta, "payload_meta")?;
            assert_payload_meta_bounds(meta, "payload_meta")?;
        }

        let runner = self
            .store()
            .get_runner(target_runner_id)
            .await?
            .filter(|r| r.project_id == project_id)
            .ok_or_else(|| CoreError::not_found("runner not found in this project"))?;

        let sealing = runner.sealing_key();
        let wants_sealing = sealed_input_keys.as_ref().is_some_and(|keys| !keys.is_empty());
        if wants_sealing && sealing.is_none() {
            return Err(CoreError::conflict(format!(
                "runner `{}` does not advertise a sealed-input key; cannot enqueue sealed payload",
                runner.runner_name
            )));
        }

        let now = now_ms();
        let run = Run {
            id: Uuid::new_v4(),
            project_id,
            kind: RunKind::resolve(kind),
            status: RunStatus::Running,
            title: Some(kind.to_string()),
            host: Some(runner.runner_name.clone()),
            initiated_by_user_id: user.id,
            started_at: now,
            finished_at: None,
            error_message: None,
        };
        self.store().insert_run(&run).await?;

        let job = RunnerJob {
            id: Uuid::new_v4(),
            project_id,
            run_id: run.id,
            target_runner_id,
            kind: kind.to_string(),
            status: RunnerJobStatus::Reserved,
            payload_meta,
            sealed_input_b64: None,
            sealed_input_alg: None,
            sealed_input_key_id: None,
            result_json: None,
            created_at: now,
            updated_at: now,
        };
        self.store().insert_runner_job(&job).await?;

        self.record_audit(
            user.id,
            Some(project_id),
            "runner_job.enqueue",
            Some(runner.runner_name.clone()),
            Some(json!({"job_id": job.id, "kind": kind})),
        )
        .await?;

        Ok(EnqueueReceipt { job_id: job.id, run_id: run.id, sealing })
    }

    /// `runner_jobs.finalize` — admin-only, 60/min. Attaches the ciphertext
    /// to a `reserved` job; the sealing algorithm and key id must match what
    /// enqueue echoed.
    #[allow(clippy::too_many_arguments)]
    pub async fn finalize_runner_command(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        job_id: Uuid,
        kind: &str,
        sealed_input_b64: &str,
        sealed_input_alg: &str,
        sealed_input_key_id: &str,
    ) -> Result<(), CoreError> {
        let user = self.ensure_user(identity).await?;
        let (_, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("runner_jobs.finalize:{}", user.id),
            limits::RUNNER_JOBS_FINALIZE,
        )
        .await?;

        if sealed_input_b64.len() > SEALED_INPUT_MAX_B64 {
            return Err(CoreError::conflict("sealed input exceeds size bound"));
        }

        let job = self
            .store()
            .get_runner_job(job_id)
            .await?
            .filter(|j| j.project_id == project_id)
            .ok_or_else(|| CoreError::not_found("runner job not found"))?;
        if job.kind != kind {
            return Err(CoreError::conflict("job kind does not match reservation"));
        }

        let runner = self
            .store()
            .get_runner(job.target_runner_id)
            .await?
            .ok_or_else(|| CoreError::not_found("target runner no longer exists"))?;
        let sealing = runner.sealing_key().ok_or_else(|| {
            CoreError::conflict("target runner no longer advertises a sealing key")
        })?;
        if sealing.alg != sealed_input_alg || sealing.key_id != sealed_input_key_id {
            return Err(CoreError::conflict(
                "sealing algorithm or key id does not match the runner's advertised key",
            ));
        }

        let finalized = self
            .store()
            .finalize_runner_job(job_id, sealed_input_b64, sealed_input_alg, sealed_input_key_id, now_ms())
            .await?;
        if !finalized {
            return Err(CoreError::conflict("job is not awaiting finalization"));
        }

        self.record_audit(
            user.id,
            Some(project_id),
            "runner_job.finalize",
            Some(job_id.to_string()),
            None,
        )
        .await?;
        Ok(())
    }

    /// Runner-facing: claim the oldest queued job addressed to this runner.
    pub async fn poll_runner_job(&self, runner: &Runner) -> Result<Option<RunnerJob>, CoreError> {
        Ok(self.store().claim_next_runner_job(runner.id, now_ms()).await?)
    }

    /// Runner-facing: `take_run_result`. Stores the opaque result JSON on
    /// the job and drives the owning run to a terminal status — `failed`
    /// when the result carries an `error` member (message sanitized), else
    /// `succeeded`.
    pub async fn take_run_result(
        &self,
        runner: &Runner,
        job_id: Uuid,
        result_json: Value,
    ) -> Result<TakeResultReceipt, CoreError> {
        let job = self
            .store()
            .get_runner_job(job_id)
            .await?
            .ok_or_else(|| CoreError::not_found("runner job not found"))?;
        if job.target_runner_id != runner.id {
            return Err(CoreError::forbidden("job is addressed to a different runner"));
        }
        if result_json.to_string().len() > SEALED_INPUT_MAX_B64 {
            return Err(CoreError::conflict("result exceeds size bound"));
        }

        if !self.store().complete_runner_job(job_id, &result_json, now_ms()).await? {
            return Err(CoreError::conflict("job result already recorded"));
        }

        let error_text = match result_json.get("error") {
            Some(Value::Null) | None => None,
            Some(Value::String(s)) => sanitize_error_message(s),
            Some(other) => sanitize_error_message(&other.to_string()),
        };
        let status = if error_text.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };

        let now = now_ms();
        self.store()
            .finish_run(job.run_id, status, now, error_text.clone())
            .await?;

        let (level, message) = match &error_text {
            Some(text) => ("error", format!("runner job failed: {text}")),
            None => ("info", "runner job completed".to_string()),
        };
        self.store()
            .insert_run_events(vec![RunEvent {
                id: Uuid::new_v4(),
                project_id: job.project_id,
                run_id: job.run_id,
                ts: now,
                level: level.to_string(),
                message,
                data: Some(json!({"job_id": job.id, "kind": job.kind})),
                redacted: None,
            }])
            .await?;

        Ok(TakeResultReceipt { run_id: job.run_id, status })
    }
}
