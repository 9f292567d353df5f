//! Durable delayed self-callbacks.
//!
//! The background machines cannot hold the CPU between steps; they re-enter
//! themselves by scheduling a [`TaskPayload`] and returning. The daemon's
//! dispatcher polls for due rows and routes each one back into the engine.
//! Delivery is at-least-once (a row is acknowledged only after its callback
//! returns), which the machines tolerate via their leases.

use ar_core::types::{ScheduledTask, TaskPayload};
use ar_core::{now_ms, CoreError};
use uuid::Uuid;

use crate::Engine;

/// Due rows processed per dispatcher tick.
pub const DISPATCH_BATCH: usize = 32;

impl Engine {
    /// Enqueue a delayed callback.
    pub async fn run_after(&self, delay_ms: i64, task: TaskPayload) -> Result<(), CoreError> {
        let now = now_ms();
        self.store()
            .schedule_task(&ScheduledTask {
                id: Uuid::new_v4(),
                due_at: now + delay_ms,
                task,
                created_at: now,
            })
            .await?;
        Ok(())
    }

    /// Route a task payload into its machine.
    pub async fn dispatch_task(&self, task: &TaskPayload) -> Result<(), CoreError> {
        match task {
            TaskPayload::RunDeletionJobStep { job_id } => {
                let report = self.run_deletion_job_step(*job_id).await?;
                tracing::debug!(
                    %job_id,
                    status = ?report.status,
                    stage = ?report.stage,
                    deleted = report.deleted,
                    "deletion step dispatched"
                );
            }
            TaskPayload::RetentionSweep { reason, lease_id } => {
                let report = self
                    .run_retention_sweep(reason, lease_id.as_deref())
                    .await?;
                tracing::debug!(
                    reason,
                    deleted = report.deleted,
                    projects = report.projects_visited,
                    continued = report.continued,
                    "retention sweep dispatched"
                );
            }
        }
        Ok(())
    }

    /// One dispatcher tick: run every due callback, acknowledging each row
    /// after it returns. A failing callback is logged and acknowledged
    /// anyway — the machines record their own failures on their job rows,
    /// and an always-failing task must not wedge the queue.
    pub async fn dispatch_due_tasks(&self) -> Result<usize, CoreError> {
        let due = self.store().list_due_tasks(now_ms(), DISPATCH_BATCH).await?;
        let mut dispatched = 0;
        for task in due {
            if let Err(error) = self.dispatch_task(&task.task).await {
                tracing::warn!(task = ?task.task, %error, "scheduled task failed");
            }
            self.store().delete_scheduled_task(task.id).await?;
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
