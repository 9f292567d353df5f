//! The retention sweeper.
//!
//! Hourly (plus self-scheduled continuations), the sweeper walks project
//! policies in stable order and deletes expired run events, audit entries,
//! and terminal runs. Budgets bound every invocation; the singleton row's
//! cursor makes the walk resumable and its lease keeps sweeps exclusive.

use ar_core::crypto::generate_lease_id;
use ar_core::types::{has_active_lease, ProjectPolicy, TaskPayload};
use ar_core::validate::normalize_retention_days;
use ar_core::{now_ms, CoreError};
use serde::Serialize;

use crate::{
    Engine, CONTINUE_DELAY_MS, GLOBAL_DELETE_BUDGET, LEASE_TTL_MS, MAX_PROJECTS_PER_SWEEP,
    PER_PROJECT_DELETE_BUDGET, SWEEP_BATCH_SIZE,
};

pub const SWEEP_KEY: &str = "default";

const DAY_MS: i64 = 86_400_000;

/// Where the policy walk resumes. Serialized into the singleton's opaque
/// cursor: a project interrupted mid-budget is revisited (`At`), a finished
/// one is skipped (`After`).
#[derive(Debug, Clone, PartialEq, Eq)]
enum SweepPosition {
    At(String),
    After(String),
}

fn encode_position(position: &SweepPosition) -> String {
    match position {
        SweepPosition::At(id) => format!("at:{id}"),
        SweepPosition::After(id) => format!("after:{id}"),
    }
}

/// Malformed cursors read as "start over" rather than failing the sweep.
fn decode_position(raw: &str) -> Option<SweepPosition> {
    match raw.split_once(':')? {
        ("at", id) if !id.is_empty() => Some(SweepPosition::At(id.to_string())),
        ("after", id) if !id.is_empty() => Some(SweepPosition::After(id.to_string())),
        _ => None,
    }
}

/// Outcome of one sweep invocation.
#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub projects_visited: usize,
    pub deleted: i64,
    /// Where the walk stands; `None` after a full pass.
    pub cursor: Option<String>,
    /// True when a continuation was scheduled.
    pub continued: bool,
}

impl SweepReport {
    fn zero(cursor: Option<String>) -> Self {
        SweepReport { projects_visited: 0, deleted: 0, cursor, continued: false }
    }
}

impl Engine {
    /// `run_retention_sweep(reason, lease_id?)`.
    ///
    /// A live foreign lease means another worker is sweeping: return zero
    /// progress. A carried `lease_id` matching the holder is a continuation
    /// and renews the lease instead.
    pub async fn run_retention_sweep(
        &self,
        reason: &str,
        carried_lease_id: Option<&str>,
    ) -> Result<SweepReport, CoreError> {
        let now = now_ms();
        let sweep = self.store().get_or_create_retention_sweep(SWEEP_KEY, now).await?;

        if has_active_lease(sweep.lease_expires_at, now)
            && sweep.lease_id.as_deref() != carried_lease_id
        {
            tracing::debug!(reason, "retention sweep already held; yielding");
            return Ok(SweepReport::zero(sweep.cursor));
        }

        let lease_id = match carried_lease_id {
            Some(id) => id.to_string(),
            None => generate_lease_id()?,
        };
        if !self
            .store()
            .try_acquire_sweep_lease(SWEEP_KEY, &lease_id, carried_lease_id, now + LEASE_TTL_MS, now)
            .await?
        {
            return Ok(SweepReport::zero(sweep.cursor));
        }

        let mut position = sweep.cursor.as_deref().and_then(decode_position);
        let mut visited = 0usize;
        let mut deleted_total = 0i64;
        let mut remaining_global = GLOBAL_DELETE_BUDGET;
        let mut reached_end = false;

        'walk: while visited < MAX_PROJECTS_PER_SWEEP && remaining_global > 0 {
            let (from, inclusive) = match &position {
                None => (None, true),
                Some(SweepPosition::At(id)) => (Some(id.clone()), true),
                Some(SweepPosition::After(id)) => (Some(id.clone()), false),
            };
            let chunk = self
                .store()
                .list_policies_from(from, inclusive, MAX_PROJECTS_PER_SWEEP - visited)
                .await?;
            if chunk.is_empty() {
                reached_end = true;
                break;
            }
            for policy in chunk {
                visited += 1;
                let budget = PER_PROJECT_DELETE_BUDGET.min(remaining_global);
                match self.sweep_project(&policy, now, budget).await {
                    Ok(deleted) => {
                        deleted_total += deleted as i64;
                        remaining_global -= deleted;
                        if deleted >= budget {
                            // The project may hold more expired rows; the
                            // continuation revisits it.
                            position = Some(SweepPosition::At(policy.project_id.to_string()));
                            break 'walk;
                        }
                        position = Some(SweepPosition::After(policy.project_id.to_string()));
                    }
                    Err(error) => {
                        // One project's failure never fails the sweep.
                        tracing::warn!(
                            project_id = %policy.project_id,
                            %error,
                            "retention sweep skipped project"
                        );
                        position = Some(SweepPosition::After(policy.project_id.to_string()));
                    }
                }
                if remaining_global == 0 || visited == MAX_PROJECTS_PER_SWEEP {
                    break 'walk;
                }
            }
        }

        if reached_end {
            self.store()
                .release_sweep_lease(SWEEP_KEY, &lease_id, None, now_ms())
                .await?;
            tracing::info!(reason, deleted = deleted_total, visited, "retention sweep finished");
            return Ok(SweepReport {
                projects_visited: visited,
                deleted: deleted_total,
                cursor: None,
                continued: false,
            });
        }

        // Budget or project-count exhaustion: persist the cursor, keep the
        // lease, and hand the rest to a continuation.
        let cursor = position.as_ref().map(encode_position);
        self.store()
            .save_sweep_cursor(SWEEP_KEY, &lease_id, cursor.clone(), now_ms() + LEASE_TTL_MS, now_ms())
            .await?;
        self.run_after(
            CONTINUE_DELAY_MS,
            TaskPayload::RetentionSweep {
                reason: reason.to_string(),
                lease_id: Some(lease_id),
            },
        )
        .await?;
        tracing::info!(
            reason,
            deleted = deleted_total,
            visited,
            "retention sweep yielding; continuation scheduled"
        );
        Ok(SweepReport {
            projects_visited: visited,
            deleted: deleted_total,
            cursor,
            continued: true,
        })
    }

    /// Sweep one project within `budget` deletes. Order: expired run events,
    /// expired audit entries, then old terminal runs (each run's events
    /// drained before the run row). Non-terminal runs survive regardless of
    /// age.
    async fn sweep_project(
        &self,
        policy: &ProjectPolicy,
        now: i64,
        budget: usize,
    ) -> Result<usize, CoreError> {
        let days = normalize_retention_days(Some(policy.retention_days as f64));
        let cutoff = now - days * DAY_MS;
        let project_id = policy.project_id;
        let store = self.store();

        let mut remaining = budget;

        // (1) Run events past the cutoff.
        loop {
            if remaining == 0 {
                return Ok(budget);
            }
            let batch = SWEEP_BATCH_SIZE.min(remaining);
            let n = store.delete_old_run_events_by_project(project_id, cutoff, batch).await?;
            remaining -= n;
            if n < batch {
                break;
            }
        }

        // (2) Audit entries past the cutoff.
        loop {
            if remaining == 0 {
                return Ok(budget);
            }
            let batch = SWEEP_BATCH_SIZE.min(remaining);
            let n = store.delete_old_audit_logs_by_project(project_id, cutoff, batch).await?;
            remaining -= n;
            if n < batch {
                break;
            }
        }

        // (3) Old terminal runs, events first.
        while remaining > 0 {
            let runs = store
                .list_old_terminal_runs(project_id, cutoff, SWEEP_BATCH_SIZE.min(remaining))
                .await?;
            if runs.is_empty() {
                break;
            }
            for run in runs {
                loop {
                    if remaining == 0 {
                        return Ok(budget);
                    }
                    let batch = SWEEP_BATCH_SIZE.min(remaining);
                    let n = store.delete_run_events_by_run_batch(run.id, batch).await?;
                    remaining -= n;
                    if n < batch {
                        break;
                    }
                }
                if remaining == 0 {
                    return Ok(budget);
                }
                remaining -= store.delete_run_row(run.id).await?;
            }
        }

        Ok(budget - remaining)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_roundtrip() {
        for position in [
            SweepPosition::At("abc".to_string()),
            SweepPosition::After("abc".to_string()),
        ] {
            let encoded = encode_position(&position);
            assert_eq!(decode_position(&encoded), Some(position));
        }
    }

    #[test]
    fn malformed_positions_restart_the_walk() {
        assert_eq!(decode_position(""), None);
        assert_eq!(decode_position("abc"), None);
        assert_eq!(decode_position("at:"), None);
        assert_eq!(decode_position("before:xyz"), None);
    }
}
