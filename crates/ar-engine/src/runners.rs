//! Runner registry: heartbeat upserts and listing.

use ar_core::types::{Runner, RunnerStatus};
use ar_core::validate::{CAPABILITIES_MAX_JSON, VERSION_MAX_LEN};
use ar_core::{now_ms, CoreError};
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::Engine;

/// Incoming heartbeat fields. `reported_status` is what the agent claims;
/// anything other than an explicit `offline` reads as `online`.
#[derive(Debug, Clone, Default)]
pub struct HeartbeatInput {
    pub reported_status: Option<String>,
    pub version: Option<String>,
    pub capabilities: Option<Value>,
}

impl Engine {
    /// `runners.upsert_heartbeat` — admin-only, 240/min. Creates the runner
    /// row on first contact, refreshes `last_seen_at` and advertised fields
    /// on every beat. Returns the runner id.
    pub async fn upsert_runner_heartbeat(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        runner_name: &str,
        input: HeartbeatInput,
    ) -> Result<Uuid, CoreError> {
        let user = self.ensure_user(identity).await?;
        let (_, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("runners.upsert_heartbeat:{}", user.id),
            limits::RUNNERS_HEARTBEAT,
        )
        .await?;

        let runner_name = runner_name.trim();
        if runner_name.is_empty() {
            return Err(CoreError::conflict("runner_name must be non-empty"));
        }
        if let Some(version) = &input.version {
            if version.chars().count() > VERSION_MAX_LEN {
                return Err(CoreError::conflict("version exceeds length bound"));
            }
        }
        if let Some(capabilities) = &input.capabilities {
            if !capabilities.is_object() {
                return Err(CoreError::conflict("capabilities must be an object"));
            }
            if capabilities.to_string().len() > CAPABILITIES_MAX_JSON {
                return Err(CoreError::conflict("capabilities exceed size bound"));
            }
        }

        let last_status = match input.reported_status.as_deref() {
            Some("offline") => RunnerStatus::Offline,
            _ => RunnerStatus::Online,
        };

        let runner_id = self
            .store()
            .upsert_runner_heartbeat(
                project_id,
                runner_name,
                ar_store::HeartbeatPatch {
                    last_status,
                    version: input.version,
                    capabilities: input.capabilities,
                },
                now_ms(),
            )
            .await?;
        tracing::debug!(%runner_id, runner_name, ?last_status, "runner heartbeat");
        Ok(runner_id)
    }

    /// `runners.list_by_project` — any project member.
    pub async fn list_runners(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
    ) -> Result<Vec<Runner>, CoreError> {
        let user = self.ensure_user(identity).await?;
        self.require_project_access(&user, project_id).await?;
        Ok(self.store().list_runners_by_project(project_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ar_store::StoreDb;
    use serde_json::json;

    async fn engine_with_project() -> (Engine, Uuid) {
        let engine = Engine::new(StoreDb::open_in_memory().await.unwrap(), true);
        let project = engine.create_project(None, "fleet-a").await.unwrap();
        (engine, project.id)
    }

    #[tokio::test]
    async fn first_heartbeat_creates_later_ones_update() {
        let (engine, project_id) = engine_with_project().await;
        let id1 = engine
            .upsert_runner_heartbeat(None, project_id, "r1", HeartbeatInput::default())
            .await
            .unwrap();
        let id2 = engine
            .upsert_runner_heartbeat(
                None,
                project_id,
                "r1",
                HeartbeatInput {
                    version: Some("1.2.0".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(id1, id2);

        let runners = engine.list_runners(None, project_id).await.unwrap();
        assert_eq!(runners.len(), 1);
        assert_eq!(runners[0].version.as_deref(), Some("1.2.0"));
        assert_eq!(runners[0].last_status, RunnerStatus::Online);
    }

    #[tokio::test]
    async fn only_explicit_offline_reads_as_offline() {
        let (engine, project_id) = engine_with_project().await;
        engine
            .upsert_runner_heartbeat(
                None,
                project_id,
                "r1",
                HeartbeatInput {
                    reported_status: Some("offline".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let runners = engine.list_runners(None, project_id).await.unwrap();
        assert_eq!(runners[0].last_status, RunnerStatus::Offline);

        engine
            .upsert_runner_heartbeat(
                None,
                project_id,
                "r1",
                HeartbeatInput {
                    reported_status: Some("degraded".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let runners = engine.list_runners(None, project_id).await.unwrap();
        assert_eq!(runners[0].last_status, RunnerStatus::Online);
    }

    #[tokio::test]
    async fn oversized_fields_are_conflicts() {
        let (engine, project_id) = engine_with_project().await;
        let err = engine
            .upsert_runner_heartbeat(
                None,
                project_id,
                "r1",
                HeartbeatInput {
                    version: Some("v".repeat(200)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        let err = engine
            .upsert_runner_heartbeat(
                None,
                project_id,
                "r1",
                HeartbeatInput {
                    capabilities: Some(json!({"blob": "x".repeat(20_000)})),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }
}
