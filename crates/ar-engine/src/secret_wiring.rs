//! Secret-wiring upserts: which secrets a host expects, and their state.

use ar_core::types::{SecretWiring, WiringScope, WiringStatus};
use ar_core::validate::SECRET_NAME_MAX_LEN;
use ar_core::{now_ms, CoreError};
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::Engine;

/// One wiring entry as submitted by the provisioning tooling.
#[derive(Debug, Clone)]
pub struct WiringEntryInput {
    pub secret_name: String,
    pub scope: String,
    pub status: String,
    pub required: bool,
    pub last_verified_at: Option<i64>,
}

impl Engine {
    /// `secret_wiring.upsert_many` — admin-only, 120/min. Normalizes scope
    /// and status against the fixed enums (unrecognized values are
    /// conflicts), bounds secret names, and upserts by
    /// `(project_id, host_name, secret_name)`. Idempotent; returns the
    /// number of rows written.
    pub async fn upsert_secret_wiring(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        host_name: &str,
        entries: Vec<WiringEntryInput>,
    ) -> Result<usize, CoreError> {
        let user = self.ensure_user(identity).await?;
        let (_, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("secret_wiring.upsert_many:{}", user.id),
            limits::SECRET_WIRING_UPSERT,
        )
        .await?;

        let host_name = host_name.trim();
        if host_name.is_empty() {
            return Err(CoreError::conflict("host_name must be non-empty"));
        }

        // Validate everything before the first write so a bad entry aborts
        // the whole batch.
        let mut validated = Vec::with_capacity(entries.len());
        for entry in entries {
            let secret_name = entry.secret_name.trim().to_string();
            if secret_name.is_empty() || secret_name.chars().count() > SECRET_NAME_MAX_LEN {
                return Err(CoreError::conflict("secret_name out of bounds"));
            }
            let scope = WiringScope::parse(entry.scope.trim()).ok_or_else(|| {
                CoreError::conflict(format!("unrecognized scope `{}`", entry.scope))
            })?;
            let status = WiringStatus::parse(entry.status.trim()).ok_or_else(|| {
                CoreError::conflict(format!("unrecognized status `{}`", entry.status))
            })?;
            validated.push((secret_name, scope, status, entry.required, entry.last_verified_at));
        }

        let now = now_ms();
        let updated = validated.len();
        for (secret_name, scope, status, required, last_verified_at) in validated {
            self.store()
                .upsert_secret_wiring(&SecretWiring {
                    id: Uuid::new_v4(),
                    project_id,
                    host_name: host_name.to_string(),
                    secret_name,
                    scope,
                    status,
                    required,
                    last_verified_at,
                    updated_at: now,
                })
                .await?;
        }

        self.record_audit(
            user.id,
            Some(project_id),
            "secret_wiring.upsert",
            Some(host_name.to_string()),
            Some(serde_json::json!({"updated": updated})),
        )
        .await?;
        Ok(updated)
    }

    /// `secret_wiring.list_by_project_host` — any project member.
    pub async fn list_secret_wiring(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        host_name: &str,
    ) -> Result<Vec<SecretWiring>, CoreError> {
        let user = self.ensure_user(identity).await?;
        self.require_project_access(&user, project_id).await?;
        Ok(self
            .store()
            .list_secret_wiring_by_project_host(project_id, host_name)
            .await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ar_store::StoreDb;

    async fn engine_with_project() -> (Engine, Uuid) {
        let engine = Engine::new(StoreDb::open_in_memory().await.unwrap(), true);
        let project = engine.create_project(None, "fleet-a").await.unwrap();
        (engine, project.id)
    }

    fn entry(name: &str, scope: &str, status: &str) -> WiringEntryInput {
        WiringEntryInput {
            secret_name: name.into(),
            scope: scope.into(),
            status: status.into(),
            required: true,
            last_verified_at: None,
        }
    }

    #[tokio::test]
    async fn upsert_is_idempotent_by_triple() {
        let (engine, project_id) = engine_with_project().await;
        let entries = vec![
            entry("DEPLOY_KEY", "bootstrap", "configured"),
            entry("WEBHOOK", "updates", "missing"),
        ];
        let updated = engine
            .upsert_secret_wiring(None, project_id, "host-1", entries.clone())
            .await
            .unwrap();
        assert_eq!(updated, 2);

        // Same triples again: still two rows, statuses refreshed.
        let mut again = entries;
        again[1].status = "configured".into();
        engine
            .upsert_secret_wiring(None, project_id, "host-1", again)
            .await
            .unwrap();

        let rows = engine
            .list_secret_wiring(None, project_id, "host-1")
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|w| w.status == WiringStatus::Configured));
    }

    #[tokio::test]
    async fn unrecognized_enums_are_conflicts() {
        let (engine, project_id) = engine_with_project().await;
        let err = engine
            .upsert_secret_wiring(
                None,
                project_id,
                "host-1",
                vec![entry("A", "sideways", "configured")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        let err = engine
            .upsert_secret_wiring(
                None,
                project_id,
                "host-1",
                vec![entry("A", "bootstrap", "sparkling")],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn a_bad_entry_aborts_the_whole_batch() {
        let (engine, project_id) = engine_with_project().await;
        let err = engine
            .upsert_secret_wiring(
                None,
                project_id,
                "host-1",
                vec![
                    entry("GOOD", "bootstrap", "configured"),
                    entry("", "bootstrap", "configured"),
                ],
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
        assert!(engine
            .list_secret_wiring(None, project_id, "host-1")
            .await
            .unwrap()
            .is_empty());
    }
}
