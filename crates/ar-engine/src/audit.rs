//! Envelope step 6 and the audit RPC surface.

use ar_core::types::AuditLog;
use ar_core::validate::{normalize_repo_path, normalize_string_array};
use ar_core::{now_ms, CoreError};
use ar_store::Page;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::{Engine, AUDIT_PAGE_CAP};

impl Engine {
    /// Internal helper: record a privileged action. Used by every admin
    /// mutation after its own work succeeds.
    pub(crate) async fn record_audit(
        &self,
        user_id: Uuid,
        project_id: Option<Uuid>,
        action: &str,
        target: Option<String>,
        data: Option<Value>,
    ) -> Result<(), CoreError> {
        let entry = AuditLog {
            id: Uuid::new_v4(),
            ts: now_ms(),
            user_id,
            project_id,
            action: action.trim().to_string(),
            target,
            data,
        };
        self.store().insert_audit_log(&entry).await?;
        Ok(())
    }

    /// `audit.append` — authenticated, rate-limited; project-scoped entries
    /// additionally require admin on the project. Path-bearing and list
    /// payload fields are validated before anything is written.
    pub async fn append_audit(
        &self,
        identity: Option<&Identity>,
        project_id: Option<Uuid>,
        action: &str,
        target: Option<String>,
        data: Option<Value>,
    ) -> Result<(), CoreError> {
        let user = self.ensure_user(identity).await?;
        if let Some(project_id) = project_id {
            let (_, role) = self.require_project_access(&user, project_id).await?;
            require_admin(role)?;
        }
        self.rate_limit(&format!("audit.append:{}", user.id), limits::AUDIT_APPEND)
            .await?;

        let action = action.trim();
        if action.is_empty() {
            return Err(CoreError::conflict("action must be non-empty"));
        }

        let data = match data {
            Some(data) => Some(validate_audit_data(data)?),
            None => None,
        };

        let entry = AuditLog {
            id: Uuid::new_v4(),
            ts: now_ms(),
            user_id: user.id,
            project_id,
            action: action.to_string(),
            target,
            data,
        };
        self.store().insert_audit_log(&entry).await?;
        Ok(())
    }

    /// `audit.list_by_project_page` — any project member, capped at 200.
    pub async fn page_audit_by_project(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        cursor: Option<String>,
        num_items: usize,
    ) -> Result<Page<AuditLog>, CoreError> {
        let user = self.ensure_user(identity).await?;
        self.require_project_access(&user, project_id).await?;
        let num_items = num_items.clamp(1, AUDIT_PAGE_CAP);
        Ok(self
            .store()
            .page_audit_logs_by_project(project_id, cursor, num_items)
            .await?)
    }
}

/// Validate well-known audit payload fields: `path` must be a clean
/// repo-relative path, `paths`/`items` are bounded string arrays. Unknown
/// fields pass through untouched.
fn validate_audit_data(data: Value) -> Result<Value, CoreError> {
    let Value::Object(mut map) = data else {
        return Ok(data);
    };
    if let Some(path) = map.get("path") {
        let path = path
            .as_str()
            .ok_or_else(|| CoreError::conflict("path must be a string"))?;
        let normalized = normalize_repo_path(path)?;
        map.insert("path".to_string(), Value::String(normalized));
    }
    for field in ["paths", "items"] {
        if let Some(value) = map.get(field) {
            let normalized = normalize_string_array(value)?;
            map.insert(
                field.to_string(),
                Value::Array(normalized.into_iter().map(Value::String).collect()),
            );
        }
    }
    Ok(Value::Object(map))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ar_store::StoreDb;
    use serde_json::json;

    async fn engine() -> Engine {
        Engine::new(StoreDb::open_in_memory().await.unwrap(), true)
    }

    #[tokio::test]
    async fn blank_action_is_a_conflict() {
        let engine = engine().await;
        let err = engine
            .append_audit(None, None, "   ", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn action_is_stored_trimmed() {
        let engine = engine().await;
        engine
            .append_audit(None, None, "  project.create  ", None, None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn the_121st_append_in_a_window_is_limited() {
        let engine = engine().await;
        for i in 0..120 {
            engine
                .append_audit(None, None, &format!("bulk.action.{i}"), None, None)
                .await
                .unwrap();
        }
        let err = engine
            .append_audit(None, None, "bulk.action.last", None, None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "rate_limited");
    }

    #[tokio::test]
    async fn path_field_is_validated() {
        let engine = engine().await;
        let err = engine
            .append_audit(
                None,
                None,
                "config.write",
                None,
                Some(json!({"path": "../secrets"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");

        engine
            .append_audit(
                None,
                None,
                "config.write",
                None,
                Some(json!({"path": "  fleet/clawlets.json  "})),
            )
            .await
            .unwrap();
    }
}
