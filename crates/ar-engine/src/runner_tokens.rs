//! Runner-token issuance, revocation, and edge validation.
//!
//! The plaintext exists exactly once: in the issuance response. Everything
//! stored or compared afterwards is the sha-256 hex digest.

use ar_core::crypto::{generate_token, sha256_hex};
use ar_core::types::{Runner, RunnerToken};
use ar_core::{now_ms, CoreError};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::{Engine, RUNNER_TOKEN_TTL_MS};

/// Issuance receipt; `token` is the only copy of the plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token_id: Uuid,
    pub runner_id: Uuid,
    pub token: String,
}

/// Listing view: metadata only, no hash, no plaintext.
#[derive(Debug, Clone, Serialize)]
pub struct TokenView {
    pub token_id: Uuid,
    pub runner_id: Uuid,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

/// Internal lookup result for the edge.
#[derive(Debug, Clone, Serialize)]
pub struct TokenLookup {
    pub token_id: Uuid,
    pub project_id: Uuid,
    pub runner_id: Uuid,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
}

impl Engine {
    /// `runner_tokens.create` — admin-only, 20/min. The target runner must
    /// already exist (it registers via heartbeat). 30-day TTL.
    pub async fn create_runner_token(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
        runner_name: &str,
    ) -> Result<IssuedToken, CoreError> {
        let user = self.ensure_user(identity).await?;
        let (_, role) = self.require_project_access(&user, project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("runner_tokens.create:{}", user.id),
            limits::RUNNER_TOKENS_CREATE,
        )
        .await?;

        let runner = self
            .store()
            .get_runner_by_name(project_id, runner_name)
            .await?
            .ok_or_else(|| CoreError::not_found("runner not found"))?;

        let now = now_ms();
        let token = generate_token()?;
        let row = RunnerToken {
            id: Uuid::new_v4(),
            project_id,
            runner_id: runner.id,
            token_hash: sha256_hex(&token),
            created_by_user_id: user.id,
            created_at: now,
            expires_at: Some(now + RUNNER_TOKEN_TTL_MS),
            revoked_at: None,
            last_used_at: None,
        };
        self.store().insert_runner_token(&row).await?;
        self.record_audit(
            user.id,
            Some(project_id),
            "runner_token.create",
            Some(runner.runner_name.clone()),
            Some(json!({"token_id": row.id})),
        )
        .await?;

        Ok(IssuedToken {
            token_id: row.id,
            runner_id: runner.id,
            token,
        })
    }

    /// `runner_tokens.revoke` — admin-only, 30/min. Idempotent at the edge:
    /// re-revoking an already revoked token is a conflict, not a write.
    pub async fn revoke_runner_token(
        &self,
        identity: Option<&Identity>,
        token_id: Uuid,
    ) -> Result<(), CoreError> {
        let user = self.ensure_user(identity).await?;
        let token = self
            .store()
            .get_runner_token(token_id)
            .await?
            .ok_or_else(|| CoreError::not_found("token not found"))?;
        let (_, role) = self.require_project_access(&user, token.project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("runner_tokens.revoke:{}", user.id),
            limits::RUNNER_TOKENS_REVOKE,
        )
        .await?;

        if !self.store().revoke_runner_token(token_id, now_ms()).await? {
            return Err(CoreError::conflict("token is already revoked"));
        }
        self.record_audit(
            user.id,
            Some(token.project_id),
            "runner_token.revoke",
            Some(token_id.to_string()),
            None,
        )
        .await?;
        Ok(())
    }

    /// `runner_tokens.list_by_project` — any project member; hashes never
    /// leave the store.
    pub async fn list_runner_tokens(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
    ) -> Result<Vec<TokenView>, CoreError> {
        let user = self.ensure_user(identity).await?;
        self.require_project_access(&user, project_id).await?;
        let tokens = self.store().list_runner_tokens_by_project(project_id).await?;
        Ok(tokens
            .into_iter()
            .map(|t| TokenView {
                token_id: t.id,
                runner_id: t.runner_id,
                created_at: t.created_at,
                expires_at: t.expires_at,
                revoked_at: t.revoked_at,
                last_used_at: t.last_used_at,
            })
            .collect())
    }

    /// Internal: look up a token row by digest.
    pub async fn lookup_runner_token(
        &self,
        token_hash: &str,
    ) -> Result<Option<TokenLookup>, CoreError> {
        Ok(self
            .store()
            .get_runner_token_by_hash(token_hash)
            .await?
            .map(|t| TokenLookup {
                token_id: t.id,
                project_id: t.project_id,
                runner_id: t.runner_id,
                expires_at: t.expires_at,
                revoked_at: t.revoked_at,
            }))
    }

    /// Internal: mark a token as used.
    pub async fn touch_runner_token(&self, token_id: Uuid) -> Result<(), CoreError> {
        self.store().touch_runner_token(token_id, now_ms()).await?;
        Ok(())
    }

    /// Edge validation for runner-facing endpoints: hash the presented
    /// plaintext, check revocation and expiry, touch `last_used_at`, and
    /// return the runner the token speaks for.
    pub async fn authenticate_runner(&self, presented: &str) -> Result<Runner, CoreError> {
        let token = self
            .store()
            .get_runner_token_by_hash(&sha256_hex(presented.trim()))
            .await?
            .ok_or_else(|| CoreError::unauthorized("unknown runner token"))?;
        if !token.is_valid(now_ms()) {
            return Err(CoreError::unauthorized("runner token expired or revoked"));
        }
        self.store().touch_runner_token(token.id, now_ms()).await?;
        self.store()
            .get_runner(token.runner_id)
            .await?
            .ok_or_else(|| CoreError::unauthorized("runner no longer exists"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runners::HeartbeatInput;
    use ar_store::StoreDb;

    async fn engine_with_runner() -> (Engine, Uuid) {
        let engine = Engine::new(StoreDb::open_in_memory().await.unwrap(), true);
        let project = engine.create_project(None, "fleet-a").await.unwrap();
        engine
            .upsert_runner_heartbeat(None, project.id, "r1", HeartbeatInput::default())
            .await
            .unwrap();
        (engine, project.id)
    }

    #[tokio::test]
    async fn issued_token_hashes_to_stored_digest() {
        let (engine, project_id) = engine_with_runner().await;
        let issued = engine
            .create_runner_token(None, project_id, "r1")
            .await
            .unwrap();

        let stored = engine
            .store()
            .get_runner_token(issued.token_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.token_hash, sha256_hex(&issued.token));
        assert!(stored.expires_at.is_some());

        // The listing never exposes the hash or plaintext.
        let listed = engine.list_runner_tokens(None, project_id).await.unwrap();
        assert_eq!(listed.len(), 1);
        let as_json = serde_json::to_string(&listed).unwrap();
        assert!(!as_json.contains(&stored.token_hash));
        assert!(!as_json.contains(&issued.token));
    }

    #[tokio::test]
    async fn token_for_unknown_runner_is_not_found() {
        let (engine, project_id) = engine_with_runner().await;
        let err = engine
            .create_runner_token(None, project_id, "ghost")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[tokio::test]
    async fn revocation_invalidates_the_edge() {
        let (engine, project_id) = engine_with_runner().await;
        let issued = engine
            .create_runner_token(None, project_id, "r1")
            .await
            .unwrap();

        let runner = engine.authenticate_runner(&issued.token).await.unwrap();
        assert_eq!(runner.runner_name, "r1");

        engine.revoke_runner_token(None, issued.token_id).await.unwrap();
        let err = engine.authenticate_runner(&issued.token).await.unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let err = engine
            .revoke_runner_token(None, issued.token_id)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn authentication_touches_last_used() {
        let (engine, project_id) = engine_with_runner().await;
        let issued = engine
            .create_runner_token(None, project_id, "r1")
            .await
            .unwrap();
        engine.authenticate_runner(&issued.token).await.unwrap();

        let stored = engine
            .store()
            .get_runner_token(issued.token_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.last_used_at.is_some());
    }
}
