//! Identity resolution and project access control.
//!
//! The envelope's first four steps. The HTTP layer hands over an optional
//! [`Identity`] (the upstream provider's opaque subject plus profile hints);
//! everything after that is decided here against the store.

use ar_core::types::{Project, Role, User};
use ar_core::{now_ms, CoreError};
use uuid::Uuid;

use crate::Engine;

/// What the identity provider forwarded for this request.
#[derive(Debug, Clone)]
pub struct Identity {
    pub token_identifier: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture_url: Option<String>,
}

impl Identity {
    /// The fixed identity synthesized in dev-bypass mode.
    pub fn dev_bypass() -> Self {
        Identity {
            token_identifier: "dev|local".to_string(),
            name: Some("Local Dev".to_string()),
            email: None,
            picture_url: None,
        }
    }
}

impl Engine {
    /// Envelope steps 1–2: require an identity (or synthesize one in bypass
    /// mode) and materialize the `User` row. The first user ever created
    /// becomes `admin`; later ones start as `viewer`. Profile fields refresh
    /// on every resolution that carries them.
    pub async fn ensure_user(&self, identity: Option<&Identity>) -> Result<User, CoreError> {
        let synthesized;
        let identity = match identity {
            Some(identity) => identity,
            None if self.auth_disabled() => {
                synthesized = Identity::dev_bypass();
                &synthesized
            }
            None => return Err(CoreError::unauthorized("no identity presented")),
        };

        let now = now_ms();
        if let Some(user) = self
            .store()
            .get_user_by_token_identifier(&identity.token_identifier)
            .await?
        {
            let profile_changed = identity.name != user.name
                || identity.email != user.email
                || identity.picture_url != user.picture_url;
            if profile_changed && identity.name.is_some() {
                self.store()
                    .update_user_profile(
                        user.id,
                        identity.name.clone(),
                        identity.email.clone(),
                        identity.picture_url.clone(),
                        now,
                    )
                    .await?;
                return Ok(User {
                    name: identity.name.clone(),
                    email: identity.email.clone(),
                    picture_url: identity.picture_url.clone(),
                    updated_at: now,
                    ..user
                });
            }
            return Ok(user);
        }

        // First authenticated call for this subject: create the row. The
        // very first user in the deployment gets admin.
        let role = if self.store().count_users().await? == 0 {
            Role::Admin
        } else {
            Role::Viewer
        };
        let user = User {
            id: Uuid::new_v4(),
            token_identifier: identity.token_identifier.clone(),
            name: identity.name.clone(),
            email: identity.email.clone(),
            picture_url: identity.picture_url.clone(),
            role,
            created_at: now,
            updated_at: now,
        };
        self.store().insert_user(&user).await?;
        tracing::info!(user_id = %user.id, role = ?user.role, "user materialized");
        Ok(user)
    }

    /// Envelope step 3: resolve the project and the caller's role on it.
    /// Owners are admins implicitly; everyone else needs a membership row.
    pub async fn require_project_access(
        &self,
        user: &User,
        project_id: Uuid,
    ) -> Result<(Project, Role), CoreError> {
        let project = self
            .store()
            .get_project(project_id)
            .await?
            .ok_or_else(|| CoreError::not_found("project not found"))?;

        if project.owner_user_id == user.id {
            return Ok((project, Role::Admin));
        }
        let member = self
            .store()
            .get_project_member(project_id, user.id)
            .await?
            .ok_or_else(|| CoreError::forbidden("not a member of this project"))?;
        Ok((project, member.role))
    }
}

/// Envelope step 4.
pub fn require_admin(role: Role) -> Result<(), CoreError> {
    match role {
        Role::Admin => Ok(()),
        Role::Viewer => Err(CoreError::forbidden("admin role required")),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
