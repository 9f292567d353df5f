//! Project lifecycle: create, list, get. Erasure lives in `deletion`.

use ar_core::types::{Project, ProjectPolicy, ProjectStatus, Role};
use ar_core::validate::RETENTION_DAYS_DEFAULT;
use ar_core::{now_ms, CoreError};
use serde_json::json;
use uuid::Uuid;

use crate::auth::Identity;
use crate::ratelimit::limits;
use crate::Engine;

impl Engine {
    /// `projects.create` — any authenticated user may create a project and
    /// becomes its owner. New projects start `creating`; an out-of-scope init
    /// run drives them to `ready` or `error`. A default retention policy is
    /// written alongside so the sweeper covers the project from day one.
    pub async fn create_project(
        &self,
        identity: Option<&Identity>,
        name: &str,
    ) -> Result<Project, CoreError> {
        let user = self.ensure_user(identity).await?;
        self.rate_limit(&format!("projects.create:{}", user.id), limits::PROJECTS_CREATE)
            .await?;

        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::conflict("project name must be non-empty"));
        }

        let now = now_ms();
        let project = Project {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: ProjectStatus::Creating,
            owner_user_id: user.id,
            runner_repo_path: None,
            created_at: now,
        };
        self.store().insert_project(&project).await?;
        self.store()
            .upsert_project_policy(&ProjectPolicy {
                id: Uuid::new_v4(),
                project_id: project.id,
                retention_days: RETENTION_DAYS_DEFAULT,
                created_at: now,
            })
            .await?;

        self.record_audit(
            user.id,
            Some(project.id),
            "project.create",
            Some(project.name.clone()),
            Some(json!({"status": "creating"})),
        )
        .await?;

        tracing::info!(project_id = %project.id, name, "project created");
        Ok(project)
    }

    /// `projects.list` — projects the caller can see: owned or joined.
    pub async fn list_projects(
        &self,
        identity: Option<&Identity>,
    ) -> Result<Vec<Project>, CoreError> {
        let user = self.ensure_user(identity).await?;
        let mut visible = Vec::new();
        for project in self.store().list_projects().await? {
            if project.owner_user_id == user.id
                || self
                    .store()
                    .get_project_member(project.id, user.id)
                    .await?
                    .is_some()
            {
                visible.push(project);
            }
        }
        Ok(visible)
    }

    /// `projects.get` — owner or member.
    pub async fn get_project(
        &self,
        identity: Option<&Identity>,
        project_id: Uuid,
    ) -> Result<(Project, Role), CoreError> {
        let user = self.ensure_user(identity).await?;
        self.require_project_access(&user, project_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use ar_store::StoreDb;

    fn alice() -> Identity {
        Identity {
            token_identifier: "alice".into(),
            name: Some("Alice".into()),
            email: None,
            picture_url: None,
        }
    }

    fn bob() -> Identity {
        Identity {
            token_identifier: "bob".into(),
            name: Some("Bob".into()),
            email: None,
            picture_url: None,
        }
    }

    async fn engine() -> Engine {
        Engine::new(StoreDb::open_in_memory().await.unwrap(), false)
    }

    #[tokio::test]
    async fn create_starts_creating_with_default_policy() {
        let engine = engine().await;
        let project = engine.create_project(Some(&alice()), " fleet-a ").await.unwrap();
        assert_eq!(project.status, ProjectStatus::Creating);
        assert_eq!(project.name, "fleet-a");

        let policy = engine
            .store()
            .get_policy_by_project(project.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(policy.retention_days, 30);
    }

    #[tokio::test]
    async fn owner_gets_admin_others_are_locked_out() {
        let engine = engine().await;
        let project = engine.create_project(Some(&alice()), "fleet-a").await.unwrap();

        let (_, role) = engine.get_project(Some(&alice()), project.id).await.unwrap();
        assert_eq!(role, Role::Admin);

        let err = engine.get_project(Some(&bob()), project.id).await.unwrap_err();
        assert_eq!(err.code(), "forbidden");
    }

    #[tokio::test]
    async fn listing_is_scoped_to_membership() {
        let engine = engine().await;
        engine.create_project(Some(&alice()), "fleet-a").await.unwrap();
        engine.create_project(Some(&bob()), "fleet-b").await.unwrap();

        let mine = engine.list_projects(Some(&alice())).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].name, "fleet-a");
    }

    #[tokio::test]
    async fn missing_project_is_not_found() {
        let engine = engine().await;
        let err = engine
            .get_project(Some(&alice()), Uuid::new_v4())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "not_found");
    }
}
