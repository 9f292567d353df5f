//! Projects and their satellite rows: members, policies, configs, providers.
//!
//! The `*_batch` deletes are the erasure machine's workhorses: each removes at
//! most `limit` rows through the table's per-project index in one statement,
//! returning the count so the caller can advance `processed` and detect stage
//! completion.

use ar_core::types::{
    Project, ProjectConfig, ProjectMember, ProjectPolicy, ProjectStatus, Provider, Role,
};
use uuid::Uuid;

use crate::{enum_from_sql, enum_to_sql, StoreDb, StoreError};

const PROJECT_COLUMNS: &str = "id, name, status, owner_user_id, runner_repo_path, created_at";

impl StoreDb {
    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn insert_project(&self, project: &Project) -> Result<(), StoreError> {
        let id = project.id.to_string();
        let name = project.name.clone();
        let status = enum_to_sql(&project.status);
        let owner = project.owner_user_id.to_string();
        let repo_path = project.runner_repo_path.clone();
        let created_at = project.created_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO projects (id, name, status, owner_user_id, runner_repo_path,
                        created_at)
                     VALUES (?1,?2,?3,?4,?5,?6)",
                    rusqlite::params![id, name, status, owner, repo_path, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"))?;
                let mut rows = stmt.query(rusqlite::params![id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_project(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// All projects, newest first. The projects table stays small (it is the
    /// root of everything else), so this is unpaginated by design.
    pub async fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        self.conn()
            .call(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, id DESC"
                ))?;
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_project(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn set_project_status(
        &self,
        id: Uuid,
        status: ProjectStatus,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let status = enum_to_sql(&status);
        self.conn()
            .call(move |conn| {
                conn.execute(
                    "UPDATE projects SET status = ?2 WHERE id = ?1",
                    rusqlite::params![id, status],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// The erasure machine's final delete. Returns 1 when the row existed.
    pub async fn delete_project_row(&self, id: Uuid) -> Result<usize, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted =
                    conn.execute("DELETE FROM projects WHERE id = ?1", rusqlite::params![id])?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    // -----------------------------------------------------------------------
    // Members
    // -----------------------------------------------------------------------

    pub async fn insert_project_member(&self, member: &ProjectMember) -> Result<(), StoreError> {
        let id = member.id.to_string();
        let project_id = member.project_id.to_string();
        let user_id = member.user_id.to_string();
        let role = enum_to_sql(&member.role);
        let created_at = member.created_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO project_members (id, project_id, user_id, role, created_at)
                     VALUES (?1,?2,?3,?4,?5)
                     ON CONFLICT(project_id, user_id) DO UPDATE SET role = excluded.role",
                    rusqlite::params![id, project_id, user_id, role, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_project_member(
        &self,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ProjectMember>, StoreError> {
        let project_id = project_id.to_string();
        let user_id = user_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, project_id, user_id, role, created_at
                     FROM project_members WHERE project_id = ?1 AND user_id = ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![project_id, user_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_member(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_project_members_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("project_members", project_id, limit).await
    }

    // -----------------------------------------------------------------------
    // Policies
    // -----------------------------------------------------------------------

    pub async fn upsert_project_policy(&self, policy: &ProjectPolicy) -> Result<(), StoreError> {
        let id = policy.id.to_string();
        let project_id = policy.project_id.to_string();
        let retention_days = policy.retention_days;
        let created_at = policy.created_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO project_policies (id, project_id, retention_days, created_at)
                     VALUES (?1,?2,?3,?4)
                     ON CONFLICT(project_id) DO UPDATE SET
                        retention_days = excluded.retention_days",
                    rusqlite::params![id, project_id, retention_days, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn get_policy_by_project(
        &self,
        project_id: Uuid,
    ) -> Result<Option<ProjectPolicy>, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, project_id, retention_days, created_at
                     FROM project_policies WHERE project_id = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![project_id])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_policy(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Walk policies in stable `project_id` order. This is the retention
    /// sweeper's project iterator: `from` is the resume position, and
    /// `inclusive` controls whether the project at that position is visited
    /// again (an interrupted project) or skipped (a completed one).
    pub async fn list_policies_from(
        &self,
        from_project_id: Option<String>,
        inclusive: bool,
        limit: usize,
    ) -> Result<Vec<ProjectPolicy>, StoreError> {
        self.conn()
            .call(move |conn| {
                let comparison = if inclusive { ">=" } else { ">" };
                let mut stmt = conn.prepare(&format!(
                    "SELECT id, project_id, retention_days, created_at
                     FROM project_policies
                     WHERE project_id {comparison} ?1
                     ORDER BY project_id ASC
                     LIMIT ?2"
                ))?;
                let from = from_project_id.unwrap_or_default();
                let mut rows = stmt.query(rusqlite::params![from, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_policy(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_project_policies_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("project_policies", project_id, limit).await
    }

    // -----------------------------------------------------------------------
    // Configs & providers
    // -----------------------------------------------------------------------

    pub async fn insert_project_config(&self, config: &ProjectConfig) -> Result<(), StoreError> {
        let id = config.id.to_string();
        let project_id = config.project_id.to_string();
        let config_type = config.config_type.clone();
        let payload = config.payload.to_string();
        let created_at = config.created_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO project_configs (id, project_id, config_type, payload, created_at)
                     VALUES (?1,?2,?3,?4,?5)",
                    rusqlite::params![id, project_id, config_type, payload, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_project_configs_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM project_configs WHERE id IN (
                        SELECT id FROM project_configs
                        WHERE project_id = ?1
                        ORDER BY config_type
                        LIMIT ?2)",
                    rusqlite::params![project_id, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn insert_provider(&self, provider: &Provider) -> Result<(), StoreError> {
        let id = provider.id.to_string();
        let project_id = provider.project_id.to_string();
        let kind = provider.kind.clone();
        let settings = provider.settings.to_string();
        let created_at = provider.created_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO providers (id, project_id, kind, settings, created_at)
                     VALUES (?1,?2,?3,?4,?5)",
                    rusqlite::params![id, project_id, kind, settings, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn delete_providers_batch(
        &self,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        self.delete_by_project_batch("providers", project_id, limit).await
    }

    // -----------------------------------------------------------------------
    // Shared per-project batch delete
    // -----------------------------------------------------------------------

    /// Delete at most `limit` rows of `table` for a project via its
    /// `by_project` index. `table` is always a compile-time literal from this
    /// crate, never caller input.
    pub(crate) async fn delete_by_project_batch(
        &self,
        table: &'static str,
        project_id: Uuid,
        limit: usize,
    ) -> Result<usize, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn.execute(
                    &format!(
                        "DELETE FROM {table} WHERE id IN (
                            SELECT id FROM {table} WHERE project_id = ?1 LIMIT ?2)"
                    ),
                    rusqlite::params![project_id, limit as i64],
                )?;
                Ok(deleted)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Count rows of `table` referencing the project; used by erasure
    /// verification and tests.
    pub async fn count_by_project(
        &self,
        table: &'static str,
        project_id: Uuid,
    ) -> Result<i64, StoreError> {
        let project_id = project_id.to_string();
        self.conn()
            .call(move |conn| {
                let count = conn
                    .prepare(&format!("SELECT COUNT(*) FROM {table} WHERE project_id = ?1"))?
                    .query_row(rusqlite::params![project_id], |r| r.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::Db)
    }
}

// ---------------------------------------------------------------------------
// Row mapping helpers
// ---------------------------------------------------------------------------

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(2)?;
    let owner_str: String = row.get(3)?;
    Ok(Project {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        name: row.get(1)?,
        status: enum_from_sql::<ProjectStatus>(&status_str),
        owner_user_id: Uuid::parse_str(&owner_str).expect("valid uuid"),
        runner_repo_path: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn row_to_member(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectMember> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    let user_str: String = row.get(2)?;
    let role_str: String = row.get(3)?;
    Ok(ProjectMember {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        user_id: Uuid::parse_str(&user_str).expect("valid uuid"),
        role: enum_from_sql::<Role>(&role_str),
        created_at: row.get(4)?,
    })
}

fn row_to_policy(row: &rusqlite::Row<'_>) -> rusqlite::Result<ProjectPolicy> {
    let id_str: String = row.get(0)?;
    let project_str: String = row.get(1)?;
    Ok(ProjectPolicy {
        id: Uuid::parse_str(&id_str).expect("valid uuid"),
        project_id: Uuid::parse_str(&project_str).expect("valid uuid"),
        retention_days: row.get(2)?,
        created_at: row.get(3)?,
    })
}
