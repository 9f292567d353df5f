use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Roles & users
// ---------------------------------------------------------------------------

/// Access role, both globally and per project membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Viewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    /// Opaque subject handle from the identity provider; unique.
    pub token_identifier: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture_url: Option<String>,
    pub role: Role,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Creating,
    Ready,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub status: ProjectStatus,
    pub owner_user_id: Uuid,
    pub runner_repo_path: Option<String>,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectMember {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: Role,
    pub created_at: i64,
}

/// Per-project retention policy; one row per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectPolicy {
    pub id: Uuid,
    pub project_id: Uuid,
    pub retention_days: i64,
    pub created_at: i64,
}

/// Opaque configuration slot keyed by `(project_id, config_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub id: Uuid,
    pub project_id: Uuid,
    pub config_type: String,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// Opaque provisioning slot; drained on project erasure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: String,
    pub settings: serde_json::Value,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Runs & run events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    /// A run leaves `running` exactly once and never returns.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

/// Normalized run kind. Runner job kinds collapse onto this three-value set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Bootstrap,
    GitPush,
    Custom,
}

impl RunKind {
    /// Map an arbitrary job kind onto the run-kind set. Anything that is not
    /// a known first-class kind (`secrets.write`, `env.token-keyring-mutate`,
    /// and friends) is `custom`.
    pub fn resolve(job_kind: &str) -> RunKind {
        match job_kind {
            "bootstrap" => RunKind::Bootstrap,
            "git_push" => RunKind::GitPush,
            _ => RunKind::Custom,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: Uuid,
    pub project_id: Uuid,
    pub kind: RunKind,
    pub status: RunStatus,
    pub title: Option<String>,
    pub host: Option<String>,
    pub initiated_by_user_id: Uuid,
    pub started_at: i64,
    pub finished_at: Option<i64>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    pub ts: i64,
    pub level: String,
    /// Trimmed, non-empty, at most 4000 chars (truncated with an ellipsis).
    pub message: String,
    pub data: Option<serde_json::Value>,
    pub redacted: Option<bool>,
}

// ---------------------------------------------------------------------------
// Runners & tokens
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runner {
    pub id: Uuid,
    pub project_id: Uuid,
    /// Unique per project; heartbeats upsert on `(project_id, runner_name)`.
    pub runner_name: String,
    pub last_seen_at: i64,
    pub last_status: RunnerStatus,
    pub version: Option<String>,
    pub capabilities: Option<serde_json::Value>,
    pub created_at: i64,
}

/// Sealing key material a runner advertises inside its capabilities object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealingKey {
    pub alg: String,
    pub key_id: String,
    pub pub_spki_b64: String,
}

impl Runner {
    /// Extract the advertised sealing key, if any, from `capabilities.sealing`.
    pub fn sealing_key(&self) -> Option<SealingKey> {
        let caps = self.capabilities.as_ref()?;
        serde_json::from_value(caps.get("sealing")?.clone()).ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerToken {
    pub id: Uuid,
    pub project_id: Uuid,
    pub runner_id: Uuid,
    /// `sha256_hex` of the plaintext; the plaintext is never stored.
    pub token_hash: String,
    pub created_by_user_id: Uuid,
    pub created_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub last_used_at: Option<i64>,
}

impl RunnerToken {
    /// Edge validation: not revoked and not past its expiry.
    pub fn is_valid(&self, now: i64) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

// ---------------------------------------------------------------------------
// Secret wiring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WiringScope {
    Bootstrap,
    Updates,
    Openclaw,
}

impl WiringScope {
    pub fn parse(s: &str) -> Option<WiringScope> {
        match s {
            "bootstrap" => Some(WiringScope::Bootstrap),
            "updates" => Some(WiringScope::Updates),
            "openclaw" => Some(WiringScope::Openclaw),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WiringStatus {
    Configured,
    Missing,
    Placeholder,
    Warn,
}

impl WiringStatus {
    pub fn parse(s: &str) -> Option<WiringStatus> {
        match s {
            "configured" => Some(WiringStatus::Configured),
            "missing" => Some(WiringStatus::Missing),
            "placeholder" => Some(WiringStatus::Placeholder),
            "warn" => Some(WiringStatus::Warn),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretWiring {
    pub id: Uuid,
    pub project_id: Uuid,
    pub host_name: String,
    pub secret_name: String,
    pub scope: WiringScope,
    pub status: WiringStatus,
    pub required: bool,
    pub last_verified_at: Option<i64>,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Audit & rate limiting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub ts: i64,
    pub user_id: Uuid,
    pub project_id: Option<Uuid>,
    pub action: String,
    pub target: Option<String>,
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub key: String,
    pub window_start: i64,
    pub count: i64,
}

// ---------------------------------------------------------------------------
// Project erasure
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDeletionToken {
    pub id: Uuid,
    pub project_id: Uuid,
    pub token_hash: String,
    pub created_by_user_id: Uuid,
    pub created_at: i64,
    pub expires_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionJobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DeletionJobStatus {
    /// Terminal states are sticky; a completed or failed job never resurrects.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeletionJobStatus::Completed | DeletionJobStatus::Failed)
    }
}

/// Which table the erasure machine is draining next. Strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStage {
    RunEvents,
    Runs,
    Providers,
    ProjectConfigs,
    ProjectMembers,
    AuditLogs,
    ProjectPolicies,
    ProjectDeletionTokens,
    Project,
    Done,
}

impl DeletionStage {
    pub fn next(&self) -> DeletionStage {
        match self {
            DeletionStage::RunEvents => DeletionStage::Runs,
            DeletionStage::Runs => DeletionStage::Providers,
            DeletionStage::Providers => DeletionStage::ProjectConfigs,
            DeletionStage::ProjectConfigs => DeletionStage::ProjectMembers,
            DeletionStage::ProjectMembers => DeletionStage::AuditLogs,
            DeletionStage::AuditLogs => DeletionStage::ProjectPolicies,
            DeletionStage::ProjectPolicies => DeletionStage::ProjectDeletionTokens,
            DeletionStage::ProjectDeletionTokens => DeletionStage::Project,
            DeletionStage::Project => DeletionStage::Done,
            DeletionStage::Done => DeletionStage::Done,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectDeletionJob {
    pub id: Uuid,
    pub project_id: Uuid,
    pub status: DeletionJobStatus,
    pub stage: DeletionStage,
    /// Total rows deleted so far, across all stages.
    pub processed: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
    pub lease_id: Option<String>,
    pub lease_expires_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Retention sweep
// ---------------------------------------------------------------------------

/// Singleton coordinator row (`key = "default"`) for the retention sweeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSweep {
    pub id: Uuid,
    pub key: String,
    pub cursor: Option<String>,
    pub lease_id: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub updated_at: i64,
}

/// A lease is live iff it has an expiry in the future.
pub fn has_active_lease(lease_expires_at: Option<i64>, now: i64) -> bool {
    matches!(lease_expires_at, Some(exp) if exp > now)
}

// ---------------------------------------------------------------------------
// Runner jobs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerJobStatus {
    /// Created by enqueue; not yet visible to the runner.
    Reserved,
    /// Finalized; eligible for runner pickup.
    Queued,
    /// Claimed by the runner.
    Running,
    /// Result recorded.
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerJob {
    pub id: Uuid,
    pub project_id: Uuid,
    pub run_id: Uuid,
    pub target_runner_id: Uuid,
    /// Raw job kind as submitted (e.g. `secrets.write`); the owning `Run`
    /// stores only the normalized [`RunKind`].
    pub kind: String,
    pub status: RunnerJobStatus,
    pub payload_meta: Option<serde_json::Value>,
    pub sealed_input_b64: Option<String>,
    pub sealed_input_alg: Option<String>,
    pub sealed_input_key_id: Option<String>,
    pub result_json: Option<serde_json::Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ---------------------------------------------------------------------------
// Scheduled tasks
// ---------------------------------------------------------------------------

/// Durable delayed callback payload. The dispatcher deserializes this and
/// re-enters the owning state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    RunDeletionJobStep { job_id: Uuid },
    RetentionSweep { reason: String, lease_id: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledTask {
    pub id: Uuid,
    pub due_at: i64,
    pub task: TaskPayload,
    pub created_at: i64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
