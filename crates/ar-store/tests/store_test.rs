//! Store-level behavior: schema, uniqueness, lease CAS, pagination.

use ar_core::types::{
    DeletionJobStatus, DeletionStage, ProjectDeletionJob, Role, Run, RunEvent, RunKind,
    RunStatus, User,
};
use ar_store::{HeartbeatPatch, StoreDb};
use uuid::Uuid;

fn user(subject: &str) -> User {
    User {
        id: Uuid::new_v4(),
        token_identifier: subject.to_string(),
        name: None,
        email: None,
        picture_url: None,
        role: Role::Viewer,
        created_at: 0,
        updated_at: 0,
    }
}

#[tokio::test]
async fn opens_on_disk_and_reopens() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("armada.db");

    let db = StoreDb::open(&path).await.unwrap();
    db.insert_user(&user("alice")).await.unwrap();
    drop(db);

    let db = StoreDb::open(&path).await.unwrap();
    let found = db.get_user_by_token_identifier("alice").await.unwrap();
    assert!(found.is_some());
}

#[tokio::test]
async fn token_identifier_is_unique() {
    let db = StoreDb::open_in_memory().await.unwrap();
    db.insert_user(&user("alice")).await.unwrap();
    assert!(db.insert_user(&user("alice")).await.is_err());
}

#[tokio::test]
async fn heartbeat_upsert_is_keyed_by_project_and_name() {
    let db = StoreDb::open_in_memory().await.unwrap();
    let project_a = Uuid::new_v4();
    let project_b = Uuid::new_v4();
    let patch = || HeartbeatPatch {
        last_status: ar_core::types::RunnerStatus::Online,
        version: None,
        capabilities: None,
    };

    let id1 = db.upsert_runner_heartbeat(project_a, "r1", patch(), 1).await.unwrap();
    let id2 = db.upsert_runner_heartbeat(project_a, "r1", patch(), 2).await.unwrap();
    let id3 = db.upsert_runner_heartbeat(project_b, "r1", patch(), 3).await.unwrap();
    assert_eq!(id1, id2);
    assert_ne!(id1, id3);

    let runner = db.get_runner(id1).await.unwrap().unwrap();
    assert_eq!(runner.last_seen_at, 2);
}

fn job_for(project_id: Uuid) -> ProjectDeletionJob {
    ProjectDeletionJob {
        id: Uuid::new_v4(),
        project_id,
        status: DeletionJobStatus::Pending,
        stage: DeletionStage::RunEvents,
        processed: 0,
        created_at: 0,
        updated_at: 0,
        completed_at: None,
        last_error: None,
        lease_id: None,
        lease_expires_at: None,
    }
}

#[tokio::test]
async fn job_lease_cas_is_exclusive() {
    let db = StoreDb::open_in_memory().await.unwrap();
    let job = job_for(Uuid::new_v4());
    db.insert_deletion_job(&job).await.unwrap();

    let now = 1000;
    assert!(db.try_acquire_job_lease(job.id, "lease-a", now + 60_000, now).await.unwrap());
    // A second worker cannot take a live lease.
    assert!(!db.try_acquire_job_lease(job.id, "lease-b", now + 60_000, now).await.unwrap());

    // After expiry the lease is up for grabs.
    let later = now + 60_001;
    assert!(db
        .try_acquire_job_lease(job.id, "lease-b", later + 60_000, later)
        .await
        .unwrap());

    let stored = db.get_deletion_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.lease_id.as_deref(), Some("lease-b"));
    assert_eq!(stored.status, DeletionJobStatus::Running);
}

#[tokio::test]
async fn commit_requires_the_held_lease() {
    let db = StoreDb::open_in_memory().await.unwrap();
    let job = job_for(Uuid::new_v4());
    db.insert_deletion_job(&job).await.unwrap();
    db.try_acquire_job_lease(job.id, "lease-a", 61_000, 1000).await.unwrap();

    // A stale worker with the wrong lease writes nothing.
    assert!(!db
        .commit_job_step(
            job.id,
            "stale-lease",
            DeletionStage::Runs,
            42,
            DeletionJobStatus::Running,
            None,
            2000,
        )
        .await
        .unwrap());

    assert!(db
        .commit_job_step(
            job.id,
            "lease-a",
            DeletionStage::Runs,
            42,
            DeletionJobStatus::Running,
            None,
            2000,
        )
        .await
        .unwrap());

    let stored = db.get_deletion_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.stage, DeletionStage::Runs);
    assert_eq!(stored.processed, 42);
    // Commit releases the lease.
    assert!(stored.lease_id.is_none());
    assert!(stored.lease_expires_at.is_none());
}

#[tokio::test]
async fn terminal_jobs_cannot_be_leased() {
    let db = StoreDb::open_in_memory().await.unwrap();
    let job = job_for(Uuid::new_v4());
    db.insert_deletion_job(&job).await.unwrap();
    db.fail_deletion_job(job.id, "boom", 1000).await.unwrap();

    assert!(!db.try_acquire_job_lease(job.id, "lease-a", 61_000, 1000).await.unwrap());
    let stored = db.get_deletion_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeletionJobStatus::Failed);
    assert_eq!(stored.last_error.as_deref(), Some("boom"));
}

#[tokio::test]
async fn event_pagination_is_stable_across_timestamp_ties() {
    let db = StoreDb::open_in_memory().await.unwrap();
    let project_id = Uuid::new_v4();
    let run_id = Uuid::new_v4();

    // Twenty events all sharing one timestamp: ordering falls back to id.
    let events: Vec<RunEvent> = (0..20)
        .map(|i| RunEvent {
            id: Uuid::new_v4(),
            project_id,
            run_id,
            ts: 500,
            level: "info".into(),
            message: format!("tie {i}"),
            data: None,
            redacted: None,
        })
        .collect();
    db.insert_run_events(events).await.unwrap();

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = db.page_run_events_by_run(run_id, cursor, 7).await.unwrap();
        seen.extend(page.items.iter().map(|e| e.id));
        if page.is_done {
            break;
        }
        cursor = page.continue_cursor;
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 20);
}

#[tokio::test]
async fn run_finish_is_single_shot() {
    let db = StoreDb::open_in_memory().await.unwrap();
    let run = Run {
        id: Uuid::new_v4(),
        project_id: Uuid::new_v4(),
        kind: RunKind::Custom,
        status: RunStatus::Running,
        title: None,
        host: None,
        initiated_by_user_id: Uuid::new_v4(),
        started_at: 0,
        finished_at: None,
        error_message: None,
    };
    db.insert_run(&run).await.unwrap();

    assert!(db.finish_run(run.id, RunStatus::Failed, 100, Some("err".into())).await.unwrap());
    assert!(!db.finish_run(run.id, RunStatus::Succeeded, 200, None).await.unwrap());

    let stored = db.get_run(run.id).await.unwrap().unwrap();
    assert_eq!(stored.status, RunStatus::Failed);
    assert_eq!(stored.finished_at, Some(100));
    assert_eq!(stored.error_message.as_deref(), Some("err"));
}
