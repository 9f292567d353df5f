//! Durable delayed callbacks.
//!
//! `run_after` inserts a row; the daemon's dispatcher polls for due rows,
//! executes them, and deletes each row only after its callback returns. A
//! crash between execute and delete redelivers, so every callback is
//! idempotent by construction (lease guards in the machines).

use ar_core::types::{ScheduledTask, TaskPayload};
use uuid::Uuid;

use crate::{StoreDb, StoreError};

impl StoreDb {
    pub async fn schedule_task(&self, task: &ScheduledTask) -> Result<(), StoreError> {
        let id = task.id.to_string();
        let due_at = task.due_at;
        let payload = serde_json::to_string(&task.task)?;
        let created_at = task.created_at;

        self.conn()
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO scheduled_tasks (id, due_at, task, created_at)
                     VALUES (?1,?2,?3,?4)",
                    rusqlite::params![id, due_at, payload, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Due tasks in firing order, capped at `limit`.
    pub async fn list_due_tasks(
        &self,
        now: i64,
        limit: usize,
    ) -> Result<Vec<ScheduledTask>, StoreError> {
        self.conn()
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, due_at, task, created_at FROM scheduled_tasks
                     WHERE due_at <= ?1
                     ORDER BY due_at ASC
                     LIMIT ?2",
                )?;
                let mut rows = stmt.query(rusqlite::params![now, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let id_str: String = row.get(0)?;
                    let payload_str: String = row.get(2)?;
                    out.push(ScheduledTask {
                        id: Uuid::parse_str(&id_str).expect("valid uuid"),
                        due_at: row.get(1)?,
                        task: serde_json::from_str::<TaskPayload>(&payload_str)
                            .expect("valid json"),
                        created_at: row.get(3)?,
                    });
                }
                Ok(out)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Acknowledge a dispatched task. Called after the callback returns.
    pub async fn delete_scheduled_task(&self, id: Uuid) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.conn()
            .call(move |conn| {
                let deleted = conn
                    .execute("DELETE FROM scheduled_tasks WHERE id = ?1", rusqlite::params![id])?;
                Ok(deleted == 1)
            })
            .await
            .map_err(StoreError::Db)
    }

    pub async fn count_scheduled_tasks(&self) -> Result<i64, StoreError> {
        self.conn()
            .call(|conn| {
                let count = conn
                    .prepare("SELECT COUNT(*) FROM scheduled_tasks")?
                    .query_row([], |r| r.get(0))?;
                Ok(count)
            })
            .await
            .map_err(StoreError::Db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ar_core::types::TaskPayload;

    #[tokio::test]
    async fn schedule_list_ack_cycle() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let job_id = Uuid::new_v4();
        let task = ScheduledTask {
            id: Uuid::new_v4(),
            due_at: 1000,
            task: TaskPayload::RunDeletionJobStep { job_id },
            created_at: 500,
        };
        db.schedule_task(&task).await.unwrap();

        // Not yet due.
        assert!(db.list_due_tasks(999, 10).await.unwrap().is_empty());

        let due = db.list_due_tasks(1000, 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task, TaskPayload::RunDeletionJobStep { job_id });

        // Redelivery until acknowledged.
        assert_eq!(db.list_due_tasks(2000, 10).await.unwrap().len(), 1);
        assert!(db.delete_scheduled_task(task.id).await.unwrap());
        assert!(db.list_due_tasks(2000, 10).await.unwrap().is_empty());
        assert!(!db.delete_scheduled_task(task.id).await.unwrap());
    }

    #[tokio::test]
    async fn due_tasks_fire_in_order() {
        let db = StoreDb::open_in_memory().await.unwrap();
        for (due_at, _) in [(300, "c"), (100, "a"), (200, "b")] {
            db.schedule_task(&ScheduledTask {
                id: Uuid::new_v4(),
                due_at,
                task: TaskPayload::RetentionSweep {
                    reason: "test".into(),
                    lease_id: None,
                },
                created_at: 0,
            })
            .await
            .unwrap();
        }
        let due = db.list_due_tasks(1000, 10).await.unwrap();
        let order: Vec<i64> = due.iter().map(|t| t.due_at).collect();
        assert_eq!(order, vec![100, 200, 300]);
    }
}
