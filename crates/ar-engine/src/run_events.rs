//! Run-event ingestion and paging.

use ar_core::types::RunEvent;
use ar_core::validate::{clamp_event_message, RUN_EVENT_MAX_BATCH};
use ar_core::CoreError;
use ar_store::Page;
use serde_json::Value;
use uuid::Uuid;

use crate::auth::{require_admin, Identity};
use crate::ratelimit::limits;
use crate::{Engine, RUN_EVENTS_PAGE_CAP};

/// One incoming event in an `append_batch` call.
#[derive(Debug, Clone)]
pub struct RunEventInput {
    pub ts: i64,
    pub level: String,
    pub message: String,
    pub data: Option<Value>,
    pub redacted: Option<bool>,
}

impl Engine {
    /// `run_events.append_batch` — admin-only, 240/min.
    ///
    /// At most 200 events are taken per call (extras sliced off); messages
    /// are trimmed, empty ones dropped, long ones truncated with an ellipsis.
    /// Returns the number of events actually stored.
    pub async fn append_run_events(
        &self,
        identity: Option<&Identity>,
        run_id: Uuid,
        events: Vec<RunEventInput>,
    ) -> Result<usize, CoreError> {
        let user = self.ensure_user(identity).await?;
        let run = self
            .store()
            .get_run(run_id)
            .await?
            .ok_or_else(|| CoreError::not_found("run not found"))?;
        let (_, role) = self.require_project_access(&user, run.project_id).await?;
        require_admin(role)?;
        self.rate_limit(
            &format!("run_events.append_batch:{}", user.id),
            limits::RUN_EVENTS_APPEND,
        )
        .await?;

        let mut rows = Vec::new();
        for event in events.into_iter().take(RUN_EVENT_MAX_BATCH) {
            let Some(message) = clamp_event_message(&event.message) else {
                continue;
            };
            rows.push(RunEvent {
                id: Uuid::new_v4(),
                project_id: run.project_id,
                run_id,
                ts: event.ts,
                level: event.level,
                message,
                data: event.data,
                redacted: event.redacted,
            });
        }
        let stored = rows.len();
        self.store().insert_run_events(rows).await?;
        Ok(stored)
    }

    /// `run_events.page_by_run` — any project member, capped at 500 items.
    pub async fn page_run_events(
        &self,
        identity: Option<&Identity>,
        run_id: Uuid,
        cursor: Option<String>,
        num_items: usize,
    ) -> Result<Page<RunEvent>, CoreError> {
        let user = self.ensure_user(identity).await?;
        let run = self
            .store()
            .get_run(run_id)
            .await?
            .ok_or_else(|| CoreError::not_found("run not found"))?;
        self.require_project_access(&user, run.project_id).await?;
        let num_items = num_items.clamp(1, RUN_EVENTS_PAGE_CAP);
        Ok(self
            .store()
            .page_run_events_by_run(run_id, cursor, num_items)
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

    async fn engine_with_run() -> (Engine, Uuid) {
        let engine = Engine::new(StoreDb::open_in_memory().await.unwrap(), true);
        let project = engine.create_project(None, "fleet-a").await.unwrap();
        let run = engine
            .create_run(None, project.id, "bootstrap", None, None)
            .await
            .unwrap();
        (engine, run.id)
    }

    fn event(ts: i64, message: &str) -> RunEventInput {
        RunEventInput {
            ts,
            level: "info".into(),
            message: message.into(),
            data: None,
            redacted: None,
        }
    }

    #[tokio::test]
    async fn batch_is_sliced_and_blank_messages_dropped() {
        let (engine, run_id) = engine_with_run().await;
        let mut events: Vec<RunEventInput> = (0..250).map(|i| event(i, "msg")).collect();
        events[0].message = "   ".into();

        let stored = engine.append_run_events(None, run_id, events).await.unwrap();
        // 200 taken, one of them blank.
        assert_eq!(stored, 199);
    }

    #[tokio::test]
    async fn long_messages_are_truncated_with_ellipsis() {
        let (engine, run_id) = engine_with_run().await;
        let long = "x".repeat(5000);
        engine
            .append_run_events(None, run_id, vec![event(1, &long)])
            .await
            .unwrap();

        let page = engine.page_run_events(None, run_id, None, 10).await.unwrap();
        let message = &page.items[0].message;
        assert_eq!(message.chars().count(), 4000);
        assert!(message.ends_with("..."));
    }

    #[tokio::test]
    async fn events_page_newest_first() {
        let (engine, run_id) = engine_with_run().await;
        let events: Vec<RunEventInput> = (0..10).map(|i| event(i, &format!("m{i}"))).collect();
        engine.append_run_events(None, run_id, events).await.unwrap();

        let page = engine.page_run_events(None, run_id, None, 4).await.unwrap();
        assert_eq!(page.items.len(), 4);
        assert_eq!(page.items[0].ts, 9);
        assert!(!page.is_done);

        let next = engine
            .page_run_events(None, run_id, page.continue_cursor.clone(), 100)
            .await
            .unwrap();
        assert_eq!(next.items.len(), 6);
        assert!(next.is_done);
        assert_eq!(next.items[0].ts, 5);
    }
}
