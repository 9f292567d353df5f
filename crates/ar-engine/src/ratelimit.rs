//! Envelope step 5: the fixed-window rate limiter.
//!
//! Keys are `"<endpoint>:<user_id>"`; the counter row lives in the store so
//! the bound survives restarts and holds across processes sharing a database.

use ar_core::{now_ms, CoreError};
use ar_store::RateLimitOutcome;

use crate::{Engine, MINUTE_MS};

/// Per-endpoint `(limit, window_ms)` pairs.
pub mod limits {
    use crate::MINUTE_MS;

    pub const PROJECTS_CREATE: (i64, i64) = (10, MINUTE_MS);
    pub const RUNS_CREATE: (i64, i64) = (30, MINUTE_MS);
    pub const RUNS_SET_STATUS: (i64, i64) = (120, MINUTE_MS);
    pub const RUN_EVENTS_APPEND: (i64, i64) = (240, MINUTE_MS);
    pub const RUNNERS_HEARTBEAT: (i64, i64) = (240, MINUTE_MS);
    pub const RUNNER_TOKENS_CREATE: (i64, i64) = (20, MINUTE_MS);
    pub const RUNNER_TOKENS_REVOKE: (i64, i64) = (30, MINUTE_MS);
    pub const SECRET_WIRING_UPSERT: (i64, i64) = (120, MINUTE_MS);
    pub const RUNNER_JOBS_ENQUEUE: (i64, i64) = (60, MINUTE_MS);
    pub const RUNNER_JOBS_FINALIZE: (i64, i64) = (60, MINUTE_MS);
    pub const DELETE_START: (i64, i64) = (10, MINUTE_MS);
    pub const DELETE_CONFIRM: (i64, i64) = (10, MINUTE_MS);
    pub const AUDIT_APPEND: (i64, i64) = (120, MINUTE_MS);
}

impl Engine {
    /// Reserve one token or fail `rate_limited` with the window-reopen hint.
    pub async fn rate_limit(
        &self,
        key: &str,
        (limit, window_ms): (i64, i64),
    ) -> Result<(), CoreError> {
        match self
            .store()
            .rate_limit_reserve(key, limit, window_ms, now_ms())
            .await?
        {
            RateLimitOutcome::Allowed => Ok(()),
            RateLimitOutcome::Limited { retry_at } => {
                tracing::warn!(key, retry_at, "rate limit exceeded");
                Err(CoreError::RateLimited { retry_at })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ar_store::StoreDb;

    #[tokio::test]
    async fn reserve_until_limited() {
        let engine = Engine::new(StoreDb::open_in_memory().await.unwrap(), false);
        for _ in 0..5 {
            engine.rate_limit("test:u1", (5, MINUTE_MS)).await.unwrap();
        }
        let err = engine.rate_limit("test:u1", (5, MINUTE_MS)).await.unwrap_err();
        assert_eq!(err.code(), "rate_limited");
        match err {
            CoreError::RateLimited { retry_at } => {
                // The hint is the next window boundary.
                assert_eq!(retry_at % MINUTE_MS, 0);
                assert!(retry_at > ar_core::now_ms() - MINUTE_MS);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
