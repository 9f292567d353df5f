//! Fixed-window rate-limit buckets.
//!
//! One row per key. The reserve step is a read-modify-write inside a single
//! transaction on the connection worker, so `count <= limit` holds without
//! any further coordination.

use uuid::Uuid;

use crate::{StoreDb, StoreError};

/// Result of a reservation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitOutcome {
    Allowed,
    /// Window is full; `retry_at` is when it reopens (epoch ms).
    Limited { retry_at: i64 },
}

impl StoreDb {
    /// Reserve one token from the fixed window for `key`.
    ///
    /// The window is `floor(now / window_ms) * window_ms`. A row from an
    /// earlier window resets; a full current window refuses with
    /// `retry_at = window_start + window_ms`.
    pub async fn rate_limit_reserve(
        &self,
        key: &str,
        limit: i64,
        window_ms: i64,
        now: i64,
    ) -> Result<RateLimitOutcome, StoreError> {
        let key = key.to_string();
        let window_start = (now / window_ms) * window_ms;
        let new_id = Uuid::new_v4().to_string();

        self.conn()
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                let existing: Option<(i64, i64)> = {
                    let mut stmt = tx
                        .prepare("SELECT window_start, count FROM rate_limits WHERE key = ?1")?;
                    let mut rows = stmt.query(rusqlite::params![key])?;
                    match rows.next()? {
                        Some(row) => Some((row.get(0)?, row.get(1)?)),
                        None => None,
                    }
                };

                let outcome = match existing {
                    None => {
                        tx.execute(
                            "INSERT INTO rate_limits (id, key, window_start, count)
                             VALUES (?1,?2,?3,1)",
                            rusqlite::params![new_id, key, window_start],
                        )?;
                        RateLimitOutcome::Allowed
                    }
                    Some((existing_start, _)) if existing_start != window_start => {
                        tx.execute(
                            "UPDATE rate_limits SET window_start = ?2, count = 1 WHERE key = ?1",
                            rusqlite::params![key, window_start],
                        )?;
                        RateLimitOutcome::Allowed
                    }
                    Some((_, count)) if count >= limit => RateLimitOutcome::Limited {
                        retry_at: window_start + window_ms,
                    },
                    Some(_) => {
                        tx.execute(
                            "UPDATE rate_limits SET count = count + 1 WHERE key = ?1",
                            rusqlite::params![key],
                        )?;
                        RateLimitOutcome::Allowed
                    }
                };
                tx.commit()?;
                Ok(outcome)
            })
            .await
            .map_err(StoreError::Db)
    }

    /// Current `(window_start, count)` for a key; tests and introspection.
    pub async fn rate_limit_bucket(&self, key: &str) -> Result<Option<(i64, i64)>, StoreError> {
        let key = key.to_string();
        self.conn()
            .call(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT window_start, count FROM rate_limits WHERE key = ?1")?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                match rows.next()? {
                    Some(row) => Ok(Some((row.get(0)?, row.get(1)?))),
                    None => Ok(None),
                }
            })
            .await
            .map_err(StoreError::Db)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn window_fills_and_refuses() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let now = 1_700_000_030_000; // mid-window
        let window_ms = 60_000;
        let window_start = (now / window_ms) * window_ms;

        for _ in 0..3 {
            let outcome = db.rate_limit_reserve("k", 3, window_ms, now).await.unwrap();
            assert_eq!(outcome, RateLimitOutcome::Allowed);
        }
        let outcome = db.rate_limit_reserve("k", 3, window_ms, now).await.unwrap();
        assert_eq!(
            outcome,
            RateLimitOutcome::Limited { retry_at: window_start + window_ms }
        );
        assert_eq!(db.rate_limit_bucket("k").await.unwrap(), Some((window_start, 3)));
    }

    #[tokio::test]
    async fn new_window_resets_count() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let window_ms = 60_000;
        let now = 1_700_000_000_000;

        for _ in 0..2 {
            db.rate_limit_reserve("k", 2, window_ms, now).await.unwrap();
        }
        assert!(matches!(
            db.rate_limit_reserve("k", 2, window_ms, now).await.unwrap(),
            RateLimitOutcome::Limited { .. }
        ));

        let later = now + window_ms;
        let outcome = db.rate_limit_reserve("k", 2, window_ms, later).await.unwrap();
        assert_eq!(outcome, RateLimitOutcome::Allowed);
        let (start, count) = db.rate_limit_bucket("k").await.unwrap().unwrap();
        assert_eq!(start, (later / window_ms) * window_ms);
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let db = StoreDb::open_in_memory().await.unwrap();
        let now = 1_700_000_000_000;
        assert_eq!(
            db.rate_limit_reserve("a", 1, 60_000, now).await.unwrap(),
            RateLimitOutcome::Allowed
        );
        assert_eq!(
            db.rate_limit_reserve("b", 1, 60_000, now).await.unwrap(),
            RateLimitOutcome::Allowed
        );
        assert!(matches!(
            db.rate_limit_reserve("a", 1, 60_000, now).await.unwrap(),
            RateLimitOutcome::Limited { .. }
        ));
    }
}
