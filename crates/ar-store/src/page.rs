//! Cursor-based pagination over indexed queries.
//!
//! Keyset pagination in descending `(sort_key, id)` order. The cursor is an
//! opaque `"<sort_key>:<id>"` string naming the last row the caller has seen;
//! the next page continues strictly after it. A page shorter than the
//! requested size marks the end of the listing.

use serde::Serialize;
use uuid::Uuid;

/// One page of results plus continuation state.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Present iff `is_done` is false.
    pub continue_cursor: Option<String>,
    pub is_done: bool,
}

impl<T> Page<T> {
    /// Assemble a page from a query that fetched at most `num_items` rows,
    /// deriving the continuation cursor from the last row's sort key and id.
    pub fn from_rows(rows: Vec<T>, num_items: usize, key_of: impl Fn(&T) -> (i64, Uuid)) -> Self {
        let is_done = rows.len() < num_items;
        let continue_cursor = if is_done {
            None
        } else {
            rows.last().map(|row| {
                let (sort_key, id) = key_of(row);
                encode_cursor(sort_key, id)
            })
        };
        Page {
            items: rows,
            continue_cursor,
            is_done,
        }
    }
}

pub fn encode_cursor(sort_key: i64, id: Uuid) -> String {
    format!("{sort_key}:{id}")
}

/// Parse a client-supplied cursor; malformed cursors read as "start over".
pub fn decode_cursor(cursor: &str) -> Option<(i64, String)> {
    let (sort_key, id) = cursor.split_once(':')?;
    let sort_key = sort_key.parse().ok()?;
    let id = Uuid::parse_str(id).ok()?;
    Some((sort_key, id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_roundtrip() {
        let id = Uuid::new_v4();
        let cursor = encode_cursor(1_700_000_000_000, id);
        let (sort_key, parsed) = decode_cursor(&cursor).unwrap();
        assert_eq!(sort_key, 1_700_000_000_000);
        assert_eq!(parsed, id.to_string());
    }

    #[test]
    fn malformed_cursors_are_ignored() {
        assert!(decode_cursor("").is_none());
        assert!(decode_cursor("abc").is_none());
        assert!(decode_cursor("12:not-a-uuid").is_none());
        assert!(decode_cursor(":").is_none());
    }

    #[test]
    fn page_assembly() {
        let id = Uuid::new_v4();
        let full: Page<(i64, Uuid)> = Page::from_rows(vec![(5, id), (3, id)], 2, |r| (r.0, r.1));
        assert!(!full.is_done);
        assert_eq!(full.continue_cursor.as_deref(), Some(format!("3:{id}").as_str()));

        let short: Page<(i64, Uuid)> = Page::from_rows(vec![(5, id)], 2, |r| (r.0, r.1));
        assert!(short.is_done);
        assert!(short.continue_cursor.is_none());
    }
}
