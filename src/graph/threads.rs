//! Recent-thread index carried on contacts and email addresses.
//!
//! The store keeps the index as a JSONB array cell for compatibility with the
//! query surface, but mutation never happens in SQL: the cell is parsed into
//! a [`RecentThreads`] value, folded in memory, and serialized back inside the
//! same update transaction.

use chrono::{DateTime, Utc};
use rocket_okapi::okapi::schemars::{self, JsonSchema};
use serde::{Deserialize, Serialize};

/// Upper bound on entries kept per contact / email address.
pub const RECENT_THREADS_CAP: usize = 100;

/// One entry of the recent-thread index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ThreadRef {
    /// Provider-issued thread identifier.
    #[serde(rename = "threadId")]
    pub thread_id: String,
    /// Account label the thread was observed on.
    pub account: String,
    /// Timestamp of the message that produced this entry (ISO-8601 on disk).
    pub timestamp: DateTime<Utc>,
}

/// Ordered recent-thread list, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentThreads(Vec<ThreadRef>);

impl RecentThreads {
    /// Parse the stored JSONB cell. Malformed cells yield an empty list
    /// rather than an error; the index is advisory, not authoritative.
    pub fn from_value(value: &serde_json::Value) -> Self {
        match serde_json::from_value(value.clone()) {
            Ok(entries) => Self(entries),
            Err(err) => {
                log::warn!("discarding malformed recent_threads cell: {}", err);
                Self::default()
            }
        }
    }

    /// Serialize back to the JSONB representation.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(&self.0).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
    }

    /// Fold one thread reference in: any existing entry with the same
    /// `thread_id` is removed, the new entry goes to the front, and the list
    /// is truncated to [`RECENT_THREADS_CAP`].
    pub fn touch(&mut self, entry: ThreadRef) {
        self.0.retain(|existing| existing.thread_id != entry.thread_id);
        self.0.insert(0, entry);
        self.0.truncate(RECENT_THREADS_CAP);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[ThreadRef] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(thread_id: &str, secs: i64) -> ThreadRef {
        ThreadRef {
            thread_id: thread_id.to_string(),
            account: "work".to_string(),
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[test]
    fn touch_prepends_newest() {
        let mut threads = RecentThreads::default();
        threads.touch(entry("t1", 100));
        threads.touch(entry("t2", 200));

        let ids: Vec<&str> = threads.entries().iter().map(|e| e.thread_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);
    }

    #[test]
    fn duplicate_thread_moves_to_front_with_new_timestamp() {
        let mut threads = RecentThreads::default();
        threads.touch(entry("t1", 100));
        threads.touch(entry("t2", 150));
        threads.touch(entry("t1", 200));

        let ids: Vec<&str> = threads.entries().iter().map(|e| e.thread_id.as_str()).collect();
        assert_eq!(ids, vec!["t1", "t2"]);
        assert_eq!(threads.entries()[0].timestamp, Utc.timestamp_opt(200, 0).unwrap());
        assert_eq!(threads.len(), 2);
    }

    #[test]
    fn caps_at_one_hundred_entries_evicting_oldest() {
        let mut threads = RecentThreads::default();
        for i in 1..=101 {
            threads.touch(entry(&format!("t{i}"), i as i64));
        }

        assert_eq!(threads.len(), RECENT_THREADS_CAP);
        assert_eq!(threads.entries()[0].thread_id, "t101");
        assert_eq!(threads.entries()[99].thread_id, "t2");
        // t1 fell off the end
        assert!(threads.entries().iter().all(|e| e.thread_id != "t1"));
    }

    #[test]
    fn thread_ids_stay_distinct() {
        let mut threads = RecentThreads::default();
        for i in 0..250 {
            threads.touch(entry(&format!("t{}", i % 40), i));
        }

        let mut ids: Vec<&str> = threads.entries().iter().map(|e| e.thread_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), threads.len());
    }

    #[test]
    fn malformed_cell_parses_to_empty() {
        let threads = RecentThreads::from_value(&serde_json::json!({"not": "an array"}));
        assert!(threads.is_empty());
    }

    #[test]
    fn survives_json_round_trip() {
        let mut threads = RecentThreads::default();
        threads.touch(entry("t1", 100));
        threads.touch(entry("t2", 200));

        let reparsed = RecentThreads::from_value(&threads.to_value());
        assert_eq!(reparsed, threads);
    }
}
