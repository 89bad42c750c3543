//! Presence for collaborative rows
//!
//! Tracks which users are viewing or editing which row and field. Expiry is
//! lazy: a presence older than the ttl is simply not reported, and
//! [`CollaborationSessionTracker::purge_expired`] reclaims memory when the
//! caller wants it to. Nothing here affects conflict resolution.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tablesync_id::{Clock, SystemClock};
use tablesync_log::trace;

/// Default inactivity window before a presence expires
pub const DEFAULT_PRESENCE_TTL: Duration = Duration::from_secs(300);

/// A user's presence on a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: String,
    pub row_id: String,
    /// Field being edited, if any
    pub field_id: Option<String>,
    pub last_seen: DateTime<Utc>,
}

impl UserPresence {
    fn last_seen_ms(&self) -> i64 {
        self.last_seen.timestamp_millis()
    }
}

/// Per-row collaboration state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditingState {
    /// Nobody is active on the row
    Idle,
    /// At least one unexpired presence
    Editing,
}

/// Presence tracker for all rows on this node.
#[derive(Debug, Clone)]
pub struct CollaborationSessionTracker {
    /// row id -> user id -> presence
    rows: Arc<DashMap<String, HashMap<String, UserPresence>>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CollaborationSessionTracker {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_PRESENCE_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            rows: Arc::new(DashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record that `user_id` is active on `row_id`, optionally on a field.
    pub fn touch(&self, user_id: &str, row_id: &str, field_id: Option<&str>) {
        let last_seen = self.now();
        let presence = UserPresence {
            user_id: user_id.to_string(),
            row_id: row_id.to_string(),
            field_id: field_id.map(str::to_string),
            last_seen,
        };
        trace!("Presence {} on {} ({:?})", user_id, row_id, field_id);
        self.rows
            .entry(row_id.to_string())
            .or_default()
            .insert(user_id.to_string(), presence);
    }

    /// Unexpired presences on `row_id`, ordered by user id.
    pub fn snapshot(&self, row_id: &str) -> Vec<UserPresence> {
        let now_ms = self.clock.now_ms();
        let mut users: Vec<UserPresence> = self
            .rows
            .get(row_id)
            .map(|users| {
                users
                    .values()
                    .filter(|p| !self.is_expired(p, now_ms))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        users.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        users
    }

    /// Remove a presence explicitly. Returns whether one existed.
    pub fn leave(&self, user_id: &str, row_id: &str) -> bool {
        let removed = self
            .rows
            .get_mut(row_id)
            .is_some_and(|mut users| users.remove(user_id).is_some());
        self.rows.remove_if(row_id, |_, users| users.is_empty());
        removed
    }

    pub fn state(&self, row_id: &str) -> EditingState {
        let now_ms = self.clock.now_ms();
        let active = self
            .rows
            .get(row_id)
            .is_some_and(|users| users.values().any(|p| !self.is_expired(p, now_ms)));
        if active {
            EditingState::Editing
        } else {
            EditingState::Idle
        }
    }

    /// Drop expired presences. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now_ms = self.clock.now_ms();
        let mut removed = 0;
        self.rows.retain(|_, users| {
            let before = users.len();
            users.retain(|_, p| !self.is_expired(p, now_ms));
            removed += before - users.len();
            !users.is_empty()
        });
        removed
    }

    fn is_expired(&self, presence: &UserPresence, now_ms: i64) -> bool {
        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_sub(presence.last_seen_ms()) > ttl_ms
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.clock.now_ms()).unwrap_or_default()
    }
}

impl Default for CollaborationSessionTracker {
    fn default() -> Self {
        Self::new()
    }
}
