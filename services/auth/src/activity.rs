//! Activity log
//!
//! An append-only, bounded record of security-relevant and
//! administrative events, queried newest first in pages.

use chrono::{DateTime, Utc};
use common::{Clock, IdGenerator};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Oldest entries are dropped beyond this many
const MAX_ENTRIES: usize = 10_000;

pub const DEFAULT_PAGE_SIZE: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityKind {
    Login,
    Logout,
    MfaVerified,
    UserCreated,
    UserUpdated,
    UserDeleted,
    RoleCreated,
    RoleUpdated,
    RoleDeleted,
    RoleAssigned,
    PermissionCreated,
    PermissionUpdated,
    PermissionDeleted,
    PermissionGranted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
    pub id: Uuid,
    /// User the event is about, if any
    pub user_id: Option<Uuid>,
    pub kind: ActivityKind,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Query filter; unset fields match everything
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityFilter {
    pub user_id: Option<Uuid>,
    pub kind: Option<ActivityKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl ActivityFilter {
    fn matches(&self, entry: &ActivityEntry) -> bool {
        self.user_id.is_none_or(|id| entry.user_id == Some(id))
            && self.kind.is_none_or(|kind| entry.kind == kind)
            && self.since.is_none_or(|since| entry.timestamp >= since)
            && self.until.is_none_or(|until| entry.timestamp <= until)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityPage {
    pub items: Vec<ActivityEntry>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}

pub struct ActivityLog {
    entries: RwLock<VecDeque<ActivityEntry>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl ActivityLog {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            entries: RwLock::new(VecDeque::new()),
            clock,
            ids,
        }
    }

    pub async fn record(
        &self,
        user_id: Option<Uuid>,
        kind: ActivityKind,
        details: impl Into<String>,
    ) -> ActivityEntry {
        let entry = ActivityEntry {
            id: self.ids.entity_id(),
            user_id,
            kind,
            details: details.into(),
            timestamp: self.clock.now(),
        };

        let mut entries = self.entries.write().await;
        if entries.len() == MAX_ENTRIES {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// One page of matching entries, newest first
    ///
    /// `page` is 1-based; a zero page or limit falls back to the defaults.
    pub async fn query(&self, filter: &ActivityFilter, page: usize, limit: usize) -> ActivityPage {
        let page = page.max(1);
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };

        let entries = self.entries.read().await;
        let mut matching: Vec<&ActivityEntry> =
            entries.iter().filter(|entry| filter.matches(entry)).collect();
        // Entries are appended in time order; reversing keeps ties newest first
        matching.reverse();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip((page - 1).saturating_mul(limit))
            .take(limit)
            .cloned()
            .collect();

        ActivityPage {
            items,
            total,
            page,
            total_pages: total.div_ceil(limit),
        }
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::{ManualClock, RandomIdGenerator};

    fn log() -> (ActivityLog, ManualClock) {
        let clock = ManualClock::default();
        let log = ActivityLog::new(Arc::new(clock.clone()), Arc::new(RandomIdGenerator));
        (log, clock)
    }

    #[tokio::test]
    async fn query_pages_newest_first() {
        let (log, clock) = log();
        let user_id = Uuid::new_v4();
        for i in 0..12 {
            log.record(Some(user_id), ActivityKind::Login, format!("login {}", i))
                .await;
            clock.advance(Duration::minutes(1));
        }

        let first = log.query(&ActivityFilter::default(), 1, 0).await;
        assert_eq!(first.total, 12);
        assert_eq!(first.total_pages, 2);
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.items[0].details, "login 11");

        let second = log.query(&ActivityFilter::default(), 2, 10).await;
        assert_eq!(second.items.len(), 2);
        assert_eq!(second.items[1].details, "login 0");
    }

    #[tokio::test]
    async fn filter_by_user_kind_and_window() {
        let (log, clock) = log();
        let alice = Uuid::new_v4();
        let start = clock.now();

        log.record(Some(alice), ActivityKind::Login, "").await;
        clock.advance(Duration::hours(1));
        log.record(Some(alice), ActivityKind::Logout, "").await;
        log.record(Some(Uuid::new_v4()), ActivityKind::Login, "").await;
        log.record(None, ActivityKind::RoleCreated, "Editor").await;

        let filter = ActivityFilter {
            user_id: Some(alice),
            ..Default::default()
        };
        assert_eq!(log.query(&filter, 1, 10).await.total, 2);

        let filter = ActivityFilter {
            kind: Some(ActivityKind::Login),
            since: Some(start + Duration::minutes(30)),
            ..Default::default()
        };
        assert_eq!(log.query(&filter, 1, 10).await.total, 1);

        let filter = ActivityFilter {
            until: Some(start),
            ..Default::default()
        };
        let page = log.query(&filter, 1, 10).await;
        assert_eq!(page.items[0].kind, ActivityKind::Login);
        assert_eq!(page.items[0].user_id, Some(alice));
    }

    #[tokio::test]
    async fn empty_log_has_no_pages() {
        let (log, _) = log();
        let page = log.query(&ActivityFilter::default(), 3, 10).await;
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 0);
        assert!(page.items.is_empty());
    }

    #[tokio::test]
    async fn page_far_past_the_end_is_empty() {
        let (log, _clock) = log();
        log.record(None, ActivityKind::Login, "only entry").await;

        let page = log.query(&ActivityFilter::default(), usize::MAX, 10).await;
        assert_eq!(page.total, 1);
        assert_eq!(page.page, usize::MAX);
        assert!(page.items.is_empty());
    }
}
