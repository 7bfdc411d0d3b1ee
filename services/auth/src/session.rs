//! Session management
//!
//! Sessions live in an in-memory table keyed by token with a secondary
//! index on the owning user. Expiry and inactivity are evaluated lazily
//! whenever a session is touched; `cleanup_expired_sessions` is only a
//! best-effort sweep.

use chrono::{DateTime, Duration, Utc};
use common::config::SessionConfig;
use common::{AggregateKey, Clock, CoreError, CoreResult, IdGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::models::{Session, SessionId};
use crate::store::LockManager;

#[derive(Debug, Default)]
struct SessionTable {
    by_id: HashMap<SessionId, Session>,
    /// Session ids per user, in creation order
    by_user: HashMap<Uuid, Vec<SessionId>>,
}

impl SessionTable {
    fn insert(&mut self, session: Session) {
        self.by_user
            .entry(session.user_id)
            .or_default()
            .push(session.id.clone());
        self.by_id.insert(session.id.clone(), session);
    }

    fn remove(&mut self, id: &SessionId) -> Option<Session> {
        let session = self.by_id.remove(id)?;
        if let Some(ids) = self.by_user.get_mut(&session.user_id) {
            ids.retain(|other| other != id);
            if ids.is_empty() {
                self.by_user.remove(&session.user_id);
            }
        }
        Some(session)
    }

    fn user_session_ids(&self, user_id: Uuid) -> Vec<SessionId> {
        self.by_user.get(&user_id).cloned().unwrap_or_default()
    }
}

/// Session manager
pub struct SessionManager {
    sessions: RwLock<SessionTable>,
    locks: Arc<LockManager>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: SessionConfig,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new(
        locks: Arc<LockManager>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(SessionTable::default()),
            locks,
            clock,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn timeout(&self) -> Duration {
        Duration::seconds(self.config.session_timeout_secs)
    }

    /// Why a session can no longer be used at `now`, if it cannot
    fn check_alive(&self, session: &Session, now: DateTime<Utc>) -> CoreResult<()> {
        if !session.is_active {
            return Err(CoreError::SessionInactive);
        }
        if now > session.expires_at {
            return Err(CoreError::SessionExpired);
        }
        if now - session.last_activity > Duration::seconds(self.config.max_inactivity_secs) {
            return Err(CoreError::InactivityTimeout);
        }
        Ok(())
    }

    /// Create a new session for a user
    ///
    /// Dead sessions of the user are ended first; if the user is still at
    /// the concurrency limit, the oldest active sessions are evicted to
    /// make room.
    pub async fn create_session(&self, user_id: Uuid) -> CoreResult<Session> {
        info!("Creating session for user: {}", user_id);

        let _guard = self.locks.acquire(AggregateKey::User(user_id)).await?;
        let mut table = self.sessions.write().await;
        let now = self.clock.now();

        let mut active = Vec::new();
        for id in table.user_session_ids(user_id) {
            let Some(session) = table.by_id.get(&id) else {
                continue;
            };
            match self.check_alive(session, now) {
                Ok(()) => active.push((session.created_at, id)),
                Err(CoreError::SessionInactive) => {}
                Err(reason) => {
                    debug!("Ending dead session for user {}: {}", user_id, reason);
                    if let Some(session) = table.by_id.get_mut(&id) {
                        session.end(now);
                    }
                }
            }
        }

        // Stable sort keeps creation order for equal timestamps
        active.sort_by_key(|(created_at, _)| *created_at);
        let limit = self.config.max_concurrent_sessions.max(1);
        let excess = (active.len() + 1).saturating_sub(limit);
        for (_, id) in active.iter().take(excess) {
            if let Some(session) = table.by_id.get_mut(id) {
                session.end(now);
                info!("Evicted oldest session of user {} to stay within limit", user_id);
            }
        }

        let session = Session {
            id: SessionId(self.ids.token()),
            user_id,
            created_at: now,
            last_activity: now,
            expires_at: now + self.timeout(),
            is_active: true,
            ended_at: None,
        };
        table.insert(session.clone());
        Ok(session)
    }

    /// Validate a session and record activity on it
    ///
    /// A session found expired or idle is marked inactive for good. A live
    /// session close to its deadline has the deadline slid a full timeout
    /// forward.
    pub async fn validate_session(&self, id: &SessionId) -> CoreResult<Session> {
        let mut table = self.sessions.write().await;
        let now = self.clock.now();
        let session = table
            .by_id
            .get_mut(id)
            .ok_or_else(|| CoreError::not_found("session", id))?;

        match self.check_alive(session, now) {
            Ok(()) => {}
            Err(CoreError::SessionInactive) => return Err(CoreError::SessionInactive),
            Err(reason) => {
                info!("Session of user {} ended: {}", session.user_id, reason);
                session.end(now);
                return Err(reason);
            }
        }

        session.last_activity = now;
        if session.expires_at - now <= Duration::seconds(self.config.refresh_threshold_secs) {
            session.expires_at = now + self.timeout();
            debug!("Refreshed session expiry for user {}", session.user_id);
        }
        Ok(session.clone())
    }

    /// Read a session without touching it
    pub async fn get_session(&self, id: &SessionId) -> CoreResult<Session> {
        self.sessions
            .read()
            .await
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::not_found("session", id))
    }

    /// End a session; returns whether an active session was ended
    pub async fn end_session(&self, id: &SessionId) -> bool {
        let mut table = self.sessions.write().await;
        let now = self.clock.now();
        match table.by_id.get_mut(id) {
            Some(session) => session.end(now),
            None => false,
        }
    }

    /// End every active session of a user, optionally keeping one
    pub async fn end_all_user_sessions(&self, user_id: Uuid, except: Option<&SessionId>) -> usize {
        info!("Ending all sessions for user: {}", user_id);

        let mut table = self.sessions.write().await;
        let now = self.clock.now();
        let mut ended = 0;
        for id in table.user_session_ids(user_id) {
            if Some(&id) == except {
                continue;
            }
            if let Some(session) = table.by_id.get_mut(&id) {
                if session.end(now) {
                    ended += 1;
                }
            }
        }
        ended
    }

    /// Every session of a user, oldest first
    pub async fn user_sessions(&self, user_id: Uuid) -> Vec<Session> {
        let table = self.sessions.read().await;
        table
            .user_session_ids(user_id)
            .iter()
            .filter_map(|id| table.by_id.get(id).cloned())
            .collect()
    }

    /// Number of sessions of a user that would currently validate
    pub async fn active_session_count(&self, user_id: Uuid) -> usize {
        let table = self.sessions.read().await;
        let now = self.clock.now();
        table
            .user_session_ids(user_id)
            .iter()
            .filter_map(|id| table.by_id.get(id))
            .filter(|session| self.check_alive(session, now).is_ok())
            .count()
    }

    /// Drop every session that is ended, expired or idle
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let mut table = self.sessions.write().await;
        let now = self.clock.now();
        let dead: Vec<SessionId> = table
            .by_id
            .values()
            .filter(|session| self.check_alive(session, now).is_err())
            .map(|session| session.id.clone())
            .collect();

        for id in &dead {
            table.remove(id);
        }
        if !dead.is_empty() {
            info!("Cleaned up {} expired session(s)", dead.len());
        }
        dead.len()
    }

    /// Drop every session
    pub async fn clear(&self) {
        *self.sessions.write().await = SessionTable::default();
    }
}
