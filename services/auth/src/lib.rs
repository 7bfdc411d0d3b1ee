//! RBAC resolution and session-management core
//!
//! [`RbacCore`] wires the entity store, the session manager and the
//! authenticator around one set of collaborators (clock, id generator,
//! second-factor verifier) and one lock manager. Construct one per
//! process, or one per test for isolation.

pub mod activity;
pub mod authn;
pub mod challenge;
pub mod command;
pub mod graph;
pub mod models;
pub mod password;
pub mod registry;
pub mod session;
pub mod store;
pub mod validation;

pub use activity::{ActivityFilter, ActivityKind, ActivityLog, ActivityPage};
pub use authn::{AcceptWellFormed, AuthFlow, AuthState, Authenticator, CodeVerifier, LoginOutcome, SignedIn};
pub use command::{AdminCommand, AdminOutcome};
pub use session::SessionManager;
pub use store::{EntityStore, LockManager};

use common::{Clock, CoreConfig, CoreResult, IdGenerator, RandomIdGenerator, SystemClock};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::challenge::ChallengeStore;
use crate::models::{User, UserStatus};

/// The assembled core
pub struct RbacCore {
    config: CoreConfig,
    store: Arc<EntityStore>,
    sessions: Arc<SessionManager>,
    auth: Authenticator,
    activity: Arc<ActivityLog>,
}

/// Builder for [`RbacCore`] with replaceable collaborators
pub struct RbacCoreBuilder {
    config: CoreConfig,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    verifier: Arc<dyn CodeVerifier>,
}

impl RbacCoreBuilder {
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn ids(mut self, ids: impl IdGenerator + 'static) -> Self {
        self.ids = Arc::new(ids);
        self
    }

    pub fn verifier(mut self, verifier: impl CodeVerifier + 'static) -> Self {
        self.verifier = Arc::new(verifier);
        self
    }

    pub fn build(self) -> RbacCore {
        let locks = Arc::new(LockManager::new(self.config.locks.acquire_timeout()));
        let store = Arc::new(EntityStore::new(
            locks.clone(),
            self.clock.clone(),
            self.ids.clone(),
            self.config.policy.clone(),
        ));
        let sessions = Arc::new(SessionManager::new(
            locks,
            self.clock.clone(),
            self.ids.clone(),
            self.config.session.clone(),
        ));
        let activity = Arc::new(ActivityLog::new(self.clock.clone(), self.ids.clone()));
        let challenges = ChallengeStore::new(self.clock, self.ids, self.config.mfa.clone());
        let auth = Authenticator::new(
            store.clone(),
            sessions.clone(),
            challenges,
            self.verifier,
            activity.clone(),
        );

        RbacCore {
            config: self.config,
            store,
            sessions,
            auth,
            activity,
        }
    }
}

impl RbacCore {
    /// Core with production collaborators
    pub fn new(config: CoreConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: CoreConfig) -> RbacCoreBuilder {
        RbacCoreBuilder {
            config,
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomIdGenerator),
            verifier: Arc::new(AcceptWellFormed),
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn auth(&self) -> &Authenticator {
        &self.auth
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }

    /// Remove a user together with their sessions and pending challenges
    pub async fn delete_user(&self, id: Uuid) -> CoreResult<User> {
        let user = self.store.delete_user(id).await?;
        let ended = self.sessions.end_all_user_sessions(id, None).await;
        let revoked = self.auth.revoke_challenges(id).await;
        info!(
            "Deleted user {} ({} session(s) ended, {} challenge(s) revoked)",
            id, ended, revoked
        );
        Ok(user)
    }

    /// Deactivated users lose their sessions immediately
    pub(crate) async fn end_sessions_if_inactive(&self, ids: &[Uuid], status: UserStatus) {
        if status != UserStatus::Inactive {
            return;
        }
        for id in ids {
            let ended = self.sessions.end_all_user_sessions(*id, None).await;
            if ended > 0 {
                info!("Ended {} session(s) of deactivated user {}", ended, id);
            }
        }
    }

    /// Drop all state, keeping configuration and collaborators
    pub async fn reset(&self) {
        self.store.clear().await;
        self.sessions.clear().await;
        self.auth.clear().await;
        self.activity.clear().await;
    }
}
