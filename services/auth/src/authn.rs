//! Authentication and the MFA state machine
//!
//! A sign-in flow moves `Anonymous -> CredentialsPending` when a password
//! is submitted, then either straight to `Authenticated` (a session is
//! created) or to `MfaPending` with a challenge. From `MfaPending` a
//! correct code authenticates; an expired or exhausted challenge returns
//! the flow to `Anonymous`.

use common::{CoreError, CoreResult};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::activity::{ActivityKind, ActivityLog};
use crate::challenge::ChallengeStore;
use crate::models::{ChallengeId, NewUser, Session, SessionId, UpdateUser, User};
use crate::password::verify_password;
use crate::session::SessionManager;
use crate::store::EntityStore;
use crate::validation::is_well_formed_code;

/// Checks a second-factor code for a user
pub trait CodeVerifier: Send + Sync {
    fn verify(&self, user: &User, code: &str) -> bool;
}

/// Accepts any well-formed code
///
/// Stand-in until a real TOTP verifier is plugged in.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptWellFormed;

impl CodeVerifier for AcceptWellFormed {
    fn verify(&self, _user: &User, code: &str) -> bool {
        is_well_formed_code(code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    Anonymous,
    CredentialsPending,
    MfaPending,
    Authenticated,
}

/// A completed sign-in
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedIn {
    pub user: User,
    pub session: Session,
}

/// Result of a password check
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// A second factor is required before a session is issued
    MfaRequired { challenge_id: ChallengeId },
    Authenticated(SignedIn),
}

impl LoginOutcome {
    pub fn state(&self) -> AuthState {
        match self {
            LoginOutcome::MfaRequired { .. } => AuthState::MfaPending,
            LoginOutcome::Authenticated(_) => AuthState::Authenticated,
        }
    }
}

/// Authenticator
pub struct Authenticator {
    store: Arc<EntityStore>,
    sessions: Arc<SessionManager>,
    challenges: ChallengeStore,
    verifier: Arc<dyn CodeVerifier>,
    activity: Arc<ActivityLog>,
}

impl Authenticator {
    pub fn new(
        store: Arc<EntityStore>,
        sessions: Arc<SessionManager>,
        challenges: ChallengeStore,
        verifier: Arc<dyn CodeVerifier>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            store,
            sessions,
            challenges,
            verifier,
            activity,
        }
    }

    /// Check a user's password
    ///
    /// Unknown email and wrong password are indistinguishable: both run
    /// one Argon2 verification and fail with `InvalidCredentials`. The
    /// account status is only revealed to a caller who knows the password.
    pub async fn login(&self, email: &str, password: &str) -> CoreResult<LoginOutcome> {
        let user = self.store.find_user_by_email(email).await;
        let matched = verify_password(
            password,
            user.as_ref().and_then(|user| user.password_hash.as_deref()),
        );

        let user = match user {
            Some(user) if matched => user,
            _ => {
                warn!("Login failed: invalid credentials");
                return Err(CoreError::InvalidCredentials);
            }
        };

        if !user.is_active() {
            warn!("Login refused for inactive user {}", user.id);
            return Err(CoreError::AccountInactive);
        }

        if user.mfa_enabled {
            let challenge = self.challenges.issue(user.id).await;
            info!("Issued MFA challenge for user {}", user.id);
            return Ok(LoginOutcome::MfaRequired {
                challenge_id: challenge.id,
            });
        }

        let signed_in = self.sign_in(user, ActivityKind::Login).await?;
        Ok(LoginOutcome::Authenticated(signed_in))
    }

    /// Complete a pending sign-in with a second-factor code
    pub async fn verify_mfa(&self, challenge_id: &ChallengeId, code: &str) -> CoreResult<SignedIn> {
        let challenge = self.challenges.get(challenge_id).await?;

        if !is_well_formed_code(code) {
            return Err(CoreError::InvalidCodeFormat);
        }

        let user = match self.store.get_user(challenge.user_id).await {
            Ok(user) if user.is_active() => user,
            _ => {
                warn!("MFA challenge for unavailable user {} discarded", challenge.user_id);
                self.challenges.consume(challenge_id).await.ok();
                return Err(CoreError::InvalidChallenge);
            }
        };

        if !self.verifier.verify(&user, code) {
            let remaining = self.challenges.record_failure(challenge_id).await?;
            warn!(
                "MFA verification failed for user {}, {} attempt(s) left",
                user.id, remaining
            );
            return Err(CoreError::InvalidCode);
        }

        self.challenges.consume(challenge_id).await?;
        self.sign_in(user, ActivityKind::MfaVerified).await
    }

    async fn sign_in(&self, user: User, kind: ActivityKind) -> CoreResult<SignedIn> {
        let session = self.sessions.create_session(user.id).await?;
        let user = match self.store.record_login(user.id).await {
            Ok(user) => user,
            Err(e) => {
                // User vanished mid sign-in
                self.sessions.end_session(&session.id).await;
                return Err(e);
            }
        };
        self.activity
            .record(Some(user.id), kind, "User signed in")
            .await;
        info!("User {} authenticated", user.id);
        Ok(SignedIn { user, session })
    }

    /// End a session; always leaves the caller anonymous
    pub async fn logout(&self, session_id: &SessionId) -> AuthState {
        let owner = self.sessions.get_session(session_id).await.ok();
        if self.sessions.end_session(session_id).await {
            if let Some(session) = owner {
                info!("User {} logged out", session.user_id);
                self.activity
                    .record(Some(session.user_id), ActivityKind::Logout, "User logged out")
                    .await;
            }
        }
        AuthState::Anonymous
    }

    /// Self-service signup
    pub async fn register(&self, email: &str, name: &str, password: &str) -> CoreResult<User> {
        let user = self
            .store
            .create_user(NewUser {
                email: email.to_string(),
                name: name.to_string(),
                password: Some(password.to_string()),
                roles: Default::default(),
                status: None,
                mfa_enabled: false,
            })
            .await?;
        self.activity
            .record(Some(user.id), ActivityKind::UserCreated, "User registered")
            .await;
        Ok(user)
    }

    pub async fn enable_mfa(&self, user_id: Uuid) -> CoreResult<User> {
        info!("Enabling MFA for user {}", user_id);
        self.set_mfa(user_id, true).await
    }

    /// Turn off the second factor; requires a valid current code
    pub async fn disable_mfa(&self, user_id: Uuid, code: &str) -> CoreResult<User> {
        if !is_well_formed_code(code) {
            return Err(CoreError::InvalidCodeFormat);
        }
        let user = self.store.get_user(user_id).await?;
        if !self.verifier.verify(&user, code) {
            warn!("Refusing to disable MFA for user {}: invalid code", user_id);
            return Err(CoreError::InvalidCode);
        }
        info!("Disabling MFA for user {}", user_id);
        self.set_mfa(user_id, false).await
    }

    async fn set_mfa(&self, user_id: Uuid, enabled: bool) -> CoreResult<User> {
        let user = self
            .store
            .update_user(
                user_id,
                UpdateUser {
                    mfa_enabled: Some(enabled),
                    ..Default::default()
                },
            )
            .await?;
        self.activity
            .record(Some(user_id), ActivityKind::UserUpdated, "MFA setting changed")
            .await;
        Ok(user)
    }

    /// Drop every pending challenge of a user
    pub async fn revoke_challenges(&self, user_id: Uuid) -> usize {
        self.challenges.revoke_user(user_id).await
    }

    pub(crate) async fn clear(&self) {
        self.challenges.clear().await;
    }
}

/// One client's sign-in flow
///
/// Tracks the state between calls so a client holds either nothing, a
/// pending challenge, or a session.
#[derive(Debug, Clone)]
pub struct AuthFlow {
    state: AuthState,
    challenge: Option<ChallengeId>,
    session: Option<SessionId>,
}

impl Default for AuthFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthFlow {
    pub fn new() -> Self {
        Self {
            state: AuthState::Anonymous,
            challenge: None,
            session: None,
        }
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref()
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    pub async fn submit_credentials(
        &mut self,
        auth: &Authenticator,
        email: &str,
        password: &str,
    ) -> CoreResult<AuthState> {
        if self.state != AuthState::Anonymous {
            return Err(CoreError::Validation(
                "A sign-in is already in progress".to_string(),
            ));
        }

        self.state = AuthState::CredentialsPending;
        match auth.login(email, password).await {
            Ok(LoginOutcome::MfaRequired { challenge_id }) => {
                self.state = AuthState::MfaPending;
                self.challenge = Some(challenge_id);
            }
            Ok(LoginOutcome::Authenticated(signed_in)) => {
                self.state = AuthState::Authenticated;
                self.session = Some(signed_in.session.id);
            }
            Err(err) => {
                self.reset();
                return Err(err);
            }
        }
        Ok(self.state)
    }

    /// Submit a code while `MfaPending`
    ///
    /// A wrong or malformed code keeps the flow pending; a dead challenge
    /// returns it to `Anonymous`.
    pub async fn submit_code(&mut self, auth: &Authenticator, code: &str) -> CoreResult<AuthState> {
        let Some(challenge_id) = self.challenge.clone() else {
            return Err(CoreError::InvalidChallenge);
        };

        match auth.verify_mfa(&challenge_id, code).await {
            Ok(signed_in) => {
                self.state = AuthState::Authenticated;
                self.challenge = None;
                self.session = Some(signed_in.session.id);
                Ok(self.state)
            }
            Err(CoreError::InvalidCode) => {
                if auth.challenges.get(&challenge_id).await.is_err() {
                    self.reset();
                }
                Err(CoreError::InvalidCode)
            }
            Err(CoreError::InvalidCodeFormat) => Err(CoreError::InvalidCodeFormat),
            Err(err) => {
                self.reset();
                Err(err)
            }
        }
    }

    pub async fn logout(&mut self, auth: &Authenticator) -> AuthState {
        if let Some(session_id) = self.session.take() {
            auth.logout(&session_id).await;
        }
        self.reset();
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LockManager;
    use chrono::Duration;
    use common::config::{MfaConfig, PolicyConfig, SessionConfig};
    use common::{ManualClock, RandomIdGenerator};

    struct FixedCode(&'static str);

    impl CodeVerifier for FixedCode {
        fn verify(&self, _user: &User, code: &str) -> bool {
            code == self.0
        }
    }

    struct Fixture {
        auth: Authenticator,
        store: Arc<EntityStore>,
        sessions: Arc<SessionManager>,
        activity: Arc<ActivityLog>,
        clock: ManualClock,
    }

    fn fixture(verifier: Arc<dyn CodeVerifier>) -> Fixture {
        let clock = ManualClock::default();
        let locks = Arc::new(LockManager::new(std::time::Duration::from_millis(200)));
        let ids = Arc::new(RandomIdGenerator);
        let store = Arc::new(EntityStore::new(
            locks.clone(),
            Arc::new(clock.clone()),
            ids.clone(),
            PolicyConfig::default(),
        ));
        let sessions = Arc::new(SessionManager::new(
            locks,
            Arc::new(clock.clone()),
            ids.clone(),
            SessionConfig::default(),
        ));
        let challenges = ChallengeStore::new(
            Arc::new(clock.clone()),
            ids.clone(),
            MfaConfig {
                challenge_ttl_secs: 300,
                max_attempts: 3,
            },
        );
        let activity = Arc::new(ActivityLog::new(Arc::new(clock.clone()), ids));
        let auth = Authenticator::new(
            store.clone(),
            sessions.clone(),
            challenges,
            verifier,
            activity.clone(),
        );
        Fixture {
            auth,
            store,
            sessions,
            activity,
            clock,
        }
    }

    async fn signup(fixture: &Fixture, email: &str, mfa: bool) -> User {
        let user = fixture
            .auth
            .register(email, "Test User", "Str0ng!pass")
            .await
            .unwrap();
        if mfa {
            fixture.auth.enable_mfa(user.id).await.unwrap()
        } else {
            user
        }
    }

    #[tokio::test]
    async fn login_without_mfa_creates_session() {
        let f = fixture(Arc::new(AcceptWellFormed));
        let user = signup(&f, "user@example.com", false).await;

        let outcome = f.auth.login("USER@example.com", "Str0ng!pass").await.unwrap();
        assert_eq!(outcome.state(), AuthState::Authenticated);
        let LoginOutcome::Authenticated(signed_in) = outcome else {
            panic!("expected a session");
        };
        assert_eq!(signed_in.user.id, user.id);
        assert!(signed_in.user.last_login.is_some());
        assert!(f.sessions.validate_session(&signed_in.session.id).await.is_ok());
    }

    #[tokio::test]
    async fn sign_in_of_removed_user_leaves_no_session() {
        let f = fixture(Arc::new(AcceptWellFormed));
        let user = signup(&f, "gone@example.com", false).await;
        f.store.delete_user(user.id).await.unwrap();

        let err = f.auth.sign_in(user.clone(), ActivityKind::Login).await.unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert_eq!(f.sessions.active_session_count(user.id).await, 0);
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let f = fixture(Arc::new(AcceptWellFormed));
        signup(&f, "user@example.com", false).await;

        let unknown = f.auth.login("nobody@example.com", "Str0ng!pass").await.unwrap_err();
        let wrong = f.auth.login("user@example.com", "wrong").await.unwrap_err();
        assert_eq!(unknown, CoreError::InvalidCredentials);
        assert_eq!(unknown, wrong);
    }

    #[tokio::test]
    async fn inactive_account_is_refused_after_password_check() {
        let f = fixture(Arc::new(AcceptWellFormed));
        let user = signup(&f, "user@example.com", false).await;
        f.store
            .update_user_status(user.id, crate::models::UserStatus::Inactive)
            .await
            .unwrap();

        let err = f.auth.login("user@example.com", "wrong").await.unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
        let err = f.auth.login("user@example.com", "Str0ng!pass").await.unwrap_err();
        assert_eq!(err, CoreError::AccountInactive);
    }

    #[tokio::test]
    async fn mfa_login_issues_challenge_without_session() {
        let f = fixture(Arc::new(AcceptWellFormed));
        let user = signup(&f, "mfa@example.com", true).await;

        let outcome = f.auth.login("mfa@example.com", "Str0ng!pass").await.unwrap();
        let LoginOutcome::MfaRequired { challenge_id } = outcome else {
            panic!("expected an MFA challenge");
        };
        assert!(f.sessions.user_sessions(user.id).await.is_empty());

        let err = f.auth.verify_mfa(&challenge_id, "12ab").await.unwrap_err();
        assert_eq!(err, CoreError::InvalidCodeFormat);

        let signed_in = f.auth.verify_mfa(&challenge_id, "123456").await.unwrap();
        assert_eq!(signed_in.user.id, user.id);

        let err = f.auth.verify_mfa(&challenge_id, "123456").await.unwrap_err();
        assert_eq!(err, CoreError::InvalidChallenge);
    }

    #[tokio::test]
    async fn expired_challenge_is_invalid() {
        let f = fixture(Arc::new(AcceptWellFormed));
        signup(&f, "mfa@example.com", true).await;
        let LoginOutcome::MfaRequired { challenge_id } =
            f.auth.login("mfa@example.com", "Str0ng!pass").await.unwrap()
        else {
            panic!("expected an MFA challenge");
        };

        f.clock.advance(Duration::minutes(6));
        let err = f.auth.verify_mfa(&challenge_id, "123456").await.unwrap_err();
        assert_eq!(err, CoreError::InvalidChallenge);
    }

    #[tokio::test]
    async fn wrong_codes_exhaust_the_flow() {
        let f = fixture(Arc::new(FixedCode("424242")));
        signup(&f, "mfa@example.com", true).await;

        let mut flow = AuthFlow::new();
        let state = flow
            .submit_credentials(&f.auth, "mfa@example.com", "Str0ng!pass")
            .await
            .unwrap();
        assert_eq!(state, AuthState::MfaPending);

        for _ in 0..2 {
            assert_eq!(
                flow.submit_code(&f.auth, "000000").await,
                Err(CoreError::InvalidCode)
            );
            assert_eq!(flow.state(), AuthState::MfaPending);
        }
        assert_eq!(
            flow.submit_code(&f.auth, "000000").await,
            Err(CoreError::InvalidCode)
        );
        assert_eq!(flow.state(), AuthState::Anonymous);
        assert_eq!(
            flow.submit_code(&f.auth, "424242").await,
            Err(CoreError::InvalidChallenge)
        );
    }

    #[tokio::test]
    async fn flow_reaches_authenticated_and_logs_out() {
        let f = fixture(Arc::new(FixedCode("424242")));
        let user = signup(&f, "mfa@example.com", true).await;

        let mut flow = AuthFlow::new();
        flow.submit_credentials(&f.auth, "mfa@example.com", "Str0ng!pass")
            .await
            .unwrap();
        assert_eq!(
            flow.submit_code(&f.auth, "424242").await,
            Ok(AuthState::Authenticated)
        );
        let session_id = flow.session_id().cloned().unwrap();

        assert_eq!(flow.logout(&f.auth).await, AuthState::Anonymous);
        assert_eq!(
            f.sessions.validate_session(&session_id).await,
            Err(CoreError::SessionInactive)
        );

        let kinds: Vec<ActivityKind> = f
            .activity
            .query(&Default::default(), 1, 10)
            .await
            .items
            .into_iter()
            .filter(|entry| entry.user_id == Some(user.id))
            .map(|entry| entry.kind)
            .collect();
        assert!(kinds.contains(&ActivityKind::MfaVerified));
        assert!(kinds.contains(&ActivityKind::Logout));
    }

    #[tokio::test]
    async fn failed_credentials_return_flow_to_anonymous() {
        let f = fixture(Arc::new(AcceptWellFormed));
        let mut flow = AuthFlow::new();
        let err = flow
            .submit_credentials(&f.auth, "nobody@example.com", "whatever")
            .await
            .unwrap_err();
        assert_eq!(err, CoreError::InvalidCredentials);
        assert_eq!(flow.state(), AuthState::Anonymous);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let f = fixture(Arc::new(AcceptWellFormed));
        assert_eq!(
            f.auth.logout(&SessionId("missing".into())).await,
            AuthState::Anonymous
        );
    }

    #[tokio::test]
    async fn disable_mfa_requires_valid_code() {
        let f = fixture(Arc::new(FixedCode("424242")));
        let user = signup(&f, "mfa@example.com", true).await;

        assert_eq!(
            f.auth.disable_mfa(user.id, "abc").await.unwrap_err(),
            CoreError::InvalidCodeFormat
        );
        assert_eq!(
            f.auth.disable_mfa(user.id, "111111").await.unwrap_err(),
            CoreError::InvalidCode
        );
        let user = f.auth.disable_mfa(user.id, "424242").await.unwrap();
        assert!(!user.mfa_enabled);
    }

    #[tokio::test]
    async fn deleted_user_challenge_is_invalid() {
        let f = fixture(Arc::new(AcceptWellFormed));
        let user = signup(&f, "mfa@example.com", true).await;
        let LoginOutcome::MfaRequired { challenge_id } =
            f.auth.login("mfa@example.com", "Str0ng!pass").await.unwrap()
        else {
            panic!("expected an MFA challenge");
        };

        f.store.delete_user(user.id).await.unwrap();
        let err = f.auth.verify_mfa(&challenge_id, "123456").await.unwrap_err();
        assert_eq!(err, CoreError::InvalidChallenge);
    }
}
