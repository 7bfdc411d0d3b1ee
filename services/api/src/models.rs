//! API models for request and response payloads

use auth::models::{ChallengeId, Session, SessionId, User};
use auth::{ActivityKind, LoginOutcome, SignedIn};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request for user login
#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Request for self-service signup
#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Request for the second authentication step
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyMfaRequest {
    pub code: String,
    pub challenge_id: ChallengeId,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    pub session_id: SessionId,
}

/// Successful sign-in
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: User,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
}

impl From<SignedIn> for SessionResponse {
    fn from(signed_in: SignedIn) -> Self {
        Self {
            user: signed_in.user,
            session_id: signed_in.session.id,
            expires_at: signed_in.session.expires_at,
        }
    }
}

/// Response for user login
#[derive(Serialize)]
#[serde(untagged)]
pub enum LoginResponse {
    #[serde(rename_all = "camelCase")]
    MfaRequired {
        #[serde(rename = "requireMFA")]
        require_mfa: bool,
        challenge_id: ChallengeId,
    },
    SignedIn(SessionResponse),
}

impl From<LoginOutcome> for LoginResponse {
    fn from(outcome: LoginOutcome) -> Self {
        match outcome {
            LoginOutcome::MfaRequired { challenge_id } => LoginResponse::MfaRequired {
                require_mfa: true,
                challenge_id,
            },
            LoginOutcome::Authenticated(signed_in) => LoginResponse::SignedIn(signed_in.into()),
        }
    }
}

/// Current session as seen by its bearer
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentSessionResponse {
    pub session: Session,
    pub user: User,
}

/// Role creation accepting permission ids or names
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub inherits_from: Option<Uuid>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

/// Replacement of a role's direct permissions, by id or name
#[derive(Deserialize)]
pub struct RolePermissionsRequest {
    pub permissions: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParentRequest {
    pub parent_id: Option<Uuid>,
}

/// Activity log query string
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityQuery {
    pub user_id: Option<Uuid>,
    pub kind: Option<ActivityKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub page: Option<usize>,
    pub limit: Option<usize>,
}
