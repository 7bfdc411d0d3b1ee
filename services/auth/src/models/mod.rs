//! RBAC core models

pub mod permission;
pub mod role;
pub mod session;
pub mod user;

// Re-export for convenience
pub use permission::{NewPermission, Permission, UpdatePermission};
pub use role::{NewRole, Role, RoleNode, RoleView, UpdateRole};
pub use session::{ChallengeId, MfaChallenge, Session, SessionId};
pub use user::{NewUser, UpdateUser, User, UserStatus};
