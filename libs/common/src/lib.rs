//! Common library for the RBAC console core
//!
//! This crate provides the pieces shared by the core and the API
//! service: the error taxonomy, configuration loading, and the clock
//! and id-generator collaborators injected into every component.

pub mod clock;
pub mod config;
pub mod error;
pub mod id;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::CoreConfig;
pub use error::{AggregateKey, ConflictReason, CoreError, CoreResult};
pub use id::{IdGenerator, RandomIdGenerator};
