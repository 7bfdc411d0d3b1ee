//! Identifier generation
//!
//! Entity ids are random UUIDs; session and challenge tokens are 128
//! random bits from the operating system RNG, rendered as lowercase hex.

use rand::RngCore;
use rand::rngs::OsRng;
use std::fmt::Write;
use uuid::Uuid;

/// Source of fresh identifiers
pub trait IdGenerator: Send + Sync {
    /// Id for a user, role or permission
    fn entity_id(&self) -> Uuid;

    /// Opaque, unguessable token for sessions and MFA challenges
    fn token(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdGenerator;

impl IdGenerator for RandomIdGenerator {
    fn entity_id(&self) -> Uuid {
        Uuid::new_v4()
    }

    fn token(&self) -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        bytes.iter().fold(String::with_capacity(32), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
    }
}
