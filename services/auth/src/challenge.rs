//! Pending MFA challenges
//!
//! Challenges are single use and expire after a fixed TTL. Expired
//! entries are purged on every lookup rather than by a timer.

use chrono::{DateTime, Duration, Utc};
use common::config::MfaConfig;
use common::{Clock, CoreError, CoreResult, IdGenerator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{ChallengeId, MfaChallenge};

pub struct ChallengeStore {
    challenges: Mutex<HashMap<ChallengeId, MfaChallenge>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    config: MfaConfig,
}

impl ChallengeStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, config: MfaConfig) -> Self {
        Self {
            challenges: Mutex::new(HashMap::new()),
            clock,
            ids,
            config,
        }
    }

    fn purge_expired(&self, challenges: &mut HashMap<ChallengeId, MfaChallenge>, now: DateTime<Utc>) {
        let ttl = Duration::seconds(self.config.challenge_ttl_secs);
        let before = challenges.len();
        challenges.retain(|_, challenge| now - challenge.issued_at <= ttl);
        let purged = before - challenges.len();
        if purged > 0 {
            debug!("Purged {} expired MFA challenge(s)", purged);
        }
    }

    /// Issue a fresh challenge for a user who passed the password check
    pub async fn issue(&self, user_id: Uuid) -> MfaChallenge {
        let mut challenges = self.challenges.lock().await;
        let now = self.clock.now();
        self.purge_expired(&mut challenges, now);

        let challenge = MfaChallenge {
            id: ChallengeId(self.ids.token()),
            user_id,
            issued_at: now,
            failed_attempts: 0,
        };
        challenges.insert(challenge.id.clone(), challenge.clone());
        challenge
    }

    /// Look up a live challenge
    pub async fn get(&self, id: &ChallengeId) -> CoreResult<MfaChallenge> {
        let mut challenges = self.challenges.lock().await;
        self.purge_expired(&mut challenges, self.clock.now());
        challenges.get(id).cloned().ok_or(CoreError::InvalidChallenge)
    }

    /// Count a wrong code against the challenge
    ///
    /// Returns the attempts left. When none are left the challenge is
    /// discarded.
    pub async fn record_failure(&self, id: &ChallengeId) -> CoreResult<u32> {
        let mut challenges = self.challenges.lock().await;
        self.purge_expired(&mut challenges, self.clock.now());
        let challenge = challenges.get_mut(id).ok_or(CoreError::InvalidChallenge)?;

        challenge.failed_attempts += 1;
        let remaining = self.config.max_attempts.saturating_sub(challenge.failed_attempts);
        if remaining == 0 {
            warn!(
                "MFA challenge for user {} exhausted after {} failed attempt(s)",
                challenge.user_id, challenge.failed_attempts
            );
            challenges.remove(id);
        }
        Ok(remaining)
    }

    /// Remove a live challenge so it cannot be used again
    pub async fn consume(&self, id: &ChallengeId) -> CoreResult<MfaChallenge> {
        let mut challenges = self.challenges.lock().await;
        self.purge_expired(&mut challenges, self.clock.now());
        challenges.remove(id).ok_or(CoreError::InvalidChallenge)
    }

    /// Drop every pending challenge of a user
    pub async fn revoke_user(&self, user_id: Uuid) -> usize {
        let mut challenges = self.challenges.lock().await;
        let before = challenges.len();
        challenges.retain(|_, challenge| challenge.user_id != user_id);
        before - challenges.len()
    }

    pub async fn clear(&self) {
        self.challenges.lock().await.clear();
    }
}
