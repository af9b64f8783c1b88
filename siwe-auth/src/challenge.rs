// siwe-auth/src/challenge.rs
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::sync::Arc;
use thiserror::Error;

/// Length of generated challenge nonces (EIP-4361 requires at least 8).
pub const NONCE_LENGTH: usize = 17;

// Default challenge lifetime in seconds (10 minutes)
const DEFAULT_NONCE_TTL: i64 = 600;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChallengeError {
    #[error("nonce already consumed")]
    AlreadyConsumed,

    #[error("challenge store unavailable: {0}")]
    Store(String),
}

/// Issues and tracks single-use sign-in nonces, one outstanding per session.
///
/// `consume_nonce` must be an atomic check-and-invalidate: of any number of
/// concurrent calls for the same session and nonce, at most one succeeds.
#[async_trait]
pub trait ChallengeStore: Send + Sync {
    /// Issue a fresh nonce for `session_id`, replacing any outstanding one.
    async fn issue_nonce(&self, session_id: &str) -> Result<String, ChallengeError>;

    /// The outstanding, unexpired nonce for `session_id`, if any.
    async fn current_nonce(&self, session_id: &str) -> Result<Option<String>, ChallengeError>;

    /// Invalidate `nonce` for `session_id`. Fails with `AlreadyConsumed` when
    /// it is no longer the session's outstanding nonce.
    async fn consume_nonce(&self, session_id: &str, nonce: &str) -> Result<(), ChallengeError>;
}

/// Random alphanumeric nonce suitable for a sign-in message.
pub fn generate_nonce() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NONCE_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Debug, Clone)]
struct Challenge {
    nonce: String,
    issued_at: DateTime<Utc>,
}

/// Process-local [`ChallengeStore`] backed by a concurrent map.
#[derive(Debug, Clone)]
pub struct InMemoryChallengeStore {
    challenges: Arc<DashMap<String, Challenge>>,
    ttl: Duration,
}

impl Default for InMemoryChallengeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryChallengeStore {
    pub fn new() -> Self {
        Self {
            challenges: Arc::new(DashMap::new()),
            ttl: Duration::seconds(DEFAULT_NONCE_TTL),
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.ttl = Duration::seconds(ttl_seconds);
        self
    }

    fn is_expired(&self, challenge: &Challenge, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(challenge.issued_at) >= self.ttl
    }

    /// Remove stale challenges, returning how many were dropped.
    pub fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.challenges.len();
        self.challenges.retain(|_, challenge| !self.is_expired(challenge, now));
        before.saturating_sub(self.challenges.len())
    }

    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }
}

#[async_trait]
impl ChallengeStore for InMemoryChallengeStore {
    async fn issue_nonce(&self, session_id: &str) -> Result<String, ChallengeError> {
        let nonce = generate_nonce();
        self.challenges.insert(
            session_id.to_string(),
            Challenge {
                nonce: nonce.clone(),
                issued_at: Utc::now(),
            },
        );
        tracing::debug!(nonce_prefix = &nonce[..4], "Issued sign-in challenge");
        Ok(nonce)
    }

    async fn current_nonce(&self, session_id: &str) -> Result<Option<String>, ChallengeError> {
        let now = Utc::now();
        Ok(self
            .challenges
            .get(session_id)
            .filter(|entry| !self.is_expired(entry.value(), now))
            .map(|entry| entry.value().nonce.clone()))
    }

    async fn consume_nonce(&self, session_id: &str, nonce: &str) -> Result<(), ChallengeError> {
        let now = Utc::now();
        // remove_if holds the shard lock across the check and the removal
        match self.challenges.remove_if(session_id, |_, challenge| challenge.nonce == nonce) {
            Some((_, challenge)) if !self.is_expired(&challenge, now) => Ok(()),
            _ => Err(ChallengeError::AlreadyConsumed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_nonce() {
        let nonce = generate_nonce();
        assert_eq!(nonce.len(), NONCE_LENGTH);
        assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(nonce, generate_nonce());
    }

    #[tokio::test]
    async fn test_issue_then_consume_once() {
        let store = InMemoryChallengeStore::new();
        let nonce = store.issue_nonce("session-a").await.unwrap();

        assert_eq!(store.current_nonce("session-a").await.unwrap(), Some(nonce.clone()));
        assert_eq!(store.current_nonce("session-b").await.unwrap(), None);

        store.consume_nonce("session-a", &nonce).await.unwrap();
        assert_eq!(store.current_nonce("session-a").await.unwrap(), None);
        assert_eq!(
            store.consume_nonce("session-a", &nonce).await,
            Err(ChallengeError::AlreadyConsumed)
        );
    }

    #[tokio::test]
    async fn test_reissue_replaces_outstanding_nonce() {
        let store = InMemoryChallengeStore::new();
        let first = store.issue_nonce("session-a").await.unwrap();
        let second = store.issue_nonce("session-a").await.unwrap();

        assert_eq!(store.current_nonce("session-a").await.unwrap(), Some(second.clone()));
        assert_eq!(
            store.consume_nonce("session-a", &first).await,
            Err(ChallengeError::AlreadyConsumed)
        );
        // A stale attempt must not burn the fresh challenge
        assert_eq!(store.current_nonce("session-a").await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn test_expired_challenge_is_absent() {
        let store = InMemoryChallengeStore::new().with_ttl(0);
        let nonce = store.issue_nonce("session-a").await.unwrap();

        assert_eq!(store.current_nonce("session-a").await.unwrap(), None);
        assert_eq!(
            store.consume_nonce("session-a", &nonce).await,
            Err(ChallengeError::AlreadyConsumed)
        );
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let store = InMemoryChallengeStore::new().with_ttl(0);
        store.issue_nonce("a").await.unwrap();
        store.issue_nonce("b").await.unwrap();
        assert_eq!(store.cleanup_expired(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_consume_succeeds_once() {
        let store = InMemoryChallengeStore::new();
        let nonce = store.issue_nonce("session-a").await.unwrap();

        let attempts: Vec<_> = (0..32)
            .map(|_| {
                let store = store.clone();
                let nonce = nonce.clone();
                tokio::spawn(async move { store.consume_nonce("session-a", &nonce).await })
            })
            .collect();

        let mut successes = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(()) => successes += 1,
                Err(e) => assert_eq!(e, ChallengeError::AlreadyConsumed),
            }
        }
        assert_eq!(successes, 1);
    }
}
