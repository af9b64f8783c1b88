// siwe-auth/src/sign_in.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

use crate::address::Address;
use crate::challenge::{ChallengeError, ChallengeStore};
use crate::error::RejectReason;
use crate::verifier::{VerificationContext, VerificationResult, Verifier};

/// Turns a verified address into whatever session the application uses.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    type Session: Send;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn issue(&self, session_id: &str, address: Address) -> Result<Self::Session, Self::Error>;
}

#[derive(Debug, Error)]
pub enum SignInError {
    #[error("sign-in rejected: {0}")]
    Rejected(RejectReason),

    #[error(transparent)]
    Challenge(#[from] ChallengeError),

    #[error("session issuance failed: {0}")]
    Session(String),
}

impl SignInError {
    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            SignInError::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

/// Complete sign-in: look up the session's challenge, verify, burn the
/// nonce, then issue a session.
///
/// The nonce is consumed only after a successful verification, and a session
/// is issued only if that consumption wins. Concurrent attempts replaying the
/// same signed message therefore yield at most one session.
pub struct SignIn<I: SessionIssuer> {
    verifier: Verifier,
    challenges: Arc<dyn ChallengeStore>,
    issuer: I,
    expected_domain: String,
}

impl<I: SessionIssuer> SignIn<I> {
    pub fn new(
        verifier: Verifier,
        challenges: Arc<dyn ChallengeStore>,
        issuer: I,
        expected_domain: impl Into<String>,
    ) -> Self {
        Self {
            verifier,
            challenges,
            issuer,
            expected_domain: expected_domain.into(),
        }
    }

    pub fn expected_domain(&self) -> &str {
        &self.expected_domain
    }

    pub async fn authenticate(&self, session_id: &str, raw: &str, signature: &str) -> Result<I::Session, SignInError> {
        self.authenticate_at(session_id, raw, signature, Utc::now()).await
    }

    pub async fn authenticate_at(
        &self,
        session_id: &str,
        raw: &str,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<I::Session, SignInError> {
        let session_nonce = self.challenges.current_nonce(session_id).await?;
        let context = VerificationContext::new(self.expected_domain.clone(), session_nonce).at(now);

        let address = match self.verifier.verify(raw, signature, &context).await {
            VerificationResult::Accepted { address } => address,
            VerificationResult::Rejected { reason } => return Err(SignInError::Rejected(reason)),
        };

        // Verification passed, so the claim's nonce equals the session nonce
        let nonce = context.session_nonce.as_deref().unwrap_or_default();
        match self.challenges.consume_nonce(session_id, nonce).await {
            Ok(()) => {}
            Err(ChallengeError::AlreadyConsumed) => {
                tracing::warn!(%address, "Challenge consumed by a concurrent sign-in");
                return Err(SignInError::Rejected(RejectReason::NonceMismatch));
            }
            Err(e) => return Err(e.into()),
        }

        self.issuer
            .issue(session_id, address)
            .await
            .map_err(|e| SignInError::Session(e.to_string()))
    }
}
