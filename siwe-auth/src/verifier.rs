// siwe-auth/src/verifier.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::address::Address;
use crate::error::RejectReason;
use crate::message::SiweMessage;
use crate::signature::{SignatureCheck, SignatureVerifier};
use crate::validate::{check_domain, check_nonce, check_time_window};

/// Caller-supplied facts a message is checked against.
#[derive(Debug, Clone)]
pub struct VerificationContext {
    pub expected_domain: String,
    /// Outstanding challenge for the caller's session, `None` if there is none.
    pub session_nonce: Option<String>,
    pub now: DateTime<Utc>,
}

impl VerificationContext {
    pub fn new(expected_domain: impl Into<String>, session_nonce: Option<String>) -> Self {
        Self {
            expected_domain: expected_domain.into(),
            session_nonce,
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum VerificationResult {
    Accepted { address: Address },
    Rejected { reason: RejectReason },
}

impl VerificationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, VerificationResult::Accepted { .. })
    }

    pub fn address(&self) -> Option<Address> {
        match self {
            VerificationResult::Accepted { address } => Some(*address),
            VerificationResult::Rejected { .. } => None,
        }
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            VerificationResult::Accepted { .. } => None,
            VerificationResult::Rejected { reason } => Some(*reason),
        }
    }
}

impl From<RejectReason> for VerificationResult {
    fn from(reason: RejectReason) -> Self {
        VerificationResult::Rejected { reason }
    }
}

/// Runs the full check sequence for one sign-in attempt.
///
/// Steps run in a fixed order and stop at the first failure: parse, time
/// window, domain, nonce, then signature. The signature step is last because
/// it is the only one that may touch the network.
///
/// Holds no mutable state; one instance can serve concurrent requests.
#[derive(Clone, Default)]
pub struct Verifier {
    signatures: SignatureVerifier,
}

impl Verifier {
    pub fn new(signatures: SignatureVerifier) -> Self {
        Self { signatures }
    }

    pub async fn verify(&self, raw: &str, signature: &str, context: &VerificationContext) -> VerificationResult {
        let started = Instant::now();
        let result = self.run(raw, signature, context).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(message) => {
                tracing::info!(address = %message.address, elapsed_ms, "Sign-in message verified");
                VerificationResult::Accepted { address: message.address }
            }
            Err(reason) => {
                tracing::warn!(reason = %reason, elapsed_ms, "Sign-in message rejected");
                VerificationResult::Rejected { reason: *reason }
            }
        }
    }

    async fn run(&self, raw: &str, signature: &str, context: &VerificationContext) -> Result<SiweMessage, RejectReason> {
        let message = SiweMessage::parse(raw).map_err(|e| {
            tracing::debug!(error = %e, "Sign-in message failed to parse");
            RejectReason::from(e)
        })?;

        check_time_window(&message, context.now)?;
        tracing::debug!("Time window ok");

        check_domain(&message.domain, &context.expected_domain).map_err(|reason| {
            tracing::debug!(domain = %message.domain, expected = %context.expected_domain, "Domain mismatch");
            reason
        })?;

        check_nonce(&message.nonce, context.session_nonce.as_deref())?;
        tracing::debug!("Nonce ok");

        match self
            .signatures
            .verify(raw, signature, message.address, message.chain_id)
            .await
        {
            SignatureCheck::Valid => Ok(message),
            SignatureCheck::Invalid => Err(RejectReason::InvalidSignature),
            SignatureCheck::Unavailable => Err(RejectReason::VerificationUnavailable),
        }
    }
}
