// siwe-auth/src/error.rs
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Reasons a sign-in message could not be turned into a claim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("message is empty")]
    Empty,

    #[error("invalid header line")]
    InvalidHeader,

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("unexpected line {line}: {reason}")]
    UnexpectedLine { line: usize, reason: &'static str },

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("invalid timestamp in {field}: {reason}")]
    InvalidTimestamp { field: &'static str, reason: String },
}

/// Why a verification attempt was rejected.
///
/// Each kind is kept distinct for server-side diagnostics. Callers should
/// present every one of them to the end user as the same generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Malformed,
    Expired,
    NotYetValid,
    DomainMismatch,
    NonceMismatch,
    InvalidSignature,
    /// The contract-wallet check could not complete. Retryable.
    VerificationUnavailable,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::Expired => "expired",
            RejectReason::NotYetValid => "not_yet_valid",
            RejectReason::DomainMismatch => "domain_mismatch",
            RejectReason::NonceMismatch => "nonce_mismatch",
            RejectReason::InvalidSignature => "invalid_signature",
            RejectReason::VerificationUnavailable => "verification_unavailable",
        }
    }

    /// Whether presenting the same message again may produce a different outcome.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RejectReason::VerificationUnavailable)
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ParseError> for RejectReason {
    fn from(_: ParseError) -> Self {
        RejectReason::Malformed
    }
}
