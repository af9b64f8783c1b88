// siwe-auth/src/lib.rs
//! Sign-In with Ethereum (EIP-4361) verification.
//!
//! [`Verifier`] turns a raw message, its signature and a
//! [`VerificationContext`] into an accept/reject decision. [`SignIn`] wraps it
//! with challenge bookkeeping and session issuance.

mod abi;
pub mod address;
pub mod chain;
pub mod challenge;
pub mod error;
pub mod message;
pub mod sign_in;
pub mod signature;
pub mod validate;
pub mod verifier;

pub use abi::AbiError;
pub use address::Address;
pub use chain::{ChainError, ChainReader, JsonRpcChainReader};
pub use challenge::{generate_nonce, ChallengeError, ChallengeStore, InMemoryChallengeStore};
pub use error::{ParseError, RejectReason};
pub use message::SiweMessage;
pub use sign_in::{SessionIssuer, SignIn, SignInError};
pub use signature::{CounterfactualSignature, SignatureCheck, SignatureVerifier};
pub use validate::domain_from_url;
pub use verifier::{VerificationContext, VerificationResult, Verifier};
