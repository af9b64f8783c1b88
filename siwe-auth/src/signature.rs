// siwe-auth/src/signature.rs
//! Signature checks for sign-in messages.
//!
//! Two paths are supported:
//! - **Direct recovery**: EIP-191 personal-sign hash, secp256k1 public key
//!   recovery, address comparison. No network access.
//! - **Contract wallets (EIP-1271)**: `isValidSignature(bytes32,bytes)` on the
//!   claimed account, read through an injected [`ChainReader`].
//! - **Counterfactual wallets (ERC-6492)**: a signature wrapped with the
//!   factory call that would deploy the account. When the account has no code
//!   yet, deployment and `isValidSignature` are simulated together in one
//!   `eth_call` through Multicall3.
//!
//! Direct recovery is always tried first for 65-byte signatures. The chain is
//! only consulted when that fails, so plain-key sign-ins never pay for an RPC
//! round trip.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::abi::{self, AbiError, Decoder};
use crate::address::Address;
use crate::chain::{ChainError, ChainReader};

/// Return value of a successful `isValidSignature` call.
pub const EIP1271_MAGIC_VALUE: [u8; 4] = [0x16, 0x26, 0xba, 0x7e];

/// Trailer marking an ERC-6492 wrapped signature.
pub const ERC6492_MAGIC_SUFFIX: [u8; 32] = [
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
    0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92, 0x64, 0x92,
];

/// Multicall3, deployed at the same address on every major EVM chain.
pub const MULTICALL3_ADDRESS: Address = Address::new([
    0xca, 0x11, 0xbd, 0xe0, 0x59, 0x77, 0xb3, 0x63, 0x11, 0x67,
    0x02, 0x88, 0x62, 0xbe, 0x2a, 0x17, 0x39, 0x76, 0xca, 0x11,
]);

// aggregate3((address,bool,bytes)[])
const AGGREGATE3_SELECTOR: [u8; 4] = [0x82, 0xad, 0x56, 0xcb];

const EIP191_PREFIX: &str = "\x19Ethereum Signed Message:\n";

pub const DEFAULT_CHAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("signature is not valid hex")]
    InvalidHex,

    #[error("expected 65 signature bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid recovery id: {0}")]
    InvalidRecoveryId(u8),

    #[error("malleable signature (high S value)")]
    MalleableSignature,

    #[error("invalid signature encoding")]
    InvalidFormat,

    #[error("failed to recover public key")]
    RecoveryFailed,

    #[error("malformed ERC-6492 wrapper: {0}")]
    InvalidWrapper(#[from] AbiError),
}

/// Outcome of a signature check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureCheck {
    Valid,
    Invalid,
    /// The chain could not be read in time. Never a success.
    Unavailable,
}

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// EIP-191 version 0x45 hash of `message`, as produced by `personal_sign`.
pub fn eip191_hash(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(EIP191_PREFIX.as_bytes());
    hasher.update(message.len().to_string().as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

pub fn decode_signature(text: &str) -> Result<Vec<u8>, SignatureError> {
    let digits = text.trim();
    let digits = digits.strip_prefix("0x").unwrap_or(digits);
    hex::decode(digits).map_err(|_| SignatureError::InvalidHex)
}

/// Recover the account that produced a 65-byte `r || s || v` signature.
///
/// `v` may be 0/1 or 27/28. High-S signatures are refused (EIP-2).
pub fn recover_address(prehash: &[u8; 32], signature: &[u8]) -> Result<Address, SignatureError> {
    if signature.len() != 65 {
        return Err(SignatureError::InvalidLength(signature.len()));
    }

    let v = signature[64];
    let recovery_byte = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => return Err(SignatureError::InvalidRecoveryId(other)),
    };
    let recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or(SignatureError::InvalidRecoveryId(v))?;

    let sig = Signature::from_slice(&signature[..64]).map_err(|_| SignatureError::InvalidFormat)?;
    if sig.normalize_s().is_some() {
        return Err(SignatureError::MalleableSignature);
    }

    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|_| SignatureError::RecoveryFailed)?;

    Ok(Address::from_public_key(&key))
}

/// ABI-encode an `isValidSignature(bytes32,bytes)` call.
pub fn encode_is_valid_signature(hash: &[u8; 32], signature: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(4 + 32 * 3 + abi::padded_len(signature.len()));
    data.extend_from_slice(&EIP1271_MAGIC_VALUE);
    data.extend_from_slice(hash);
    data.extend_from_slice(&abi::word(64));
    abi::push_bytes(&mut data, signature);
    data
}

fn is_magic_value(reply: &[u8]) -> bool {
    reply.len() >= 4 && reply[..4] == EIP1271_MAGIC_VALUE
}

/// An ERC-6492 signature: the factory call that deploys the account, and the
/// signature the deployed account will accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterfactualSignature {
    pub factory: Address,
    pub factory_calldata: Vec<u8>,
    pub inner: Vec<u8>,
}

impl CounterfactualSignature {
    pub fn is_wrapped(signature: &[u8]) -> bool {
        signature.len() >= 32 && signature[signature.len() - 32..] == ERC6492_MAGIC_SUFFIX
    }

    /// Split a wrapped signature; `Ok(None)` when it carries no 6492 suffix.
    pub fn unwrap(signature: &[u8]) -> Result<Option<Self>, SignatureError> {
        if !Self::is_wrapped(signature) {
            return Ok(None);
        }

        // abi.encode(address factory, bytes factoryCalldata, bytes innerSig)
        let body = Decoder::new(&signature[..signature.len() - 32]);
        Ok(Some(Self {
            factory: body.read_address(0)?,
            factory_calldata: body.tail(32)?.read_bytes(0)?.to_vec(),
            inner: body.tail(64)?.read_bytes(0)?.to_vec(),
        }))
    }

    pub fn wrap(&self) -> Vec<u8> {
        let calldata_tail = 32 + abi::padded_len(self.factory_calldata.len());

        let mut out = Vec::with_capacity(96 + calldata_tail + 32 + abi::padded_len(self.inner.len()) + 32);
        out.extend_from_slice(&abi::address_word(&self.factory));
        out.extend_from_slice(&abi::word(96));
        out.extend_from_slice(&abi::word((96 + calldata_tail) as u64));
        abi::push_bytes(&mut out, &self.factory_calldata);
        abi::push_bytes(&mut out, &self.inner);
        out.extend_from_slice(&ERC6492_MAGIC_SUFFIX);
        out
    }
}

/// ABI-encode `aggregate3` over `(target, calldata)` pairs, each allowed to fail.
pub fn encode_aggregate3(calls: &[(Address, &[u8])]) -> Vec<u8> {
    let encoded: Vec<Vec<u8>> = calls
        .iter()
        .map(|(target, calldata)| {
            let mut call = Vec::with_capacity(96 + 32 + abi::padded_len(calldata.len()));
            call.extend_from_slice(&abi::address_word(target));
            call.extend_from_slice(&abi::word(1));
            call.extend_from_slice(&abi::word(96));
            abi::push_bytes(&mut call, calldata);
            call
        })
        .collect();

    let mut data = AGGREGATE3_SELECTOR.to_vec();
    data.extend_from_slice(&abi::word(32));
    data.extend_from_slice(&abi::word(calls.len() as u64));

    let mut offset = 32 * calls.len();
    for call in &encoded {
        data.extend_from_slice(&abi::word(offset as u64));
        offset += call.len();
    }
    for call in encoded {
        data.extend_from_slice(&call);
    }
    data
}

/// Decode the `(bool success, bytes returnData)[]` returned by `aggregate3`.
pub fn decode_aggregate3(reply: &[u8]) -> Result<Vec<(bool, Vec<u8>)>, AbiError> {
    let array = Decoder::new(reply).tail(0)?;
    let len = array.read_usize(0)?;
    let elements = array.skip(32)?;

    (0..len)
        .map(|i| {
            let result = elements.tail(32 * i)?;
            Ok((result.read_bool(0)?, result.tail(32)?.read_bytes(0)?.to_vec()))
        })
        .collect()
}

/// Decides whether a raw message text was signed by an account.
#[derive(Clone)]
pub struct SignatureVerifier {
    chain: Option<Arc<dyn ChainReader>>,
    timeout: Duration,
}

impl Default for SignatureVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureVerifier {
    /// A verifier that only accepts plain key signatures.
    pub fn new() -> Self {
        Self {
            chain: None,
            timeout: DEFAULT_CHAIN_TIMEOUT,
        }
    }

    /// Enable the contract-wallet path through `chain`.
    pub fn with_chain(mut self, chain: Arc<dyn ChainReader>) -> Self {
        self.chain = Some(chain);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check `signature` over the exact bytes of `raw_message`.
    ///
    /// Re-verifying the same inputs is side-effect free.
    pub async fn verify(
        &self,
        raw_message: &str,
        signature: &str,
        address: Address,
        chain_id: u64,
    ) -> SignatureCheck {
        let signature = match decode_signature(signature) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "Signature could not be decoded");
                return SignatureCheck::Invalid;
            }
        };
        let hash = eip191_hash(raw_message.as_bytes());

        if signature.len() == 65 {
            match recover_address(&hash, &signature) {
                Ok(recovered) if recovered == address => return SignatureCheck::Valid,
                Ok(recovered) => {
                    tracing::debug!(%address, %recovered, "Recovered signer differs from claimed address");
                }
                Err(e) => {
                    tracing::debug!(error = %e, "Direct signature recovery failed");
                }
            }
        }

        let Some(chain) = &self.chain else {
            return SignatureCheck::Invalid;
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.timeout,
            check_contract_signature(chain.as_ref(), chain_id, address, &hash, &signature),
        )
        .await;

        match outcome {
            Ok(Ok(true)) => SignatureCheck::Valid,
            Ok(Ok(false)) => SignatureCheck::Invalid,
            Ok(Err(ChainError::UnsupportedChain(id))) => {
                tracing::warn!(chain_id = id, "No chain endpoint configured for contract wallet check");
                SignatureCheck::Invalid
            }
            Ok(Err(ChainError::Reverted(reason))) => {
                tracing::debug!(%address, %reason, "isValidSignature reverted");
                SignatureCheck::Invalid
            }
            Ok(Err(e)) => {
                tracing::warn!(%address, chain_id, error = %e, "Contract wallet check failed");
                SignatureCheck::Unavailable
            }
            Err(_) => {
                tracing::warn!(
                    %address,
                    chain_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Contract wallet check timed out"
                );
                SignatureCheck::Unavailable
            }
        }
    }
}

async fn check_contract_signature(
    chain: &dyn ChainReader,
    chain_id: u64,
    address: Address,
    hash: &[u8; 32],
    signature: &[u8],
) -> Result<bool, ChainError> {
    let wrapped = match CounterfactualSignature::unwrap(signature) {
        Ok(wrapped) => wrapped,
        Err(e) => {
            tracing::debug!(%address, error = %e, "Discarding undecodable wrapped signature");
            return Ok(false);
        }
    };

    let code = chain.get_code(chain_id, address).await?;
    match (code.is_empty(), wrapped) {
        (false, Some(wrapped)) => is_valid_signature(chain, chain_id, address, hash, &wrapped.inner).await,
        (false, None) => is_valid_signature(chain, chain_id, address, hash, signature).await,
        (true, Some(wrapped)) => check_counterfactual(chain, chain_id, address, hash, &wrapped).await,
        (true, None) => {
            tracing::debug!(%address, "Claimed address has no contract code");
            Ok(false)
        }
    }
}

async fn is_valid_signature(
    chain: &dyn ChainReader,
    chain_id: u64,
    address: Address,
    hash: &[u8; 32],
    signature: &[u8],
) -> Result<bool, ChainError> {
    let calldata = encode_is_valid_signature(hash, signature);
    let reply = chain.call(chain_id, address, calldata).await?;
    Ok(is_magic_value(&reply))
}

// Deploy through the factory and ask the fresh account, in one simulated call
async fn check_counterfactual(
    chain: &dyn ChainReader,
    chain_id: u64,
    address: Address,
    hash: &[u8; 32],
    wrapped: &CounterfactualSignature,
) -> Result<bool, ChainError> {
    tracing::debug!(%address, factory = %wrapped.factory, "Validating counterfactual wallet signature");

    let validation = encode_is_valid_signature(hash, &wrapped.inner);
    let calldata = encode_aggregate3(&[
        (wrapped.factory, wrapped.factory_calldata.as_slice()),
        (address, validation.as_slice()),
    ]);
    let reply = chain.call(chain_id, MULTICALL3_ADDRESS, calldata).await?;

    let results = decode_aggregate3(&reply).map_err(|e| ChainError::InvalidResponse(e.to_string()))?;
    match results.get(1) {
        Some((true, data)) => Ok(is_magic_value(data)),
        Some((false, _)) => Ok(false),
        None => Err(ChainError::InvalidResponse("aggregate3 returned too few results".into())),
    }
}

/// Deterministic keys and `personal_sign` for tests in this and dependent crates.
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers {
    use super::*;
    pub use k256::ecdsa::SigningKey;

    pub fn signing_key(seed: u8) -> SigningKey {
        SigningKey::from_bytes((&[seed; 32]).into()).expect("valid secret")
    }

    pub fn address_of(key: &SigningKey) -> Address {
        Address::from_public_key(key.verifying_key())
    }

    /// personal_sign over `message`, hex encoded with a 27/28 `v`.
    pub fn personal_sign(key: &SigningKey, message: &str) -> String {
        let hash = eip191_hash(message.as_bytes());
        let (sig, recid) = key.sign_prehash_recoverable(&hash).expect("signing failed");

        // Normalize S to the low half (EIP-2), flipping parity to match
        let (sig, recid) = match sig.normalize_s() {
            Some(low) => (low, RecoveryId::from_byte(recid.to_byte() ^ 1).expect("valid recid")),
            None => (sig, recid),
        };

        let mut bytes = sig.to_bytes().to_vec();
        bytes.push(recid.to_byte() + 27);
        format!("0x{}", hex::encode(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::test_helpers::*;
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const MESSAGE: &str = "example.com wants you to sign in with your Ethereum account:\nhello";

    #[test]
    fn test_eip191_hash_known_vector() {
        // keccak256("\x19Ethereum Signed Message:\n11hello world")
        let expected = "d9eba16ed0ecae432b71fe008c98cc872bb4cc214d3220a36f365326cf807d68";
        assert_eq!(hex::encode(eip191_hash(b"hello world")), expected);
    }

    #[test]
    fn test_recover_matches_signer() {
        let key = signing_key(0x42);
        let signature = personal_sign(&key, MESSAGE);
        let bytes = decode_signature(&signature).unwrap();
        let recovered = recover_address(&eip191_hash(MESSAGE.as_bytes()), &bytes).unwrap();
        assert_eq!(recovered, address_of(&key));
    }

    #[test]
    fn test_recover_accepts_zero_one_recovery_ids() {
        let key = signing_key(0x07);
        let mut bytes = decode_signature(&personal_sign(&key, MESSAGE)).unwrap();
        bytes[64] -= 27;
        let recovered = recover_address(&eip191_hash(MESSAGE.as_bytes()), &bytes).unwrap();
        assert_eq!(recovered, address_of(&key));
    }

    #[test]
    fn test_recover_rejects_bad_inputs() {
        let hash = eip191_hash(MESSAGE.as_bytes());
        assert_eq!(recover_address(&hash, &[0u8; 64]), Err(SignatureError::InvalidLength(64)));

        let key = signing_key(0x42);
        let mut bytes = decode_signature(&personal_sign(&key, MESSAGE)).unwrap();
        bytes[64] = 31;
        assert_eq!(recover_address(&hash, &bytes), Err(SignatureError::InvalidRecoveryId(31)));
    }

    #[test]
    fn test_recover_rejects_high_s() {
        let key = signing_key(0x42);
        let bytes = decode_signature(&personal_sign(&key, MESSAGE)).unwrap();
        let sig = Signature::from_slice(&bytes[..64]).unwrap();

        // Flip s to n - s; the signature stays mathematically valid but malleable
        let (r, s) = sig.split_scalars();
        let high = Signature::from_scalars(r.to_bytes(), (-*s).to_bytes()).unwrap();
        let mut malleable = high.to_bytes().to_vec();
        malleable.push(bytes[64] ^ 1);

        assert_eq!(
            recover_address(&eip191_hash(MESSAGE.as_bytes()), &malleable),
            Err(SignatureError::MalleableSignature)
        );
    }

    #[test]
    fn test_encode_is_valid_signature_layout() {
        let data = encode_is_valid_signature(&[0xaa; 32], &[0xbb; 65]);
        assert_eq!(&data[..4], &EIP1271_MAGIC_VALUE);
        assert_eq!(&data[4..36], &[0xaa; 32]);
        assert_eq!(data[67], 64);
        assert_eq!(data[99], 65);
        assert_eq!(data.len(), 4 + 32 * 3 + 96);
        assert!(data[100 + 65..].iter().all(|b| *b == 0));
    }

    #[tokio::test]
    async fn test_verify_direct_signature() {
        let key = signing_key(0x42);
        let signature = personal_sign(&key, MESSAGE);
        let verifier = SignatureVerifier::new();

        assert_eq!(verifier.verify(MESSAGE, &signature, address_of(&key), 1).await, SignatureCheck::Valid);

        let other = address_of(&signing_key(0x43));
        assert_eq!(verifier.verify(MESSAGE, &signature, other, 1).await, SignatureCheck::Invalid);
        assert_eq!(verifier.verify(MESSAGE, "0xnothex", other, 1).await, SignatureCheck::Invalid);
    }

    #[tokio::test]
    async fn test_verify_is_sensitive_to_exact_text() {
        let key = signing_key(0x42);
        let signature = personal_sign(&key, MESSAGE);
        let verifier = SignatureVerifier::new();
        let reformatted = format!("{MESSAGE}\n");
        assert_eq!(
            verifier.verify(&reformatted, &signature, address_of(&key), 1).await,
            SignatureCheck::Invalid
        );
    }

    struct FakeChain {
        code: Vec<u8>,
        reply: Result<Vec<u8>, ChainError>,
        delay: Duration,
        calls: AtomicUsize,
        sent: Mutex<Vec<(Address, Vec<u8>)>>,
    }

    impl FakeChain {
        fn contract(reply: Result<Vec<u8>, ChainError>) -> Self {
            Self {
                code: vec![0x60, 0x80],
                reply,
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
                sent: Mutex::new(Vec::new()),
            }
        }

        fn undeployed(reply: Result<Vec<u8>, ChainError>) -> Self {
            Self {
                code: Vec::new(),
                ..Self::contract(reply)
            }
        }
    }

    #[async_trait]
    impl ChainReader for FakeChain {
        async fn get_code(&self, _chain_id: u64, _address: Address) -> Result<Vec<u8>, ChainError> {
            tokio::time::sleep(self.delay).await;
            Ok(self.code.clone())
        }

        async fn call(&self, _chain_id: u64, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.sent.lock().unwrap().push((to, data));
            self.reply.clone()
        }
    }

    fn magic_reply() -> Vec<u8> {
        let mut word = vec![0u8; 32];
        word[..4].copy_from_slice(&EIP1271_MAGIC_VALUE);
        word
    }

    #[tokio::test]
    async fn test_contract_wallet_accepts_magic_value() {
        let wallet = address_of(&signing_key(0x99));
        let owner_sig = personal_sign(&signing_key(0x42), MESSAGE);
        let chain = Arc::new(FakeChain::contract(Ok(magic_reply())));
        let verifier = SignatureVerifier::new().with_chain(chain.clone());

        assert_eq!(verifier.verify(MESSAGE, &owner_sig, wallet, 10143).await, SignatureCheck::Valid);
        assert_eq!(chain.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_contract_wallet_rejects_other_values() {
        let wallet = address_of(&signing_key(0x99));
        let sig = personal_sign(&signing_key(0x42), MESSAGE);

        let verifier = SignatureVerifier::new().with_chain(Arc::new(FakeChain::contract(Ok(vec![0u8; 32]))));
        assert_eq!(verifier.verify(MESSAGE, &sig, wallet, 1).await, SignatureCheck::Invalid);

        let verifier = SignatureVerifier::new()
            .with_chain(Arc::new(FakeChain::contract(Err(ChainError::Reverted("nope".into())))));
        assert_eq!(verifier.verify(MESSAGE, &sig, wallet, 1).await, SignatureCheck::Invalid);
    }

    #[tokio::test]
    async fn test_plain_account_never_calls_contract() {
        let mut fake = FakeChain::contract(Ok(magic_reply()));
        fake.code = Vec::new();
        let chain = Arc::new(fake);
        let verifier = SignatureVerifier::new().with_chain(chain.clone());

        let sig = personal_sign(&signing_key(0x42), MESSAGE);
        let other = address_of(&signing_key(0x43));
        assert_eq!(verifier.verify(MESSAGE, &sig, other, 1).await, SignatureCheck::Invalid);
        assert_eq!(chain.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_transport_failure_is_unavailable() {
        let wallet = address_of(&signing_key(0x99));
        let sig = personal_sign(&signing_key(0x42), MESSAGE);
        let verifier = SignatureVerifier::new()
            .with_chain(Arc::new(FakeChain::contract(Err(ChainError::Transport("connection refused".into())))));
        assert_eq!(verifier.verify(MESSAGE, &sig, wallet, 1).await, SignatureCheck::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_chain_times_out_as_unavailable() {
        let wallet = address_of(&signing_key(0x99));
        let sig = personal_sign(&signing_key(0x42), MESSAGE);
        let mut fake = FakeChain::contract(Ok(magic_reply()));
        fake.delay = Duration::from_secs(30);
        let verifier = SignatureVerifier::new()
            .with_chain(Arc::new(fake))
            .with_timeout(Duration::from_millis(200));

        assert_eq!(verifier.verify(MESSAGE, &sig, wallet, 1).await, SignatureCheck::Unavailable);
    }

    #[tokio::test]
    async fn test_unsupported_chain_is_invalid() {
        let wallet = address_of(&signing_key(0x99));
        let sig = personal_sign(&signing_key(0x42), MESSAGE);
        let verifier = SignatureVerifier::new()
            .with_chain(Arc::new(FakeChain::contract(Err(ChainError::UnsupportedChain(5)))));
        assert_eq!(verifier.verify(MESSAGE, &sig, wallet, 5).await, SignatureCheck::Invalid);
    }

    fn aggregate3_reply(results: &[(bool, Vec<u8>)]) -> Vec<u8> {
        let encoded: Vec<Vec<u8>> = results
            .iter()
            .map(|(success, data)| {
                let mut result = abi::word(*success as u64).to_vec();
                result.extend_from_slice(&abi::word(64));
                abi::push_bytes(&mut result, data);
                result
            })
            .collect();

        let mut reply = abi::word(32).to_vec();
        reply.extend_from_slice(&abi::word(results.len() as u64));
        let mut offset = 32 * results.len();
        for result in &encoded {
            reply.extend_from_slice(&abi::word(offset as u64));
            offset += result.len();
        }
        for result in encoded {
            reply.extend_from_slice(&result);
        }
        reply
    }

    fn counterfactual(inner: &str) -> CounterfactualSignature {
        CounterfactualSignature {
            factory: Address::new([0xfa; 20]),
            factory_calldata: vec![0x5f, 0xbf, 0xb9, 0xcf, 0x01, 0x02, 0x03],
            inner: decode_signature(inner).unwrap(),
        }
    }

    #[test]
    fn test_counterfactual_wrap_unwrap() {
        let wrapped = counterfactual(&personal_sign(&signing_key(0x42), MESSAGE));
        let bytes = wrapped.wrap();

        assert!(CounterfactualSignature::is_wrapped(&bytes));
        assert_eq!(CounterfactualSignature::unwrap(&bytes).unwrap(), Some(wrapped.clone()));
        assert_eq!(CounterfactualSignature::unwrap(&wrapped.inner).unwrap(), None);

        // Suffix present but the body is garbage
        let mut garbage = vec![0xff; 40];
        garbage.extend_from_slice(&ERC6492_MAGIC_SUFFIX);
        assert!(matches!(
            CounterfactualSignature::unwrap(&garbage),
            Err(SignatureError::InvalidWrapper(_))
        ));
    }

    #[test]
    fn test_aggregate3_decoding() {
        let reply = aggregate3_reply(&[(true, Vec::new()), (false, vec![0xde, 0xad])]);
        assert_eq!(
            decode_aggregate3(&reply).unwrap(),
            vec![(true, Vec::new()), (false, vec![0xde, 0xad])]
        );
        assert!(decode_aggregate3(&reply[..reply.len() - 40]).is_err());
    }

    #[tokio::test]
    async fn test_undeployed_wallet_validates_through_factory() {
        let wallet = address_of(&signing_key(0x99));
        let wrapped = counterfactual(&personal_sign(&signing_key(0x42), MESSAGE));
        let signature = format!("0x{}", hex::encode(wrapped.wrap()));

        let reply = aggregate3_reply(&[(true, Vec::new()), (true, magic_reply())]);
        let chain = Arc::new(FakeChain::undeployed(Ok(reply)));
        let verifier = SignatureVerifier::new().with_chain(chain.clone());

        assert_eq!(verifier.verify(MESSAGE, &signature, wallet, 10143).await, SignatureCheck::Valid);

        let sent = chain.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, data) = &sent[0];
        assert_eq!(*to, MULTICALL3_ADDRESS);

        let hash = eip191_hash(MESSAGE.as_bytes());
        let validation = encode_is_valid_signature(&hash, &wrapped.inner);
        let expected = encode_aggregate3(&[
            (wrapped.factory, wrapped.factory_calldata.as_slice()),
            (wallet, validation.as_slice()),
        ]);
        assert_eq!(data, &expected);
    }

    #[tokio::test]
    async fn test_undeployed_wallet_rejecting_signature_is_invalid() {
        let wallet = address_of(&signing_key(0x99));
        let wrapped = counterfactual(&personal_sign(&signing_key(0x42), MESSAGE));
        let signature = hex::encode(wrapped.wrap());

        let reply = aggregate3_reply(&[(true, Vec::new()), (true, vec![0u8; 32])]);
        let verifier = SignatureVerifier::new().with_chain(Arc::new(FakeChain::undeployed(Ok(reply))));
        assert_eq!(verifier.verify(MESSAGE, &signature, wallet, 1).await, SignatureCheck::Invalid);

        let reply = aggregate3_reply(&[(false, Vec::new()), (false, Vec::new())]);
        let verifier = SignatureVerifier::new().with_chain(Arc::new(FakeChain::undeployed(Ok(reply))));
        assert_eq!(verifier.verify(MESSAGE, &signature, wallet, 1).await, SignatureCheck::Invalid);
    }

    #[tokio::test]
    async fn test_undeployed_wallet_garbled_reply_is_unavailable() {
        let wallet = address_of(&signing_key(0x99));
        let signature = hex::encode(counterfactual(&personal_sign(&signing_key(0x42), MESSAGE)).wrap());

        // No Multicall3 on the chain: the call succeeds with empty output
        let verifier = SignatureVerifier::new().with_chain(Arc::new(FakeChain::undeployed(Ok(Vec::new()))));
        assert_eq!(verifier.verify(MESSAGE, &signature, wallet, 1).await, SignatureCheck::Unavailable);
    }

    #[tokio::test]
    async fn test_deployed_wallet_gets_inner_signature() {
        let wallet = address_of(&signing_key(0x99));
        let wrapped = counterfactual(&personal_sign(&signing_key(0x42), MESSAGE));
        let chain = Arc::new(FakeChain::contract(Ok(magic_reply())));
        let verifier = SignatureVerifier::new().with_chain(chain.clone());

        let signature = hex::encode(wrapped.wrap());
        assert_eq!(verifier.verify(MESSAGE, &signature, wallet, 1).await, SignatureCheck::Valid);

        let sent = chain.sent.lock().unwrap();
        let hash = eip191_hash(MESSAGE.as_bytes());
        assert_eq!(sent[0], (wallet, encode_is_valid_signature(&hash, &wrapped.inner)));
    }
}
