// siwe-auth/src/chain.rs
//! Read-only access to chain state for contract-wallet signature checks.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::address::Address;

/// JSON-RPC error code used by execution clients for a reverted `eth_call`.
const EXECUTION_REVERTED: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("no RPC endpoint configured for chain {0}")]
    UnsupportedChain(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("call reverted: {0}")]
    Reverted(String),

    #[error("invalid RPC response: {0}")]
    InvalidResponse(String),
}

/// Port used by the signature verifier to read chain state.
///
/// Implementations must not apply their own retries; the caller bounds the
/// whole check with a single timeout.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Deployed bytecode at `address`; empty for plain key accounts.
    async fn get_code(&self, chain_id: u64, address: Address) -> Result<Vec<u8>, ChainError>;

    /// Read-only contract call against the latest block.
    async fn call(&self, chain_id: u64, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError>;
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: T,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// [`ChainReader`] over HTTP JSON-RPC, one endpoint per chain id.
pub struct JsonRpcChainReader {
    http_client: reqwest::Client,
    endpoints: HashMap<u64, String>,
    request_id: AtomicU64,
}

impl JsonRpcChainReader {
    /// Fails only if the HTTP client cannot be built (e.g. no TLS backend).
    pub fn new(timeout: Duration) -> Result<Self, ChainError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ChainError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            endpoints: HashMap::new(),
            request_id: AtomicU64::new(1),
        })
    }

    pub fn with_endpoint(mut self, chain_id: u64, rpc_url: impl Into<String>) -> Self {
        self.endpoints.insert(chain_id, rpc_url.into());
        self
    }

    pub fn supports(&self, chain_id: u64) -> bool {
        self.endpoints.contains_key(&chain_id)
    }

    async fn rpc<P: Serialize, R: DeserializeOwned>(
        &self,
        chain_id: u64,
        method: &str,
        params: P,
    ) -> Result<R, ChainError> {
        let url = self
            .endpoints
            .get(&chain_id)
            .ok_or(ChainError::UnsupportedChain(chain_id))?;

        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id: self.request_id.fetch_add(1, Ordering::SeqCst),
        };

        tracing::debug!(chain_id, method, "Sending chain RPC request");

        let response = self
            .http_client
            .post(url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let body: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| ChainError::InvalidResponse(e.to_string()))?;

        if let Some(error) = body.error {
            return Err(classify_rpc_error(error.code, error.message));
        }

        body.result
            .ok_or_else(|| ChainError::InvalidResponse("missing result".to_string()))
    }
}

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn get_code(&self, chain_id: u64, address: Address) -> Result<Vec<u8>, ChainError> {
        let code: String = self
            .rpc(chain_id, "eth_getCode", json!([address.to_checksum(), "latest"]))
            .await?;
        parse_hex_bytes(&code)
    }

    async fn call(&self, chain_id: u64, to: Address, data: Vec<u8>) -> Result<Vec<u8>, ChainError> {
        let params = json!([
            { "to": to.to_checksum(), "data": format!("0x{}", hex::encode(data)) },
            "latest"
        ]);
        let result: String = self.rpc(chain_id, "eth_call", params).await?;
        parse_hex_bytes(&result)
    }
}

fn classify_rpc_error(code: i64, message: String) -> ChainError {
    if code == EXECUTION_REVERTED || message.to_ascii_lowercase().contains("revert") {
        ChainError::Reverted(message)
    } else {
        ChainError::Rpc { code, message }
    }
}

fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, ChainError> {
    let digits = text
        .strip_prefix("0x")
        .ok_or_else(|| ChainError::InvalidResponse(format!("expected 0x-prefixed hex, got {text}")))?;
    hex::decode(digits).map_err(|e| ChainError::InvalidResponse(e.to_string()))
}
