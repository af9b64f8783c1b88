// web-server/src/session_issuer.rs
use actix::{Addr, MailboxError};
use async_trait::async_trait;
use common::generate_jwt_token;
use common::models::session::SessionResult;
use serde::Serialize;
use siwe_auth::{Address, SessionIssuer};
use thiserror::Error;
use uuid::Uuid;
use crate::client_registry::{AuthenticateClientSession, ClientRegistryActor};

/// Session handed back to the client after a successful sign-in
#[derive(Debug, Clone, Serialize)]
pub struct IssuedSession {
    pub client_id: Uuid,
    pub address: Address,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum IssueError {
    #[error("client registry unavailable: {0}")]
    Registry(#[from] MailboxError),

    #[error("client session missing or expired")]
    SessionGone,

    #[error("token encoding failed: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

/// Upgrades the cookie session in the registry and mints a JWT for it
pub struct JwtSessionIssuer {
    registry: Addr<ClientRegistryActor>,
    secret: Vec<u8>,
    ttl_seconds: i64,
}

impl JwtSessionIssuer {
    pub fn new(registry: Addr<ClientRegistryActor>, secret: impl Into<Vec<u8>>, ttl_seconds: i64) -> Self {
        Self {
            registry,
            secret: secret.into(),
            ttl_seconds,
        }
    }
}

#[async_trait]
impl SessionIssuer for JwtSessionIssuer {
    type Session = IssuedSession;
    type Error = IssueError;

    async fn issue(&self, session_id: &str, address: Address) -> Result<IssuedSession, IssueError> {
        let wallet_address = address.to_checksum();
        let result = self
            .registry
            .send(AuthenticateClientSession {
                session_token: session_id.to_string(),
                wallet_address: wallet_address.clone(),
            })
            .await?;

        let SessionResult::Success(session) = result else {
            return Err(IssueError::SessionGone);
        };

        let token = generate_jwt_token(&session.client_id, &wallet_address, &self.secret, self.ttl_seconds)?;

        Ok(IssuedSession {
            client_id: session.client_id,
            address,
            token,
        })
    }
}
