// web-server/src/client_registry.rs
use actix::{Actor, Context, Handler, Message, AsyncContext, MessageResult};
use common::models::session::{ClientSession, SessionResult};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use crate::utils::token::create_session_token;

// Default session TTL in seconds (24 hours)
const DEFAULT_SESSION_TTL: i64 = 86400;

/// Actor message: Register a new anonymous client
#[derive(Message)]
#[rtype(result = "(Uuid, String)")]
pub struct RegisterAnonymousClient;

/// Actor message: Get a client session by session token
#[derive(Message)]
#[rtype(result = "SessionResult")]
pub struct GetClientSession {
    pub session_token: String,
}

/// Actor message: Get a client session by client ID
#[derive(Message)]
#[rtype(result = "SessionResult")]
pub struct GetClientSessionById {
    pub client_id: Uuid,
}

/// Actor message: Bind a verified wallet address to a session
#[derive(Message)]
#[rtype(result = "SessionResult")]
pub struct AuthenticateClientSession {
    pub session_token: String,
    pub wallet_address: String,
}

/// Actor message: Invalidate/remove a client session
#[derive(Message)]
#[rtype(result = "bool")]
pub struct InvalidateClientSession {
    pub session_token: String,
}

/// Actor message: Clean up expired sessions
#[derive(Message)]
#[rtype(result = "usize")]
pub struct CleanupExpiredSessions;

/// ClientRegistryActor for managing client sessions
pub struct ClientRegistryActor {
    // Map from session token to session data
    sessions: Arc<DashMap<String, ClientSession>>,
    // Map from client ID to session token
    client_lookup: Arc<DashMap<Uuid, String>>,
    // Session TTL in seconds
    session_ttl: i64,
    // Cleanup interval in seconds
    cleanup_interval: u64,
    // Sessions dropped by cleanup over the actor's lifetime
    expired_count: usize,
}

impl Default for ClientRegistryActor {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientRegistryActor {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            client_lookup: Arc::new(DashMap::new()),
            session_ttl: DEFAULT_SESSION_TTL,
            cleanup_interval: 3600, // Run cleanup every hour
            expired_count: 0,
        }
    }

    pub fn with_ttl(mut self, ttl_seconds: i64) -> Self {
        self.session_ttl = ttl_seconds;
        self
    }

    /// Fetch a live session, refreshing its activity timestamp
    fn live_session(&self, session_token: &str) -> SessionResult {
        match self.sessions.get_mut(session_token) {
            Some(mut entry) => {
                let session = entry.value_mut();
                if session.is_expired(self.session_ttl) {
                    tracing::debug!("Session expired: {}", session.client_id);
                    SessionResult::Expired
                } else {
                    session.update_activity();
                    SessionResult::Success(session.clone())
                }
            }
            None => SessionResult::NotFound,
        }
    }

    /// Remove expired sessions
    fn cleanup_sessions(&mut self) -> usize {
        let ttl = self.session_ttl;

        let expired_tokens: Vec<String> = self.sessions.iter()
            .filter(|entry| entry.value().is_expired(ttl))
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired_count = 0;
        for token in expired_tokens {
            if let Some((_, session)) = self.sessions.remove(&token) {
                self.client_lookup.remove(&session.client_id);
                expired_count += 1;
            }
        }

        self.expired_count += expired_count;
        expired_count
    }
}

impl Actor for ClientRegistryActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        tracing::info!("ClientRegistryActor started with TTL: {}s", self.session_ttl);

        // Schedule periodic session cleanup
        ctx.run_interval(Duration::from_secs(self.cleanup_interval), |act, _ctx| {
            let expired_count = act.cleanup_sessions();
            if expired_count > 0 {
                tracing::info!("Cleaned up {} expired sessions", expired_count);
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        tracing::info!(
            "ClientRegistryActor stopped. {} live sessions, {} expired during lifetime",
            self.sessions.len(),
            self.expired_count
        );
    }
}

impl Handler<RegisterAnonymousClient> for ClientRegistryActor {
    type Result = MessageResult<RegisterAnonymousClient>;

    fn handle(&mut self, _msg: RegisterAnonymousClient, _ctx: &mut Self::Context) -> Self::Result {
        let client_id = Uuid::new_v4();
        let session_token = create_session_token();

        let session = ClientSession::new_anonymous(client_id, session_token.clone());

        self.sessions.insert(session_token.clone(), session);
        self.client_lookup.insert(client_id, session_token.clone());

        tracing::info!("Registered new anonymous client: {}", client_id);

        MessageResult((client_id, session_token))
    }
}

impl Handler<GetClientSession> for ClientRegistryActor {
    type Result = MessageResult<GetClientSession>;

    fn handle(&mut self, msg: GetClientSession, _ctx: &mut Self::Context) -> Self::Result {
        MessageResult(self.live_session(&msg.session_token))
    }
}

impl Handler<GetClientSessionById> for ClientRegistryActor {
    type Result = MessageResult<GetClientSessionById>;

    fn handle(&mut self, msg: GetClientSessionById, _ctx: &mut Self::Context) -> Self::Result {
        let token = self.client_lookup.get(&msg.client_id).map(|entry| entry.value().clone());
        let result = match token {
            Some(token) => self.live_session(&token),
            None => {
                tracing::debug!("Session not found for client ID: {}", msg.client_id);
                SessionResult::NotFound
            }
        };
        MessageResult(result)
    }
}

impl Handler<AuthenticateClientSession> for ClientRegistryActor {
    type Result = MessageResult<AuthenticateClientSession>;

    fn handle(&mut self, msg: AuthenticateClientSession, _ctx: &mut Self::Context) -> Self::Result {
        let result = match self.sessions.get_mut(&msg.session_token) {
            Some(mut entry) => {
                let session = entry.value_mut();
                if session.is_expired(self.session_ttl) {
                    SessionResult::Expired
                } else {
                    session.authenticate(msg.wallet_address);
                    tracing::info!("Client upgraded to authenticated status: {}", session.client_id);
                    SessionResult::Success(session.clone())
                }
            }
            None => SessionResult::NotFound,
        };
        MessageResult(result)
    }
}

impl Handler<InvalidateClientSession> for ClientRegistryActor {
    type Result = MessageResult<InvalidateClientSession>;

    fn handle(&mut self, msg: InvalidateClientSession, _ctx: &mut Self::Context) -> Self::Result {
        let result = if let Some((_, session)) = self.sessions.remove(&msg.session_token) {
            self.client_lookup.remove(&session.client_id);
            tracing::info!("Invalidated session for client: {}", session.client_id);
            true
        } else {
            false
        };

        MessageResult(result)
    }
}

impl Handler<CleanupExpiredSessions> for ClientRegistryActor {
    type Result = MessageResult<CleanupExpiredSessions>;

    fn handle(&mut self, _msg: CleanupExpiredSessions, _ctx: &mut Self::Context) -> Self::Result {
        let expired_count = self.cleanup_sessions();
        tracing::info!("Cleaned up {} expired sessions", expired_count);
        MessageResult(expired_count)
    }
}
