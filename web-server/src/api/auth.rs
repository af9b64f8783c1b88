// web-server/src/api/auth.rs
use actix::Addr;
use actix_web::{get, post, web, HttpRequest, HttpResponse, Responder, http::header};
use common::validate_jwt_token;
use serde::Deserialize;
use serde_json::json;
use siwe_auth::{ChallengeStore, RejectReason, SignIn, SignInError};
use std::sync::Arc;
use crate::api::sessions::{cookie_session, internal_error, session_cookie, SESSION_COOKIE_NAME};
use crate::client_registry::{ClientRegistryActor, GetClientSessionById, RegisterAnonymousClient};
use common::models::session::SessionResult;
use crate::session_issuer::JwtSessionIssuer;

/// Shared sign-in state for the auth endpoints
pub struct AuthState {
    pub sign_in: SignIn<JwtSessionIssuer>,
    pub challenges: Arc<dyn ChallengeStore>,
    pub public_url: String,
    pub chain_id: u64,
    pub jwt_secret: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub message: String,
    pub signature: String,
}

// Every rejection looks the same to the client; the reason stays in server logs
fn sign_in_failed(reason: RejectReason) -> HttpResponse {
    tracing::warn!(reason = %reason, "Sign-in rejected");

    if reason.is_retryable() {
        HttpResponse::ServiceUnavailable()
            .append_header((header::RETRY_AFTER, "5"))
            .json(json!({ "error": "sign-in failed" }))
    } else {
        HttpResponse::Unauthorized().json(json!({ "error": "sign-in failed" }))
    }
}

// Issue a fresh challenge bound to the caller's cookie session
#[get("/auth/nonce")]
pub async fn issue_nonce(
    req: HttpRequest,
    registry: web::Data<Addr<ClientRegistryActor>>,
    auth: web::Data<AuthState>,
) -> impl Responder {
    let (session_token, new_cookie) = match cookie_session(&req, &registry).await {
        Ok(Some(session)) => (session.session_token, None),
        Ok(None) => match registry.send(RegisterAnonymousClient).await {
            Ok((client_id, session_token)) => {
                tracing::info!("Created client session {} for sign-in challenge", client_id);
                (session_token.clone(), Some(session_cookie(session_token)))
            },
            Err(e) => {
                tracing::error!("Error creating client: {}", e);
                return internal_error();
            }
        },
        Err(e) => {
            tracing::error!("Error retrieving session: {}", e);
            return internal_error();
        }
    };

    let nonce = match auth.challenges.issue_nonce(&session_token).await {
        Ok(nonce) => nonce,
        Err(e) => {
            tracing::error!("Error issuing challenge: {}", e);
            return internal_error();
        }
    };

    let mut response = HttpResponse::Ok();
    if let Some(cookie) = new_cookie {
        response.cookie(cookie);
    }
    response.json(json!({
        "nonce": nonce,
        "domain": auth.sign_in.expected_domain(),
        "uri": auth.public_url,
        "chain_id": auth.chain_id
    }))
}

// Verify a signed sign-in message and upgrade the cookie session
#[post("/auth/verify")]
pub async fn verify(
    req: HttpRequest,
    body: web::Json<SignInRequest>,
    auth: web::Data<AuthState>,
) -> impl Responder {
    let Some(cookie) = req.cookie(SESSION_COOKIE_NAME) else {
        return sign_in_failed(RejectReason::NonceMismatch);
    };

    match auth.sign_in.authenticate(cookie.value(), &body.message, &body.signature).await {
        Ok(session) => {
            tracing::info!("Client {} signed in as {}", session.client_id, session.address);
            HttpResponse::Ok().json(json!({
                "status": "success",
                "client_id": session.client_id,
                "address": session.address,
                "token": session.token
            }))
        },
        Err(SignInError::Rejected(reason)) => sign_in_failed(reason),
        Err(e) => {
            tracing::error!("Sign-in could not complete: {}", e);
            internal_error()
        }
    }
}

// Resolve a bearer token back to the signed-in address
#[get("/auth/session")]
pub async fn current_session(
    req: HttpRequest,
    registry: web::Data<Addr<ClientRegistryActor>>,
    auth: web::Data<AuthState>,
) -> impl Responder {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    let Some(token) = token else {
        return HttpResponse::Unauthorized().json(json!({ "error": "Missing bearer token" }));
    };

    let (client_id, address) = match validate_jwt_token(token, &auth.jwt_secret) {
        Ok(claims) => claims,
        Err(e) => {
            tracing::debug!("Rejected bearer token: {}", e);
            return HttpResponse::Unauthorized().json(json!({ "error": "Invalid token" }));
        }
    };

    // The token only stands while its client session is alive and bound to the same wallet
    match registry.send(GetClientSessionById { client_id }).await {
        Ok(SessionResult::Success(session)) if session.wallet_address.as_deref() == Some(address.as_str()) => {
            HttpResponse::Ok().json(json!({
                "client_id": client_id,
                "address": address
            }))
        },
        Ok(_) => {
            tracing::debug!("Bearer token for client {} has no live wallet session", client_id);
            HttpResponse::Unauthorized().json(json!({ "error": "Invalid token" }))
        },
        Err(e) => {
            tracing::error!("Error retrieving session by client ID: {}", e);
            internal_error()
        }
    }
}
