// web-server/src/api/sessions.rs
use actix::Addr;
use actix_web::{get, post, delete, web, HttpRequest, HttpResponse, Responder, cookie::{Cookie, SameSite}};
use actix_web::cookie::time::Duration as CookieDuration;
use common::models::session::{ClientSession, ClientSessionResponse, SessionResult};
use serde_json::json;
use uuid::Uuid;
use crate::client_registry::{
    ClientRegistryActor,
    RegisterAnonymousClient,
    GetClientSession,
    GetClientSessionById,
    InvalidateClientSession
};

// Cookie name for session tracking
pub(crate) const SESSION_COOKIE_NAME: &str = "wallet_auth_session";
// Cookie max age in seconds (24 hours)
const COOKIE_MAX_AGE: i64 = 86400;

pub(crate) fn session_cookie(session_token: String) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE_NAME, session_token)
        .path("/")
        .secure(true)
        .http_only(true)
        .same_site(SameSite::Strict)
        .max_age(CookieDuration::seconds(COOKIE_MAX_AGE))
        .finish()
}

pub(crate) fn internal_error() -> HttpResponse {
    HttpResponse::InternalServerError().json(json!({
        "error": "Internal server error"
    }))
}

/// Live session named by the request's cookie, if any
pub(crate) async fn cookie_session(
    req: &HttpRequest,
    registry: &Addr<ClientRegistryActor>,
) -> Result<Option<ClientSession>, actix::MailboxError> {
    let Some(cookie) = req.cookie(SESSION_COOKIE_NAME) else {
        return Ok(None);
    };

    match registry.send(GetClientSession { session_token: cookie.value().to_string() }).await? {
        SessionResult::Success(session) => Ok(Some(session)),
        SessionResult::Expired => {
            tracing::info!("Session expired");
            Ok(None)
        },
        SessionResult::NotFound => Ok(None),
    }
}

#[get("/")]
pub async fn api_index() -> impl Responder {
    HttpResponse::Ok().json(json!({
        "name": "Wallet Auth Gateway API",
        "version": "0.1.0"
    }))
}

// Create a new client session or return existing one
#[post("/client")]
pub async fn create_client(
    req: HttpRequest,
    registry: web::Data<Addr<ClientRegistryActor>>,
) -> impl Responder {
    match cookie_session(&req, &registry).await {
        Ok(Some(session)) => {
            tracing::info!("Returning existing client session: {}", session.client_id);
            return HttpResponse::Ok().json(ClientSessionResponse::from(&session));
        },
        Ok(None) => {},
        Err(e) => {
            tracing::error!("Error retrieving session: {}", e);
            return internal_error();
        }
    }

    match registry.send(RegisterAnonymousClient).await {
        Ok((client_id, session_token)) => {
            tracing::info!("Created new client session: {}", client_id);

            HttpResponse::Ok()
                .cookie(session_cookie(session_token))
                .json(json!({
                    "client_id": client_id,
                    "created_at": chrono::Utc::now(),
                    "is_authenticated": false,
                    "wallet_address": null,
                    "new_session": true
                }))
        },
        Err(e) => {
            tracing::error!("Error creating client: {}", e);
            internal_error()
        }
    }
}

// Get client session information; only the owner of the cookie may read it
#[get("/client/{client_id}")]
pub async fn get_client_info(
    path: web::Path<(String,)>,
    req: HttpRequest,
    registry: web::Data<Addr<ClientRegistryActor>>,
) -> impl Responder {
    let client_id = match Uuid::parse_str(&path.0) {
        Ok(id) => id,
        Err(_) => {
            return HttpResponse::BadRequest().json(json!({
                "error": "Invalid client ID format"
            }));
        }
    };

    match cookie_session(&req, &registry).await {
        Ok(Some(session)) if session.client_id == client_id => {
            HttpResponse::Ok().json(ClientSessionResponse::from(&session))
        },
        Ok(Some(session)) => {
            tracing::warn!(
                "Client ID mismatch: requested {}, session has {}",
                client_id, session.client_id
            );
            HttpResponse::Forbidden().json(json!({
                "error": "Access denied"
            }))
        },
        Ok(None) => {
            // Distinguish an unknown client from a missing cookie for diagnostics only
            match registry.send(GetClientSessionById { client_id }).await {
                Ok(SessionResult::Success(_)) => {
                    tracing::warn!("Session found for client {} but cookie is missing", client_id);
                },
                Ok(_) => {},
                Err(e) => {
                    tracing::error!("Error retrieving session by client ID: {}", e);
                    return internal_error();
                }
            }
            HttpResponse::Unauthorized().json(json!({
                "error": "Invalid session"
            }))
        },
        Err(e) => {
            tracing::error!("Error retrieving session: {}", e);
            internal_error()
        }
    }
}

// Invalidate/logout client session
#[delete("/client/session")]
pub async fn invalidate_session(
    req: HttpRequest,
    registry: web::Data<Addr<ClientRegistryActor>>,
) -> impl Responder {
    let Some(cookie) = req.cookie(SESSION_COOKIE_NAME) else {
        return HttpResponse::BadRequest().json(json!({
            "error": "No session cookie found"
        }));
    };

    match registry.send(InvalidateClientSession { session_token: cookie.value().to_string() }).await {
        Ok(true) => {
            // Empty cookie to clear the session
            let cookie = Cookie::build(SESSION_COOKIE_NAME, "")
                .path("/")
                .max_age(CookieDuration::seconds(0))
                .finish();

            tracing::info!("Session invalidated successfully");

            HttpResponse::Ok()
                .cookie(cookie)
                .json(json!({
                    "status": "success",
                    "message": "Session invalidated"
                }))
        },
        Ok(false) => {
            tracing::info!("Attempt to invalidate non-existent session");
            HttpResponse::NotFound().json(json!({
                "error": "Session not found"
            }))
        },
        Err(e) => {
            tracing::error!("Error invalidating session: {}", e);
            internal_error()
        }
    }
}
