// Web Server - main.rs
// wallet-auth-gateway/web-server/src/main.rs
mod api;
mod client_registry;
mod middleware;
mod session_issuer;
mod utils;

use std::io;
use std::sync::Arc;
use std::time::Duration;
use actix::Actor;
use actix_web::{web, App, HttpServer, Responder, HttpResponse, get};
use common::{setup_tracing, Config};
use siwe_auth::{
    domain_from_url, InMemoryChallengeStore, JsonRpcChainReader, SignIn, SignatureVerifier, Verifier,
};
use crate::api::auth::AuthState;
use crate::client_registry::ClientRegistryActor;
use crate::middleware::rate_limiter::RateLimiter;
use crate::session_issuer::JwtSessionIssuer;

// How often stale sign-in challenges are swept
const CHALLENGE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[get("/")]
async fn index() -> impl Responder {
    HttpResponse::Ok().body("Wallet Auth Gateway")
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // Setup tracing
    setup_tracing();

    // Load configuration
    let config = Config::from_env();

    // Sign-in messages are bound to the host of the public URL; refuse to start without one
    let public_url = config.auth.public_url.clone().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "auth.public_url (or PUBLIC_URL / VERCEL_URL) must be set")
    })?;
    let expected_domain = domain_from_url(&public_url).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("public URL has no host: {}", public_url))
    })?;

    let jwt_secret = config
        .auth
        .require_jwt_secret()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?
        .as_bytes()
        .to_vec();

    let server_addr = config.web_server_addr.clone();
    tracing::info!("Starting Web Server on {} for domain {}", server_addr, expected_domain);

    let registry = ClientRegistryActor::new()
        .with_ttl(config.auth.session_ttl_secs)
        .start();

    let challenges = Arc::new(InMemoryChallengeStore::new().with_ttl(config.auth.nonce_ttl_secs));

    let chain_timeout = Duration::from_millis(config.chain.timeout_ms);
    let mut signatures = SignatureVerifier::new().with_timeout(chain_timeout);
    match &config.chain.rpc_url {
        Some(rpc_url) => {
            tracing::info!("Contract wallet verification enabled for chain {}", config.chain.chain_id);
            let reader = JsonRpcChainReader::new(chain_timeout)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?
                .with_endpoint(config.chain.chain_id, rpc_url.clone());
            signatures = signatures.with_chain(Arc::new(reader));
        },
        None => {
            tracing::warn!("No chain RPC configured; contract wallet signatures will be rejected");
        }
    }

    let issuer = JwtSessionIssuer::new(
        registry.clone(),
        jwt_secret.clone(),
        config.auth.session_ttl_secs,
    );

    let auth_state = web::Data::new(AuthState {
        sign_in: SignIn::new(Verifier::new(signatures), challenges.clone(), issuer, expected_domain),
        challenges: challenges.clone(),
        public_url,
        chain_id: config.chain.chain_id,
        jwt_secret,
    });

    // Periodically drop challenges nobody came back for
    actix_web::rt::spawn(async move {
        let mut interval = tokio::time::interval(CHALLENGE_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            let removed = challenges.cleanup_expired();
            if removed > 0 {
                tracing::debug!("Removed {} expired sign-in challenges", removed);
            }
        }
    });

    let rate_limiter = RateLimiter::new(
        vec!["/api/auth/verify".to_string(), "/api/auth/nonce".to_string()],
        config.auth.sign_in_rate_limit,
    )
    .trust_forwarded_for(config.auth.trust_forwarded_for);
    let registry_data = web::Data::new(registry);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .wrap(rate_limiter.clone())
            .app_data(registry_data.clone())
            .app_data(auth_state.clone())
            .service(index)
            .configure(api::configure)
    })
    .bind(&server_addr)?
    .run()
    .await
}
