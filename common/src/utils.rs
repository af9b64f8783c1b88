// common/src/utils.rs
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use jsonwebtoken::{encode, decode, Header, Algorithm, Validation, EncodingKey, DecodingKey};
use serde::{Serialize, Deserialize};
use uuid::Uuid;
use std::time::{SystemTime, UNIX_EPOCH};

/// Setup tracing for consistent logging; `RUST_LOG` overrides the default `info` level
pub fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");
}

// JWT Claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: String,       // client_id
    pub wallet: String,    // checksummed wallet address
    pub exp: usize,        // expiration time
    pub iat: usize,        // issued at time
}

fn unix_now() -> usize {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as usize
}

// Generate JWT token binding a client session to a verified wallet address
pub fn generate_jwt_token(
    client_id: &Uuid,
    wallet_address: &str,
    secret: &[u8],
    ttl_seconds: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = unix_now();

    let claims = JwtClaims {
        sub: client_id.to_string(),
        wallet: wallet_address.to_string(),
        iat: now,
        exp: now + ttl_seconds.max(0) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret)
    )
}

// Validate JWT token and extract client_id and wallet_address
pub fn validate_jwt_token(token: &str, secret: &[u8]) -> Result<(Uuid, String), jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);

    let token_data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret),
        &validation
    )?;

    let uuid = Uuid::parse_str(&token_data.claims.sub)
        .map_err(|_| jsonwebtoken::errors::ErrorKind::InvalidSubject)?;

    Ok((uuid, token_data.claims.wallet))
}
