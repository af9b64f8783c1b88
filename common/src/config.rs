// common/src/config.rs
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use config::{Config as ConfigFile, File, Environment};

/// Central configuration for the gateway
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub web_server_addr: String,
    pub auth: AuthConfig,
    pub chain: ChainConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Canonical URL of this relying party; sign-in messages must name its host
    pub public_url: Option<String>,
    /// HMAC key for session tokens; startup fails without one
    pub jwt_secret: Option<String>,
    pub session_ttl_secs: i64,
    pub nonce_ttl_secs: i64,
    /// Sign-in attempts allowed per client IP per minute
    pub sign_in_rate_limit: usize,
    /// Take the client IP from X-Forwarded-For; enable only behind a proxy that sets it
    pub trust_forwarded_for: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// JSON-RPC endpoint used for contract wallet signatures; plain key
    /// signatures only when unset
    pub rpc_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            web_server_addr: "127.0.0.1:8081".to_string(),
            auth: AuthConfig::default(),
            chain: ChainConfig::default(),
        }
    }
}

impl AuthConfig {
    /// The signing secret, refusing to run with a missing or blank one
    pub fn require_jwt_secret(&self) -> Result<&str, config::ConfigError> {
        match self.jwt_secret.as_deref() {
            Some(secret) if !secret.trim().is_empty() => Ok(secret),
            _ => Err(config::ConfigError::NotFound(
                "auth.jwt_secret (or APP__AUTH__JWT_SECRET / JWT_SECRET)".into(),
            )),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            public_url: None,
            jwt_secret: None,
            session_ttl_secs: 86400,
            nonce_ttl_secs: 600,
            sign_in_rate_limit: 10,
            trust_forwarded_for: false,
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            // Monad testnet
            chain_id: 10143,
            rpc_url: None,
            timeout_ms: 5000,
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self, config::ConfigError> {
        // Get the run mode, defaulting to "development"
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        // Locate the config directory
        let config_dir = env::var("CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                // Check if we're in the project root or a subcrate
                let mut path = PathBuf::from("./config");
                if !path.exists() {
                    path = PathBuf::from("../config");
                }
                path
            });

        tracing::info!("Loading configuration from {}", config_dir.display());
        tracing::info!("Using run mode: {}", run_mode);

        let mut config: Config = ConfigFile::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join(format!("{}.toml", run_mode))).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            // Environment variables with prefix "APP", e.g. APP__AUTH__JWT_SECRET
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()?;

        if config.auth.public_url.is_none() {
            config.auth.public_url = public_url_from_env();
        }

        Ok(config)
    }

    /// Load from files, falling back to plain environment variables
    pub fn from_env() -> Self {
        match Self::load() {
            Ok(config) => {
                tracing::info!("Configuration loaded from files and environment");
                config
            },
            Err(e) => {
                tracing::warn!("Failed to load configuration from files: {}", e);
                tracing::info!("Falling back to environment variables only");

                let defaults = Self::default();

                let web_server_addr = env::var("WEB_SERVER_ADDR")
                    .unwrap_or(defaults.web_server_addr);

                let jwt_secret = env::var("JWT_SECRET").ok();

                let session_ttl_secs = parse_env("SESSION_TTL_SECS")
                    .unwrap_or(defaults.auth.session_ttl_secs);

                let nonce_ttl_secs = parse_env("NONCE_TTL_SECS")
                    .unwrap_or(defaults.auth.nonce_ttl_secs);

                let sign_in_rate_limit = parse_env("SIGN_IN_RATE_LIMIT")
                    .unwrap_or(defaults.auth.sign_in_rate_limit);

                let trust_forwarded_for = parse_env("TRUST_FORWARDED_FOR")
                    .unwrap_or(defaults.auth.trust_forwarded_for);

                let chain_id = parse_env("CHAIN_ID")
                    .unwrap_or(defaults.chain.chain_id);

                let timeout_ms = parse_env("CHAIN_TIMEOUT_MS")
                    .unwrap_or(defaults.chain.timeout_ms);

                Self {
                    web_server_addr,
                    auth: AuthConfig {
                        public_url: public_url_from_env(),
                        jwt_secret,
                        session_ttl_secs,
                        nonce_ttl_secs,
                        sign_in_rate_limit,
                        trust_forwarded_for,
                    },
                    chain: ChainConfig {
                        chain_id,
                        rpc_url: env::var("CHAIN_RPC_URL").ok(),
                        timeout_ms,
                    },
                }
            }
        }
    }
}

/// `PUBLIC_URL`, or `https://$VERCEL_URL` on hosted deployments
fn public_url_from_env() -> Option<String> {
    env::var("PUBLIC_URL")
        .ok()
        .or_else(|| env::var("VERCEL_URL").ok().map(|host| format!("https://{}", host)))
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
