//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit logs as JSON lines (LOG_FORMAT=json)
    pub log_json: bool,

    /// Supabase project URL
    pub supabase_url: String,
    /// Supabase anonymous key, sent as `apikey` on every request
    pub supabase_anon_key: String,
    /// Supabase JWT secret for token verification
    pub supabase_jwt_secret: String,

    /// Allowed client origins for CORS (comma-separated)
    pub client_origin: String,
    /// Max API requests per second across all users
    pub api_rate_limit: u32,
    /// Seconds a session may sit unused before it is evicted
    pub session_idle_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let api_rate_limit = match env::var("API_RATE_LIMIT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("API_RATE_LIMIT"))?,
            Err(_) => DEFAULT_API_RATE_LIMIT,
        };

        let session_idle_secs = match env::var("SESSION_IDLE_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("SESSION_IDLE_SECS"))?,
            Err(_) => DEFAULT_SESSION_IDLE_SECS,
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").map_or(false, |f| f.eq_ignore_ascii_case("json")),

            supabase_url: env::var("SUPABASE_URL")
                .map_err(|_| ConfigError::Missing("SUPABASE_URL"))?,
            supabase_anon_key: env::var("SUPABASE_ANON_KEY")
                .map_err(|_| ConfigError::Missing("SUPABASE_ANON_KEY"))?,
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .map_err(|_| ConfigError::Missing("SUPABASE_JWT_SECRET"))?,

            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:8081".to_string()),
            api_rate_limit,
            session_idle_secs,
        })
    }
}

/// Default API rate limit (requests per second)
pub const DEFAULT_API_RATE_LIMIT: u32 = 20;

/// Default idle time before a session is dropped (30 minutes)
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 1800;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
