//! Server configuration.
//!
//! `spec.md` §1 places configuration *file* parsing out of scope — this
//! module only defines the keys an operator-supplied loader would fill in,
//! and a default/`--dev` path that needs no file at all. Values are read from
//! environment variables so the server is runnable without one.

use std::env;

/// `Server.*` configuration keys.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub bind_address: String,
    pub max_connections: usize,
    pub heartbeat_interval_seconds: u64,
    pub connection_timeout_seconds: u64,
    pub max_requests_per_minute: u32,
    pub disconnection_grace_period_seconds: u64,
}

/// `Security.*` configuration keys.
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub token_secret: String,
    pub token_expiration_hours: i64,
    pub max_sessions_per_player: u32,
}

/// `Matchmaking.*` configuration keys.
#[derive(Debug, Clone, Copy)]
pub struct MatchmakingConfig {
    pub default_rating_range: u32,
    pub max_rating_range: u32,
    pub rating_expansion_interval_seconds: u64,
    pub rating_expansion_amount: u32,
}

/// `Rating.*` configuration keys.
#[derive(Debug, Clone, Copy)]
pub struct RatingConfig {
    pub default_rating: i32,
    pub k_factor: i32,
    pub min_rating: i32,
    pub max_rating: i32,
}

/// `Database.*` configuration keys.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseConfig {
    pub use_in_memory: bool,
}

/// The complete, assembled configuration consumed by the core.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub security: SecurityConfig,
    pub matchmaking: MatchmakingConfig,
    pub rating: RatingConfig,
    pub database: DatabaseConfig,
    /// Debug-level logging, relaxed rate limits, ephemeral token secret.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8787,
            bind_address: "0.0.0.0".to_string(),
            max_connections: 10_000,
            heartbeat_interval_seconds: 15,
            connection_timeout_seconds: 60,
            max_requests_per_minute: 120,
            disconnection_grace_period_seconds: 30,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            token_secret: "chessd-default-secret-change-me".to_string(),
            token_expiration_hours: 24 * 7,
            max_sessions_per_player: 5,
        }
    }
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            default_rating_range: 100,
            max_rating_range: 400,
            rating_expansion_interval_seconds: 10,
            rating_expansion_amount: 50,
        }
    }
}

impl Default for RatingConfig {
    fn default() -> Self {
        Self {
            default_rating: 1200,
            k_factor: 32,
            min_rating: 100,
            max_rating: 3000,
        }
    }
}

impl Config {
    /// Builds the configuration from environment variables, falling back to
    /// defaults for anything unset. `--dev`/`--development` forces in-memory
    /// storage, a relaxed rate limit, and a process-local ephemeral secret.
    pub fn load(dev_mode: bool) -> Self {
        let mut server = ServerConfig::default();
        if let Ok(v) = env::var("CHESSD_PORT") {
            if let Ok(p) = v.parse() {
                server.port = p;
            }
        }
        if let Ok(v) = env::var("CHESSD_BIND_ADDRESS") {
            server.bind_address = v;
        }
        if dev_mode {
            server.max_requests_per_minute = 10_000;
        }

        let mut security = SecurityConfig::default();
        if dev_mode {
            security.token_secret = format!("chessd-dev-secret-{}", uuid::Uuid::new_v4());
        } else if let Ok(v) = env::var("CHESSD_TOKEN_SECRET") {
            security.token_secret = v;
        }

        let matchmaking = MatchmakingConfig::default();
        let rating = RatingConfig::default();

        let database = DatabaseConfig {
            use_in_memory: dev_mode || env::var("CHESSD_USE_IN_MEMORY").as_deref() == Ok("true"),
        };

        Self {
            server,
            security,
            matchmaking,
            rating,
            database,
            dev_mode,
        }
    }
}
