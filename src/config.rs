use std::time::Duration;

/// Lifetimes of the three token scopes.
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub session_ttl: time::Duration,
    pub activation_ttl: time::Duration,
    pub password_reset_ttl: time::Duration,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            session_ttl: time::Duration::hours(24),
            activation_ttl: time::Duration::minutes(45),
            password_reset_ttl: time::Duration::minutes(45),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Upper bound on every single store round-trip.
    pub store_timeout: Duration,
    pub tokens: TokenConfig,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")?;
        let tokens = TokenConfig {
            session_ttl: time::Duration::hours(env_or("SESSION_TTL_HOURS", 24)),
            activation_ttl: time::Duration::minutes(env_or("ACTIVATION_TTL_MINUTES", 45)),
            password_reset_ttl: time::Duration::minutes(env_or("PASSWORD_RESET_TTL_MINUTES", 45)),
        };
        Ok(Self {
            database_url,
            db_max_connections: env_or("DB_MAX_CONNECTIONS", 10),
            store_timeout: Duration::from_secs(env_or("STORE_TIMEOUT_SECS", 3)),
            tokens,
        })
    }
}
