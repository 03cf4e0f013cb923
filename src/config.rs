use std::env;

/// Process configuration, read once at startup from the environment.
///
/// Every field has a sane default; a missing or unparsable env var falls back to it
/// rather than failing startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub redis_url: Option<String>,
    pub db_pool_size: u32,
    pub log_level: String,
    pub node_env: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env_var("PORT", 8000),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "chat.db".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.is_empty()),
            db_pool_size: env_var("DB_POOL_SIZE", 5),
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            node_env: env::var("NODE_ENV").unwrap_or_else(|_| "development".to_string()),
        }
    }

    pub fn is_production(&self) -> bool {
        self.node_env == "production"
    }
}

fn env_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_unset() {
        let cfg = Config {
            port: 8000,
            database_path: "chat.db".to_string(),
            redis_url: None,
            db_pool_size: 5,
            log_level: "info".to_string(),
            node_env: "development".to_string(),
        };
        assert_eq!(cfg.port, 8000);
        assert!(!cfg.is_production());
    }
}
