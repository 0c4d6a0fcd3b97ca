use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub votes: VoteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub capacity: usize,
    pub ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteConfig {
    /// Whether authors may vote on their own snippets and comments
    pub allow_self_vote: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite:data/snippet_votes.db".to_string(),
                max_connections: 10,
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            cache: CacheConfig {
                capacity: 1000,
                ttl: Duration::from_secs(300),
            },
            votes: VoteConfig {
                allow_self_vote: true,
            },
        }
    }
}

fn parse_var<T: FromStr>(key: &str, raw: Option<String>, default: T) -> AppResult<T> {
    match raw {
        Some(value) => value.trim().parse().map_err(|_| {
            AppError::ConfigurationError(format!("Invalid value for {}: {}", key, value))
        }),
        None => Ok(default),
    }
}

fn parse_bool(key: &str, raw: Option<String>, default: bool) -> AppResult<bool> {
    match raw.as_deref().map(|v| v.trim().to_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(v) => Err(AppError::ConfigurationError(format!(
            "Invalid value for {}: {}",
            key, v
        ))),
    }
}

impl Config {
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup; missing keys fall back to defaults
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            database: DatabaseConfig {
                url: lookup("DATABASE_URL").unwrap_or(defaults.database.url),
                max_connections: parse_var(
                    "DB_MAX_CONNECTIONS",
                    lookup("DB_MAX_CONNECTIONS"),
                    defaults.database.max_connections,
                )?,
            },
            server: ServerConfig {
                host: lookup("SERVER_HOST").unwrap_or(defaults.server.host),
                port: parse_var("SERVER_PORT", lookup("SERVER_PORT"), defaults.server.port)?,
            },
            cache: CacheConfig {
                capacity: parse_var(
                    "CACHE_CAPACITY",
                    lookup("CACHE_CAPACITY"),
                    defaults.cache.capacity,
                )?,
                ttl: Duration::from_secs(parse_var(
                    "CACHE_TTL_SECS",
                    lookup("CACHE_TTL_SECS"),
                    defaults.cache.ttl.as_secs(),
                )?),
            },
            votes: VoteConfig {
                allow_self_vote: parse_bool(
                    "ALLOW_SELF_VOTE",
                    lookup("ALLOW_SELF_VOTE"),
                    defaults.votes.allow_self_vote,
                )?,
            },
        })
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.cache.capacity, 1000);
        assert!(config.votes.allow_self_vote);
        assert_eq!(config.server_address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://localhost/votes"),
            ("SERVER_PORT", "8080"),
            ("CACHE_TTL_SECS", "30"),
            ("ALLOW_SELF_VOTE", "false"),
        ]))
        .unwrap();
        assert_eq!(config.database.url, "postgres://localhost/votes");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.cache.ttl, Duration::from_secs(30));
        assert!(!config.votes.allow_self_vote);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = Config::from_lookup(lookup(&[("SERVER_PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, AppError::ConfigurationError(_)));
        assert!(Config::from_lookup(lookup(&[("ALLOW_SELF_VOTE", "maybe")])).is_err());
    }
}
