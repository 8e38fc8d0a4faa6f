//! Configuration loading and representation.
//!
//! Everything is read from environment variables; unset variables fall back to
//! development defaults.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

pub const ENV_TX_TIMEOUT_MS: &str = "FORGEPROC_TX_TIMEOUT_MS";
pub const ENV_USE_PERSISTENT_STORES: &str = "USE_PERSISTENT_STORES";
pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_DB_MAX_CONNECTIONS: &str = "FORGEPROC_DB_MAX_CONNECTIONS";
pub const ENV_BIND_ADDR: &str = "FORGEPROC_BIND_ADDR";

const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

/// Which purchase order store backs the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    InMemory,
    Postgres { database_url: String, max_connections: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Upper bound on waiting for a unit of work.
    pub tx_timeout: Duration,
    pub store: StoreBackend,
    pub bind_addr: SocketAddr,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tx_timeout: DEFAULT_TX_TIMEOUT,
            store: StoreBackend::InMemory,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an explicit variable map (tests, embedding).
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let tx_timeout = match lookup(ENV_TX_TIMEOUT_MS) {
            Some(raw) => {
                let ms = parse::<u64>(ENV_TX_TIMEOUT_MS, &raw)?;
                if ms == 0 {
                    return Err(invalid(ENV_TX_TIMEOUT_MS, &raw, "must be greater than zero"));
                }
                Duration::from_millis(ms)
            }
            None => DEFAULT_TX_TIMEOUT,
        };

        let use_persistent = match lookup(ENV_USE_PERSISTENT_STORES) {
            Some(raw) => parse::<bool>(ENV_USE_PERSISTENT_STORES, &raw.to_ascii_lowercase())?,
            None => false,
        };

        let store = if use_persistent {
            let database_url = lookup(ENV_DATABASE_URL).ok_or(ConfigError::Missing(ENV_DATABASE_URL))?;
            let max_connections = match lookup(ENV_DB_MAX_CONNECTIONS) {
                Some(raw) => parse::<u32>(ENV_DB_MAX_CONNECTIONS, &raw)?,
                None => DEFAULT_DB_MAX_CONNECTIONS,
            };
            StoreBackend::Postgres {
                database_url,
                max_connections,
            }
        } else {
            StoreBackend::InMemory
        };

        let bind_raw = lookup(ENV_BIND_ADDR).unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = parse::<SocketAddr>(ENV_BIND_ADDR, &bind_raw)?;

        Ok(Self {
            tx_timeout,
            store,
            bind_addr,
        })
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| invalid(name, raw, &e.to_string()))
}

fn invalid(name: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_in_memory() {
        let cfg = EngineConfig::from_map(&HashMap::new()).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn persistent_requires_database_url() {
        let err = EngineConfig::from_map(&vars(&[(ENV_USE_PERSISTENT_STORES, "true")])).unwrap_err();
        assert_eq!(err, ConfigError::Missing(ENV_DATABASE_URL));
    }

    #[test]
    fn reads_postgres_settings() {
        let cfg = EngineConfig::from_map(&vars(&[
            (ENV_USE_PERSISTENT_STORES, "TRUE"),
            (ENV_DATABASE_URL, "postgres://localhost/forgeproc"),
            (ENV_DB_MAX_CONNECTIONS, "4"),
            (ENV_TX_TIMEOUT_MS, "250"),
            (ENV_BIND_ADDR, "127.0.0.1:9000"),
        ]))
        .unwrap();

        assert_eq!(cfg.tx_timeout, Duration::from_millis(250));
        assert_eq!(
            cfg.store,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/forgeproc".to_string(),
                max_connections: 4,
            }
        );
        assert_eq!(cfg.bind_addr.port(), 9000);
    }

    #[test]
    fn rejects_zero_and_garbage_timeouts() {
        assert!(matches!(
            EngineConfig::from_map(&vars(&[(ENV_TX_TIMEOUT_MS, "0")])),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            EngineConfig::from_map(&vars(&[(ENV_TX_TIMEOUT_MS, "soon")])),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
