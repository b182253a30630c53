use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Server settings, read once from `HALLBOOK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "hallbook".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not a valid {expected}")]
    Invalid {
        var: &'static str,
        value: String,
        expected: &'static str,
    },
    #[error("HALLBOOK_MAX_CONNECTIONS must be at least 1")]
    NoConnections,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Unset or empty variables take the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let config = Config {
            port: parsed(&get, "HALLBOOK_PORT", "port number")?.unwrap_or(defaults.port),
            bind: get("HALLBOOK_BIND").unwrap_or(defaults.bind),
            data_dir: get("HALLBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("HALLBOOK_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&get, "HALLBOOK_MAX_CONNECTIONS", "connection count")?
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&get, "HALLBOOK_COMPACT_THRESHOLD", "event count")?
                .unwrap_or(defaults.compact_threshold),
            tls_cert: get("HALLBOOK_TLS_CERT").map(PathBuf::from),
            tls_key: get("HALLBOOK_TLS_KEY").map(PathBuf::from),
            metrics_port: parsed(&get, "HALLBOOK_METRICS_PORT", "port number")?,
        };
        if config.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    get(var)
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid { var, value, expected })
        })
        .transpose()
}
