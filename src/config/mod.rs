//! Process configuration, loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working proxy for `http://127.0.0.1:3000` with the built-in route table.
//!
//! ```toml
//! version = "v2"
//! skip_waiting = true
//! manifest = ["/", "/index.html"]
//!
//! [[routes]]
//! prefix = "/assets/"
//! strategy = "cache-first"
//!
//! [[routes]]
//! extensions = ["png", "svg"]
//! strategy = "stale-while-revalidate"
//!
//! [store]
//! dir = "/var/cache/cacheroute"
//!
//! [upstream]
//! origin = "http://127.0.0.1:3000"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::validate_namespace;
use crate::lifecycle::{DEFAULT_MANIFEST, WorkerSettings};
use crate::router::{Pattern, RouteError, RouteRule, RouteTable};
use crate::strategy::Strategy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("route #{index}: {source}")]
    Route {
        index: usize,
        #[source]
        source: RouteError,
    },

    #[error("route #{index}: exactly one of `prefix`, `extensions`, or `regex` must be set")]
    RouteShape { index: usize },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkerConfig {
    /// Deployment version; namespaces are named `<prefix>-<version>`.
    pub version: String,
    pub static_prefix: String,
    pub dynamic_prefix: String,
    /// Paths fetched into the static namespace at install.
    pub manifest: Vec<String>,
    /// Activate right after install instead of waiting for `SKIP_WAITING`.
    pub skip_waiting: bool,
    /// How many fresh workers to try before giving up on install.
    pub install_attempts: u32,
    /// Strategy for URLs no route matches.
    pub default_strategy: Strategy,
    /// Ordered route rules. Absent means the built-in table.
    pub routes: Option<Vec<RouteConfig>>,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub logging: LoggingConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            version: "v1".to_owned(),
            static_prefix: "static".to_owned(),
            dynamic_prefix: "dynamic".to_owned(),
            manifest: DEFAULT_MANIFEST.iter().map(|p| (*p).to_owned()).collect(),
            skip_waiting: true,
            install_attempts: 3,
            default_strategy: Strategy::NetworkFirst,
            routes: None,
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// One `[[routes]]` entry. Exactly one pattern field must be set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RouteConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    pub strategy: Strategy,
}

impl RouteConfig {
    fn compile(&self, index: usize) -> Result<RouteRule, ConfigError> {
        let pattern = match (&self.prefix, &self.extensions, &self.regex) {
            (Some(prefix), None, None) => Pattern::prefix(prefix.as_str()),
            (None, Some(extensions), None) => Ok(Pattern::extensions(extensions)),
            (None, None, Some(regex)) => Pattern::regex(regex),
            _ => return Err(ConfigError::RouteShape { index }),
        }
        .map_err(|source| ConfigError::Route { index, source })?;
        Ok(RouteRule::new(pattern, self.strategy))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Directory for the durable store. Unset keeps the cache in memory.
    pub dir: Option<PathBuf>,
    pub quota_bytes: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            quota_bytes: 256 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub listen: String,
    /// `POST` target for control messages.
    pub control_path: String,
    /// `GET` target reporting the worker's phase and namespaces.
    pub status_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_owned(),
            control_path: "/__cacheroute/control".to_owned(),
            status_path: "/__cacheroute/status".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// `http(s)://host[:port]` of the origin being fronted.
    pub origin: String,
    pub timeout_ms: u64,
    pub max_response_bytes: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            origin: "http://127.0.0.1:3000".to_owned(),
            timeout_ms: 30_000,
            max_response_bytes: 32 * 1024 * 1024,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl WorkerConfig {
    /// Reads and validates a TOML config file.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Read`] if the file cannot be read, otherwise anything
    /// [`from_toml`](Self::from_toml) returns.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or unknown keys, or any
    /// [`validate`](Self::validate) failure.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field constraints, including that every route compiles.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.is_empty() {
            return Err(ConfigError::Invalid("`version` must not be empty".to_owned()));
        }
        for name in [self.static_namespace(), self.dynamic_namespace()] {
            validate_namespace(&name).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.static_namespace() == self.dynamic_namespace() {
            return Err(ConfigError::Invalid(
                "static and dynamic namespaces must differ".to_owned(),
            ));
        }
        if self.install_attempts == 0 {
            return Err(ConfigError::Invalid("`install_attempts` must be at least 1".to_owned()));
        }
        if let Some(path) = self.manifest.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::Invalid(format!(
                "manifest path {path:?} must start with '/'"
            )));
        }
        for path in [&self.server.control_path, &self.server.status_path] {
            if !path.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "server path {path:?} must start with '/'"
                )));
            }
        }
        let origin = &self.upstream.origin;
        if !(origin.starts_with("http://") || origin.starts_with("https://")) {
            return Err(ConfigError::Invalid(format!(
                "upstream origin {:?} must be an http:// or https:// URL",
                self.upstream.origin
            )));
        }
        self.route_table().map(drop)
    }

    pub fn static_namespace(&self) -> String {
        format!("{}-{}", self.static_prefix, self.version)
    }

    pub fn dynamic_namespace(&self) -> String {
        format!("{}-{}", self.dynamic_prefix, self.version)
    }

    /// Compiles `routes` (or the built-in rules) with `default_strategy`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Route`] / [`ConfigError::RouteShape`] for the first bad rule.
    pub fn route_table(&self) -> Result<RouteTable, ConfigError> {
        let mut table = RouteTable::new(self.default_strategy);
        match &self.routes {
            Some(routes) => {
                for (index, route) in routes.iter().enumerate() {
                    table.push(route.compile(index)?);
                }
            }
            None => {
                for rule in RouteTable::builtin().rules() {
                    table.push(rule.clone());
                }
            }
        }
        Ok(table)
    }

    pub fn worker_settings(&self) -> WorkerSettings {
        WorkerSettings {
            origin: self.upstream.origin.trim_end_matches('/').to_owned(),
            static_namespace: self.static_namespace(),
            dynamic_namespace: self.dynamic_namespace(),
            manifest: self.manifest.clone(),
            skip_waiting: self.skip_waiting,
        }
    }
}
