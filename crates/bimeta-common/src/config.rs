//! Configuration types for bimeta
//!
//! The root [`Config`] is read from an optional TOML file and then
//! overridden by `BIMETA_`-prefixed environment variables, using `__`
//! between section and field (`BIMETA_SERVER__REST_LISTEN=127.0.0.1:8080`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "BIMETA";

/// Root configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// gRPC and REST server configuration
    pub server: ServerConfig,
    /// Storage engine configuration
    pub engine: EngineConfig,
    /// Observability toggle
    pub observability: ObservabilityConfig,
    /// Log output configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from `path` (if any) layered under environment
    /// overrides.
    ///
    /// A path that was given explicitly must exist. Without a path only
    /// defaults and the environment are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::configuration(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            builder = builder.add_source(
                ::config::File::from(path.to_path_buf()).format(::config::FileFormat::Toml),
            );
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the service cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.server.handler_timeout_ms == 0 {
            return Err(Error::configuration("server.handler_timeout_ms must be > 0"));
        }
        if self.engine.path.as_os_str().is_empty() {
            return Err(Error::configuration("engine.path must not be empty"));
        }
        Ok(())
    }
}

/// Server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address for the gRPC API
    pub grpc_listen: SocketAddr,
    /// Address for the REST API
    pub rest_listen: SocketAddr,
    /// Per-request handler timeout for REST routes (milliseconds)
    pub handler_timeout_ms: u64,
    /// Upper bound on graceful shutdown (milliseconds)
    pub shutdown_timeout_ms: u64,
}

impl ServerConfig {
    #[must_use]
    pub const fn handler_timeout(&self) -> Duration {
        Duration::from_millis(self.handler_timeout_ms)
    }

    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            grpc_listen: SocketAddr::from(([0, 0, 0, 0], 8081)),
            rest_listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            handler_timeout_ms: 3000,
            shutdown_timeout_ms: 10_000,
        }
    }
}

/// Storage engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Database file
    pub path: PathBuf,
    /// Periodic compaction interval in seconds (0 = disabled)
    pub compaction_interval_secs: u64,
    /// What to do when the inverse half of a dual write fails
    pub dual_write_policy: DualWritePolicy,
}

impl EngineConfig {
    /// Periodic compaction interval, `None` when disabled
    #[must_use]
    pub const fn compaction_interval(&self) -> Option<Duration> {
        if self.compaction_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.compaction_interval_secs))
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(".bimeta/meta.redb"),
            compaction_interval_secs: 0,
            dual_write_policy: DualWritePolicy::default(),
        }
    }
}

/// Handling of a forward write whose inverse write failed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DualWritePolicy {
    /// Restore the forward record to its previous state
    #[default]
    Rollback,
    /// Keep the forward record and report the failure
    Admit,
}

/// Observability configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Wrap servers in request tracing layers
    pub enabled: bool,
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Log line format
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
