//! Dispatcher Configuration Module
//!
//! Provides configuration loading and validation for the dispatcher service.
//! Values come from an optional TOML file, overridden by `DISPATCH__`-prefixed
//! environment variables (`DISPATCH__SHIELD__CAPACITY=200`). Every field has a
//! default so an empty file is a valid configuration.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Default location searched when no explicit path is given
pub const DEFAULT_CONFIG_PATH: &str = "config/dispatcher.toml";

/// Upper bound on event lanes; each lane is a dedicated task
pub const MAX_EVENT_LANES: usize = 256;

/// Configuration validation failure
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid configuration: {field}: {reason}")]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Main dispatcher configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DispatchConfig {
    pub server: ServerSettings,
    pub dispatch: DispatchSettings,
    pub shield: ShieldSettings,
    pub supervisor: SupervisorSettings,
    pub resilience: ResilienceSettings,
    pub engine: EngineSettings,
    pub logging: LoggingSettings,
}

/// Unix socket listener settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    pub socket_path: PathBuf,
    /// Largest request frame accepted from the edge
    pub max_frame_bytes: usize,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    /// Grace period for in-flight connections on shutdown
    pub drain_timeout_ms: u64,
}

/// Admission, timeout and retry defaults
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct DispatchSettings {
    pub default_timeout_ms: u64,
    pub default_retry_max: u32,
    /// Global in-flight request limit
    pub admission_max: usize,
    /// Event multiplexer lanes; 0 submits directly from the connection task
    pub event_lanes: usize,
}

/// Per-client token bucket settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShieldSettings {
    pub capacity: u32,
    pub refill_per_sec: u32,
    /// Buckets untouched for this long are evicted
    pub idle_eviction_secs: u64,
    /// Header set by a trusted proxy in front of the edge (e.g.
    /// `X-Forwarded-For`). Its rightmost hop keys the shield; when unset the
    /// peer credential of the connection is the key.
    pub identity_header: Option<String>,
}

/// Spawn-failure intensity guard
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct SupervisorSettings {
    pub max_spawn_failures: u32,
    pub window_ms: u64,
}

/// Sliding-window quarantine guard
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Gate submissions on the guard's quarantine state
    pub enabled: bool,
    pub window_secs: u64,
    pub failure_threshold: u32,
    pub timeout_threshold: u32,
    pub quarantine_secs: u64,
}

/// Processing engine endpoint
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// One backend worker is registered per socket; calls rotate across them
    pub socket_paths: Vec<PathBuf>,
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
    pub json: bool,
    /// Interval of the metrics snapshot log line; 0 disables it
    pub stats_interval_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/run/dispatch/dispatcher.sock"),
            // Edge limits: 2MB headers + 64MB body, plus framing slack
            max_frame_bytes: (2 + 64) * 1024 * 1024 + 4096,
            read_timeout_ms: 10_000,
            write_timeout_ms: 30_000,
            drain_timeout_ms: 20_000,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
            default_retry_max: 2,
            admission_max: 1024,
            event_lanes: 4,
        }
    }
}

impl Default for ShieldSettings {
    fn default() -> Self {
        Self {
            capacity: 100,
            refill_per_sec: 50,
            idle_eviction_secs: 300,
            identity_header: None,
        }
    }
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            max_spawn_failures: 100,
            window_ms: 5_000,
        }
    }
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: 10,
            failure_threshold: 5,
            timeout_threshold: 3,
            quarantine_secs: 30,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            socket_paths: vec![PathBuf::from("/run/dispatch/core.sock")],
            connect_timeout_ms: 1_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            stats_interval_secs: 30,
        }
    }
}

impl ServerSettings {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl SupervisorSettings {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl ResilienceSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    pub fn quarantine(&self) -> Duration {
        Duration::from_secs(self.quarantine_secs)
    }
}

impl EngineSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl DispatchConfig {
    /// Load configuration from a file with environment overrides.
    ///
    /// An explicit path must exist; without one, [`DEFAULT_CONFIG_PATH`] is
    /// used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => {
                info!("Loading dispatcher config: {:?}", path);
                builder.add_source(File::from(path).required(true))
            }
            None => {
                debug!("No config path given, trying {}", DEFAULT_CONFIG_PATH);
                builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false))
            }
        };

        // Override with environment variables (DISPATCH__ prefix)
        builder = builder.add_source(
            Environment::with_prefix("DISPATCH")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut settings: DispatchConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        settings.expand_env_vars()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Expand environment variables in socket paths (`${XDG_RUNTIME_DIR}/d.sock`)
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let paths = std::iter::once(&mut self.server.socket_path)
            .chain(self.engine.socket_paths.iter_mut());
        for path in paths {
            let raw = path.to_string_lossy().into_owned();
            let expanded = shellexpand::env(&raw).context("Failed to expand socket path")?;
            *path = PathBuf::from(expanded.as_ref());
        }
        Ok(())
    }

    /// Reject values the dispatch core cannot operate with
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.server.socket_path.as_os_str().is_empty() {
            return Err(ConfigError::new("server.socket_path", "must not be empty"));
        }
        if self.server.max_frame_bytes < codec_min_frame() {
            return Err(ConfigError::new(
                "server.max_frame_bytes",
                format!("must be at least {} bytes", codec_min_frame()),
            ));
        }
        if self.server.max_frame_bytes > MAX_FRAME_LIMIT {
            return Err(ConfigError::new(
                "server.max_frame_bytes",
                format!("must not exceed {} bytes", MAX_FRAME_LIMIT),
            ));
        }
        if self.server.read_timeout_ms == 0 {
            return Err(ConfigError::new("server.read_timeout_ms", "must be positive"));
        }
        if self.server.write_timeout_ms == 0 {
            return Err(ConfigError::new("server.write_timeout_ms", "must be positive"));
        }
        if self.dispatch.default_timeout_ms == 0 {
            return Err(ConfigError::new(
                "dispatch.default_timeout_ms",
                "must be positive",
            ));
        }
        if self.dispatch.admission_max == 0 {
            return Err(ConfigError::new("dispatch.admission_max", "must be positive"));
        }
        if self.dispatch.event_lanes > MAX_EVENT_LANES {
            return Err(ConfigError::new(
                "dispatch.event_lanes",
                format!("must not exceed {}", MAX_EVENT_LANES),
            ));
        }
        if self.shield.capacity == 0 {
            return Err(ConfigError::new("shield.capacity", "must be positive"));
        }
        if self.shield.refill_per_sec == 0 {
            return Err(ConfigError::new("shield.refill_per_sec", "must be positive"));
        }
        if let Some(header) = &self.shield.identity_header {
            if header.trim().is_empty() {
                return Err(ConfigError::new(
                    "shield.identity_header",
                    "must name a header when set",
                ));
            }
        }
        if self.supervisor.max_spawn_failures == 0 || self.supervisor.window_ms == 0 {
            return Err(ConfigError::new(
                "supervisor",
                "max_spawn_failures and window_ms must be positive",
            ));
        }
        if self.resilience.window_secs == 0
            || self.resilience.failure_threshold == 0
            || self.resilience.timeout_threshold == 0
        {
            return Err(ConfigError::new(
                "resilience",
                "window and thresholds must be positive",
            ));
        }
        if self.engine.socket_paths.is_empty() {
            return Err(ConfigError::new("engine.socket_paths", "at least one backend required"));
        }
        if self.engine.socket_paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::new("engine.socket_paths", "entries must not be empty"));
        }
        Ok(())
    }
}

/// Smallest request frame: four empty length prefixes plus the fixed tail
/// Frame fields carry `u32` length prefixes
const MAX_FRAME_LIMIT: usize = u32::MAX as usize;

const fn codec_min_frame() -> usize {
    4 * 4 + 8 + 8 + 4
}

/// Convenience function to load configuration
pub fn load_config(path: Option<&Path>) -> Result<DispatchConfig> {
    DispatchConfig::load(path)
}
