//! # Dispatcher Configuration
//!
//! Centralized configuration for the dispatch tier. The dispatch core only
//! ever sees values that passed [`DispatchConfig::validate`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dispatch_config::DispatchConfig;
//!
//! let config = DispatchConfig::load(None).expect("valid configuration");
//! println!("listening on {:?}", config.server.socket_path);
//! ```

pub mod service_config;

pub use service_config::{
    load_config, ConfigError, DispatchConfig, DispatchSettings, EngineSettings,
    LoggingSettings, ResilienceSettings, ServerSettings, ShieldSettings, SupervisorSettings,
    DEFAULT_CONFIG_PATH, MAX_EVENT_LANES,
};
