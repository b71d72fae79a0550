//! Configuration for the Keel runtime.
//!
//! Layered loading through figment ([`ConfigLoader`]), the [`KeelConfig`]
//! schema and its validation.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, PROFILE_ENV, Profile, load_config, load_config_from_file};
pub use schema::{
    IpcConfig, KeelConfig, LogFormat, LogOutput, LoggingConfig, PluginsConfig, SpanEventConfig,
    parse_level,
};
pub use validation::validate_config;
