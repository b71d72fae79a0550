//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{IpcConfig, KeelConfig, LoggingConfig, PluginsConfig, parse_level};

/// Validates the entire configuration.
pub fn validate_config(config: &KeelConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_ipc_config(&config.ipc)?;
    validate_plugins_config(&config.plugins)?;
    Ok(())
}

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.tracing_level().is_none() {
        return Err(ConfigError::validation(format!(
            "Invalid log level: {}. Valid values are: {:?}",
            logging.level, VALID_LOG_LEVELS
        )));
    }

    for (target, level) in &logging.filters {
        if parse_level(level).is_none() {
            return Err(ConfigError::validation(format!(
                "Invalid log level for {target}: {level}"
            )));
        }
    }

    Ok(())
}

fn validate_ipc_config(ipc: &IpcConfig) -> ConfigResult<()> {
    if ipc.timeout_ms == 0 {
        return Err(ConfigError::validation("IPC timeout must be greater than 0"));
    }
    Ok(())
}

fn validate_plugins_config(plugins: &PluginsConfig) -> ConfigResult<()> {
    let manifest = plugins.manifest_file.trim();
    if manifest.is_empty() {
        return Err(ConfigError::missing_field("plugins.manifest_file"));
    }
    if manifest.contains(['/', '\\']) {
        return Err(ConfigError::validation(
            "Manifest file must be a file name, not a path",
        ));
    }

    if keel_transport::npm_registry(&plugins.registry).is_none() {
        return Err(ConfigError::UnknownRegistry(plugins.registry.clone()));
    }

    if plugins.git_branch.trim().is_empty() {
        return Err(ConfigError::missing_field("plugins.git_branch"));
    }

    if plugins.probe_window_ms == 0 {
        return Err(ConfigError::validation(
            "Mirror probe window must be greater than 0",
        ));
    }

    if plugins.probe_concurrency == 0 {
        return Err(ConfigError::validation(
            "Mirror probe concurrency must be at least 1",
        ));
    }

    if plugins.http_timeout_secs == 0 {
        return Err(ConfigError::validation("HTTP timeout must be greater than 0"));
    }

    Ok(())
}
