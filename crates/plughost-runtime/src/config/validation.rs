//! Configuration validation utilities.

use super::error::{ConfigError, ConfigResult};
use super::schema::{HostConfig, LogOutput, LoggingConfig, PlugHostConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &PlugHostConfig) -> ConfigResult<()> {
    validate_host_config(&config.host)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validates instance host settings.
fn validate_host_config(host: &HostConfig) -> ConfigResult<()> {
    if host.max_executing_instances == 0 {
        return Err(ConfigError::validation(
            "max_executing_instances must be greater than 0",
        ));
    }

    if host.task_stop_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "task_stop_timeout_ms must be greater than 0",
        ));
    }

    if host.unload_attempts == 0 {
        return Err(ConfigError::validation(
            "unload_attempts must be greater than 0",
        ));
    }

    if host.event_capacity == 0 {
        return Err(ConfigError::validation("event_capacity must be greater than 0"));
    }

    if let Some(root) = &host.assembly_root
        && root.as_os_str().is_empty()
    {
        return Err(ConfigError::validation("assembly_root cannot be empty"));
    }

    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(module) = logging.filters.keys().find(|m| m.trim().is_empty()) {
        return Err(ConfigError::validation(format!(
            "Invalid log filter module name: {module:?}"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = PlugHostConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_capacity() {
        let mut config = PlugHostConfig::default();
        config.host.max_executing_instances = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_zero_stop_timeout() {
        let mut config = PlugHostConfig::default();
        config.host.task_stop_timeout_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_file_output_requires_path() {
        let mut config = PlugHostConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some("plughost.log".into());
        assert!(validate_config(&config).is_ok());
    }
}
