//! Configuration validation utilities.

use std::collections::HashSet;

use super::error::{ConfigError, ConfigResult};
use super::schema::{
    AetherConfig, LogLevel, LogOutput, LoggingConfig, PlatformConfig, ProviderConfig,
    RetryConfig,
};

/// Validates the entire configuration.
pub fn validate_config(config: &AetherConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_limits(config)?;
    validate_retry_config(&config.retry)?;
    validate_platforms(&config.platforms)?;
    validate_providers(&config.providers)?;

    if let Some(default) = &config.runtime.default_provider
        && !config.providers.iter().any(|p| &p.name == default && p.enabled)
    {
        return Err(ConfigError::UnknownDefaultProvider(default.clone()));
    }
    Ok(())
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (module, level) in &logging.filters {
        if module.trim().is_empty() {
            return Err(ConfigError::validation("Log filter module cannot be empty"));
        }
        if !LogLevel::ALL.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError::validation(format!(
                "Invalid log level for '{module}': {level}. Valid values are: {:?}",
                LogLevel::ALL
            )));
        }
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }
    Ok(())
}

fn validate_limits(config: &AetherConfig) -> ConfigResult<()> {
    if config.bus.queue_capacity == 0 {
        return Err(ConfigError::validation(
            "Bus queue capacity must be greater than 0",
        ));
    }

    let timeouts = [
        ("timeouts.plugin_hook_ms", config.timeouts.plugin_hook_ms),
        ("timeouts.provider_ms", config.timeouts.provider_ms),
        ("timeouts.platform_connect_ms", config.timeouts.platform_connect_ms),
    ];
    for (field, value) in timeouts {
        if value == 0 {
            return Err(ConfigError::validation(format!(
                "{field} must be greater than 0"
            )));
        }
    }
    Ok(())
}

fn validate_retry_config(retry: &RetryConfig) -> ConfigResult<()> {
    if retry.initial_delay_ms == 0 {
        return Err(ConfigError::validation(
            "Initial retry delay must be greater than 0",
        ));
    }

    if retry.max_delay_ms < retry.initial_delay_ms {
        return Err(ConfigError::validation(
            "Max retry delay must be greater than or equal to initial delay",
        ));
    }

    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(ConfigError::validation(
            "Backoff multiplier must be at least 1.0",
        ));
    }
    Ok(())
}

fn validate_name(name: &str, field: &str) -> ConfigResult<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::missing_field(field));
    }
    if name.contains(char::is_whitespace) {
        return Err(ConfigError::validation(format!(
            "{field} cannot contain whitespace: '{name}'"
        )));
    }
    Ok(())
}

fn validate_platforms(platforms: &[PlatformConfig]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for platform in platforms {
        validate_name(&platform.name, "platforms.name")?;
        if platform.kind.is_empty() {
            return Err(ConfigError::missing_field("platforms.type"));
        }
        if !seen.insert(platform.name.as_str()) {
            return Err(ConfigError::DuplicatePlatform(platform.name.clone()));
        }
    }
    Ok(())
}

fn validate_providers(providers: &[ProviderConfig]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for provider in providers {
        validate_name(&provider.name, "providers.name")?;
        if provider.kind.is_empty() {
            return Err(ConfigError::missing_field("providers.type"));
        }
        if !seen.insert(provider.name.as_str()) {
            return Err(ConfigError::DuplicateProvider(provider.name.clone()));
        }
        if let Some(model) = &provider.default_model
            && !provider.models.is_empty()
            && !provider.models.contains(model)
        {
            return Err(ConfigError::validation(format!(
                "Provider '{}' default model '{model}' is not in its model list",
                provider.name
            )));
        }
    }
    Ok(())
}
