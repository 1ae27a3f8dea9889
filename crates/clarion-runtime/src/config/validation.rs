//! Configuration validation utilities.

use clarion_core::integration::validate_tag;

use super::error::{ConfigError, ConfigResult};
use super::schema::{ClarionConfig, DispatchConfig, LogOutput, LoggingConfig, ServiceConfig};

/// Validates the entire configuration.
///
/// Service URLs are only checked for presence here; parsing them needs the
/// service registry and happens when they are added to a store.
pub fn validate_config(config: &ClarionConfig) -> ConfigResult<()> {
    validate_logging_config(&config.logging)?;
    validate_dispatch_config(&config.dispatch)?;
    for service in &config.services {
        validate_service_config(service)?;
    }
    Ok(())
}

/// Validates logging settings.
fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    if let Some(module) = logging
        .filters
        .keys()
        .find(|module| module.trim().is_empty() || module.contains(['=', ',']))
    {
        return Err(ConfigError::validation(format!(
            "Invalid log filter target: '{module}'"
        )));
    }

    Ok(())
}

/// Validates dispatcher tuning.
fn validate_dispatch_config(dispatch: &DispatchConfig) -> ConfigResult<()> {
    if dispatch.max_concurrency == 0 {
        return Err(ConfigError::validation(
            "dispatch.max_concurrency must be greater than 0",
        ));
    }
    Ok(())
}

/// Validates a single service entry.
fn validate_service_config(service: &ServiceConfig) -> ConfigResult<()> {
    let url = service.url().trim();
    if url.is_empty() {
        return Err(ConfigError::missing_field("services.url"));
    }

    for tag in service.tags() {
        if validate_tag(tag).is_err() {
            return Err(ConfigError::InvalidTag {
                url: url.to_owned(),
                tag: tag.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::LogLevel;

    #[test]
    fn test_validate_empty_config() {
        let config = ClarionConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_zero_concurrency() {
        let mut config = ClarionConfig::default();
        config.dispatch.max_concurrency = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError { .. })
        ));
    }

    #[test]
    fn test_validate_file_output_needs_path() {
        let mut config = ClarionConfig::default();
        config.logging.output = LogOutput::File;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));

        config.logging.file_path = Some(PathBuf::from("/var/log/clarion.log"));
        assert!(validate_config(&config).is_ok());

        config.logging.filters.insert(" ".into(), LogLevel::Debug);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_service_tags() {
        let service = ServiceConfig::Detailed {
            url: "json://host".into(),
            tags: vec!["ops".into(), "two words".into()],
            enabled: true,
        };
        let config = ClarionConfig {
            services: vec![service],
            ..Default::default()
        };

        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::InvalidTag { tag, .. }) if tag == "two words"));
    }

    #[test]
    fn test_validate_blank_url() {
        let config = ClarionConfig {
            services: vec!["   ".into()],
            ..Default::default()
        };
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::MissingField { .. })
        ));
    }
}
