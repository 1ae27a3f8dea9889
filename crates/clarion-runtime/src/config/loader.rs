//! Configuration loader using figment.
//!
//! This module provides a flexible configuration loading system that supports:
//!
//! - **Multiple sources**: TOML/YAML files, environment variables, programmatic defaults
//! - **Layered configuration**: Later sources override earlier ones
//! - **Profile support**: Development vs production configurations
//!
//! # Feature Flags
//!
//! - `toml-config` *(default in `clarion`)*: enables TOML configuration files (`clarion.toml`, `config.toml`)
//! - `yaml-config`: enables YAML configuration files (`clarion.yaml`, `clarion.yml`, etc.)
//!
//! Both features can be enabled simultaneously; if so, both file formats are searched and loaded.
//!
//! # Configuration Priority (lowest to highest)
//!
//! 1. Built-in defaults
//! 2. Programmatic base configuration ([`ConfigLoader::merge`])
//! 3. Profile-specific config file (`clarion.{profile}.toml` / `clarion.{profile}.yaml`)
//! 4. Main config file (`clarion.toml` / `clarion.yaml`)
//! 5. Environment variables (`CLARION_*`)
//! 6. Programmatic overrides ([`ConfigLoader::set`], [`ConfigLoader::merge_provider`])
//!
//! Overrides only replace the keys they name; everything else keeps the value
//! from the lower layers.
//!
//! # Environment Variable Mapping
//!
//! Environment variables are mapped using the `CLARION_` prefix with `__` as separator:
//!
//! - `CLARION_LOGGING__LEVEL=debug` → `logging.level = "debug"`
//! - `CLARION_DISPATCH__MAX_CONCURRENCY=4` → `dispatch.max_concurrency = 4`
//!
//! Two variables are handled separately:
//!
//! - `CLARION_PROFILE` selects the profile.
//! - `CLARION_URLS` holds extra service URLs separated by whitespace or commas.
//!   They are appended after the configured services.
//!
//! # Example
//!
//! ```rust,ignore
//! use clarion_runtime::config::{ConfigLoader, ClarionConfig};
//!
//! // Simple loading from default locations
//! let config = ConfigLoader::new().load()?;
//!
//! // Load with specific profile
//! let config = ConfigLoader::new()
//!     .profile("production")
//!     .load()?;
//!
//! // Load from specific file with env overrides
//! let config = ConfigLoader::new()
//!     .file("./config/clarion.toml")
//!     .with_env()
//!     .load()?;
//! ```

use std::path::{Path, PathBuf};

use figment::{Figment, Provider};
#[cfg(any(feature = "yaml-config", feature = "toml-config"))]
use figment::providers::Format;
#[cfg(feature = "toml-config")]
use figment::providers::Toml;
#[cfg(feature = "yaml-config")]
use figment::providers::Yaml;
use figment::providers::{Env, Serialized};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use super::error::{ConfigError, ConfigResult};
use super::schema::{ClarionConfig, ServiceConfig};
use super::validation::validate_config;

/// Prefix of every environment variable read by the loader.
pub const ENV_PREFIX: &str = "CLARION_";

/// Selects the configuration profile.
pub const PROFILE_ENV: &str = "CLARION_PROFILE";

/// Extra service URLs.
pub const URLS_ENV: &str = "CLARION_URLS";

/// Prefixed variables that are not configuration keys.
const RESERVED_ENV_KEYS: &[&str] = &["PROFILE", "URLS"];

/// Configuration profile for environment-specific settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Profile {
    /// Development profile (default).
    #[default]
    Development,
    /// Production profile.
    Production,
    /// Custom profile name.
    Custom(String),
}

impl Profile {
    /// Returns the profile name as a string.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
            Self::Custom(name) => name,
        }
    }

    /// Parses a profile name, accepting the `dev` and `prod` shorthands.
    pub fn parse(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "production" | "prod" => Self::Production,
            "development" | "dev" => Self::Development,
            other => Self::Custom(other.to_string()),
        }
    }

    /// Reads `CLARION_PROFILE`, defaulting to Development.
    pub fn from_env() -> Self {
        std::env::var(PROFILE_ENV)
            .map(|p| Self::parse(&p))
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Configuration loader with figment-based multi-source support.
///
/// # Example
///
/// ```rust,ignore
/// let config = ConfigLoader::new()
///     .file("clarion.yaml")
///     .with_env()
///     .load()?;
/// ```
pub struct ConfigLoader {
    /// Base figment instance.
    figment: Figment,
    /// Keyed overrides merged after every other source.
    overrides: Figment,
    /// Configuration profile.
    profile: Profile,
    /// Search paths for configuration files.
    search_paths: Vec<PathBuf>,
    /// Whether to load environment variables.
    load_env: bool,
    /// Specific config file to load (overrides search).
    config_file: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Creates a new configuration loader with defaults.
    pub fn new() -> Self {
        Self {
            figment: Figment::new(),
            overrides: Figment::new(),
            profile: Profile::from_env(),
            search_paths: Vec::new(),
            load_env: true,
            config_file: None,
        }
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.profile = Profile::parse(profile.as_ref());
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    /// Adds current directory to search paths.
    pub fn with_current_dir(self) -> Self {
        if let Ok(cwd) = std::env::current_dir() {
            self.search_path(cwd)
        } else {
            self
        }
    }

    /// Adds user config directory to search paths.
    pub fn with_user_config_dir(self) -> Self {
        if let Some(config_dir) = dirs::config_dir() {
            self.search_path(config_dir.join("clarion"))
        } else {
            self
        }
    }

    /// Sets a specific configuration file to load.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Enables loading environment variables (default: true).
    pub fn with_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.load_env = false;
        self
    }

    /// Merges a complete configuration below the files and environment.
    ///
    /// Every field counts, so this is a base for files and `CLARION_*`
    /// variables to refine. Use [`set`](Self::set) to override single keys.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let config = ConfigLoader::new()
    ///     .merge(ClarionConfig {
    ///         services: vec!["ntfys://alerts".into()],
    ///         ..Default::default()
    ///     })
    ///     .load()?;
    /// ```
    pub fn merge(mut self, config: ClarionConfig) -> Self {
        self.figment = self.figment.merge(Serialized::defaults(config));
        self
    }

    /// Overrides one key, given as a dotted path, above every other source.
    ///
    /// ```rust,ignore
    /// let config = ConfigLoader::new()
    ///     .set("logging.level", "debug")
    ///     .set("dispatch.max_concurrency", 4)
    ///     .load()?;
    /// ```
    pub fn set<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.overrides = self.overrides.merge(Serialized::default(key, value));
        self
    }

    /// Merges a provider above every other source.
    ///
    /// Only the keys the provider emits are replaced.
    pub fn merge_provider<P: Provider>(mut self, provider: P) -> Self {
        self.overrides = self.overrides.merge(provider);
        self
    }

    /// Loads, validates and returns the configuration.
    pub fn load(self) -> ConfigResult<ClarionConfig> {
        let profile = self.profile.clone();
        let load_env = self.load_env;
        let figment = self.build_figment()?;

        let mut config: ClarionConfig = figment.extract().map_err(|e| {
            ConfigError::ParseError(format!("Failed to extract configuration: {e}"))
        })?;

        if load_env && let Ok(raw) = std::env::var(URLS_ENV) {
            let urls = split_urls(&raw);
            debug!(count = urls.len(), "Appending services from {URLS_ENV}");
            config
                .services
                .extend(urls.into_iter().map(ServiceConfig::Url));
        }

        validate_config(&config)?;

        debug!(
            profile = %profile,
            logging_level = %config.logging.level,
            services = config.services.len(),
            "Configuration loaded successfully"
        );

        Ok(config)
    }

    /// Builds the figment instance with all sources.
    fn build_figment(mut self) -> ConfigResult<Figment> {
        // Start with defaults
        let mut figment = Figment::from(Serialized::defaults(ClarionConfig::default()));

        // Merge user's pre-configured figment
        let user_figment = std::mem::take(&mut self.figment);
        figment = figment.merge(user_figment);

        // Load config files
        if let Some(path) = self.config_file.take() {
            if path.exists() {
                info!(path = %path.display(), "Loading configuration file");
                figment = Self::merge_config_file(figment, &path)?;
            } else {
                return Err(ConfigError::FileNotFound(path));
            }
        } else {
            figment = self.load_config_files(figment);
        }

        if self.load_env {
            trace!("Loading environment variables with {ENV_PREFIX} prefix");
            figment = figment.merge(
                Env::prefixed(ENV_PREFIX)
                    .filter(|key| {
                        !RESERVED_ENV_KEYS
                            .iter()
                            .any(|reserved| key.as_str().eq_ignore_ascii_case(reserved))
                    })
                    .split("__"),
            );
        }

        // Keyed overrides win over every other source
        let overrides = std::mem::take(&mut self.overrides);
        Ok(figment.merge(overrides))
    }

    /// Merges a single config file into the figment, dispatching on file extension.
    ///
    /// Only extensions enabled via feature flags are accepted.
    fn merge_config_file(figment: Figment, path: &Path) -> ConfigResult<Figment> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            #[cfg(feature = "toml-config")]
            "toml" => Ok(figment.merge(Toml::file(path))),
            #[cfg(feature = "yaml-config")]
            "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
            _ => Err(ConfigError::ParseError(format!(
                "Unsupported or disabled configuration file format: .{ext}"
            ))),
        }
    }

    /// Resolves the effective list of search paths.
    fn resolve_search_paths(&self) -> Vec<PathBuf> {
        if self.search_paths.is_empty() {
            let mut paths = Vec::new();
            if let Ok(cwd) = std::env::current_dir() {
                paths.push(cwd);
            }
            if let Some(config_dir) = dirs::config_dir() {
                paths.push(config_dir.join("clarion"));
            }
            paths
        } else {
            self.search_paths.clone()
        }
    }

    /// Common search logic for a single file format.
    ///
    /// Iterates `search_paths × base_names`, tries a profile-specific variant first, then the
    /// base file. Returns `(figment, true)` as soon as a base file is found, or
    /// `(figment, false)` if nothing was located.
    #[cfg(any(feature = "toml-config", feature = "yaml-config"))]
    fn load_format_files<F>(
        &self,
        mut figment: Figment,
        search_paths: &[PathBuf],
        base_names: &[&str],
        merge_fn: F,
    ) -> (Figment, bool)
    where
        F: Fn(Figment, &Path) -> Figment,
    {
        for search_path in search_paths {
            for base_name in base_names {
                if let Some((stem, ext)) = base_name.rsplit_once('.') {
                    // Profile-specific: e.g. clarion.production.toml
                    let profile_name = format!("{}.{}.{}", stem, self.profile.as_str(), ext);
                    let profile_path = search_path.join(&profile_name);
                    if profile_path.exists() {
                        debug!(path = %profile_path.display(), "Loading profile-specific config");
                        figment = merge_fn(figment, &profile_path);
                    }

                    let base_path = search_path.join(base_name);
                    if base_path.exists() {
                        info!(path = %base_path.display(), "Loading configuration file");
                        figment = merge_fn(figment, &base_path);
                        return (figment, true);
                    }
                }
            }
        }
        (figment, false)
    }

    /// Searches for and loads configuration files from search paths.
    ///
    /// Which file formats are attempted is controlled by the `toml-config` and `yaml-config`
    /// feature flags. Each enabled format is searched independently.
    #[allow(unused_mut)]
    fn load_config_files(&self, mut figment: Figment) -> Figment {
        let search_paths = self.resolve_search_paths();
        let mut found = false;

        #[cfg(feature = "toml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["clarion.toml", "config.toml"],
                |fig, path| fig.merge(Toml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        #[cfg(feature = "yaml-config")]
        {
            let (f, ok) = self.load_format_files(
                figment,
                &search_paths,
                &["clarion.yaml", "clarion.yml", "config.yaml", "config.yml"],
                |fig, path| fig.merge(Yaml::file(path)),
            );
            figment = f;
            found |= ok;
        }

        if !found {
            warn!(paths = ?search_paths, "No configuration file found, using defaults");
        }
        figment
    }
}

/// Splits a list of service URLs separated by whitespace or commas.
///
/// A comma only starts a new URL when the text after it carries a scheme,
/// so option values such as `tags=a,b` stay intact.
pub fn split_urls(raw: &str) -> Vec<String> {
    let mut urls = Vec::new();
    for token in raw.split_whitespace() {
        let mut current = String::new();
        for part in token.split(',').filter(|part| !part.is_empty()) {
            if current.is_empty() {
                current.push_str(part);
            } else if part.contains("://") {
                urls.push(std::mem::take(&mut current));
                current.push_str(part);
            } else {
                current.push(',');
                current.push_str(part);
            }
        }
        if !current.is_empty() {
            urls.push(current);
        }
    }
    urls
}

/// Loads configuration from the default locations.
pub fn load_config() -> ConfigResult<ClarionConfig> {
    ConfigLoader::new().load()
}

/// Loads configuration from a specific file, with environment overrides.
pub fn load_config_from_file<P: AsRef<Path>>(path: P) -> ConfigResult<ClarionConfig> {
    ConfigLoader::new().file(path).load()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;
    use crate::config::{DispatchConfig, LogLevel, LoggingConfig};

    #[test]
    fn test_default_config() {
        Jail::expect_with(|jail| {
            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level.as_str(), "info");
            assert!(config.services.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_profile_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env(PROFILE_ENV, "prod");
            assert_eq!(Profile::from_env(), Profile::Production);
            jail.set_env(PROFILE_ENV, "Staging");
            assert_eq!(Profile::from_env(), Profile::Custom("staging".into()));
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_and_urls() {
        Jail::expect_with(|jail| {
            jail.set_env("CLARION_LOGGING__LEVEL", "debug");
            jail.set_env("CLARION_DISPATCH__MAX_CONCURRENCY", "4");
            jail.set_env(URLS_ENV, "json://a, ntfys://b?tags=x,y\njson://c");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.dispatch.max_concurrency, 4);
            let urls: Vec<&str> = config.services.iter().map(ServiceConfig::url).collect();
            assert_eq!(urls, ["json://a", "ntfys://b?tags=x,y", "json://c"]);
            Ok(())
        });
    }

    #[test]
    fn test_programmatic_merge_is_validated() {
        Jail::expect_with(|jail| {
            let result = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .merge(ClarionConfig {
                    services: vec!["".into()],
                    ..Default::default()
                })
                .load();
            assert!(matches!(result, Err(ConfigError::MissingField { .. })));
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_is_reported() {
        let result = ConfigLoader::new()
            .without_env()
            .file("/nonexistent/clarion.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_profile_file_is_overridden_by_main_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "clarion.production.toml",
                r#"
                services = ["json://profile"]

                [dispatch]
                max_concurrency = 2
                rate_limit_wait_ms = 500
                "#,
            )?;
            jail.create_file(
                "clarion.toml",
                r#"
                [dispatch]
                max_concurrency = 8
                "#,
            )?;

            let config = ConfigLoader::new()
                .profile("production")
                .search_path(jail.directory())
                .without_env()
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.dispatch.max_concurrency, 8);
            assert_eq!(config.dispatch.rate_limit_wait_ms, 500);
            assert_eq!(config.services, vec![ServiceConfig::from("json://profile")]);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_overrides_keep_file_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "clarion.toml",
                r#"
                services = ["json://fromfile"]

                [dispatch]
                max_concurrency = 8
                "#,
            )?;

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .without_env()
                .set("logging.level", LogLevel::Debug)
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Debug);
            assert_eq!(config.dispatch.max_concurrency, 8);
            assert_eq!(config.services, vec![ServiceConfig::from("json://fromfile")]);
            Ok(())
        });
    }

    #[cfg(feature = "toml-config")]
    #[test]
    fn test_layer_order() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "clarion.toml",
                r#"
                [dispatch]
                max_concurrency = 8
                rate_limit_wait_ms = 250
                "#,
            )?;
            jail.set_env("CLARION_DISPATCH__RATE_LIMIT_WAIT_MS", "750");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .merge(ClarionConfig {
                    services: vec!["json://base".into()],
                    logging: LoggingConfig {
                        level: LogLevel::Warn,
                        ..Default::default()
                    },
                    dispatch: DispatchConfig {
                        max_concurrency: 2,
                        ..Default::default()
                    },
                })
                .set("dispatch.max_concurrency", 3)
                .load()
                .map_err(|e| e.to_string())?;

            // Base survives where nothing above it speaks
            assert_eq!(config.logging.level, LogLevel::Warn);
            assert_eq!(config.services, vec![ServiceConfig::from("json://base")]);
            // Env beats the file, keyed override beats everything
            assert_eq!(config.dispatch.rate_limit_wait_ms, 750);
            assert_eq!(config.dispatch.max_concurrency, 3);
            Ok(())
        });
    }

    #[test]
    fn test_merge_provider_overrides_env() {
        Jail::expect_with(|jail| {
            jail.set_env("CLARION_LOGGING__LEVEL", "trace");

            let config = ConfigLoader::new()
                .search_path(jail.directory())
                .merge_provider(Serialized::default("logging.level", "error"))
                .load()
                .map_err(|e| e.to_string())?;

            assert_eq!(config.logging.level, LogLevel::Error);
            assert_eq!(config.dispatch.max_concurrency, 16);
            Ok(())
        });
    }

    #[test]
    fn test_split_urls() {
        assert_eq!(split_urls(""), Vec::<String>::new());
        assert_eq!(
            split_urls("  json://a,,json://b  push://k "),
            ["json://a", "json://b", "push://k"]
        );
        assert_eq!(split_urls("ntfy://t?tags=a,b,c"), ["ntfy://t?tags=a,b,c"]);
    }
}
