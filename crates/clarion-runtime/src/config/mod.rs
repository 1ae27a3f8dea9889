//! Configuration module for the Clarion runtime.
//!
//! This module provides layered configuration loading (files, environment,
//! code) and validation for services, dispatch tuning and logging.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file, split_urls};
pub use schema::{
    ClarionConfig, DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    ServiceConfig, SpanEventConfig,
};
pub use validation::validate_config;
