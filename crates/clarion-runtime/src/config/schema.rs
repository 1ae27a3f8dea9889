//! Configuration schema definitions.
//!
//! # Example (TOML)
//!
//! ```toml
//! services = [
//!     "ntfys://alerts?priority=high&tag=ops",
//!     { url = "json://hooks.internal/notify", tags = ["ops", "audit"] },
//!     { url = "push://8b799edf-6f98-4d3a-9be7-2862fb4e5752", enabled = false },
//! ]
//!
//! [logging]
//! level = "debug"
//! format = "pretty"
//!
//! [dispatch]
//! max_concurrency = 8
//! rate_limit_wait_ms = 2000
//! deadline_ms = 30000
//! overflow = "truncate"
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clarion_core::framework::DEFAULT_MAX_CONCURRENCY;
use clarion_core::{DispatchOptions, OverflowMode, ServiceSource};
use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarionConfig {
    pub logging: LoggingConfig,
    pub dispatch: DispatchConfig,
    /// Configured services, in the order they are added.
    pub services: Vec<ServiceConfig>,
}

impl ClarionConfig {
    /// The enabled services as store sources.
    pub fn service_sources(&self) -> Vec<ServiceSource> {
        self.services
            .iter()
            .filter(|service| service.enabled())
            .map(ServiceConfig::to_source)
            .collect()
    }
}

// =============================================================================
// Services
// =============================================================================

/// One configured service: either a bare URL or a table with extra tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServiceConfig {
    Url(String),
    Detailed {
        url: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

fn default_true() -> bool {
    true
}

impl ServiceConfig {
    pub fn url(&self) -> &str {
        match self {
            Self::Url(url) | Self::Detailed { url, .. } => url,
        }
    }

    /// Sidecar tags, merged with the URL's inline `tag=` option.
    pub fn tags(&self) -> &[String] {
        match self {
            Self::Url(_) => &[],
            Self::Detailed { tags, .. } => tags,
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Self::Url(_) => true,
            Self::Detailed { enabled, .. } => *enabled,
        }
    }

    pub fn to_source(&self) -> ServiceSource {
        ServiceSource::new(self.url()).with_tags(self.tags().iter().cloned())
    }
}

impl From<&str> for ServiceConfig {
    fn from(url: &str) -> Self {
        Self::Url(url.to_owned())
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatcher tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum number of services sending at once.
    pub max_concurrency: usize,
    /// How long a service may wait for a rate limit token, in milliseconds.
    pub rate_limit_wait_ms: u64,
    /// Deadline for a whole dispatch, in milliseconds.
    pub deadline_ms: Option<u64>,
    /// Handling of bodies longer than a service accepts.
    pub overflow: OverflowMode,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rate_limit_wait_ms: 0,
            deadline_ms: None,
            overflow: OverflowMode::Skip,
        }
    }
}

impl DispatchConfig {
    pub fn to_options(&self) -> DispatchOptions {
        DispatchOptions {
            max_concurrency: self.max_concurrency,
            rate_limit_wait: Duration::from_millis(self.rate_limit_wait_ms),
            deadline: self.deadline_ms.map(Duration::from_millis),
            overflow: self.overflow,
        }
    }
}

// =============================================================================
// Logging
// =============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level.
    pub level: LogLevel,
    pub format: LogFormat,
    pub output: LogOutput,
    /// Span lifecycle events to log.
    pub span_events: SpanEventConfig,
    /// Include thread ids.
    pub thread_ids: bool,
    /// Include file names and line numbers.
    pub file_location: bool,
    /// Log file, required when `output = "file"`.
    pub file_path: Option<PathBuf>,
    /// How often the log file is rotated.
    pub rotation: LogRotation,
    /// Per-module levels, e.g. `clarion_services = "trace"`.
    pub filters: BTreeMap<String, LogLevel>,
}

/// Log verbosity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Log file rotation period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    #[default]
    Never,
    Hourly,
    Daily,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpanEventConfig {
    pub new: bool,
    pub enter: bool,
    pub exit: bool,
    pub close: bool,
}
