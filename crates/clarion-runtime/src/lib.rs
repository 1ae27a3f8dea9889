//! Clarion Runtime - configuration, logging and the notification facade.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `ClarionConfig`)
//! - Logging setup from configuration (`init_from_config`)
//! - The [`Clarion`] facade, which wires the built-in services, the config
//!   store and the dispatcher together
//! - Service family introspection (`FamilyDetails`)
//!
//! ```ignore
//! use clarion_runtime::Clarion;
//! use clarion_core::NotificationMessage;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Reads clarion.toml and CLARION_URLS
//!     let clarion = Clarion::new()?;
//!
//!     let result = clarion
//!         .notify(NotificationMessage::new("backup finished"), "ops")
//!         .await?;
//!
//!     for report in &result {
//!         println!("{} -> {}", report.url, report.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod details;
pub mod error;
pub mod logging;
pub mod runtime;

// Re-exports
pub use config::{
    ClarionConfig, ConfigError, ConfigLoader, ConfigResult, DispatchConfig, LoggingConfig,
    ServiceConfig,
};
pub use details::{FamilyDetails, OptionDetails};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, init_from_config};
pub use runtime::{Clarion, ClarionBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, event, info, instrument, span, trace, warn};
}
