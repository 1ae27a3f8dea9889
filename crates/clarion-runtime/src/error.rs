//! Runtime error types.

use clarion_core::{RegistryError, ServiceError, StoreError, TagExpressionError};
use clarion_transport::TransportError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The service registry could not be built.
    #[error("Failed to build service registry: {0}")]
    Registry(#[from] RegistryError),

    /// The shared HTTP client could not be built.
    #[error("Failed to initialize transport: {0}")]
    Transport(#[from] TransportError),

    /// A service URL was rejected.
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// A service id is unknown.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A tag expression could not be parsed.
    #[error(transparent)]
    TagExpression(#[from] TagExpressionError),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
