//! Unified error types for the Clarion dispatch engine.
//!
//! Errors fall into two groups:
//!
//! - **Configuration-time** errors ([`ParseError`], [`LookupError`],
//!   [`ValidationError`], wrapped together as [`ServiceError`]) are returned
//!   synchronously to whoever adds a service and never reach the dispatch path.
//! - **Delivery-time** errors ([`DeliveryError`], [`AttachmentError`]) are
//!   contained per handler and only ever surface inside a dispatch report.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Descriptor Errors
// =============================================================================

/// Errors produced while parsing a service URL into a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The `://` separator between scheme and remainder is missing.
    #[error("missing '://' scheme separator")]
    MissingSeparator,

    /// The scheme part is empty.
    #[error("scheme is empty")]
    EmptyScheme,

    /// The scheme contains characters outside `[a-z0-9+]`.
    #[error("invalid scheme '{0}': only lower-case letters, digits and '+' are allowed")]
    InvalidScheme(String),

    /// The port is not an integer in `1..=65535`.
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// The host part could not be split per URL grammar.
    #[error("malformed host: {0}")]
    MalformedHost(String),

    /// A percent-escape is malformed or decodes to invalid UTF-8.
    #[error("invalid percent-encoding in {component}: {reason}")]
    InvalidEncoding {
        /// The URL component being decoded.
        component: &'static str,
        /// Reason for failure.
        reason: String,
    },

    /// A reserved query option carries a value that cannot be interpreted.
    #[error("invalid value '{value}' for option '{key}'")]
    InvalidOption {
        /// The option key.
        key: String,
        /// The rejected value.
        value: String,
    },
}

/// Returned when no service family is registered for a scheme.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no service registered for scheme '{scheme}'")]
pub struct LookupError {
    /// The scheme that failed to resolve.
    pub scheme: String,
}

impl LookupError {
    /// Creates a lookup error for the given scheme.
    pub fn new(scheme: impl Into<String>) -> Self {
        Self {
            scheme: scheme.into(),
        }
    }
}

/// Returned when a descriptor does not satisfy its service family's schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid '{field}': {reason}")]
pub struct ValidationError {
    /// The offending field (`host`, `password`, an option key, ...).
    pub field: String,
    /// Reason for failure.
    pub reason: String,
}

impl ValidationError {
    /// Creates a validation error for `field`.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Creates a "required field missing" error.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}

/// Any error that can occur while turning a raw URL into a live handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    /// The URL could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The scheme is not registered.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The descriptor was rejected by the service family.
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Programming errors detected while populating a service registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two families claim the same scheme.
    #[error("scheme '{scheme}' claimed by both '{existing}' and '{incoming}'")]
    SchemeCollision {
        /// The contested scheme.
        scheme: String,
        /// Family that registered the scheme first.
        existing: &'static str,
        /// Family that attempted to register it again.
        incoming: &'static str,
    },

    /// A family declares a scheme that no descriptor could ever carry.
    #[error("family '{family}' declares invalid scheme '{scheme}'")]
    InvalidScheme {
        /// The offending family.
        family: &'static str,
        /// The rejected scheme.
        scheme: String,
    },

    /// A family declares no schemes at all.
    #[error("family '{0}' declares no schemes")]
    NoSchemes(&'static str),
}

// =============================================================================
// Delivery Errors
// =============================================================================

/// Failure reported by a handler's `notify` call.
///
/// The variant is the handler's own classification and drives the
/// dispatcher's retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Worth retrying: timeouts, connection errors, 5xx responses.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Not worth retrying: bad credentials, 4xx responses, payload rejected.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// The remote service asked us to slow down.
    #[error("rate limited by remote service: {message}")]
    RateLimited {
        /// Server-provided hint for when to try again.
        retry_after: Option<Duration>,
        /// Response details.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a transient delivery error.
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    /// Creates a permanent delivery error.
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    /// Creates a remote rate-limit signal.
    pub fn rate_limited(retry_after: Option<Duration>, msg: impl Into<String>) -> Self {
        Self::RateLimited {
            retry_after,
            message: msg.into(),
        }
    }

    /// Returns `true` if another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Permanent(_))
    }

    /// Returns the server's retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Errors raised by an attachment resolver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttachmentError {
    /// Nothing exists behind the reference.
    #[error("attachment not found: {0}")]
    NotFound(String),

    /// The reference exists but could not be read.
    #[error("attachment '{reference}' is unreadable: {reason}")]
    Unreadable {
        /// The attachment reference.
        reference: String,
        /// Reason for failure.
        reason: String,
    },
}

// =============================================================================
// Tag Expression Errors
// =============================================================================

/// Errors produced while parsing a tag filter expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagExpressionError {
    /// An operator has no operand on one of its sides.
    #[error("operator '{0}' is missing an operand")]
    MissingOperand(String),

    /// `not` was applied twice to the same literal.
    #[error("double negation of '{0}'")]
    DoubleNegation(String),

    /// The expression contains a character with no meaning.
    #[error("unexpected character '{0}'")]
    UnexpectedCharacter(char),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for descriptor parsing.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for service construction.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result type for a single delivery attempt.
pub type DeliveryResult<T> = Result<T, DeliveryError>;
