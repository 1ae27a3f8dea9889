//! # Clarion Transport
//!
//! Network plumbing shared by Clarion's service handlers.
//!
//! This crate provides the pieces handlers need to talk to remote services
//! without repeating client setup and failure classification in each one:
//!
//! - [`HttpTransport`]: a configured `reqwest` client honoring the
//!   descriptor's `verify` flag, whose [`send`](HttpTransport::send) turns
//!   non-success statuses into [`TransportError::Status`]
//! - [`TransportError`]: converts into [`clarion_core::DeliveryError`] so
//!   that 429 becomes a rate-limit signal, 408/5xx and connection failures
//!   become transient, and everything else is permanent
//! - [`DefaultAttachmentResolver`]: reads attachments from disk or fetches
//!   them over HTTP
//!
//! ## Features
//!
//! - `testing`: a scripted local HTTP server ([`testing::CannedServer`]) for
//!   handler tests
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐
//! │  clarion-services    │  (json, ntfy, push, ...)
//! ├──────────────────────┤
//! │  clarion-transport   │  <- This crate
//! ├──────────────────────┤
//! │  clarion-core        │  (delivery and attachment contracts)
//! └──────────────────────┘
//! ```

pub mod attachment;
pub mod error;
pub mod http;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use attachment::{DefaultAttachmentResolver, FALLBACK_MIME, mime_from_extension};
pub use error::{TransportError, TransportResult, is_retryable_reqwest_error, is_retryable_status};
pub use http::{
    Auth, DEFAULT_USER_AGENT, HttpResponse, HttpTransport, TransportOptions, parse_retry_after,
};

pub use reqwest::header::{HeaderName, HeaderValue};
pub use reqwest::{Method, StatusCode};
