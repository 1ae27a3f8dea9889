//! # Clarion Core
//!
//! The dispatch engine of the Clarion notification dispatcher.
//!
//! This crate turns service URLs into live handlers and fans one message out
//! to any number of them concurrently, honoring per-service rate limits and
//! retry policies and reporting the outcome of every service.
//!
//! ## Architecture Layers
//!
//! Clarion Core is organized into three architectural layers:
//!
//! ### Foundation Layer
//!
//! Data model and error taxonomy:
//! - **Descriptors**: URL parsing and serialization ([`ServiceDescriptor`])
//! - **Messages**: What gets sent ([`NotificationMessage`])
//! - **Attachments**: Lazily resolved bytes ([`AttachmentResolver`])
//!
//! ### Framework Layer
//!
//! The dispatch pipeline:
//! - **Tag Filters**: Selecting services ([`TagExpression`])
//! - **Rate Limiting**: Per-service token buckets ([`TokenBucket`])
//! - **Retries**: Backoff policies ([`RetryPolicy`])
//! - **Dispatcher**: Concurrent fan-out ([`Dispatcher`], [`DispatchResult`])
//!
//! ### Integration Layer
//!
//! Plugin seams:
//! - **Handler Contract**: What a service implements ([`Service`], [`ServiceMetadata`])
//! - **Registry**: Scheme to family lookup ([`ServiceRegistry`])
//! - **Config Store**: Live handlers and their state ([`ConfigStore`])
//!
//! ## Data Flow
//!
//! ```text
//! ┌─────────┐    ┌──────────┐    ┌─────────────┐    ┌────────────┐    ┌─────────┐
//! │   URL   │───▶│  Parser  │───▶│  Registry   │───▶│   Store    │───▶│ Service │
//! └─────────┘    └──────────┘    └─────────────┘    └────────────┘    └─────────┘
//!                                                          │               ▲
//!                                                          ▼               │
//!                                                   ┌────────────┐         │
//!                                                   │ Dispatcher │─────────┘
//!                                                   └────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clarion_core::prelude::*;
//!
//! let mut builder = ServiceRegistry::builder();
//! builder.register(MY_FAMILY)?;
//!
//! let store = Arc::new(ConfigStore::new(Arc::new(builder.build())));
//! store.add("my://token@host/channel", ["ops"])?;
//!
//! let dispatcher = Dispatcher::new(store, DispatchOptions::default());
//! let result = dispatcher
//!     .notify_all(NotificationMessage::new("backup finished"), &"ops".parse()?)
//!     .await;
//! assert!(result.all_succeeded());
//! ```

// Architectural layers
pub mod foundation;
pub mod framework;
pub mod integration;

// Re-export foundation types
pub use foundation::{
    Attachment, AttachmentError, AttachmentRef, AttachmentResolver, BodyFormat, CachingResolver,
    DeliveryError, DeliveryResult, LookupError, MemoryAttachmentResolver, NotificationMessage,
    NotifyType, ParseError, ParseResult, REDACTED, RegistryError, ServiceDescriptor,
    ServiceError, ServiceResult, TagExpressionError, ValidationError,
};

// Re-export framework types
pub use framework::{
    AcquireError, Backoff, DispatchFailure, DispatchOptions, DispatchResult, DispatchState,
    DispatchSummary, Dispatcher, Outcome, OverflowMode, RateLimit, RetryPolicy, ServiceReport,
    SkipReason, TagExpression, TagLiteral, TokenBucket,
};

// Re-export integration types
pub use integration::{
    AttachmentSupport, BoxedService, ConfigStore, Constructor, DeliveryProgress, Field,
    LoadReport, OptionKind, OptionSpec, RegistryBuilder, RejectedSource, Service, ServiceEntry,
    ServiceFamily, ServiceId, ServiceMetadata, ServiceRegistry, ServiceSource, ServiceSummary,
    StoreError,
};

pub use async_trait::async_trait;

/// Prelude for common imports.
pub mod prelude {
    pub use super::async_trait;
    pub use super::foundation::*;
    pub use super::framework::{
        DispatchOptions, DispatchResult, Dispatcher, Outcome, RateLimit, RetryPolicy,
        TagExpression,
    };
    pub use super::integration::{
        BoxedService, ConfigStore, DeliveryProgress, Field, OptionSpec, RegistryBuilder, Service,
        ServiceFamily, ServiceMetadata, ServiceRegistry,
    };
}
