//! Foundation layer - data model and error taxonomy.
//!
//! This module contains the building blocks everything else is expressed in:
//! - Service descriptors parsed from URLs
//! - The notification message model
//! - Attachment references and the resolver contract
//! - Error types for configuration and delivery

pub mod attachment;
pub mod descriptor;
pub mod error;
pub mod message;

pub use attachment::{
    Attachment, AttachmentRef, AttachmentResolver, CachingResolver, MemoryAttachmentResolver,
};
pub use descriptor::{REDACTED, ServiceDescriptor};
pub use error::{
    AttachmentError, DeliveryError, DeliveryResult, LookupError, ParseError, ParseResult,
    RegistryError, ServiceError, ServiceResult, TagExpressionError, ValidationError,
};
pub use message::{BodyFormat, NotificationMessage, NotifyType};
