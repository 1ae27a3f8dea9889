//! Integration layer - Plugin contract and service configuration.
//!
//! This module contains the seams new service types plug into:
//! - The `Service` handler contract and per-family metadata
//! - The scheme registry resolving URLs to families
//! - The config store holding live handlers

pub mod registry;
pub mod service;
pub mod store;

pub use registry::{RegistryBuilder, ServiceRegistry};

pub use service::{
    ATTEMPTS_OPTION, AttachmentSupport, BoxedService, Constructor, DeliveryProgress, Field,
    LIMIT_OPTION, OptionKind, OptionSpec, RESERVED_OPTIONS, Service, ServiceFamily,
    ServiceMetadata,
};

pub use store::{
    ConfigStore, LoadReport, RejectedSource, ServiceEntry, ServiceId, ServiceSource,
    ServiceSummary, Snapshot, StoreError, validate_tag,
};
