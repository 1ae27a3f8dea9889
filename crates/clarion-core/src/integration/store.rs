//! The set of configured services.
//!
//! [`ConfigStore`] owns every live handler together with its tags, token
//! bucket and retry policy. Readers take a cheap snapshot (an `Arc` of the
//! current entry list); writers replace the list, so a dispatch that already
//! holds a snapshot finishes against exactly the services it started with.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::foundation::descriptor::ServiceDescriptor;
use crate::foundation::error::{ServiceError, ValidationError};
use crate::framework::limiter::TokenBucket;
use crate::framework::retry::RetryPolicy;
use crate::integration::registry::ServiceRegistry;
use crate::integration::service::{BoxedService, ServiceMetadata};

/// Characters a tag may not contain.
const TAG_FORBIDDEN: &[char] = &[',', '&', '|', '!', '(', ')'];

/// Words the expression parser reads as operators, in any case.
const TAG_KEYWORDS: &[&str] = &["and", "or", "not"];

/// Stable identifier of a configured service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceId(Uuid);

impl ServiceId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ServiceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors from store mutations that do not involve URL handling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("no service with id {0}")]
    NotFound(ServiceId),
}

/// A service URL plus tags supplied outside the URL.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceSource {
    pub url: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ServiceSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            tags: Vec::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

impl From<&str> for ServiceSource {
    fn from(url: &str) -> Self {
        Self::new(url)
    }
}

impl From<String> for ServiceSource {
    fn from(url: String) -> Self {
        Self::new(url)
    }
}

/// A live handler and its per-service dispatch state.
pub struct ServiceEntry {
    id: ServiceId,
    service: BoxedService,
    bucket: Option<TokenBucket>,
    retry: RetryPolicy,
}

impl ServiceEntry {
    fn new(id: ServiceId, service: BoxedService) -> Self {
        let metadata = service.metadata();
        let descriptor = service.descriptor();
        let bucket = metadata.rate_limit_for(descriptor).map(TokenBucket::new);
        let retry = metadata.retry_for(descriptor);
        Self {
            id,
            service,
            bucket,
            retry,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn service(&self) -> &BoxedService {
        &self.service
    }

    pub fn scheme(&self) -> &str {
        self.service.descriptor().scheme()
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        self.service.descriptor().tags()
    }

    pub fn metadata(&self) -> &'static ServiceMetadata {
        self.service.metadata()
    }

    /// The token bucket, if the service is rate limited.
    pub fn bucket(&self) -> Option<&TokenBucket> {
        self.bucket.as_ref()
    }

    pub fn retry(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Builds the listing view of this entry.
    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            id: self.id,
            scheme: self.scheme().to_owned(),
            name: self.metadata().name.to_owned(),
            tags: self.tags().clone(),
            url: self.service.url(true),
        }
    }
}

impl fmt::Debug for ServiceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceEntry")
            .field("id", &self.id)
            .field("url", &self.service.url(true))
            .field("retry", &self.retry)
            .finish()
    }
}

/// Read-only description of a configured service with secrets masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub id: ServiceId,
    pub scheme: String,
    pub name: String,
    pub tags: BTreeSet<String>,
    pub url: String,
}

/// A source that could not be turned into a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedSource {
    /// Position of the source in the input.
    pub index: usize,
    pub error: ServiceError,
}

/// Outcome of loading a batch of sources.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub added: Vec<ServiceId>,
    pub rejected: Vec<RejectedSource>,
}

impl LoadReport {
    /// Returns `true` if every source was accepted.
    pub fn is_clean(&self) -> bool {
        self.rejected.is_empty()
    }
}

/// Snapshot of the configured services.
pub type Snapshot = Arc<Vec<Arc<ServiceEntry>>>;

/// Holds every configured service.
pub struct ConfigStore {
    registry: Arc<ServiceRegistry>,
    entries: RwLock<Snapshot>,
}

impl ConfigStore {
    /// Creates an empty store resolving schemes through `registry`.
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self {
            registry,
            entries: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// The registry used to construct handlers.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Parses `raw`, merges `tags` into the inline ones, constructs the
    /// handler and adds it.
    pub fn add<I, S>(&self, raw: &str, tags: I) -> Result<ServiceId, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptor = ServiceDescriptor::parse(raw)?.with_tags(tags);
        self.add_descriptor(descriptor)
    }

    /// Constructs and adds a handler for an already parsed descriptor.
    pub fn add_descriptor(&self, descriptor: ServiceDescriptor) -> Result<ServiceId, ServiceError> {
        let entry = self.build_entry(descriptor)?;
        let id = entry.id;
        info!(service = %id, url = %entry.service.url(true), "Added service");
        Arc::make_mut(&mut *self.entries.write()).push(Arc::new(entry));
        Ok(id)
    }

    /// Adds every source, collecting failures instead of stopping at the first.
    pub fn add_all<I>(&self, sources: I) -> LoadReport
    where
        I: IntoIterator<Item = ServiceSource>,
    {
        let (entries, report) = self.build_all(sources);
        if !entries.is_empty() {
            Arc::make_mut(&mut *self.entries.write()).extend(entries);
        }
        report
    }

    /// Replaces the whole configuration with `sources`.
    ///
    /// Dispatches already running keep the previous snapshot.
    pub fn reload<I>(&self, sources: I) -> LoadReport
    where
        I: IntoIterator<Item = ServiceSource>,
    {
        let (entries, report) = self.build_all(sources);
        *self.entries.write() = Arc::new(entries);
        info!(
            added = report.added.len(),
            rejected = report.rejected.len(),
            "Reloaded service configuration"
        );
        report
    }

    /// Removes a service.
    pub fn remove(&self, id: ServiceId) -> Result<(), StoreError> {
        let mut guard = self.entries.write();
        let position = guard
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(StoreError::NotFound(id))?;
        Arc::make_mut(&mut *guard).remove(position);
        debug!(service = %id, "Removed service");
        Ok(())
    }

    /// Removes every service.
    pub fn clear(&self) {
        *self.entries.write() = Arc::new(Vec::new());
    }

    /// The current entry list. Later mutations do not affect it.
    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entries.read())
    }

    /// Looks up one entry.
    pub fn get(&self, id: ServiceId) -> Option<Arc<ServiceEntry>> {
        self.entries.read().iter().find(|entry| entry.id == id).cloned()
    }

    /// Lists every service with secrets masked, in insertion order.
    pub fn list(&self) -> Vec<ServiceSummary> {
        self.snapshot().iter().map(|entry| entry.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn build_entry(&self, descriptor: ServiceDescriptor) -> Result<ServiceEntry, ServiceError> {
        for tag in descriptor.tags() {
            validate_tag(tag)?;
        }
        let service = self.registry.construct(descriptor)?;
        Ok(ServiceEntry::new(ServiceId::new(), service))
    }

    fn build_all<I>(&self, sources: I) -> (Vec<Arc<ServiceEntry>>, LoadReport)
    where
        I: IntoIterator<Item = ServiceSource>,
    {
        let mut entries = Vec::new();
        let mut report = LoadReport::default();

        for (index, source) in sources.into_iter().enumerate() {
            let built = ServiceDescriptor::parse(&source.url)
                .map_err(ServiceError::from)
                .and_then(|descriptor| self.build_entry(descriptor.with_tags(source.tags)));
            match built {
                Ok(entry) => {
                    debug!(service = %entry.id, url = %entry.service.url(true), "Loaded service");
                    report.added.push(entry.id);
                    entries.push(Arc::new(entry));
                }
                Err(error) => {
                    warn!(index, error = %error, "Rejected service source");
                    report.rejected.push(RejectedSource { index, error });
                }
            }
        }

        (entries, report)
    }
}

impl fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigStore")
            .field("services", &self.len())
            .finish()
    }
}

/// Checks that `tag` can be addressed by a tag expression.
pub fn validate_tag(tag: &str) -> Result<(), ValidationError> {
    if tag.is_empty() {
        return Err(ValidationError::new("tag", "tags may not be empty"));
    }
    if tag.chars().any(|c| c.is_whitespace() || TAG_FORBIDDEN.contains(&c)) {
        return Err(ValidationError::new(
            "tag",
            format!("'{tag}' contains whitespace or a reserved character"),
        ));
    }
    if TAG_KEYWORDS
        .iter()
        .any(|keyword| tag.eq_ignore_ascii_case(keyword))
    {
        return Err(ValidationError::new(
            "tag",
            format!("'{tag}' is an expression operator"),
        ));
    }
    Ok(())
}
