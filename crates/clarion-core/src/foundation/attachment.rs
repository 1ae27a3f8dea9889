//! Attachment references and the resolver contract.
//!
//! Messages only carry [`AttachmentRef`]s. The bytes behind a reference are
//! produced on demand by an [`AttachmentResolver`], so handlers that never
//! look at attachments never pay for fetching them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::foundation::error::AttachmentError;

/// An opaque reference to an attachment: a path, a `file://` or
/// `http(s)://` URL, or any key a resolver understands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentRef(String);

impl AttachmentRef {
    /// Creates a new reference.
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// Returns the raw reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the last path component, used as a fallback file name.
    pub fn file_name(&self) -> &str {
        let trimmed = self.0.split(['?', '#']).next().unwrap_or_default();
        trimmed
            .rsplit(['/', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or("attachment")
    }
}

impl fmt::Display for AttachmentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AttachmentRef {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AttachmentRef {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A resolved attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// File name presented to the remote service.
    pub name: String,
    /// MIME type of the content.
    pub mime_type: String,
    /// The raw bytes.
    pub content: Bytes,
}

impl Attachment {
    /// Creates a new attachment.
    pub fn new(
        name: impl Into<String>,
        mime_type: impl Into<String>,
        content: impl Into<Bytes>,
    ) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            content: content.into(),
        }
    }

    /// Size of the content in bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Returns `true` if the content is empty.
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Turns attachment references into bytes.
#[async_trait]
pub trait AttachmentResolver: Send + Sync {
    /// Resolves a single reference.
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment, AttachmentError>;
}

// =============================================================================
// Built-in resolvers
// =============================================================================

/// Resolver backed by an in-memory map. Useful for tests and for callers
/// that already hold the bytes.
#[derive(Debug, Default, Clone)]
pub struct MemoryAttachmentResolver {
    entries: HashMap<AttachmentRef, Attachment>,
}

impl MemoryAttachmentResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `attachment` under `reference`.
    pub fn insert(&mut self, reference: impl Into<AttachmentRef>, attachment: Attachment) {
        self.entries.insert(reference.into(), attachment);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, reference: impl Into<AttachmentRef>, attachment: Attachment) -> Self {
        self.insert(reference, attachment);
        self
    }
}

#[async_trait]
impl AttachmentResolver for MemoryAttachmentResolver {
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment, AttachmentError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| AttachmentError::NotFound(reference.to_string()))
    }
}

/// Memoizes another resolver so each reference is fetched at most once.
///
/// The dispatcher wraps the caller's resolver in one of these per dispatch,
/// so N handlers sending the same attachment trigger one fetch. Concurrent
/// lookups of one reference wait on the same fetch. Failures are cached too.
pub struct CachingResolver {
    inner: Arc<dyn AttachmentResolver>,
    cache: Mutex<HashMap<AttachmentRef, Arc<OnceCell<Result<Attachment, AttachmentError>>>>>,
}

impl CachingResolver {
    /// Wraps `inner`.
    pub fn new(inner: Arc<dyn AttachmentResolver>) -> Self {
        Self {
            inner,
            cache: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl AttachmentResolver for CachingResolver {
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment, AttachmentError> {
        let cell = Arc::clone(self.cache.lock().entry(reference.clone()).or_default());
        cell.get_or_init(|| self.inner.resolve(reference))
            .await
            .clone()
    }
}

impl fmt::Debug for CachingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachingResolver")
            .field("cached", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
        delay: Option<std::time::Duration>,
    }

    #[async_trait]
    impl AttachmentResolver for CountingResolver {
        async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment, AttachmentError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Attachment::new(
                reference.file_name(),
                "text/plain",
                Bytes::from_static(b"hi"),
            ))
        }
    }

    #[test]
    fn test_file_name() {
        assert_eq!(AttachmentRef::new("/tmp/report.pdf").file_name(), "report.pdf");
        assert_eq!(
            AttachmentRef::new("https://x.io/a/b.png?sig=1").file_name(),
            "b.png"
        );
        assert_eq!(AttachmentRef::new("").file_name(), "attachment");
    }

    #[tokio::test]
    async fn test_memory_resolver() {
        let resolver = MemoryAttachmentResolver::new().with(
            "k",
            Attachment::new("k.txt", "text/plain", Bytes::from_static(b"x")),
        );
        assert_eq!(resolver.resolve(&"k".into()).await.unwrap().len(), 1);
        assert!(matches!(
            resolver.resolve(&"missing".into()).await,
            Err(AttachmentError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_caching_resolver_fetches_once() {
        let inner = Arc::new(CountingResolver::default());
        let cache = CachingResolver::new(inner.clone());
        let reference = AttachmentRef::new("/tmp/a.txt");

        for _ in 0..3 {
            assert_eq!(cache.resolve(&reference).await.unwrap().name, "a.txt");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let inner = Arc::new(CountingResolver {
            delay: Some(std::time::Duration::from_millis(50)),
            ..Default::default()
        });
        let cache = Arc::new(CachingResolver::new(inner.clone()));

        let lookups = (0..5).map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.resolve(&AttachmentRef::new("/tmp/a.txt")).await })
        });
        for result in futures::future::join_all(lookups).await {
            assert_eq!(result.unwrap().unwrap().name, "a.txt");
        }
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }
}
