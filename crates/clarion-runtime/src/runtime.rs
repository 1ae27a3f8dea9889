//! The notification facade.
//!
//! [`Clarion`] ties the pieces together: it loads configuration, sets up
//! logging, builds the registry of built-in services, fills a
//! [`ConfigStore`] and sends through a [`Dispatcher`].
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use clarion_runtime::Clarion;
//! use clarion_core::NotificationMessage;
//!
//! // Loads clarion.toml from the current directory or the user config dir
//! let clarion = Clarion::new()?;
//!
//! // Custom configuration path
//! let clarion = Clarion::builder()
//!     .config_file("config/clarion.yaml")
//!     .profile("production")
//!     .build()?;
//!
//! let result = clarion
//!     .notify(NotificationMessage::new("disk almost full"), "ops and not muted")
//!     .await?;
//! ```

use std::sync::Arc;

use clarion_core::{
    AttachmentResolver, ConfigStore, DispatchResult, Dispatcher, LoadReport, NotificationMessage,
    ServiceError, ServiceId, ServiceRegistry, ServiceSummary, StoreError, TagExpression,
    TagExpressionError,
};
use clarion_transport::DefaultAttachmentResolver;
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{ClarionConfig, ConfigLoader};
use crate::details::{FamilyDetails, describe};
use crate::error::RuntimeResult;
use crate::logging;

/// A configured notification dispatcher.
///
/// Cheap operations (`add`, `remove`, `list_services`) act on the live
/// service list. A running notification keeps the service list it started
/// with, so services may be added or removed concurrently.
pub struct Clarion {
    config: RwLock<ClarionConfig>,
    store: Arc<ConfigStore>,
    resolver: Arc<dyn AttachmentResolver>,
    dispatcher: RwLock<Dispatcher>,
}

impl Clarion {
    /// Creates an instance from the default configuration locations.
    ///
    /// Falls back to the built-in defaults if no configuration can be
    /// loaded.
    pub fn new() -> RuntimeResult<Self> {
        let config = ConfigLoader::new()
            .with_current_dir()
            .with_user_config_dir()
            .load()
            .unwrap_or_else(|e| {
                eprintln!("Warning: Failed to load config ({e}), using defaults");
                ClarionConfig::default()
            });

        Self::from_config(&config)
    }

    /// Creates a builder for custom configuration.
    pub fn builder() -> ClarionBuilder {
        ClarionBuilder::new()
    }

    /// Creates an instance from configuration, initializing logging and
    /// using the built-in services.
    ///
    /// Services whose URL is rejected are logged and left out.
    pub fn from_config(config: &ClarionConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let registry = clarion_services::builtin_registry()?;
        let resolver = Arc::new(DefaultAttachmentResolver::new()?);
        Ok(Self::assemble(config.clone(), registry, resolver))
    }

    fn assemble(
        config: ClarionConfig,
        registry: ServiceRegistry,
        resolver: Arc<dyn AttachmentResolver>,
    ) -> Self {
        let store = Arc::new(ConfigStore::new(Arc::new(registry)));
        let report = store.add_all(config.service_sources());
        log_rejections(&config, &report);

        let dispatcher = Dispatcher::new(Arc::clone(&store), config.dispatch.to_options())
            .with_resolver(Arc::clone(&resolver));

        info!(
            services = store.len(),
            families = store.registry().len(),
            max_concurrency = config.dispatch.max_concurrency,
            "Clarion initialized from configuration"
        );

        Self {
            config: RwLock::new(config),
            store,
            resolver,
            dispatcher: RwLock::new(dispatcher),
        }
    }

    /// The configuration currently in effect.
    pub fn config(&self) -> ClarionConfig {
        self.config.read().clone()
    }

    /// The underlying service store.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    // =========================================================================
    // Service Management
    // =========================================================================

    /// Adds a service URL with extra tags.
    pub fn add<I, S>(&self, url: &str, tags: I) -> Result<ServiceId, ServiceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.store.add(url, tags)
    }

    /// Removes a service.
    pub fn remove(&self, id: ServiceId) -> Result<(), StoreError> {
        self.store.remove(id)
    }

    /// Lists every service with its secrets masked.
    pub fn list_services(&self) -> Vec<ServiceSummary> {
        self.store.list()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Describes every service family this instance can send to.
    pub fn details(&self) -> Vec<FamilyDetails> {
        describe(self.store.registry())
    }

    /// Replaces the services and dispatch settings with those of `config`.
    ///
    /// Logging is not reconfigured. Notifications already running finish
    /// against the previous services.
    pub fn reload(&self, config: ClarionConfig) -> LoadReport {
        let report = self.store.reload(config.service_sources());
        log_rejections(&config, &report);

        let dispatcher = Dispatcher::new(Arc::clone(&self.store), config.dispatch.to_options())
            .with_resolver(Arc::clone(&self.resolver));
        *self.dispatcher.write() = dispatcher;
        *self.config.write() = config;
        report
    }

    // =========================================================================
    // Notification
    // =========================================================================

    /// Sends `message` to every service matching the tag expression `expr`.
    ///
    /// An empty expression selects every service. The configured deadline,
    /// if any, applies.
    pub async fn notify(
        &self,
        message: impl Into<Arc<NotificationMessage>>,
        expr: &str,
    ) -> Result<DispatchResult, TagExpressionError> {
        let expr: TagExpression = expr.parse()?;
        Ok(self.notify_with(message, &expr).await)
    }

    /// Like [`notify`](Self::notify) with a parsed expression.
    pub async fn notify_with(
        &self,
        message: impl Into<Arc<NotificationMessage>>,
        expr: &TagExpression,
    ) -> DispatchResult {
        let dispatcher = self.dispatcher();
        let result = dispatcher.notify_all(message, expr).await;
        debug!(summary = ?result.summary(), "Notification finished");
        result
    }

    /// Like [`notify`](Self::notify) with an explicit deadline.
    pub async fn notify_until(
        &self,
        message: impl Into<Arc<NotificationMessage>>,
        expr: &str,
        deadline: Instant,
    ) -> Result<DispatchResult, TagExpressionError> {
        let expr: TagExpression = expr.parse()?;
        let dispatcher = self.dispatcher();
        Ok(dispatcher.notify_all_until(message, &expr, deadline).await)
    }

    /// Lists the services `expr` would notify, without sending anything.
    pub fn dry_run(&self, expr: &str) -> Result<Vec<ServiceSummary>, TagExpressionError> {
        let expr: TagExpression = expr.parse()?;
        Ok(self.dispatcher().matching(&expr))
    }

    fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.read().clone()
    }
}

fn log_rejections(config: &ClarionConfig, report: &LoadReport) {
    let enabled: Vec<_> = config
        .services
        .iter()
        .filter(|service| service.enabled())
        .collect();
    for rejected in &report.rejected {
        let url = enabled
            .get(rejected.index)
            .map(|service| service.url())
            .unwrap_or("<unknown>");
        warn!(index = rejected.index, url = %url, error = %rejected.error, "Skipping invalid service");
    }
}

impl std::fmt::Debug for Clarion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clarion")
            .field("services", &self.store.len())
            .finish()
    }
}

// =============================================================================
// ClarionBuilder
// =============================================================================

/// Builder for creating a [`Clarion`] with custom configuration.
///
/// # Example
///
/// ```rust,ignore
/// let clarion = Clarion::builder()
///     .config_file("config/production.toml")
///     .profile("production")
///     .build()?;
///
/// // Custom services next to the built-in ones, no configuration files
/// let mut registry = ServiceRegistry::builder();
/// clarion_services::register_builtin(&mut registry)?;
/// registry.register(MY_FAMILY)?;
///
/// let clarion = Clarion::builder()
///     .config(ClarionConfig::default())
///     .registry(registry.build())
///     .build()?;
/// ```
pub struct ClarionBuilder {
    config_loader: ConfigLoader,
    config: Option<ClarionConfig>,
    registry: Option<ServiceRegistry>,
    resolver: Option<Arc<dyn AttachmentResolver>>,
    init_logging: bool,
}

impl Default for ClarionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ClarionBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            config: None,
            registry: None,
            resolver: None,
            init_logging: true,
        }
    }

    /// Sets a specific configuration file.
    pub fn config_file<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile.
    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<std::path::Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables environment variable loading.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Uses `config` as is instead of loading configuration.
    pub fn config(mut self, config: ClarionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Uses `registry` instead of the built-in services.
    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Uses `resolver` for attachments instead of the default file and HTTP
    /// resolver.
    pub fn resolver(mut self, resolver: Arc<dyn AttachmentResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Whether to install the global log subscriber (default: true).
    pub fn init_logging(mut self, enabled: bool) -> Self {
        self.init_logging = enabled;
        self
    }

    /// Builds the instance.
    pub fn build(self) -> RuntimeResult<Clarion> {
        let config = match self.config {
            Some(config) => {
                crate::config::validate_config(&config)?;
                config
            }
            None => self.config_loader.load()?,
        };

        if self.init_logging {
            logging::init_from_config(&config.logging);
        }

        let registry = match self.registry {
            Some(registry) => registry,
            None => clarion_services::builtin_registry()?,
        };
        let resolver: Arc<dyn AttachmentResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => Arc::new(DefaultAttachmentResolver::new()?),
        };

        Ok(Clarion::assemble(config, registry, resolver))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clarion_core::{MemoryAttachmentResolver, Outcome, SkipReason};
    use clarion_transport::testing::{CannedResponse, CannedServer};

    use super::*;
    use crate::config::{ConfigError, ServiceConfig};
    use crate::error::RuntimeError;

    fn clarion(services: Vec<ServiceConfig>) -> Clarion {
        Clarion::builder()
            .config(ClarionConfig {
                services,
                ..Default::default()
            })
            .resolver(Arc::new(MemoryAttachmentResolver::new()))
            .init_logging(false)
            .build()
            .unwrap()
    }

    fn tagged(url: String, tags: &[&str]) -> ServiceConfig {
        ServiceConfig::Detailed {
            url,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_notify_reaches_matching_services() {
        let ops = CannedServer::start(vec![CannedResponse::ok("")]).await;
        let dev = CannedServer::start(vec![CannedResponse::ok("")]).await;
        let clarion = clarion(vec![
            tagged(format!("json://{}/ops", ops.authority()), &["ops"]),
            tagged(format!("json://{}/dev", dev.authority()), &["dev"]),
        ]);

        let result = clarion
            .notify(NotificationMessage::new("deployed").with_title("CI"), "ops")
            .await
            .unwrap();

        assert_eq!(result.len(), 1);
        assert!(result.all_succeeded());
        assert_eq!(ops.request_count(), 1);
        assert_eq!(dev.request_count(), 0);
        assert_eq!(ops.requests()[0].json()["message"], "deployed");
    }

    #[tokio::test]
    async fn test_failures_are_reported_per_service() {
        let good = CannedServer::start(vec![CannedResponse::ok("")]).await;
        let bad = CannedServer::start(vec![CannedResponse::new(500, "boom")]).await;
        let clarion = clarion(vec![
            format!("json://{}", good.authority()).as_str().into(),
            format!("json://{}?attempts=1", bad.authority()).as_str().into(),
        ]);

        let result = clarion
            .notify(NotificationMessage::new("x"), "")
            .await
            .unwrap();

        let summary = result.summary();
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 1);
        assert!(!result.all_succeeded());
        assert_eq!(bad.request_count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_expression_is_returned() {
        let clarion = clarion(vec![]);
        assert!(matches!(
            clarion.notify(NotificationMessage::new("x"), "ops and").await,
            Err(TagExpressionError::MissingOperand(_))
        ));
        assert!(clarion.dry_run("not").is_err());
    }

    #[tokio::test]
    async fn test_past_deadline_skips_without_sending() {
        let server = CannedServer::start(vec![CannedResponse::ok("")]).await;
        let clarion = clarion(vec![format!("json://{}", server.authority()).as_str().into()]);

        let result = clarion
            .notify_until(NotificationMessage::new("late"), "", Instant::now())
            .await
            .unwrap();

        let report = result.iter().next().unwrap();
        assert_eq!(report.outcome, Outcome::Skipped(SkipReason::DeadlineExceeded));
        assert_eq!(server.request_count(), 0);
    }

    #[test]
    fn test_invalid_services_are_left_out() {
        let clarion = clarion(vec![
            "json://ok-host?tag=ops".into(),
            "gotify://unknown".into(),
            ServiceConfig::Detailed {
                url: "json://disabled".into(),
                tags: vec![],
                enabled: false,
            },
        ]);

        let services = clarion.list_services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].scheme, "json");
        assert!(services[0].tags.contains("ops"));
    }

    #[test]
    fn test_add_remove_and_dry_run() {
        let clarion = clarion(vec![]);
        let id = clarion.add("ntfys://alerts", ["ops"]).unwrap();
        clarion.add("push://8b799edf-6f98-4d3a-9be7-2862fb4e5752", ["dev"]).unwrap();

        let matched = clarion.dry_run("ops or dev").unwrap();
        assert_eq!(matched.len(), 2);
        let matched = clarion.dry_run("dev").unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].url, "push://****");

        clarion.remove(id).unwrap();
        assert_eq!(clarion.len(), 1);
        assert!(matches!(clarion.remove(id), Err(StoreError::NotFound(_))));
        assert!(matches!(
            clarion.add("ntfys://alerts", ["bad tag"]),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_reload_replaces_services_and_options() {
        let clarion = clarion(vec!["json://a".into(), "json://b".into()]);
        assert_eq!(clarion.len(), 2);

        let mut next = ClarionConfig {
            services: vec!["json://c".into()],
            ..Default::default()
        };
        next.dispatch.deadline_ms = Some(250);

        let report = clarion.reload(next);
        assert!(report.is_clean());
        assert_eq!(clarion.len(), 1);
        assert_eq!(clarion.config().dispatch.deadline_ms, Some(250));
        assert_eq!(
            clarion.dispatcher().options().deadline,
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_details_lists_builtin_families() {
        let clarion = clarion(vec![]);
        let families: Vec<&str> = clarion.details().iter().map(|d| d.family).collect();
        assert_eq!(families, ["json", "ntfy", "techulus"]);
    }

    #[test]
    fn test_builder_validates_explicit_config() {
        let mut config = ClarionConfig::default();
        config.dispatch.max_concurrency = 0;
        let result = Clarion::builder()
            .config(config)
            .init_logging(false)
            .build();
        assert!(matches!(
            result,
            Err(RuntimeError::Config(ConfigError::ValidationError { .. }))
        ));
    }
}
