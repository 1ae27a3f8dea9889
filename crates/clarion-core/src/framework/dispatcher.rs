//! Concurrent fan-out of one message to every matched service.
//!
//! The [`Dispatcher`] takes a snapshot of the [`ConfigStore`], filters it with
//! a [`TagExpression`] and runs one independent unit per matched service:
//!
//! ```text
//! Pending ──▶ RateLimitWait ──▶ Sending ──▶ Success
//!    │             │              │  ▲
//!    ▼             ▼              ▼  │
//! Skipped       Skipped        Retrying ──▶ Failed / RateLimited
//! ```
//!
//! Units never share locks across a suspension point, so one slow or broken
//! service cannot stall the others. A semaphore bounds how many units are
//! sending at once; rate limit waits and retry backoff happen without a slot.
//!
//! ```rust,ignore
//! let dispatcher = Dispatcher::new(store, DispatchOptions::default());
//! let result = dispatcher
//!     .notify_all(NotificationMessage::new("deploy finished"), &"ops".parse()?)
//!     .await;
//! for report in &result {
//!     println!("{} -> {}", report.url, report.outcome);
//! }
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::foundation::attachment::{AttachmentResolver, CachingResolver, MemoryAttachmentResolver};
use crate::foundation::error::{DeliveryError, ParseError};
use crate::foundation::message::{NotificationMessage, truncate_chars};
use crate::framework::limiter::AcquireError;
use crate::framework::report::{
    DispatchFailure, DispatchResult, DispatchState, Outcome, ServiceReport, SkipReason,
};
use crate::framework::tags::TagExpression;
use crate::integration::service::DeliveryProgress;
use crate::integration::store::{ConfigStore, ServiceEntry, ServiceSummary};

/// Default bound on concurrently sending services.
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;

/// What to do with a body longer than the service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowMode {
    /// Skip the service.
    #[default]
    Skip,
    /// Cut the body to the maximum length.
    Truncate,
}

impl FromStr for OverflowMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "truncate" => Ok(Self::Truncate),
            _ => Err(ParseError::InvalidOption {
                key: "overflow".into(),
                value: s.to_owned(),
            }),
        }
    }
}

/// Tuning knobs for a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOptions {
    /// Maximum number of services sending at the same time.
    pub max_concurrency: usize,
    /// How long a unit may wait for a rate limit token.
    pub rate_limit_wait: Duration,
    /// Deadline applied by [`Dispatcher::notify_all`], relative to the call.
    pub deadline: Option<Duration>,
    pub overflow: OverflowMode,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            rate_limit_wait: Duration::ZERO,
            deadline: None,
            overflow: OverflowMode::Skip,
        }
    }
}

impl DispatchOptions {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    pub fn with_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.rate_limit_wait = wait;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowMode) -> Self {
        self.overflow = overflow;
        self
    }
}

/// Fans notifications out to the services of a [`ConfigStore`].
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<ConfigStore>,
    options: DispatchOptions,
    resolver: Arc<dyn AttachmentResolver>,
}

impl Dispatcher {
    /// Creates a dispatcher. Until [`with_resolver`](Self::with_resolver) is
    /// called, every attachment reference fails to resolve.
    pub fn new(store: Arc<ConfigStore>, options: DispatchOptions) -> Self {
        Self {
            store,
            options,
            resolver: Arc::new(MemoryAttachmentResolver::new()),
        }
    }

    /// Sets the attachment resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn AttachmentResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Lists the services `expr` selects without sending anything.
    pub fn matching(&self, expr: &TagExpression) -> Vec<ServiceSummary> {
        self.store
            .snapshot()
            .iter()
            .filter(|entry| expr.matches(entry.tags()))
            .map(|entry| entry.summary())
            .collect()
    }

    /// Sends `message` to every service matching `expr`, applying the
    /// configured deadline if any.
    pub async fn notify_all(
        &self,
        message: impl Into<Arc<NotificationMessage>>,
        expr: &TagExpression,
    ) -> DispatchResult {
        let deadline = self.options.deadline.map(|d| Instant::now() + d);
        self.dispatch(message.into(), expr, deadline).await
    }

    /// Like [`notify_all`](Self::notify_all) with an explicit deadline.
    pub async fn notify_all_until(
        &self,
        message: impl Into<Arc<NotificationMessage>>,
        expr: &TagExpression,
        deadline: Instant,
    ) -> DispatchResult {
        self.dispatch(message.into(), expr, Some(deadline)).await
    }

    async fn dispatch(
        &self,
        message: Arc<NotificationMessage>,
        expr: &TagExpression,
        deadline: Option<Instant>,
    ) -> DispatchResult {
        let snapshot = self.store.snapshot();
        let matched: Vec<Arc<ServiceEntry>> = snapshot
            .iter()
            .filter(|entry| expr.matches(entry.tags()))
            .cloned()
            .collect();

        if matched.is_empty() {
            debug!(filter = %expr, "No services matched");
            return DispatchResult::default();
        }

        let cancel = CancellationToken::new();
        let timer = deadline.map(|deadline| {
            if Instant::now() >= deadline {
                cancel.cancel();
            }
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                cancel.cancel();
            })
        });

        let semaphore = Arc::new(Semaphore::new(self.options.max_concurrency.max(1)));
        let resolver: Arc<dyn AttachmentResolver> =
            Arc::new(CachingResolver::new(Arc::clone(&self.resolver)));

        info!(matched = matched.len(), filter = %expr, "Dispatching notification");

        let mut units = JoinSet::new();
        for entry in matched {
            let unit = DispatchUnit {
                entry,
                message: Arc::clone(&message),
                resolver: Arc::clone(&resolver),
                semaphore: Arc::clone(&semaphore),
                cancel: cancel.clone(),
                options: self.options.clone(),
            };
            units.spawn(unit.run());
        }

        let mut reports = BTreeMap::new();
        while let Some(joined) = units.join_next().await {
            match joined {
                Ok(report) => {
                    reports.insert(report.id, report);
                }
                Err(e) => error!(error = %e, "Dispatch unit did not complete"),
            }
        }

        if let Some(timer) = timer {
            timer.abort();
        }

        let result = DispatchResult::new(reports);
        let summary = result.summary();
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            rate_limited = summary.rate_limited,
            skipped = summary.skipped,
            "Dispatch complete"
        );
        result
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("services", &self.store.len())
            .field("options", &self.options)
            .finish()
    }
}

// =============================================================================
// Dispatch unit
// =============================================================================

struct DispatchUnit {
    entry: Arc<ServiceEntry>,
    message: Arc<NotificationMessage>,
    resolver: Arc<dyn AttachmentResolver>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    options: DispatchOptions,
}

impl DispatchUnit {
    async fn run(self) -> ServiceReport {
        let started = Instant::now();
        let id = self.entry.id();
        let span = info_span!("dispatch_unit", service = %id, scheme = self.entry.scheme());

        let (outcome, attempts) = AssertUnwindSafe(self.drive().instrument(span))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                (
                    Outcome::Failed(DispatchFailure::Panicked(panic_message(panic.as_ref()))),
                    0,
                )
            });

        match &outcome {
            Outcome::Success => debug!(service = %id, attempts, "Delivered"),
            Outcome::Skipped(reason) => debug!(service = %id, %reason, "Skipped"),
            other => warn!(service = %id, attempts, outcome = %other, "Delivery failed"),
        }

        ServiceReport {
            id,
            scheme: self.entry.scheme().to_owned(),
            url: self.entry.service().url(true),
            outcome,
            attempts,
            elapsed: started.elapsed(),
        }
    }

    async fn drive(&self) -> (Outcome, u32) {
        trace!(state = %DispatchState::Pending);
        if self.cancel.is_cancelled() {
            return skipped(SkipReason::DeadlineExceeded);
        }

        let message = match self.prepare().await {
            Ok(message) => message,
            Err(outcome) => return (outcome, 0),
        };

        if let Some(bucket) = self.entry.bucket() {
            trace!(state = %DispatchState::RateLimitWait);
            match bucket.acquire(self.options.rate_limit_wait, &self.cancel).await {
                Ok(()) => {}
                Err(AcquireError::TimedOut) => return skipped(SkipReason::RateLimited),
                Err(AcquireError::Cancelled) => return skipped(SkipReason::DeadlineExceeded),
            }
        }

        let policy = *self.entry.retry();
        let service = self.entry.service();
        let mut last_error: Option<DeliveryError> = None;
        let mut attempt = 0u32;
        let progress = DeliveryProgress::new();

        loop {
            let Some(permit) = self.acquire_slot().await else {
                return match last_error {
                    Some(error) => (exhausted(error), attempt),
                    None => skipped(SkipReason::DeadlineExceeded),
                };
            };

            attempt += 1;
            trace!(state = %DispatchState::Sending, attempt);
            let result = AssertUnwindSafe(service.notify_with_progress(
                &message,
                self.resolver.as_ref(),
                &progress,
            ))
            .catch_unwind()
            .await;
            drop(permit);

            let error = match result {
                Ok(Ok(())) => {
                    trace!(state = %DispatchState::Success, attempt);
                    return (Outcome::Success, attempt);
                }
                Ok(Err(error)) => error,
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    error!(attempt, panic = %message, "Service handler panicked");
                    return (
                        Outcome::Failed(DispatchFailure::Panicked(message)),
                        attempt,
                    );
                }
            };

            if !error.is_retryable() {
                trace!(state = %DispatchState::Failed, attempt, error = %error);
                return (Outcome::Failed(error.into()), attempt);
            }
            if attempt >= policy.attempts() || self.cancel.is_cancelled() {
                return (exhausted(error), attempt);
            }

            let delay = policy.delay_with_hint(attempt, error.retry_after());
            debug!(
                attempt,
                max_attempts = policy.attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying after failure"
            );
            trace!(state = %DispatchState::Retrying, attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => return (exhausted(error), attempt),
                _ = tokio::time::sleep(delay) => {}
            }
            last_error = Some(error);
        }
    }

    /// Waits for a sending slot; `None` if the deadline passes first.
    async fn acquire_slot(&self) -> Option<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok(),
        }
    }

    /// Checks the message against the service's capabilities, adapting it
    /// where the service allows (title folding, truncation).
    async fn prepare(&self) -> Result<Arc<NotificationMessage>, Outcome> {
        let metadata = self.entry.metadata();
        let original = &self.message;

        if !metadata.supports_format(original.format) {
            return Err(unsupported(format!("{} body", original.format)));
        }

        let mut message: Cow<'_, NotificationMessage> = Cow::Borrowed(original.as_ref());

        if let (Some(limit), Some(title)) = (metadata.title_max_len, original.title.as_deref()) {
            if limit == 0 {
                let folded = format!("{title}\r\n{}", original.body);
                let owned = message.to_mut();
                owned.title = None;
                owned.body = folded;
            } else if title.chars().count() > limit {
                let truncated = truncate_chars(title, limit).to_owned();
                message.to_mut().title = Some(truncated);
            }
        }

        let body_len = message.body.chars().count();
        if body_len < metadata.body_min_len {
            return Err(unsupported(format!(
                "body shorter than {} characters",
                metadata.body_min_len
            )));
        }
        if let Some(max) = metadata.body_max_len.filter(|&max| body_len > max) {
            match self.options.overflow {
                OverflowMode::Skip => {
                    return Err(unsupported(format!("body longer than {max} characters")));
                }
                OverflowMode::Truncate => {
                    let truncated = truncate_chars(&message.body, max).to_owned();
                    message.to_mut().body = truncated;
                }
            }
        }

        if !original.attachments.is_empty() {
            let support = metadata.attachments;
            if !support.is_supported() {
                return Err(unsupported("attachments".to_owned()));
            }
            if original.attachments.len() > support.max_count {
                return Err(unsupported(format!(
                    "more than {} attachments",
                    support.max_count
                )));
            }
            for reference in &original.attachments {
                let attachment = self
                    .resolver
                    .resolve(reference)
                    .await
                    .map_err(|e| Outcome::Failed(e.into()))?;
                if let Some(max_size) = support.max_size {
                    if attachment.len() as u64 > max_size {
                        return Err(unsupported(format!(
                            "attachment '{}' larger than {max_size} bytes",
                            attachment.name
                        )));
                    }
                }
            }
        }

        Ok(match message {
            Cow::Borrowed(_) => Arc::clone(original),
            Cow::Owned(adapted) => Arc::new(adapted),
        })
    }
}

fn skipped(reason: SkipReason) -> (Outcome, u32) {
    trace!(state = %DispatchState::Skipped, %reason);
    (Outcome::Skipped(reason), 0)
}

fn unsupported(detail: String) -> Outcome {
    Outcome::Skipped(SkipReason::Unsupported(detail))
}

fn exhausted(error: DeliveryError) -> Outcome {
    match error {
        DeliveryError::RateLimited { .. } => Outcome::RateLimited(error),
        other => Outcome::Failed(other.into()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
