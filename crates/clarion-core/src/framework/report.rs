//! Per-dispatch reporting.

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::foundation::error::{AttachmentError, DeliveryError};
use crate::integration::store::ServiceId;

/// States a dispatch unit moves through; only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    RateLimitWait,
    Sending,
    Retrying,
    Success,
    Failed,
    Skipped,
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::RateLimitWait => "rate_limit_wait",
            Self::Sending => "sending",
            Self::Retrying => "retrying",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Why a service was not attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No rate limit token arrived within the wait bound.
    RateLimited,
    /// The dispatch deadline passed before sending started.
    DeadlineExceeded,
    /// The message cannot be expressed by this service.
    Unsupported(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate-limited"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::Unsupported(detail) => write!(f, "unsupported: {detail}"),
        }
    }
}

/// Why a service failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchFailure {
    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Attachment(#[from] AttachmentError),

    #[error("handler panicked: {0}")]
    Panicked(String),
}

/// Terminal state of one service within a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed(DispatchFailure),
    /// Attempts ran out and the last failure was a remote rate-limit signal.
    RateLimited(DeliveryError),
    Skipped(SkipReason),
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }

    /// The skip reason, if skipped.
    pub fn skip_reason(&self) -> Option<&SkipReason> {
        match self {
            Self::Skipped(reason) => Some(reason),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed(error) => write!(f, "failed: {error}"),
            Self::RateLimited(error) => write!(f, "rate limited: {error}"),
            Self::Skipped(reason) => write!(f, "skipped: {reason}"),
        }
    }
}

/// What happened to one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceReport {
    pub id: ServiceId,
    pub scheme: String,
    /// The service URL with secrets masked.
    pub url: String,
    pub outcome: Outcome,
    /// Number of `notify` calls made.
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Outcome counts of a dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub skipped: usize,
}

/// The result of one dispatch, keyed by service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    reports: BTreeMap<ServiceId, ServiceReport>,
}

impl DispatchResult {
    pub(crate) fn new(reports: BTreeMap<ServiceId, ServiceReport>) -> Self {
        Self { reports }
    }

    /// `true` if at least one service matched and every one succeeded.
    pub fn all_succeeded(&self) -> bool {
        !self.reports.is_empty() && self.reports.values().all(|r| r.outcome.is_success())
    }

    pub fn get(&self, id: &ServiceId) -> Option<&ServiceReport> {
        self.reports.get(id)
    }

    pub fn iter(&self) -> btree_map::Values<'_, ServiceId, ServiceReport> {
        self.reports.values()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Counts outcomes by kind.
    pub fn summary(&self) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for report in self.reports.values() {
            match report.outcome {
                Outcome::Success => summary.succeeded += 1,
                Outcome::Failed(_) => summary.failed += 1,
                Outcome::RateLimited(_) => summary.rate_limited += 1,
                Outcome::Skipped(_) => summary.skipped += 1,
            }
        }
        summary
    }
}

impl<'a> IntoIterator for &'a DispatchResult {
    type Item = &'a ServiceReport;
    type IntoIter = btree_map::Values<'a, ServiceId, ServiceReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl IntoIterator for DispatchResult {
    type Item = ServiceReport;
    type IntoIter = btree_map::IntoValues<ServiceId, ServiceReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.reports.into_values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: Outcome) -> ServiceReport {
        ServiceReport {
            id: ServiceId::new(),
            scheme: "x".into(),
            url: "x://".into(),
            outcome,
            attempts: 1,
            elapsed: Duration::ZERO,
        }
    }

    fn result(outcomes: Vec<Outcome>) -> DispatchResult {
        DispatchResult::new(
            outcomes
                .into_iter()
                .map(report)
                .map(|r| (r.id, r))
                .collect(),
        )
    }

    #[test]
    fn test_empty_result_is_not_success() {
        assert!(!DispatchResult::default().all_succeeded());
    }

    #[test]
    fn test_summary_counts() {
        let r = result(vec![
            Outcome::Success,
            Outcome::Success,
            Outcome::Failed(DeliveryError::permanent("401").into()),
            Outcome::Skipped(SkipReason::RateLimited),
        ]);
        assert!(!r.all_succeeded());
        assert_eq!(
            r.summary(),
            DispatchSummary {
                succeeded: 2,
                failed: 1,
                rate_limited: 0,
                skipped: 1
            }
        );
        assert!(result(vec![Outcome::Success]).all_succeeded());
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(SkipReason::RateLimited.to_string(), "rate-limited");
        assert_eq!(SkipReason::DeadlineExceeded.to_string(), "deadline exceeded");
    }
}
