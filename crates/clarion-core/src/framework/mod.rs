//! Framework layer - Dispatch pipeline.
//!
//! This module contains everything involved in sending one message:
//! - Tag expressions selecting which services a message reaches
//! - Token bucket rate limiting per service
//! - Retry policy and backoff
//! - The concurrent dispatcher and its report types

pub mod dispatcher;
pub mod limiter;
pub mod report;
pub mod retry;
pub mod tags;

pub use dispatcher::{DEFAULT_MAX_CONCURRENCY, DispatchOptions, Dispatcher, OverflowMode};
pub use limiter::{AcquireError, RateLimit, TokenBucket};
pub use report::{
    DispatchFailure, DispatchResult, DispatchState, DispatchSummary, Outcome, ServiceReport,
    SkipReason,
};
pub use retry::{Backoff, MAX_ATTEMPTS_LIMIT, RetryPolicy};
pub use tags::{ALL_TAG, ALWAYS_TAG, TagExpression, TagLiteral, matches};
