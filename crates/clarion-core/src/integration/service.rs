//! The handler contract every notification service implements.
//!
//! A service *family* (one wire protocol, possibly several schemes such as
//! `ntfy` and `ntfys`) is described by a static [`ServiceFamily`]: its
//! schemes, its [`ServiceMetadata`] and a constructor. Constructing a family
//! member from a [`ServiceDescriptor`] yields a [`BoxedService`], the live
//! handler the dispatcher drives.
//!
//! # Example
//!
//! ```rust,ignore
//! use clarion_core::prelude::*;
//!
//! struct Echo { descriptor: ServiceDescriptor }
//!
//! #[async_trait]
//! impl Service for Echo {
//!     fn descriptor(&self) -> &ServiceDescriptor { &self.descriptor }
//!     fn metadata(&self) -> &'static ServiceMetadata { &ECHO_METADATA }
//!     async fn notify(&self, message: &NotificationMessage, _: &dyn AttachmentResolver)
//!         -> Result<(), DeliveryError>
//!     {
//!         println!("{}", message.body);
//!         Ok(())
//!     }
//! }
//!
//! const ECHO_METADATA: ServiceMetadata = ServiceMetadata::new("Echo");
//!
//! pub static ECHO: ServiceFamily = ServiceFamily {
//!     name: "echo",
//!     schemes: &["echo"],
//!     metadata: ECHO_METADATA,
//!     construct: |descriptor| Ok(Arc::new(Echo { descriptor })),
//! };
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::foundation::attachment::AttachmentResolver;
use crate::foundation::descriptor::{ServiceDescriptor, parse_flag};
use crate::foundation::error::{DeliveryError, ValidationError};
use crate::foundation::message::{BodyFormat, NotificationMessage};
use crate::framework::limiter::RateLimit;
use crate::framework::retry::{MAX_ATTEMPTS_LIMIT, RetryPolicy};

/// Option key overriding the family's retry attempts.
pub const ATTEMPTS_OPTION: &str = "attempts";

/// Option key overriding the family's rate limit (`N/seconds`).
pub const LIMIT_OPTION: &str = "limit";

/// Option keys every family accepts.
pub const RESERVED_OPTIONS: &[&str] = &[ATTEMPTS_OPTION, LIMIT_OPTION];

// =============================================================================
// Handler contract
// =============================================================================

/// A live, configured notification endpoint.
#[async_trait]
pub trait Service: Send + Sync {
    /// The descriptor this handler was built from.
    fn descriptor(&self) -> &ServiceDescriptor;

    /// The metadata of the family this handler belongs to.
    fn metadata(&self) -> &'static ServiceMetadata;

    /// Delivers one message.
    ///
    /// Implementations classify failures themselves: transient, permanent,
    /// or a remote rate-limit signal.
    async fn notify(
        &self,
        message: &NotificationMessage,
        attachments: &dyn AttachmentResolver,
    ) -> Result<(), DeliveryError>;

    /// Delivers one message, remembering which parts already went out.
    ///
    /// The dispatcher hands the same `progress` to every attempt of one
    /// delivery. Handlers that send several requests per message (one per
    /// topic, say) override this to skip parts marked done by an earlier
    /// attempt. The default ignores `progress`.
    async fn notify_with_progress(
        &self,
        message: &NotificationMessage,
        attachments: &dyn AttachmentResolver,
        _progress: &DeliveryProgress,
    ) -> Result<(), DeliveryError> {
        self.notify(message, attachments).await
    }

    /// Renders the handler's URL, masking secrets when `privacy` is set.
    fn url(&self, privacy: bool) -> String {
        if privacy {
            self.descriptor()
                .to_redacted_url(&self.metadata().private_keys())
        } else {
            self.descriptor().to_url()
        }
    }
}

/// Parts of one message already accepted by the remote side.
///
/// Lives for every attempt of a single delivery, so retries can resume
/// instead of repeating requests that succeeded.
#[derive(Debug, Default)]
pub struct DeliveryProgress {
    done: Mutex<BTreeSet<String>>,
}

impl DeliveryProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `part` was delivered by an earlier attempt.
    pub fn is_done(&self, part: &str) -> bool {
        self.done.lock().contains(part)
    }

    /// Records `part` as delivered.
    pub fn mark_done(&self, part: impl Into<String>) {
        self.done.lock().insert(part.into());
    }

    /// Number of parts delivered so far.
    pub fn len(&self) -> usize {
        self.done.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.lock().is_empty()
    }
}

/// A shared, type-erased handler.
pub type BoxedService = Arc<dyn Service>;

/// Builds a handler from a validated descriptor.
pub type Constructor = fn(ServiceDescriptor) -> Result<BoxedService, ValidationError>;

/// Static description of one service family.
#[derive(Debug, Clone, Copy)]
pub struct ServiceFamily {
    /// Short identifier, e.g. `"ntfy"`.
    pub name: &'static str,
    /// Every scheme (including aliases) the family answers to.
    pub schemes: &'static [&'static str],
    /// Capabilities, limits and option schema.
    pub metadata: ServiceMetadata,
    /// Constructor invoked after validation succeeds.
    pub construct: Constructor,
}

// =============================================================================
// Metadata
// =============================================================================

/// Descriptor fields a family may require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    User,
    Password,
    Host,
    Port,
    Path,
}

impl Field {
    /// Field name used in validation errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Password => "password",
            Self::Host => "host",
            Self::Port => "port",
            Self::Path => "path",
        }
    }

    fn is_present(&self, descriptor: &ServiceDescriptor) -> bool {
        match self {
            Self::User => descriptor.user().is_some(),
            Self::Password => descriptor.password().is_some(),
            Self::Host => descriptor.host().is_some(),
            Self::Port => descriptor.port().is_some(),
            Self::Path => !descriptor.path().is_empty(),
        }
    }
}

/// Value type of a declared option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    /// Any string.
    String,
    /// A yes/no flag.
    Bool,
    /// An integer within an inclusive range.
    Int { min: i64, max: i64 },
    /// One of a fixed set of lower-case values.
    Choice(&'static [&'static str]),
}

/// One declared query option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    /// Masked in redacted URLs.
    pub private: bool,
}

impl OptionSpec {
    pub const fn new(key: &'static str, kind: OptionKind) -> Self {
        Self {
            key,
            kind,
            required: false,
            private: false,
        }
    }

    pub const fn string(key: &'static str) -> Self {
        Self::new(key, OptionKind::String)
    }

    pub const fn flag(key: &'static str) -> Self {
        Self::new(key, OptionKind::Bool)
    }

    pub const fn int(key: &'static str, min: i64, max: i64) -> Self {
        Self::new(key, OptionKind::Int { min, max })
    }

    pub const fn choice(key: &'static str, values: &'static [&'static str]) -> Self {
        Self::new(key, OptionKind::Choice(values))
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn private(mut self) -> Self {
        self.private = true;
        self
    }

    fn check(&self, value: &str) -> Result<(), ValidationError> {
        match self.kind {
            OptionKind::String => Ok(()),
            OptionKind::Bool => parse_flag(self.key, value)
                .map(|_| ())
                .map_err(|_| ValidationError::new(self.key, format!("'{value}' is not a yes/no flag"))),
            OptionKind::Int { min, max } => match value.trim().parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => Ok(()),
                _ => Err(ValidationError::new(
                    self.key,
                    format!("'{value}' is not an integer in {min}..={max}"),
                )),
            },
            OptionKind::Choice(values) => {
                if values.contains(&value.to_lowercase().as_str()) {
                    Ok(())
                } else {
                    Err(ValidationError::new(
                        self.key,
                        format!("'{value}' is not one of {}", values.join(", ")),
                    ))
                }
            }
        }
    }
}

/// Attachment capabilities of a family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentSupport {
    /// Maximum attachments per message; zero means unsupported.
    pub max_count: usize,
    /// Maximum size of a single attachment in bytes.
    pub max_size: Option<u64>,
}

impl AttachmentSupport {
    pub const NONE: Self = Self {
        max_count: 0,
        max_size: None,
    };

    pub fn is_supported(&self) -> bool {
        self.max_count > 0
    }
}

/// Capabilities, limits and option schema of a service family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceMetadata {
    /// Human readable name.
    pub name: &'static str,
    /// Home page of the remote service.
    pub service_url: &'static str,
    /// Minimum body length in characters.
    pub body_min_len: usize,
    /// Maximum body length in characters.
    pub body_max_len: Option<usize>,
    /// Maximum title length in characters. `Some(0)` means titles are unsupported.
    pub title_max_len: Option<usize>,
    /// Body formats the remote side accepts.
    pub formats: &'static [BodyFormat],
    pub attachments: AttachmentSupport,
    /// Default send rate; `None` means unlimited.
    pub rate_limit: Option<RateLimit>,
    pub retry: RetryPolicy,
    pub required: &'static [Field],
    pub options: &'static [OptionSpec],
    /// Reject option keys that are neither declared nor reserved.
    pub strict_options: bool,
}

impl ServiceMetadata {
    /// Permissive metadata: any body, every format, no attachments, no rate
    /// limit, default retry policy.
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            service_url: "",
            body_min_len: 0,
            body_max_len: None,
            title_max_len: None,
            formats: BodyFormat::ALL,
            attachments: AttachmentSupport::NONE,
            rate_limit: None,
            retry: RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(30)),
            required: &[],
            options: &[],
            strict_options: false,
        }
    }

    /// Looks up a declared option.
    pub fn option(&self, key: &str) -> Option<&'static OptionSpec> {
        self.options.iter().find(|spec| spec.key == key)
    }

    /// Keys of every option marked private.
    pub fn private_keys(&self) -> Vec<&'static str> {
        self.options
            .iter()
            .filter(|spec| spec.private)
            .map(|spec| spec.key)
            .collect()
    }

    /// Returns `true` if the family accepts `format`.
    pub fn supports_format(&self, format: BodyFormat) -> bool {
        self.formats.contains(&format)
    }

    /// Checks `descriptor` against this schema.
    pub fn validate(&self, descriptor: &ServiceDescriptor) -> Result<(), ValidationError> {
        for field in self.required {
            if !field.is_present(descriptor) {
                return Err(ValidationError::missing(field.name()));
            }
        }

        for (key, value) in descriptor.options() {
            match key.as_str() {
                ATTEMPTS_OPTION => {
                    parse_attempts(value)?;
                }
                LIMIT_OPTION => {
                    parse_limit(value)?;
                }
                _ => match self.option(key) {
                    Some(spec) => spec.check(value)?,
                    None if self.strict_options => {
                        return Err(ValidationError::new(key.as_str(), "unknown option"));
                    }
                    None => {}
                },
            }
        }

        for spec in self.options.iter().filter(|spec| spec.required) {
            if descriptor.option(spec.key).is_none() {
                return Err(ValidationError::missing(spec.key));
            }
        }

        Ok(())
    }

    /// The retry policy for `descriptor`, honoring an `attempts=` override.
    pub fn retry_for(&self, descriptor: &ServiceDescriptor) -> RetryPolicy {
        descriptor
            .option(ATTEMPTS_OPTION)
            .and_then(|value| parse_attempts(value).ok())
            .map(|attempts| self.retry.with_max_attempts(attempts))
            .unwrap_or(self.retry)
    }

    /// The rate limit for `descriptor`, honoring a `limit=` override.
    pub fn rate_limit_for(&self, descriptor: &ServiceDescriptor) -> Option<RateLimit> {
        descriptor
            .option(LIMIT_OPTION)
            .and_then(|value| parse_limit(value).ok())
            .or(self.rate_limit)
    }
}

fn parse_attempts(value: &str) -> Result<u32, ValidationError> {
    match value.trim().parse::<u32>() {
        Ok(n) if (1..=MAX_ATTEMPTS_LIMIT).contains(&n) => Ok(n),
        _ => Err(ValidationError::new(
            ATTEMPTS_OPTION,
            format!("'{value}' is not an integer in 1..={MAX_ATTEMPTS_LIMIT}"),
        )),
    }
}

fn parse_limit(value: &str) -> Result<RateLimit, ValidationError> {
    value
        .parse::<RateLimit>()
        .map_err(|_| ValidationError::new(LIMIT_OPTION, format!("'{value}' is not N/seconds")))
}

impl fmt::Display for ServiceMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.service_url.is_empty() {
            write!(f, " ({})", self.service_url)?;
        }
        Ok(())
    }
}
