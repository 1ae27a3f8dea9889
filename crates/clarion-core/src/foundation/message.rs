//! The notification message model.
//!
//! A [`NotificationMessage`] is what the caller wants delivered: an optional
//! title, a body in one of the supported [`BodyFormat`]s, a severity
//! ([`NotifyType`]) and an ordered list of attachment references. Once handed
//! to the dispatcher it is shared read-only between every handler.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::foundation::attachment::AttachmentRef;
use crate::foundation::error::ParseError;

// ============================================================================
// Notify Type
// ============================================================================

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyType {
    #[default]
    Info,
    Success,
    Warning,
    Failure,
}

impl NotifyType {
    /// Returns the lower-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for NotifyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotifyType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Self::Info),
            "success" => Ok(Self::Success),
            "warning" => Ok(Self::Warning),
            "failure" => Ok(Self::Failure),
            _ => Err(ParseError::InvalidOption {
                key: "type".into(),
                value: s.to_owned(),
            }),
        }
    }
}

// ============================================================================
// Body Format
// ============================================================================

/// Markup of the message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BodyFormat {
    #[default]
    Text,
    Markdown,
    Html,
}

impl BodyFormat {
    /// Every body format, in declaration order.
    pub const ALL: &'static [BodyFormat] = &[Self::Text, Self::Markdown, Self::Html];

    /// Returns the lower-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
        }
    }
}

impl fmt::Display for BodyFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BodyFormat {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "html" => Ok(Self::Html),
            _ => Err(ParseError::InvalidOption {
                key: "format".into(),
                value: s.to_owned(),
            }),
        }
    }
}

// ============================================================================
// Notification Message
// ============================================================================

/// One logical notification to fan out.
///
/// # Example
///
/// ```rust,ignore
/// use clarion_core::{BodyFormat, NotificationMessage, NotifyType};
///
/// let message = NotificationMessage::new("disk usage at 91%")
///     .with_title("storage")
///     .with_type(NotifyType::Warning)
///     .with_format(BodyFormat::Markdown)
///     .with_attachment("/var/log/df.txt");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMessage {
    /// Optional title.
    #[serde(default)]
    pub title: Option<String>,
    /// The body.
    pub body: String,
    /// Markup of the body.
    #[serde(default)]
    pub format: BodyFormat,
    /// Severity.
    #[serde(default)]
    pub notify_type: NotifyType,
    /// Attachment references, resolved lazily at send time.
    #[serde(default)]
    pub attachments: Vec<AttachmentRef>,
}

impl NotificationMessage {
    /// Creates a text message with the given body.
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    /// Sets the title. An empty title is treated as none.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        let title = title.into();
        self.title = (!title.is_empty()).then_some(title);
        self
    }

    /// Sets the body format.
    pub fn with_format(mut self, format: BodyFormat) -> Self {
        self.format = format;
        self
    }

    /// Sets the notify type.
    pub fn with_type(mut self, notify_type: NotifyType) -> Self {
        self.notify_type = notify_type;
        self
    }

    /// Appends an attachment reference.
    pub fn with_attachment(mut self, reference: impl Into<AttachmentRef>) -> Self {
        self.attachments.push(reference.into());
        self
    }

    /// Returns the title or an empty string.
    pub fn title_or_empty(&self) -> &str {
        self.title.as_deref().unwrap_or_default()
    }

    /// Replaces `\n`, `\r`, `\t`, `\\`, `\"` and `\'` sequences in the title
    /// and body with the characters they name.
    pub fn interpret_escapes(mut self) -> Self {
        self.title = self.title.map(|title| unescape(&title));
        self.body = unescape(&self.body);
        self
    }
}

fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Truncates `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let msg = NotificationMessage::new("body")
            .with_title("")
            .with_type(NotifyType::Failure)
            .with_attachment("a.txt");
        assert_eq!(msg.title, None);
        assert_eq!(msg.notify_type, NotifyType::Failure);
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.format, BodyFormat::Text);
    }

    #[test]
    fn test_interpret_escapes() {
        let msg = NotificationMessage::new(r"line1\nline2\tend\\n \q")
            .with_title(r"a\tb")
            .interpret_escapes();
        assert_eq!(msg.body, "line1\nline2\tend\\n \\q");
        assert_eq!(msg.title.as_deref(), Some("a\tb"));
    }

    #[test]
    fn test_parse_enums() {
        assert_eq!("WARNING".parse::<NotifyType>().unwrap(), NotifyType::Warning);
        assert_eq!("html".parse::<BodyFormat>().unwrap(), BodyFormat::Html);
        assert!("rtf".parse::<BodyFormat>().is_err());
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }
}
