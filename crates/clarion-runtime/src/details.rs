//! Introspection of the registered service families.
//!
//! [`FamilyDetails`] is a serializable snapshot of a family's schemes,
//! limits and option schema, suitable for listing what a deployment can
//! send to.

use clarion_core::{OptionKind, OptionSpec, ServiceFamily, ServiceRegistry};
use serde::Serialize;

/// One registered service family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FamilyDetails {
    /// Registry identifier, e.g. `ntfy`.
    pub family: &'static str,
    /// Human readable name.
    pub name: &'static str,
    pub service_url: &'static str,
    pub schemes: Vec<&'static str>,
    pub formats: Vec<String>,
    pub body_max_len: Option<usize>,
    pub title_max_len: Option<usize>,
    /// Zero when attachments are unsupported.
    pub max_attachments: usize,
    pub max_attachment_size: Option<u64>,
    /// Default rate limit as `sends/seconds`, e.g. `5/60`.
    pub rate_limit: Option<String>,
    pub max_attempts: u32,
    pub required: Vec<&'static str>,
    pub options: Vec<OptionDetails>,
}

/// One declared query option.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OptionDetails {
    pub key: &'static str,
    /// `string`, `bool`, `int(min..=max)` or `choice(a|b)`.
    pub kind: String,
    pub required: bool,
    pub private: bool,
}

impl From<&ServiceFamily> for FamilyDetails {
    fn from(family: &ServiceFamily) -> Self {
        let metadata = &family.metadata;
        Self {
            family: family.name,
            name: metadata.name,
            service_url: metadata.service_url,
            schemes: family.schemes.to_vec(),
            formats: metadata.formats.iter().map(ToString::to_string).collect(),
            body_max_len: metadata.body_max_len,
            title_max_len: metadata.title_max_len,
            max_attachments: metadata.attachments.max_count,
            max_attachment_size: metadata.attachments.max_size,
            rate_limit: metadata.rate_limit.map(|limit| limit.to_string()),
            max_attempts: metadata.retry.max_attempts,
            required: metadata.required.iter().map(|field| field.name()).collect(),
            options: metadata.options.iter().map(OptionDetails::from).collect(),
        }
    }
}

impl From<&OptionSpec> for OptionDetails {
    fn from(spec: &OptionSpec) -> Self {
        Self {
            key: spec.key,
            kind: kind_label(&spec.kind),
            required: spec.required,
            private: spec.private,
        }
    }
}

fn kind_label(kind: &OptionKind) -> String {
    match kind {
        OptionKind::String => "string".to_owned(),
        OptionKind::Bool => "bool".to_owned(),
        OptionKind::Int { min, max } => format!("int({min}..={max})"),
        OptionKind::Choice(values) => format!("choice({})", values.join("|")),
    }
}

/// Details of every family in `registry`, in registration order.
pub fn describe(registry: &ServiceRegistry) -> Vec<FamilyDetails> {
    registry.families().iter().map(FamilyDetails::from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_builtin_families() {
        let registry = clarion_services::builtin_registry().unwrap();
        let details = describe(&registry);

        let families: Vec<&str> = details.iter().map(|d| d.family).collect();
        assert_eq!(families, ["json", "ntfy", "techulus"]);

        let ntfy = &details[1];
        assert_eq!(ntfy.schemes, ["ntfy", "ntfys"]);
        assert_eq!(ntfy.max_attachments, 10);
        let mode = ntfy.options.iter().find(|o| o.key == "mode").unwrap();
        assert_eq!(mode.kind, "choice(cloud|private)");
        assert!(ntfy.options.iter().any(|o| o.key == "token" && o.private));

        let push = &details[2];
        assert_eq!(push.body_max_len, Some(1000));
        assert_eq!(push.required, ["host"]);
    }

    #[test]
    fn test_details_serialize() {
        let registry = clarion_services::builtin_registry().unwrap();
        let json = serde_json::to_value(describe(&registry)).unwrap();
        assert_eq!(json[0]["family"], "json");
        assert_eq!(json[0]["options"][0]["key"], "method");
        assert_eq!(json[0]["options"][0]["kind"], "choice(post|get|put|patch|delete|head)");
    }
}
