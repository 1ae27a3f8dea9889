//! Helpers shared by the built-in services.

use clarion_core::{ServiceDescriptor, ValidationError};
use clarion_transport::HttpTransport;

/// Builds the HTTP client for a service, honoring `verify=no`.
pub(crate) fn transport_for(descriptor: &ServiceDescriptor) -> Result<HttpTransport, ValidationError> {
    HttpTransport::for_descriptor(descriptor)
        .map_err(|e| ValidationError::new("transport", e.to_string()))
}

/// `http(s)://host[:port]`, bracketing IPv6 literals.
pub(crate) fn base_url(secure: bool, host: &str, port: Option<u16>) -> String {
    let scheme = if secure { "https" } else { "http" };
    let mut url = if host.contains(':') {
        format!("{scheme}://[{host}]")
    } else {
        format!("{scheme}://{host}")
    };
    if let Some(port) = port {
        url.push(':');
        url.push_str(&port.to_string());
    }
    url
}

/// Percent-encodes and joins path segments into `/a/b`.
pub(crate) fn join_path(segments: &[String]) -> String {
    segments
        .iter()
        .map(|segment| format!("/{}", urlencoding::encode(segment)))
        .collect()
}

/// Splits a comma or whitespace separated list, dropping empty items.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url() {
        assert_eq!(base_url(false, "localhost", None), "http://localhost");
        assert_eq!(base_url(true, "h", Some(8443)), "https://h:8443");
        assert_eq!(base_url(false, "::1", Some(80)), "http://[::1]:80");
    }

    #[test]
    fn test_join_path_encodes_segments() {
        assert_eq!(join_path(&[]), "");
        assert_eq!(
            join_path(&["a b".to_owned(), "c".to_owned()]),
            "/a%20b/c"
        );
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b  c,,"), vec!["a", "b", "c"]);
        assert!(split_list(" , ").is_empty());
    }
}
