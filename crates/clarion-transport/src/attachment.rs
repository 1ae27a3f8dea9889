//! Attachment resolution from the local filesystem and HTTP.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use clarion_core::{Attachment, AttachmentError, AttachmentRef, AttachmentResolver};
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::http::{HttpTransport, TransportOptions};

/// MIME type used when nothing better is known.
pub const FALLBACK_MIME: &str = "application/octet-stream";

const FILE_PREFIX: &str = "file://";

/// Resolves plain paths, `file://` URLs and `http(s)://` URLs.
#[derive(Debug, Clone)]
pub struct DefaultAttachmentResolver {
    http: HttpTransport,
}

impl DefaultAttachmentResolver {
    /// Creates a resolver with a default HTTP client.
    pub fn new() -> TransportResult<Self> {
        Ok(Self {
            http: HttpTransport::new(&TransportOptions::default())?,
        })
    }

    /// Creates a resolver fetching remote attachments through `http`.
    pub fn with_transport(http: HttpTransport) -> Self {
        Self { http }
    }

    async fn read_file(&self, reference: &AttachmentRef, path: &Path) -> Result<Attachment, AttachmentError> {
        let content = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => AttachmentError::NotFound(reference.to_string()),
            _ => AttachmentError::Unreadable {
                reference: reference.to_string(),
                reason: e.to_string(),
            },
        })?;

        let name = reference.file_name().to_owned();
        let mime = mime_from_extension(&name).unwrap_or(FALLBACK_MIME);
        debug!(reference = %reference, bytes = content.len(), "Read attachment from disk");
        Ok(Attachment::new(name, mime, content))
    }

    async fn fetch(&self, reference: &AttachmentRef) -> Result<Attachment, AttachmentError> {
        let response = self.http.get(reference.as_str()).await.map_err(|e| match e {
            TransportError::Status { status: 404, .. } => {
                AttachmentError::NotFound(reference.to_string())
            }
            other => AttachmentError::Unreadable {
                reference: reference.to_string(),
                reason: other.to_string(),
            },
        })?;

        let name = reference.file_name().to_owned();
        let mime = response
            .content_type()
            .map(|value| value.split(';').next().unwrap_or(value).trim().to_owned())
            .filter(|value| !value.is_empty())
            .or_else(|| mime_from_extension(&name).map(str::to_owned))
            .unwrap_or_else(|| FALLBACK_MIME.to_owned());
        debug!(reference = %reference, bytes = response.body.len(), "Fetched remote attachment");
        Ok(Attachment::new(name, mime, response.body))
    }
}

#[async_trait]
impl AttachmentResolver for DefaultAttachmentResolver {
    async fn resolve(&self, reference: &AttachmentRef) -> Result<Attachment, AttachmentError> {
        let raw = reference.as_str();
        let lower = raw.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            self.fetch(reference).await
        } else if lower.starts_with(FILE_PREFIX) {
            self.read_file(reference, Path::new(&raw[FILE_PREFIX.len()..]))
                .await
        } else {
            self.read_file(reference, Path::new(raw)).await
        }
    }
}

/// Guesses a MIME type from a file name's extension.
pub fn mime_from_extension(name: &str) -> Option<&'static str> {
    let (_, extension) = name.rsplit_once('.')?;
    let mime = match extension.to_ascii_lowercase().as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "json" => "application/json",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::testing::{CannedResponse, CannedServer};

    fn resolver() -> DefaultAttachmentResolver {
        DefaultAttachmentResolver::new().unwrap()
    }

    #[tokio::test]
    async fn test_reads_plain_path_and_file_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.txt");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(b"all green")
            .unwrap();

        let plain = resolver()
            .resolve(&AttachmentRef::new(path.to_string_lossy()))
            .await
            .unwrap();
        assert_eq!(plain.name, "report.txt");
        assert_eq!(plain.mime_type, "text/plain");
        assert_eq!(&plain.content[..], b"all green");

        let url = format!("file://{}", path.to_string_lossy());
        let via_url = resolver().resolve(&AttachmentRef::new(url)).await.unwrap();
        assert_eq!(via_url.content, plain.content);
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.bin");
        let err = resolver()
            .resolve(&AttachmentRef::new(missing.to_string_lossy()))
            .await
            .unwrap_err();
        assert!(matches!(err, AttachmentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_fetches_over_http() {
        let server = CannedServer::start(vec![
            CannedResponse::ok("PNGDATA").with_header("Content-Type", "image/png; q=1"),
            CannedResponse::new(404, "gone"),
        ])
        .await;

        let found = resolver()
            .resolve(&AttachmentRef::new(server.url("/img/logo")))
            .await
            .unwrap();
        assert_eq!(found.name, "logo");
        assert_eq!(found.mime_type, "image/png");
        assert_eq!(&found.content[..], b"PNGDATA");

        let missing = resolver()
            .resolve(&AttachmentRef::new(server.url("/img/missing.png")))
            .await
            .unwrap_err();
        assert!(matches!(missing, AttachmentError::NotFound(_)));
    }

    #[test]
    fn test_mime_table() {
        assert_eq!(mime_from_extension("a.JPG"), Some("image/jpeg"));
        assert_eq!(mime_from_extension("a.tar.gz"), Some("application/gzip"));
        assert_eq!(mime_from_extension("Makefile"), None);
    }
}
