//! Techulus Push.
//!
//! ```text
//! push://{apikey}
//! ```
//!
//! The API key is a version 4 UUID issued by the Push app.

use std::sync::Arc;

use async_trait::async_trait;
use clarion_core::{
    AttachmentResolver, BoxedService, DeliveryError, Field, NotificationMessage, REDACTED,
    Service, ServiceDescriptor, ServiceFamily, ServiceMetadata, ValidationError,
};
use clarion_transport::{Auth, HttpTransport};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::common::transport_for;

/// The publish endpoint.
pub const NOTIFY_URL: &str = "https://push.techulus.com/api/v1/notify";

const METADATA: ServiceMetadata = ServiceMetadata {
    service_url: "https://push.techulus.com",
    body_max_len: Some(1000),
    required: &[Field::Host],
    strict_options: true,
    ..ServiceMetadata::new("Techulus Push")
};

/// `push://`.
pub static TECHULUS_PUSH: ServiceFamily = ServiceFamily {
    name: "techulus",
    schemes: &["push"],
    metadata: METADATA,
    construct: TechulusPush::construct,
};

#[derive(Serialize)]
struct Payload<'a> {
    title: &'a str,
    body: &'a str,
}

/// A configured Techulus Push sender.
pub struct TechulusPush {
    descriptor: ServiceDescriptor,
    transport: HttpTransport,
    apikey: String,
    endpoint: String,
}

impl TechulusPush {
    fn construct(descriptor: ServiceDescriptor) -> Result<BoxedService, ValidationError> {
        Ok(Arc::new(Self::new(descriptor)?))
    }

    pub fn new(descriptor: ServiceDescriptor) -> Result<Self, ValidationError> {
        let raw = descriptor
            .host()
            .ok_or_else(|| ValidationError::missing("apikey"))?;
        let apikey = Uuid::parse_str(raw)
            .ok()
            .filter(|uuid| uuid.get_version_num() == 4)
            .ok_or_else(|| ValidationError::new("apikey", "not a version 4 UUID"))?;

        Ok(Self {
            transport: transport_for(&descriptor)?,
            apikey: apikey.hyphenated().to_string(),
            endpoint: NOTIFY_URL.to_owned(),
            descriptor,
        })
    }

    #[cfg(test)]
    fn with_endpoint(mut self, endpoint: String) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl Service for TechulusPush {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn metadata(&self) -> &'static ServiceMetadata {
        &TECHULUS_PUSH.metadata
    }

    async fn notify(
        &self,
        message: &NotificationMessage,
        _attachments: &dyn AttachmentResolver,
    ) -> Result<(), DeliveryError> {
        let payload = Payload {
            title: message.title_or_empty(),
            body: &message.body,
        };
        let headers = [("x-api-key".to_owned(), self.apikey.clone())];

        debug!(url = %self.endpoint, "Sending Techulus Push notification");
        self.transport
            .post_json(&self.endpoint, &Auth::None, &headers, &payload)
            .await?;
        Ok(())
    }

    fn url(&self, privacy: bool) -> String {
        if privacy {
            format!("{}://{REDACTED}", self.descriptor.scheme())
        } else {
            self.descriptor.to_url()
        }
    }
}

#[cfg(test)]
mod tests {
    use clarion_core::MemoryAttachmentResolver;
    use clarion_transport::testing::{CannedResponse, CannedServer};

    use super::*;

    const KEY: &str = "8b799edf-6f98-4d3a-9be7-2862fb4e5752";

    fn service(raw: &str) -> Result<TechulusPush, ValidationError> {
        let descriptor: ServiceDescriptor = raw.parse().unwrap();
        METADATA.validate(&descriptor)?;
        TechulusPush::new(descriptor)
    }

    #[test]
    fn test_apikey_validation() {
        assert!(service(&format!("push://{KEY}")).is_ok());
        assert!(service(&format!("push://{}", KEY.to_uppercase())).is_ok());
        assert_eq!(service("push://").err().unwrap().field, "host");
        assert_eq!(service("push://not-a-key").err().unwrap().field, "apikey");
        // Version 1 UUID
        assert_eq!(
            service("push://c232ab00-9414-11ec-b3c8-9f6bdeced846")
                .err()
                .unwrap()
                .field,
            "apikey"
        );
        assert_eq!(
            service(&format!("push://{KEY}?extra=1")).err().unwrap().field,
            "extra"
        );
    }

    #[test]
    fn test_private_url_hides_key() {
        let s = service(&format!("push://{KEY}")).unwrap();
        assert_eq!(s.url(true), "push://****");
        assert!(s.url(false).contains(KEY));
    }

    #[tokio::test]
    async fn test_sends_key_and_payload() {
        let server = CannedServer::start(vec![CannedResponse::new(204, "")]).await;
        let s = service(&format!("push://{KEY}"))
            .unwrap()
            .with_endpoint(server.url("/api/v1/notify"));

        let message = NotificationMessage::new("build green").with_title("CI");
        s.notify(&message, &MemoryAttachmentResolver::new())
            .await
            .unwrap();

        let request = server.requests().remove(0);
        assert_eq!(request.path, "/api/v1/notify");
        assert_eq!(request.header("x-api-key"), Some(KEY));
        assert_eq!(request.json()["title"], "CI");
        assert_eq!(request.json()["body"], "build green");
    }
}
