//! Plugin registry mapping URL schemes to service families.
//!
//! The registry is assembled once with a [`RegistryBuilder`], frozen into a
//! [`ServiceRegistry`] and then shared read-only (usually as
//! `Arc<ServiceRegistry>`) by every config store that needs it.
//!
//! ```rust,ignore
//! let mut builder = ServiceRegistry::builder();
//! builder.register(JSON)?;
//! builder.register(NTFY)?;
//! let registry = Arc::new(builder.build());
//!
//! let service = registry.construct("ntfy://alerts".parse()?)?;
//! ```

use std::collections::BTreeMap;

use tracing::debug;

use crate::foundation::descriptor::{ServiceDescriptor, validate_scheme};
use crate::foundation::error::{LookupError, RegistryError, ServiceError};
use crate::integration::service::{BoxedService, ServiceFamily, ServiceMetadata};

/// Collects service families before the registry is frozen.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    families: Vec<ServiceFamily>,
    schemes: BTreeMap<String, usize>,
}

impl RegistryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a family under all of its schemes.
    ///
    /// Registration is all-or-nothing: on error no scheme of `family` is added.
    pub fn register(&mut self, family: ServiceFamily) -> Result<(), RegistryError> {
        if family.schemes.is_empty() {
            return Err(RegistryError::NoSchemes(family.name));
        }

        for (i, scheme) in family.schemes.iter().enumerate() {
            if validate_scheme(scheme).is_err() {
                return Err(RegistryError::InvalidScheme {
                    family: family.name,
                    scheme: (*scheme).to_owned(),
                });
            }
            if let Some(&index) = self.schemes.get(*scheme) {
                return Err(RegistryError::SchemeCollision {
                    scheme: (*scheme).to_owned(),
                    existing: self.families[index].name,
                    incoming: family.name,
                });
            }
            if family.schemes[..i].contains(scheme) {
                return Err(RegistryError::SchemeCollision {
                    scheme: (*scheme).to_owned(),
                    existing: family.name,
                    incoming: family.name,
                });
            }
        }

        let index = self.families.len();
        for scheme in family.schemes {
            self.schemes.insert((*scheme).to_owned(), index);
        }
        self.families.push(family);
        debug!(family = family.name, schemes = ?family.schemes, "Registered service family");
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, family: ServiceFamily) -> Result<Self, RegistryError> {
        self.register(family)?;
        Ok(self)
    }

    /// Freezes the registry.
    pub fn build(self) -> ServiceRegistry {
        ServiceRegistry {
            families: self.families,
            schemes: self.schemes,
        }
    }
}

/// An immutable scheme → family lookup table.
#[derive(Debug)]
pub struct ServiceRegistry {
    families: Vec<ServiceFamily>,
    schemes: BTreeMap<String, usize>,
}

impl ServiceRegistry {
    /// Starts a new builder.
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Finds the family registered for `scheme`.
    pub fn resolve(&self, scheme: &str) -> Result<&ServiceFamily, LookupError> {
        self.schemes
            .get(scheme)
            .map(|&index| &self.families[index])
            .ok_or_else(|| LookupError::new(scheme))
    }

    /// Every registered scheme with its family metadata, sorted by scheme.
    pub fn list(&self) -> Vec<(&str, &ServiceMetadata)> {
        self.schemes
            .iter()
            .map(|(scheme, &index)| (scheme.as_str(), &self.families[index].metadata))
            .collect()
    }

    /// Registered families in registration order.
    pub fn families(&self) -> &[ServiceFamily] {
        &self.families
    }

    /// Number of registered schemes.
    pub fn len(&self) -> usize {
        self.schemes.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.schemes.is_empty()
    }

    /// Resolves, validates and constructs a handler for `descriptor`.
    pub fn construct(&self, descriptor: ServiceDescriptor) -> Result<BoxedService, ServiceError> {
        let family = self.resolve(descriptor.scheme())?;
        family.metadata.validate(&descriptor)?;
        Ok((family.construct)(descriptor)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::foundation::attachment::AttachmentResolver;
    use crate::foundation::error::{DeliveryError, ValidationError};
    use crate::foundation::message::NotificationMessage;
    use crate::integration::service::{Field, Service};

    struct Nop(ServiceDescriptor);

    const NOP_META: ServiceMetadata = ServiceMetadata {
        required: &[Field::Host],
        ..ServiceMetadata::new("Nop")
    };

    #[async_trait]
    impl Service for Nop {
        fn descriptor(&self) -> &ServiceDescriptor {
            &self.0
        }

        fn metadata(&self) -> &'static ServiceMetadata {
            &NOP_META
        }

        async fn notify(
            &self,
            _message: &NotificationMessage,
            _attachments: &dyn AttachmentResolver,
        ) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn build_nop(descriptor: ServiceDescriptor) -> Result<BoxedService, ValidationError> {
        if descriptor.host() == Some("reject") {
            return Err(ValidationError::new("host", "rejected by constructor"));
        }
        Ok(Arc::new(Nop(descriptor)))
    }

    fn family(name: &'static str, schemes: &'static [&'static str]) -> ServiceFamily {
        ServiceFamily {
            name,
            schemes,
            metadata: NOP_META,
            construct: build_nop,
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = RegistryBuilder::new()
            .with(family("nop", &["nops", "nop"]))
            .unwrap()
            .build();

        assert_eq!(registry.resolve("nop").unwrap().name, "nop");
        assert_eq!(registry.resolve("nops").unwrap().name, "nop");
        assert_eq!(registry.resolve("nope").unwrap_err(), LookupError::new("nope"));

        let schemes: Vec<_> = registry.list().into_iter().map(|(s, _)| s).collect();
        assert_eq!(schemes, ["nop", "nops"]);
    }

    #[test]
    fn test_duplicate_scheme_rejected_atomically() {
        let mut builder = RegistryBuilder::new();
        builder.register(family("first", &["a"])).unwrap();

        let err = builder.register(family("second", &["b", "a"])).unwrap_err();
        assert_eq!(
            err,
            RegistryError::SchemeCollision {
                scheme: "a".into(),
                existing: "first",
                incoming: "second",
            }
        );

        let registry = builder.build();
        assert!(registry.resolve("b").is_err());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_family_declarations() {
        let mut builder = RegistryBuilder::new();
        assert_eq!(
            builder.register(family("empty", &[])),
            Err(RegistryError::NoSchemes("empty"))
        );
        assert!(matches!(
            builder.register(family("upper", &["Nop"])),
            Err(RegistryError::InvalidScheme { .. })
        ));
        assert!(matches!(
            builder.register(family("twice", &["x", "x"])),
            Err(RegistryError::SchemeCollision { .. })
        ));
    }

    #[test]
    fn test_construct_pipeline() {
        let registry = RegistryBuilder::new()
            .with(family("nop", &["nop"]))
            .unwrap()
            .build();

        let service = registry.construct("nop://host".parse().unwrap()).unwrap();
        assert_eq!(service.descriptor().host(), Some("host"));

        assert!(matches!(
            registry.construct("other://host".parse().unwrap()),
            Err(ServiceError::Lookup(_))
        ));
        assert!(matches!(
            registry.construct("nop://".parse().unwrap()),
            Err(ServiceError::Validation(e)) if e.field == "host"
        ));
        assert!(matches!(
            registry.construct("nop://reject".parse().unwrap()),
            Err(ServiceError::Validation(_))
        ));
    }
}
