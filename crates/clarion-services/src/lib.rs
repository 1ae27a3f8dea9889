//! # Clarion Services
//!
//! The notification services that ship with Clarion.
//!
//! | Family | Schemes | Remote |
//! |--------|---------|--------|
//! | [`JSON`] | `json`, `jsons` | Any endpoint accepting a JSON document |
//! | [`NTFY`] | `ntfy`, `ntfys` | ntfy.sh or a self-hosted ntfy server |
//! | [`TECHULUS_PUSH`] | `push` | Techulus Push |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use clarion_core::ConfigStore;
//!
//! let registry = Arc::new(clarion_services::builtin_registry()?);
//! let store = ConfigStore::new(registry);
//! store.add("ntfys://alerts", ["ops"])?;
//! ```
//!
//! Custom services are registered next to the built-in ones:
//!
//! ```rust,ignore
//! let mut builder = ServiceRegistry::builder();
//! clarion_services::register_builtin(&mut builder)?;
//! builder.register(MY_FAMILY)?;
//! ```

mod common;
pub mod json;
pub mod ntfy;
pub mod techulus;

use clarion_core::{RegistryBuilder, RegistryError, ServiceFamily, ServiceRegistry};

pub use json::{JSON, JsonService};
pub use ntfy::{NTFY, NtfyMode, NtfyPriority, NtfyService};
pub use techulus::{TECHULUS_PUSH, TechulusPush};

/// Every built-in family.
pub fn builtin_families() -> [ServiceFamily; 3] {
    [JSON, NTFY, TECHULUS_PUSH]
}

/// Registers every built-in family with `builder`.
pub fn register_builtin(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
    for family in builtin_families() {
        builder.register(family)?;
    }
    Ok(())
}

/// A registry holding only the built-in families.
pub fn builtin_registry() -> Result<ServiceRegistry, RegistryError> {
    let mut builder = ServiceRegistry::builder();
    register_builtin(&mut builder)?;
    Ok(builder.build())
}
