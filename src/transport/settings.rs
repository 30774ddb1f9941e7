//! Client settings and the process-wide per-service registry.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::{ProtolaneError, Result};

/// Settings a generated client is constructed with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Destination endpoint, e.g. `http://localhost:8080`.
    pub host: String,
}

impl ClientSettings {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    fn validate(self, service_id: &str) -> Result<Self> {
        if self.host.trim().is_empty() {
            return Err(ProtolaneError::Configuration(format!(
                "empty host in settings for service {service_id}"
            )));
        }
        Ok(self)
    }
}

/// Default [`ClientSettings`] per service identifier (`package.Service`).
///
/// Clones share the same entries. [`SettingsRegistry::global`] is the
/// process-wide instance; tests and embedders can own separate ones.
#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    entries: Arc<RwLock<HashMap<String, ClientSettings>>>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> &'static SettingsRegistry {
        static GLOBAL: OnceLock<SettingsRegistry> = OnceLock::new();
        GLOBAL.get_or_init(SettingsRegistry::new)
    }

    /// Register defaults for a service, returning the previous entry.
    pub fn register(
        &self,
        service_id: impl Into<String>,
        settings: ClientSettings,
    ) -> Option<ClientSettings> {
        let service_id = service_id.into();
        tracing::debug!(service = %service_id, host = %settings.host, "registered client settings");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service_id, settings)
    }

    pub fn unregister(&self, service_id: &str) -> Option<ClientSettings> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(service_id)
    }

    pub fn get(&self, service_id: &str) -> Option<ClientSettings> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(service_id)
            .cloned()
    }

    /// Pick the settings a client of `service_id` uses: `call_site`, else
    /// the registered entry, else `fallback`.
    ///
    /// Fails with [`ProtolaneError::Configuration`] when none is present or
    /// the chosen settings have an empty host.
    pub fn resolve(
        &self,
        service_id: &str,
        call_site: Option<ClientSettings>,
        fallback: Option<&ClientSettings>,
    ) -> Result<ClientSettings> {
        call_site
            .or_else(|| self.get(service_id))
            .or_else(|| fallback.cloned())
            .ok_or_else(|| {
                ProtolaneError::Configuration(format!(
                    "no client settings for service {service_id}: pass settings or register a default"
                ))
            })?
            .validate(service_id)
    }
}
