//! Configuration loading.
//!
//! Configuration is loaded from TOML files with the following resolution order:
//! 1. `--config <path>` (CLI flag) or an explicit path
//! 2. `~/.protolane/config.toml` (user)
//! 3. `/etc/protolane/config.toml` (system)

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::codegen::GeneratorOptions;
use crate::transport::{
    ChannelTransportFactory, ClientSettings, LoggingFactory, SettingsRegistry, TransportFactory,
    WorkerConnection,
};
use crate::{ProtolaneError, Result};

/// Which adapter clients are built on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Grpc,
    Channel,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub transport: TransportKind,
    /// Wrap every transport in a [`LoggingTransport`](crate::transport::LoggingTransport).
    #[serde(default)]
    pub logging: bool,
    /// Fallback settings for services with no entry of their own.
    #[serde(default)]
    pub default: Option<ClientSettings>,
    /// Per-service settings keyed by service identifier (`package.Service`).
    #[serde(default)]
    pub services: HashMap<String, ClientSettings>,
    #[serde(default)]
    pub generator: GeneratorOptions,
}

impl Config {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.protolane/config.toml`
    /// 3. `/etc/protolane/config.toml`
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let path = Self::resolve_config_path(explicit_path)?;
        Self::load_from_file(&path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            ProtolaneError::Configuration(format!("Failed to read config file {path:?}: {e}"))
        })?;
        toml::from_str(&content).map_err(|e| {
            ProtolaneError::Configuration(format!("Failed to parse config file {path:?}: {e}"))
        })
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(path.to_path_buf());
            }
            return Err(ProtolaneError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        // User config
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".protolane").join("config.toml");
            if user_config.exists() {
                return Ok(user_config);
            }
        }

        // System config
        let system_config = PathBuf::from("/etc/protolane/config.toml");
        if system_config.exists() {
            return Ok(system_config);
        }

        Err(ProtolaneError::Configuration(
            "No config file found. Create ~/.protolane/config.toml or /etc/protolane/config.toml"
                .to_string(),
        ))
    }

    /// Copy the `[services]` table into `registry`.
    pub fn register_services(&self, registry: &SettingsRegistry) {
        for (service_id, settings) in &self.services {
            registry.register(service_id.clone(), settings.clone());
        }
    }

    /// Build the configured factory. The `channel` transport needs the
    /// worker `connection` to multiplex over.
    pub fn transport_factory(
        &self,
        connection: Option<WorkerConnection>,
    ) -> Result<Arc<dyn TransportFactory>> {
        let factory: Arc<dyn TransportFactory> = match self.transport {
            TransportKind::Grpc => self.grpc_factory()?,
            TransportKind::Channel => {
                let connection = connection.ok_or_else(|| {
                    ProtolaneError::Configuration(
                        "channel transport configured without a worker connection".to_string(),
                    )
                })?;
                let mut factory = ChannelTransportFactory::new(connection);
                if let Some(default) = &self.default {
                    factory = factory.with_default(default.clone());
                }
                Arc::new(factory)
            }
        };

        if self.logging {
            Ok(Arc::new(LoggingFactory::new(factory)))
        } else {
            Ok(factory)
        }
    }

    #[cfg(feature = "grpc")]
    fn grpc_factory(&self) -> Result<Arc<dyn TransportFactory>> {
        let mut factory = crate::transport::GrpcTransportFactory::new();
        if let Some(default) = &self.default {
            factory = factory.with_default(default.clone());
        }
        Ok(Arc::new(factory))
    }

    #[cfg(not(feature = "grpc"))]
    fn grpc_factory(&self) -> Result<Arc<dyn TransportFactory>> {
        Err(ProtolaneError::Configuration(
            "grpc transport requires the `grpc` feature".to_string(),
        ))
    }
}
