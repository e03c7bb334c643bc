//! Versioned configuration state with hot reload.
//!
//! A [`Generation`] bundles everything a scrape reads: the configuration,
//! the resolved devices and the collector registry built from them. The live
//! generation sits behind a single `RwLock<Arc<Generation>>`:
//!
//! - scrapes take a shared hold only long enough to clone the `Arc`, then
//!   work on that immutable snapshot for the rest of the request;
//! - reload loads and builds a complete new generation on a blocking thread
//!   without holding the lock, then takes the exclusive hold only for the
//!   swap. Reloads are serialized by a separate mutex. A failed load leaves
//!   the live generation untouched.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::info;

use crate::config::{ConfigError, ExporterConfig};
use crate::device::Device;
use crate::registry::CollectorRegistry;

/// Where each generation's configuration comes from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// YAML document, re-read on every reload.
    File(PathBuf),
    /// Configuration assembled from command-line flags.
    Static(ExporterConfig),
}

impl ConfigSource {
    pub fn load(&self) -> Result<ExporterConfig, ConfigError> {
        match self {
            ConfigSource::File(path) => ExporterConfig::load(path),
            ConfigSource::Static(config) => {
                config.validate()?;
                Ok(config.clone())
            }
        }
    }
}

/// One configuration generation. Immutable once built.
#[derive(Debug)]
pub struct Generation {
    pub version: u64,
    pub config: ExporterConfig,
    pub devices: Vec<Arc<Device>>,
    pub registry: CollectorRegistry,
}

impl Generation {
    /// Resolves devices and builds the registry. No network I/O.
    pub fn build(version: u64, config: ExporterConfig) -> Result<Self, ConfigError> {
        let devices = config.resolve_devices()?;
        let registry = CollectorRegistry::build(&config, &devices);
        Ok(Self {
            version,
            config,
            devices: devices.into_iter().map(Arc::new).collect(),
            registry,
        })
    }

    pub fn find_device(&self, host: &str) -> Option<&Arc<Device>> {
        self.devices.iter().find(|d| d.host == host)
    }
}

/// Process-wide exporter state.
pub struct ExporterState {
    source: ConfigSource,
    current: RwLock<Arc<Generation>>,
    reloading: Mutex<()>,
}

impl ExporterState {
    /// Loads the first generation. Errors here are fatal at startup.
    pub fn new(source: ConfigSource) -> Result<Self, ConfigError> {
        let generation = Generation::build(1, source.load()?)?;
        info!(
            version = generation.version,
            devices = generation.devices.len(),
            "configuration loaded"
        );
        Ok(Self {
            source,
            current: RwLock::new(Arc::new(generation)),
            reloading: Mutex::new(()),
        })
    }

    /// The live generation. Holds the shared lock only for the `Arc` clone.
    pub async fn snapshot(&self) -> Arc<Generation> {
        self.current.read().await.clone()
    }

    /// Reloads configuration from the source and swaps in a new generation.
    ///
    /// All-or-nothing: on error the live generation is kept and the error is
    /// left to the caller to report. Returns the new generation's version.
    pub async fn reload(&self) -> Result<u64, ConfigError> {
        let _reloading = self.reloading.lock().await;
        let version = self.snapshot().await.version + 1;

        let source = self.source.clone();
        let generation = tokio::task::spawn_blocking(move || -> Result<Generation, ConfigError> {
            Generation::build(version, source.load()?)
        })
        .await
        .map_err(|e| ConfigError::Aborted(e.to_string()))??;

        info!(
            version,
            devices = generation.devices.len(),
            collectors = generation.registry.collector_count(),
            "configuration reloaded"
        );
        *self.current.write().await = Arc::new(generation);
        Ok(version)
    }
}
