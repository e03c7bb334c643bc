//! Exporter configuration.
//!
//! One [`ExporterConfig`] describes a whole configuration generation:
//! credential defaults, transport tuning, probe settings, global feature
//! toggles and the ordered device list. It is produced either from
//! command-line flags or from a YAML document; both end up in the same shape.
//!
//! ```yaml
//! username: netops
//! key_file: /etc/sshping/id_ed25519
//! timeout: 5
//! ping:
//!   destination: 10.0.0.1
//!   count: 5
//! features:
//!   icmp: true
//! devices:
//!   - host: core-sw1.example.net
//!   - host: edge-rtr2.example.net
//!     port: 2222
//!     username: readonly
//!     password: secret
//! ```

pub mod features;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::device::{AuthMethod, DEFAULT_SSH_PORT, Device};
use crate::transport::ConnectionSettings;

pub use features::{Feature, FeatureToggles};

/// Longest accepted device or connect timeout.
pub const MAX_DEVICE_TIMEOUT: Duration = Duration::from_secs(3600);

/// Error type for configuration loading and validation.
#[derive(Debug)]
pub enum ConfigError {
    /// Config document or key file could not be read.
    Io { path: PathBuf, source: std::io::Error },
    /// Config document is not valid YAML for this schema.
    Yaml(serde_yaml::Error),
    /// Config parsed but is semantically invalid.
    Invalid(String),
    /// The background load task did not complete.
    Aborted(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            ConfigError::Yaml(e) => write!(f, "invalid config document: {}", e),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
            ConfigError::Aborted(msg) => write!(f, "config load aborted: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Yaml(e) => Some(e),
            ConfigError::Invalid(_) | ConfigError::Aborted(_) => None,
        }
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Yaml(e)
    }
}

/// Probe settings shared by every device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PingSettings {
    /// Destination pinged when the scrape does not pass `dest`.
    pub destination: String,
    /// Echo requests per probe.
    pub count: u32,
    /// Emit the jitter gauge (max - min RTT).
    pub jitter: bool,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            destination: "baidu.com".to_string(),
            count: 5,
            jitter: true,
        }
    }
}

/// Fan-out tuning for one scrape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    /// Maximum number of devices probed at the same time.
    pub max_concurrency: usize,
    /// Upper bound for one device's whole collection, in seconds.
    pub device_timeout: u64,
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            max_concurrency: 16,
            device_timeout: 30,
        }
    }
}

/// One device entry as written in config. Unset fields inherit globals.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    pub features: FeatureToggles,
}

/// Complete exporter configuration (one generation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExporterConfig {
    /// Log every remote command and its raw output.
    pub debug: bool,
    /// Allow CBC ciphers and legacy key exchange on the transport.
    pub legacy_ciphers: bool,
    /// Connect timeout in seconds.
    pub timeout: u64,
    /// SSH response batch size: command output buffers grow by this many bytes.
    pub batch_size: usize,
    pub username: String,
    pub password: Option<String>,
    pub key_file: Option<PathBuf>,
    /// Run the version query on each device before collecting.
    pub identify_os: bool,
    pub ping: PingSettings,
    pub scrape: ScrapeSettings,
    pub features: FeatureToggles,
    pub devices: Vec<DeviceConfig>,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            debug: false,
            legacy_ciphers: false,
            timeout: 5,
            batch_size: 10000,
            username: "sshping_exporter".to_string(),
            password: None,
            key_file: None,
            identify_os: false,
            ping: PingSettings::default(),
            scrape: ScrapeSettings::default(),
            features: FeatureToggles::default(),
            devices: Vec::new(),
        }
    }
}

impl ExporterConfig {
    /// Loads and validates a YAML config document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parses and validates a YAML config document held in memory.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Builds device entries from a comma separated `host[:port]` list.
    ///
    /// IPv6 literals must be bracketed when a port is given (`[::1]:22`).
    pub fn devices_from_targets(targets: &str) -> Vec<DeviceConfig> {
        targets
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|target| {
                let (host, port) = split_host_port(target);
                DeviceConfig {
                    host: host.to_string(),
                    port,
                    ..DeviceConfig::default()
                }
            })
            .collect()
    }

    /// Checks invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("no devices configured".to_string()));
        }
        if self.ping.count == 0 {
            return Err(ConfigError::Invalid("ping.count must be at least 1".to_string()));
        }
        if self.ping.destination.trim().is_empty() {
            return Err(ConfigError::Invalid("ping.destination is empty".to_string()));
        }
        if self.scrape.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "scrape.max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".to_string()));
        }
        let max_secs = MAX_DEVICE_TIMEOUT.as_secs();
        if !(1..=max_secs).contains(&self.scrape.device_timeout) {
            return Err(ConfigError::Invalid(format!(
                "scrape.device_timeout must be between 1 and {} seconds",
                max_secs
            )));
        }
        if !(1..=max_secs).contains(&self.timeout) {
            return Err(ConfigError::Invalid(format!(
                "timeout must be between 1 and {} seconds",
                max_secs
            )));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            let host = device.host.trim();
            if host.is_empty() {
                return Err(ConfigError::Invalid("device with empty host".to_string()));
            }
            if host.starts_with('-') {
                return Err(ConfigError::Invalid(format!("invalid device host {:?}", host)));
            }
            if !seen.insert(host) {
                return Err(ConfigError::Invalid(format!(
                    "device {} configured more than once",
                    host
                )));
            }
        }
        Ok(())
    }

    /// Transport settings shared by every device of this generation.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            connect_timeout: Duration::from_secs(self.timeout),
            batch_size: self.batch_size,
            legacy_ciphers: self.legacy_ciphers,
        }
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape.device_timeout)
    }

    /// Resolves every device entry against the global defaults.
    ///
    /// Key files are opened here so a bad path fails the load instead of
    /// every later scrape.
    pub fn resolve_devices(&self) -> Result<Vec<Device>, ConfigError> {
        self.devices.iter().map(|d| self.resolve_device(d)).collect()
    }

    fn resolve_device(&self, entry: &DeviceConfig) -> Result<Device, ConfigError> {
        let username = entry
            .username
            .clone()
            .unwrap_or_else(|| self.username.clone());
        let key_file = entry.key_file.as_ref().or(self.key_file.as_ref());
        let password = entry.password.as_ref().or(self.password.as_ref());

        let auth = match (key_file, password) {
            (Some(path), _) => {
                std::fs::File::open(path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                AuthMethod::Key {
                    username,
                    key_file: Some(path.clone()),
                }
            }
            (None, Some(password)) => AuthMethod::Password {
                username,
                password: password.clone(),
            },
            (None, None) => AuthMethod::Key {
                username,
                key_file: None,
            },
        };

        Ok(Device {
            host: entry.host.trim().to_string(),
            port: entry.port.unwrap_or(DEFAULT_SSH_PORT),
            auth,
            features: self.features.merged(&entry.features),
        })
    }
}

fn split_host_port(target: &str) -> (&str, Option<u16>) {
    if let Some(rest) = target.strip_prefix('[') {
        if let Some((host, tail)) = rest.split_once(']') {
            let port = tail.strip_prefix(':').and_then(|p| p.parse().ok());
            return (host, port);
        }
        return (target, None);
    }
    match target.rsplit_once(':') {
        // A bare IPv6 literal has more than one colon.
        Some((host, port)) if !host.contains(':') => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (target, None),
        },
        _ => (target, None),
    }
}
