//! Per-device command client.
//!
//! Wraps one [`RemoteCommandChannel`] for the duration of a scrape, adds
//! OS-family identification and optional verbatim logging of every command
//! and response. Raw responses can contain device configuration, so they are
//! only logged when the exporter runs with `debug` enabled, and then at INFO
//! so the default log filter shows them.

use tracing::info;

use crate::transport::{RemoteCommandChannel, TransportError};

/// Command used to identify the device operating system.
pub const VERSION_COMMAND: &str = "show version";

/// Operating system family of a network device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OsFamily {
    IosXe,
    NxOs,
    Ios,
    #[default]
    Unknown,
}

/// Substring signatures, checked in order. First match wins.
const OS_SIGNATURES: &[(&str, OsFamily)] = &[
    ("IOS XE", OsFamily::IosXe),
    ("NX-OS", OsFamily::NxOs),
    ("IOS Software", OsFamily::Ios),
];

impl OsFamily {
    /// Classifies a version-query response.
    pub fn detect(version_output: &str) -> Option<Self> {
        OS_SIGNATURES
            .iter()
            .find(|(signature, _)| version_output.contains(signature))
            .map(|&(_, family)| family)
    }
}

impl std::fmt::Display for OsFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            OsFamily::IosXe => "IOSXE",
            OsFamily::NxOs => "NXOS",
            OsFamily::Ios => "IOS",
            OsFamily::Unknown => "unknown",
        })
    }
}

/// Error type for OS identification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyError {
    /// The version query itself failed.
    Transport(TransportError),
    /// The version query answered but no signature matched.
    UnrecognizedOs,
}

impl std::fmt::Display for IdentifyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentifyError::Transport(e) => write!(f, "version query failed: {}", e),
            IdentifyError::UnrecognizedOs => write!(f, "unrecognized operating system"),
        }
    }
}

impl std::error::Error for IdentifyError {}

impl From<TransportError> for IdentifyError {
    fn from(e: TransportError) -> Self {
        IdentifyError::Transport(e)
    }
}

/// Short-lived client for one device. Not shared across devices or scrapes.
pub struct CommandClient {
    channel: Box<dyn RemoteCommandChannel>,
    debug: bool,
    os_family: OsFamily,
}

impl CommandClient {
    pub fn new(channel: Box<dyn RemoteCommandChannel>, debug: bool) -> Self {
        Self {
            channel,
            debug,
            os_family: OsFamily::Unknown,
        }
    }

    pub fn host(&self) -> &str {
        self.channel.host()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// OS family from the last [`identify`](Self::identify) call.
    pub fn os_family(&self) -> OsFamily {
        self.os_family
    }

    /// Runs the version query and records the OS family.
    ///
    /// Every call re-identifies; an unrecognized response resets the family
    /// to [`OsFamily::Unknown`].
    pub async fn identify(&mut self) -> Result<OsFamily, IdentifyError> {
        let output = self.run(VERSION_COMMAND).await?;
        self.os_family = OsFamily::detect(&output).unwrap_or_default();
        if self.os_family == OsFamily::Unknown {
            return Err(IdentifyError::UnrecognizedOs);
        }
        Ok(self.os_family)
    }

    /// Runs one command on the device. Transport failures are returned as-is.
    pub async fn run(&mut self, command: &str) -> Result<String, TransportError> {
        if self.debug {
            info!(host = self.host(), command, "running command");
        }
        let result = self.channel.run(command).await;
        if self.debug {
            match &result {
                Ok(output) => info!(host = self.host(), command, %output, "command output"),
                Err(e) => info!(host = self.host(), command, error = %e, "command failed"),
            }
        }
        result
    }
}
