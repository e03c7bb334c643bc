//! Remote command transport.
//!
//! The collection pipeline only needs "run a command on a device, get text
//! back, or fail". [`Connector`] opens a [`RemoteCommandChannel`] bound to one
//! device; the channel is used for one scrape and then dropped.
//!
//! Implementations:
//! - [`SshConnector`]: one `russh` connection per device, one channel per command
//! - [`mock::MockConnector`]: scripted in-memory devices for tests

pub mod mock;
pub mod ssh;

use std::time::Duration;

use async_trait::async_trait;

use crate::device::Device;

pub use ssh::SshConnector;

/// Error type for remote command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Dial, authentication or session setup failed.
    Connection(String),
    /// The session worked but the command failed and produced no output.
    Command {
        status: Option<i32>,
        stderr: String,
    },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Connection(msg) => write!(f, "connection failed: {}", msg),
            TransportError::Command { status, stderr } => match status {
                Some(code) => write!(f, "command exited with status {}: {}", code, stderr),
                None => write!(f, "command terminated by signal: {}", stderr),
            },
        }
    }
}

impl std::error::Error for TransportError {}

/// Transport tuning shared by every device of a configuration generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub connect_timeout: Duration,
    /// Command output buffers grow by this many bytes at a time.
    pub batch_size: usize,
    pub legacy_ciphers: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            batch_size: 10000,
            legacy_ciphers: false,
        }
    }
}

/// An authenticated command session bound to one device.
#[async_trait]
pub trait RemoteCommandChannel: Send {
    /// Host this channel talks to.
    fn host(&self) -> &str;

    /// Runs one command and returns its textual output.
    async fn run(&mut self, command: &str) -> Result<String, TransportError>;
}

/// Opens command channels to devices.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        device: &Device,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn RemoteCommandChannel>, TransportError>;
}
