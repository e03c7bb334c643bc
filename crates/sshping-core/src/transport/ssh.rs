//! SSH transport built on `russh`.
//!
//! [`SshConnector::connect`] dials the device, completes the handshake and
//! authenticates once; every [`RemoteCommandChannel::run`] then opens a fresh
//! session channel on that connection and executes one command. Host keys
//! are not verified.
//!
//! Anything that fails before a command starts (dial, handshake, auth,
//! channel open) is a [`TransportError::Connection`]. A non-zero exit status
//! is only an error when the command printed nothing: network CLIs and `ping`
//! exit non-zero on total packet loss while still printing the statistics we
//! need.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key, ssh_key};
use russh::{ChannelMsg, Preferred, cipher, kex};
use tracing::debug;

use super::{ConnectionSettings, Connector, RemoteCommandChannel, TransportError};
use crate::device::{DEFAULT_SSH_PORT, Device};

/// CBC ciphers still found on older IOS images.
const LEGACY_CIPHERS: &[cipher::Name] =
    &[cipher::AES_128_CBC, cipher::AES_192_CBC, cipher::AES_256_CBC];

/// SHA-1 Diffie-Hellman groups.
const LEGACY_KEX: &[kex::Name] = &[kex::DH_G14_SHA1, kex::DH_G1_SHA1];

/// Identity files tried, in order, when a key-auth device names none.
const DEFAULT_IDENTITIES: &[&str] = &[".ssh/id_ed25519", ".ssh/id_ecdsa", ".ssh/id_rsa"];

/// Extended data stream number of stderr.
const STDERR_STREAM: u32 = 1;

/// Connection options for one device, built from settings and [`AuthMethod`].
///
/// [`AuthMethod`]: crate::device::AuthMethod
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SshOptions {
    pub username: String,
    pub port: u16,
    pub password: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub connect_timeout: Duration,
    pub legacy_ciphers: bool,
}

impl SshOptions {
    pub fn new(device: &Device, settings: &ConnectionSettings) -> Self {
        let mut options = Self {
            port: device.port,
            connect_timeout: settings.connect_timeout,
            legacy_ciphers: settings.legacy_ciphers,
            ..Self::default()
        };
        device.auth.apply(&mut options);
        options
    }

    pub fn port(&self) -> u16 {
        if self.port == 0 {
            DEFAULT_SSH_PORT
        } else {
            self.port
        }
    }

    /// Algorithm preferences. Legacy mode appends CBC ciphers, SHA-1 key
    /// exchange and `ssh-rsa` host keys after the modern defaults.
    pub fn preferred(&self) -> Preferred {
        let mut preferred = Preferred::default();
        if !self.legacy_ciphers {
            return preferred;
        }

        let mut ciphers = preferred.cipher.to_vec();
        ciphers.extend_from_slice(LEGACY_CIPHERS);
        preferred.cipher = ciphers.into();

        let mut key_exchange = preferred.kex.to_vec();
        key_exchange.extend_from_slice(LEGACY_KEX);
        preferred.kex = key_exchange.into();

        let rsa_sha1 = ssh_key::Algorithm::Rsa { hash: None };
        if !preferred.key.contains(&rsa_sha1) {
            let mut keys = preferred.key.to_vec();
            keys.push(rsa_sha1);
            preferred.key = keys.into();
        }
        preferred
    }

    pub fn client_config(&self) -> client::Config {
        client::Config {
            inactivity_timeout: Some(self.connect_timeout.max(Duration::from_secs(1)).saturating_mul(6)),
            preferred: self.preferred(),
            ..client::Config::default()
        }
    }
}

impl std::fmt::Debug for SshOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshOptions")
            .field("username", &self.username)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("identity_file", &self.identity_file)
            .field("connect_timeout", &self.connect_timeout)
            .field("legacy_ciphers", &self.legacy_ciphers)
            .finish()
    }
}

/// Session handler. Accepts any server host key.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyHostKey;

impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connector that opens one SSH connection per device and scrape.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    /// Home directory used to find default identities.
    home: Option<PathBuf>,
}

impl SshConnector {
    pub fn new() -> Self {
        Self {
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }

    /// Identity files for a key-auth device: the configured one, else the
    /// default identities that exist.
    fn identities(&self, options: &SshOptions) -> Vec<PathBuf> {
        if let Some(path) = &options.identity_file {
            return vec![path.clone()];
        }
        let Some(home) = &self.home else {
            return Vec::new();
        };
        DEFAULT_IDENTITIES
            .iter()
            .map(|rel| home.join(rel))
            .filter(|path| path.is_file())
            .collect()
    }

    async fn open(
        &self,
        host: &str,
        options: &SshOptions,
    ) -> Result<Handle<AcceptAnyHostKey>, TransportError> {
        let config = Arc::new(options.client_config());
        let mut session = client::connect(config, (host, options.port()), AcceptAnyHostKey)
            .await
            .map_err(connection_error)?;

        let authenticated = match &options.password {
            Some(password) => session
                .authenticate_password(options.username.as_str(), password.as_str())
                .await
                .map_err(connection_error)?
                .success(),
            None => self.authenticate_with_keys(&mut session, options).await?,
        };
        if !authenticated {
            return Err(TransportError::Connection(format!(
                "authentication failed for user {}",
                options.username
            )));
        }
        Ok(session)
    }

    async fn authenticate_with_keys(
        &self,
        session: &mut Handle<AcceptAnyHostKey>,
        options: &SshOptions,
    ) -> Result<bool, TransportError> {
        let identities = self.identities(options);
        if identities.is_empty() {
            return Err(TransportError::Connection(
                "no identity file available for key authentication".to_string(),
            ));
        }
        let rsa_hash = session
            .best_supported_rsa_hash()
            .await
            .map_err(connection_error)?
            .flatten();

        for path in identities {
            let key = load_identity(&path)?;
            let key = PrivateKeyWithHashAlg::new(Arc::new(key), rsa_hash);
            let result = session
                .authenticate_publickey(options.username.as_str(), key)
                .await
                .map_err(connection_error)?;
            if result.success() {
                return Ok(true);
            }
            debug!(identity = %path.display(), "identity rejected");
        }
        Ok(false)
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        device: &Device,
        settings: &ConnectionSettings,
    ) -> Result<Box<dyn RemoteCommandChannel>, TransportError> {
        let options = SshOptions::new(device, settings);
        let session = tokio::time::timeout(options.connect_timeout, self.open(&device.host, &options))
            .await
            .map_err(|_| {
                TransportError::Connection(format!(
                    "connection timed out after {}s",
                    options.connect_timeout.as_secs_f64()
                ))
            })??;

        Ok(Box::new(SshChannel {
            host: device.host.clone(),
            session,
            batch_size: settings.batch_size.max(1),
        }))
    }
}

fn load_identity(path: &Path) -> Result<ssh_key::PrivateKey, TransportError> {
    load_secret_key(path, None).map_err(|e| {
        TransportError::Connection(format!("cannot load identity {}: {}", path.display(), e))
    })
}

fn connection_error(e: russh::Error) -> TransportError {
    TransportError::Connection(e.to_string())
}

/// Authenticated connection to one device.
pub struct SshChannel {
    host: String,
    session: Handle<AcceptAnyHostKey>,
    batch_size: usize,
}

#[async_trait]
impl RemoteCommandChannel for SshChannel {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&mut self, command: &str) -> Result<String, TransportError> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(connection_error)?;
        channel
            .exec(true, command)
            .await
            .map_err(connection_error)?;

        let mut output = CommandOutput::new(self.batch_size);
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => output.push_stdout(data),
                ChannelMsg::ExtendedData { ref data, ext } if ext == STDERR_STREAM => {
                    output.push_stderr(data)
                }
                ChannelMsg::ExitStatus { exit_status } => output.exit_status = Some(exit_status),
                _ => {}
            }
        }
        output.into_result()
    }
}

/// Output of one remote command, accumulated as channel messages arrive.
#[derive(Debug, Default)]
struct CommandOutput {
    batch_size: usize,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_status: Option<u32>,
}

impl CommandOutput {
    fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            stdout: Vec::with_capacity(batch_size.max(1)),
            ..Self::default()
        }
    }

    /// Appends stdout, growing the buffer one batch at a time.
    fn push_stdout(&mut self, data: &[u8]) {
        let needed = self.stdout.len() + data.len();
        if needed > self.stdout.capacity() {
            let batches = (needed - self.stdout.len()).div_ceil(self.batch_size);
            self.stdout.reserve_exact(batches * self.batch_size);
        }
        self.stdout.extend_from_slice(data);
    }

    fn push_stderr(&mut self, data: &[u8]) {
        self.stderr.extend_from_slice(data);
    }

    fn into_result(self) -> Result<String, TransportError> {
        let failed = self.exit_status.is_none_or(|status| status != 0);
        if failed && self.stdout.is_empty() {
            return Err(TransportError::Command {
                status: self.exit_status.and_then(|s| i32::try_from(s).ok()),
                stderr: String::from_utf8_lossy(&self.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&self.stdout).into_owned())
    }
}
