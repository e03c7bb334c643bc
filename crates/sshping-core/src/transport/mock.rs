//! In-memory transport for testing the pipeline without real devices.
//!
//! Devices are scripted per host: canned command outputs, command failures,
//! connection failures and artificial latency. Unscripted commands fail with
//! a command error, unscripted hosts fail to connect.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use super::{ConnectionSettings, Connector, RemoteCommandChannel, TransportError};
use crate::device::Device;

#[derive(Debug, Clone, Default)]
struct MockHost {
    responses: HashMap<String, Result<String, TransportError>>,
    connect_error: Option<String>,
    delay: Option<Duration>,
}

/// Scripted connector. Cheap to clone; clones share the connection counter.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    hosts: HashMap<String, MockHost>,
    connections: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts `command` on `host` to print `output`.
    pub fn with_response(mut self, host: &str, command: &str, output: &str) -> Self {
        self.host_mut(host)
            .responses
            .insert(command.to_string(), Ok(output.to_string()));
        self
    }

    /// Scripts `command` on `host` to fail.
    pub fn with_command_failure(mut self, host: &str, command: &str, error: TransportError) -> Self {
        self.host_mut(host)
            .responses
            .insert(command.to_string(), Err(error));
        self
    }

    /// Makes every connection attempt to `host` fail.
    pub fn with_connect_failure(mut self, host: &str, message: &str) -> Self {
        self.host_mut(host).connect_error = Some(message.to_string());
        self
    }

    /// Delays every command on `host`.
    pub fn with_delay(mut self, host: &str, delay: Duration) -> Self {
        self.host_mut(host).delay = Some(delay);
        self
    }

    /// Number of channels opened so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Highest number of commands that were running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn host_mut(&mut self, host: &str) -> &mut MockHost {
        self.hosts.entry(host.to_string()).or_default()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        device: &Device,
        _settings: &ConnectionSettings,
    ) -> Result<Box<dyn RemoteCommandChannel>, TransportError> {
        let host = self.hosts.get(&device.host).ok_or_else(|| {
            TransportError::Connection(format!("dial tcp {}: no route to host", device.host))
        })?;
        if let Some(message) = &host.connect_error {
            return Err(TransportError::Connection(message.clone()));
        }
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockChannel {
            host: device.host.clone(),
            script: host.clone(),
            in_flight: self.in_flight.clone(),
            max_in_flight: self.max_in_flight.clone(),
        }))
    }
}

struct MockChannel {
    host: String,
    script: MockHost,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

#[async_trait]
impl RemoteCommandChannel for MockChannel {
    fn host(&self) -> &str {
        &self.host
    }

    async fn run(&mut self, command: &str) -> Result<String, TransportError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        let result = self
            .script
            .responses
            .get(command)
            .cloned()
            .unwrap_or_else(|| {
                Err(TransportError::Command {
                    status: Some(127),
                    stderr: format!("{}: command not found", command),
                })
            });

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
