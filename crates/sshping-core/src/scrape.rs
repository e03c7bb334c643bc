//! Per-request scrape orchestration.
//!
//! ```text
//!   ScrapeRequest ──► snapshot() ──► resolve dest + target devices
//!                                          │
//!                  ┌───────────────────────┼───────────────────────┐
//!                  ▼                       ▼                       ▼
//!             device task             device task             device task
//!       (semaphore permit, deadline, connect, identify, collectors)
//!                  └───────────────────────┼───────────────────────┘
//!                                          ▼
//!                                   ScrapeSnapshot
//! ```
//!
//! Device tasks run on a `JoinSet` bounded by a semaphore. Each task gets a
//! deadline of `min(device_timeout, request deadline)`; a device that misses
//! it reports `up 0` and its SSH connection is closed when the task future is
//! dropped. Failures never leave the device task: the scrape always returns
//! whatever the other devices produced.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::client::{CommandClient, IdentifyError};
use crate::config::MAX_DEVICE_TIMEOUT;
use crate::collector::{CollectError, LabelContext, MetricDescriptor, Sample, SampleSink};
use crate::device::Device;
use crate::registry::BoundCollector;
use crate::state::{ExporterState, Generation};
use crate::transport::{ConnectionSettings, Connector, TransportError};

pub const UP: MetricDescriptor = MetricDescriptor {
    name: "sshping_up",
    help: "1 if the device was reachable and every collector ran without transport failure.",
    labels: &["source"],
};

pub const COLLECTOR_DURATION: MetricDescriptor = MetricDescriptor {
    name: "sshping_collector_duration_seconds",
    help: "Time spent in one collector for one device.",
    labels: &["source", "collector"],
};

const MAX_DESTINATION_LEN: usize = 253;

/// Inbound scrape parameters, as received at the boundary.
#[derive(Debug, Clone, Default)]
pub struct ScrapeRequest {
    /// Probe destination override. Empty counts as absent.
    pub dest: Option<String>,
    /// Restrict the scrape to one configured device host. Empty counts as absent.
    pub target: Option<String>,
    /// Deadline imposed by the scraper, if any.
    pub deadline: Option<Instant>,
}

/// Client-facing scrape errors. Nothing is collected when one is returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeError {
    UnknownTarget(String),
    InvalidDestination(String),
}

impl std::fmt::Display for ScrapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScrapeError::UnknownTarget(host) => write!(f, "not found target: {}", host),
            ScrapeError::InvalidDestination(dest) => write!(f, "invalid destination: {:?}", dest),
        }
    }
}

impl std::error::Error for ScrapeError {}

/// Everything one scrape produced, ready for encoding.
#[derive(Debug, Clone)]
pub struct ScrapeSnapshot {
    /// Configuration generation the scrape ran against.
    pub generation: u64,
    pub descriptors: Vec<&'static MetricDescriptor>,
    pub samples: Vec<Sample>,
}

impl ScrapeSnapshot {
    /// Samples of one metric family.
    pub fn samples_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Sample> + 'a {
        self.samples.iter().filter(move |s| s.descriptor.name == name)
    }
}

/// Runs scrapes against the live configuration generation.
pub struct ScrapeOrchestrator {
    state: Arc<ExporterState>,
    connector: Arc<dyn Connector>,
}

impl ScrapeOrchestrator {
    pub fn new(state: Arc<ExporterState>, connector: Arc<dyn Connector>) -> Self {
        Self { state, connector }
    }

    pub fn state(&self) -> &Arc<ExporterState> {
        &self.state
    }

    /// Scrapes the selected devices concurrently and merges their samples.
    pub async fn scrape(&self, request: ScrapeRequest) -> Result<ScrapeSnapshot, ScrapeError> {
        let generation = self.state.snapshot().await;
        let config = &generation.config;

        let dest = match non_empty(request.dest.as_deref()) {
            Some(dest) => dest.to_string(),
            None => config.ping.destination.clone(),
        };
        validate_destination(&dest)?;

        let devices = select_devices(&generation, non_empty(request.target.as_deref()))?;

        let semaphore = Arc::new(Semaphore::new(config.scrape.max_concurrency.max(1)));
        let settings = config.connection_settings();
        let mut tasks = JoinSet::new();

        for device in devices {
            let collectors = generation.registry.collectors_for(&device.host).to_vec();
            if collectors.is_empty() {
                continue;
            }
            let job = DeviceJob {
                labels: LabelContext {
                    source: device.host.clone(),
                    dest: dest.clone(),
                },
                device,
                collectors,
                connector: self.connector.clone(),
                settings: settings.clone(),
                debug: config.debug,
                identify_os: config.identify_os,
                device_timeout: config.device_timeout(),
                deadline: request.deadline,
            };
            tasks.spawn(job.run(semaphore.clone()));
        }

        let mut samples = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(device_samples) => samples.extend(device_samples),
                Err(e) => warn!(error = %e, "device task failed"),
            }
        }

        let mut descriptors = generation.registry.descriptors();
        descriptors.push(&UP);
        descriptors.push(&COLLECTOR_DURATION);

        debug!(
            version = generation.version,
            dest = %dest,
            samples = samples.len(),
            "scrape finished"
        );
        Ok(ScrapeSnapshot {
            generation: generation.version,
            descriptors,
            samples,
        })
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn select_devices(
    generation: &Generation,
    target: Option<&str>,
) -> Result<Vec<Arc<Device>>, ScrapeError> {
    match target {
        Some(host) => generation
            .find_device(host)
            .map(|device| vec![device.clone()])
            .ok_or_else(|| ScrapeError::UnknownTarget(host.to_string())),
        None => Ok(generation.devices.clone()),
    }
}

/// Destinations are interpolated into a remote shell command, so only
/// hostname and IP literal characters are accepted.
pub fn validate_destination(dest: &str) -> Result<(), ScrapeError> {
    let valid = !dest.is_empty()
        && dest.len() <= MAX_DESTINATION_LEN
        && !dest.starts_with('-')
        && dest
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-'));
    if valid {
        Ok(())
    } else {
        Err(ScrapeError::InvalidDestination(dest.to_string()))
    }
}

/// Per-device deadline: the device timeout, capped by the request deadline.
fn device_deadline(now: Instant, device_timeout: Duration, request: Option<Instant>) -> Instant {
    match now.checked_add(device_timeout.min(MAX_DEVICE_TIMEOUT)) {
        Some(own) => request.map_or(own, |deadline| deadline.min(own)),
        None => request.unwrap_or(now),
    }
}

/// Work for one device in one scrape.
struct DeviceJob {
    device: Arc<Device>,
    collectors: Vec<BoundCollector>,
    connector: Arc<dyn Connector>,
    settings: ConnectionSettings,
    labels: LabelContext,
    debug: bool,
    identify_os: bool,
    device_timeout: Duration,
    deadline: Option<Instant>,
}

impl DeviceJob {
    async fn run(self, semaphore: Arc<Semaphore>) -> Vec<Sample> {
        let mut sink = SampleSink::new();
        let host = self.device.host.as_str();

        let acquire = semaphore.acquire_owned();
        let permit = match self.deadline {
            Some(deadline) => timeout_at(deadline, acquire).await.ok().and_then(Result::ok),
            None => acquire.await.ok(),
        };

        let up = match permit {
            None => {
                warn!(host, "no worker slot before scrape deadline");
                false
            }
            Some(_permit) => {
                let deadline =
                    device_deadline(Instant::now(), self.device_timeout, self.deadline);
                match timeout_at(deadline, self.collect(&mut sink)).await {
                    Ok(up) => up,
                    Err(_) => {
                        warn!(
                            host,
                            timeout_secs = self.device_timeout.as_secs_f64(),
                            error = %CollectError::Timeout,
                            "device did not finish in time"
                        );
                        false
                    }
                }
            }
        };

        if let Err(e) = sink.gauge(&UP, &[host], if up { 1.0 } else { 0.0 }) {
            warn!(host, error = %e, "failed to record up metric");
        }
        sink.into_samples()
    }

    /// Connects and runs every collector. Returns the `up` value.
    async fn collect(&self, sink: &mut SampleSink) -> bool {
        let host = self.device.host.as_str();
        let channel = match self.connector.connect(&self.device, &self.settings).await {
            Ok(channel) => channel,
            Err(e) => {
                warn!(host, error = %e, "connection failed");
                return false;
            }
        };
        let mut client = CommandClient::new(channel, self.debug);

        if self.identify_os {
            match client.identify().await {
                Ok(os) => debug!(host, os = %os, "device identified"),
                Err(IdentifyError::Transport(e @ TransportError::Connection(_))) => {
                    warn!(host, error = %e, "connection lost during identification");
                    return false;
                }
                Err(e) => warn!(host, error = %e, "os identification failed, continuing"),
            }
        }

        let mut up = true;
        for (feature, collector) in &self.collectors {
            let started = Instant::now();
            let result = collector.collect(&mut client, &self.labels, sink).await;
            let elapsed = started.elapsed().as_secs_f64();
            if let Err(e) = sink.gauge(&COLLECTOR_DURATION, &[host, collector.name()], elapsed) {
                warn!(host, error = %e, "failed to record collector duration");
            }

            let Err(e) = result else {
                continue;
            };
            warn!(
                host,
                feature = feature.key(),
                collector = collector.name(),
                error = %e,
                "collector failed"
            );
            if matches!(e, CollectError::Transport(_) | CollectError::Timeout) {
                up = false;
            }
            if e.is_connection() {
                break;
            }
        }
        up
    }
}
