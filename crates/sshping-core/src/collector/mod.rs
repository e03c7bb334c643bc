//! Metric collectors.
//!
//! A [`MetricCollector`] declares a static set of [`MetricDescriptor`]s and
//! turns command output from one device into [`Sample`]s. Collectors are
//! shared by every device that enables their feature and may run for many
//! devices at once, so they hold no per-call state.
//!
//! # Architecture
//!
//! ```text
//!   ScrapeOrchestrator ──► CommandClient ──► RemoteCommandChannel
//!          │                    ▲
//!          ▼                    │ run(command)
//!   MetricCollector ────────────┘
//!          │ parse + map
//!          ▼
//!      SampleSink ──► ScrapeSnapshot ──► text exposition
//! ```

pub mod icmp;

use async_trait::async_trait;

use crate::client::CommandClient;
use crate::transport::TransportError;

pub use icmp::IcmpCollector;
pub use icmp::parser::ParseError;

/// Static description of one metric family.
#[derive(Debug, PartialEq, Eq)]
pub struct MetricDescriptor {
    pub name: &'static str,
    pub help: &'static str,
    pub labels: &'static [&'static str],
}

/// One gauge value with label values in descriptor order.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub descriptor: &'static MetricDescriptor,
    pub label_values: Vec<String>,
    pub value: f64,
}

impl Sample {
    /// Label value by label name.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.descriptor
            .labels
            .iter()
            .position(|l| *l == name)
            .map(|i| self.label_values[i].as_str())
    }
}

/// Error raised when a sample does not fit its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    LabelArity {
        metric: &'static str,
        expected: usize,
        got: usize,
    },
}

impl std::fmt::Display for MetricError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricError::LabelArity {
                metric,
                expected,
                got,
            } => write!(
                f,
                "metric {} expects {} label values, got {}",
                metric, expected, got
            ),
        }
    }
}

impl std::error::Error for MetricError {}

/// Accumulates samples for one device during a scrape.
#[derive(Debug, Default)]
pub struct SampleSink {
    samples: Vec<Sample>,
}

impl SampleSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a gauge value. Label values must match the descriptor's arity.
    pub fn gauge(
        &mut self,
        descriptor: &'static MetricDescriptor,
        label_values: &[&str],
        value: f64,
    ) -> Result<(), MetricError> {
        if label_values.len() != descriptor.labels.len() {
            return Err(MetricError::LabelArity {
                metric: descriptor.name,
                expected: descriptor.labels.len(),
                got: label_values.len(),
            });
        }
        self.samples.push(Sample {
            descriptor,
            label_values: label_values.iter().map(|v| v.to_string()).collect(),
            value,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn into_samples(self) -> Vec<Sample> {
        self.samples
    }
}

/// Identity labels supplied by the scrape for every probe sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelContext {
    /// Device the probe runs on.
    pub source: String,
    /// Destination the device probes.
    pub dest: String,
}

/// Error type for one collector run on one device.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectError {
    Transport(TransportError),
    Parse(ParseError),
    Metric(MetricError),
    Timeout,
}

impl CollectError {
    /// True when the device itself is unreachable, not just one command.
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            CollectError::Transport(TransportError::Connection(_)) | CollectError::Timeout
        )
    }
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Transport(e) => write!(f, "{}", e),
            CollectError::Parse(e) => write!(f, "{}", e),
            CollectError::Metric(e) => write!(f, "{}", e),
            CollectError::Timeout => write!(f, "device timed out"),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<TransportError> for CollectError {
    fn from(e: TransportError) -> Self {
        CollectError::Transport(e)
    }
}

impl From<ParseError> for CollectError {
    fn from(e: ParseError) -> Self {
        CollectError::Parse(e)
    }
}

impl From<MetricError> for CollectError {
    fn from(e: MetricError) -> Self {
        CollectError::Metric(e)
    }
}

/// A device-feature collector.
#[async_trait]
pub trait MetricCollector: Send + Sync {
    /// Human readable name for logs and the duration metric.
    fn name(&self) -> &'static str;

    /// Every metric family this collector may emit.
    fn describe(&self) -> &'static [MetricDescriptor];

    /// Runs the collector's commands through `client` and records samples.
    async fn collect(
        &self,
        client: &mut CommandClient,
        labels: &LabelContext,
        sink: &mut SampleSink,
    ) -> Result<(), CollectError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    static PAIR: MetricDescriptor = MetricDescriptor {
        name: "test_pair",
        help: "Two labels.",
        labels: &["a", "b"],
    };

    #[test]
    fn test_gauge_checks_label_arity() {
        let mut sink = SampleSink::new();
        sink.gauge(&PAIR, &["x", "y"], 1.0).unwrap();

        let err = sink.gauge(&PAIR, &["x"], 1.0).unwrap_err();
        assert_eq!(
            err,
            MetricError::LabelArity {
                metric: "test_pair",
                expected: 2,
                got: 1
            }
        );
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_sample_label_lookup() {
        let mut sink = SampleSink::new();
        sink.gauge(&PAIR, &["x", "y"], 2.5).unwrap();
        let sample = &sink.into_samples()[0];
        assert_eq!(sample.label("b"), Some("y"));
        assert_eq!(sample.label("c"), None);
    }

    #[test]
    fn test_connection_errors_are_classified() {
        let conn = CollectError::from(TransportError::Connection("refused".to_string()));
        let cmd = CollectError::from(TransportError::Command {
            status: Some(1),
            stderr: String::new(),
        });
        assert!(conn.is_connection());
        assert!(CollectError::Timeout.is_connection());
        assert!(!cmd.is_connection());
    }
}
