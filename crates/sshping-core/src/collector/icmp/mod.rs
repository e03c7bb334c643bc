//! ICMP reachability collector.
//!
//! Runs `ping -c <count> <dest>` on the device and maps the statistics block
//! to loss, average RTT, jitter and status gauges.

pub mod parser;

use async_trait::async_trait;
use tracing::info;

use super::{CollectError, LabelContext, MetricCollector, MetricDescriptor, SampleSink};
use crate::client::CommandClient;
use parser::{ProbeStatus, jitter_ms, parse_probe_output};

/// Label schema v1, shared by every probe sample.
pub const LABELS_V1: &[&str] = &["source", "dest", "target"];

pub const PACKET_LOSS: MetricDescriptor = MetricDescriptor {
    name: "sshping_icmp_packet_loss_percent",
    help: "Packet loss of the last probe in percent (0-100).",
    labels: LABELS_V1,
};

pub const RTT_AVG: MetricDescriptor = MetricDescriptor {
    name: "sshping_icmp_rtt_avg_ms",
    help: "Average round-trip time of the last probe in milliseconds.",
    labels: LABELS_V1,
};

pub const JITTER: MetricDescriptor = MetricDescriptor {
    name: "sshping_icmp_jitter_ms",
    help: "Max minus min round-trip time of the last probe in milliseconds.",
    labels: LABELS_V1,
};

pub const STATUS: MetricDescriptor = MetricDescriptor {
    name: "sshping_icmp_status",
    help: "1 if the destination answered the last probe, 0 otherwise.",
    labels: LABELS_V1,
};

static DESCRIPTORS: [MetricDescriptor; 4] = [PACKET_LOSS, RTT_AVG, JITTER, STATUS];

/// Stateless ICMP collector. One instance is shared by all devices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpCollector {
    packet_count: u32,
    jitter: bool,
}

impl IcmpCollector {
    pub fn new(packet_count: u32, jitter: bool) -> Self {
        Self {
            packet_count: packet_count.max(1),
            jitter,
        }
    }

    /// Probe command for `dest`. `dest` must already be validated.
    pub fn command(&self, dest: &str) -> String {
        format!("ping -c {} {}", self.packet_count, dest)
    }
}

#[async_trait]
impl MetricCollector for IcmpCollector {
    fn name(&self) -> &'static str {
        "icmp"
    }

    fn describe(&self) -> &'static [MetricDescriptor] {
        &DESCRIPTORS
    }

    async fn collect(
        &self,
        client: &mut CommandClient,
        labels: &LabelContext,
        sink: &mut SampleSink,
    ) -> Result<(), CollectError> {
        let output = client.run(&self.command(&labels.dest)).await?;
        let mut result = parse_probe_output(&output)?;
        if result.is_empty() {
            if client.debug() {
                info!(host = %labels.source, dest = %labels.dest, "no ping statistics in output");
            }
            return Ok(());
        }
        result.source = labels.source.clone();

        let values = [
            result.source.as_str(),
            labels.dest.as_str(),
            result.target.as_str(),
        ];
        sink.gauge(&PACKET_LOSS, &values, result.packet_loss_percent)?;

        if result.status == Some(ProbeStatus::Up) {
            sink.gauge(&RTT_AVG, &values, result.rtt_avg_ms)?;
            sink.gauge(&STATUS, &values, 1.0)?;
            if self.jitter {
                sink.gauge(
                    &JITTER,
                    &values,
                    jitter_ms(result.rtt_min_ms, result.rtt_max_ms),
                )?;
            }
        } else {
            sink.gauge(&STATUS, &values, 0.0)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::Sample;
    use crate::device::Device;
    use crate::transport::mock::MockConnector;
    use crate::transport::{ConnectionSettings, Connector, TransportError};

    const UP_OUTPUT: &str = "--- 10.0.0.1 ping statistics ---
5 packets transmitted, 5 received, 0% packet loss, time 4005ms
rtt min/avg/max/mdev = 1.200/5.500/12.345/3.001 ms
";

    async fn collect_from(
        connector: MockConnector,
        collector: &IcmpCollector,
    ) -> (Result<(), CollectError>, SampleSink) {
        let device = Device::with_password("sw1", "u", "p");
        let channel = connector
            .connect(&device, &ConnectionSettings::default())
            .await
            .unwrap_or_else(|e| panic!("connect failed: {}", e));
        let mut client = CommandClient::new(channel, false);
        let labels = LabelContext {
            source: "sw1".to_string(),
            dest: "10.0.0.1".to_string(),
        };
        let mut sink = SampleSink::new();
        let result = collector.collect(&mut client, &labels, &mut sink).await;
        (result, sink)
    }

    fn value_of(samples: &[Sample], name: &str) -> Option<f64> {
        samples
            .iter()
            .find(|s| s.descriptor.name == name)
            .map(|s| s.value)
    }

    #[test]
    fn test_command_uses_packet_count() {
        assert_eq!(
            IcmpCollector::new(5, true).command("baidu.com"),
            "ping -c 5 baidu.com"
        );
        assert_eq!(IcmpCollector::new(0, true).command("x"), "ping -c 1 x");
    }

    #[test]
    fn test_descriptors_share_label_schema() {
        let collector = IcmpCollector::new(5, true);
        assert_eq!(collector.describe().len(), 4);
        assert!(collector.describe().iter().all(|d| d.labels == LABELS_V1));
        assert!(
            collector
                .describe()
                .iter()
                .all(|d| d.name.starts_with("sshping_icmp_"))
        );
    }

    #[tokio::test]
    async fn test_collect_up_emits_all_gauges() {
        let collector = IcmpCollector::new(5, true);
        let connector =
            MockConnector::new().with_response("sw1", &collector.command("10.0.0.1"), UP_OUTPUT);
        let (result, sink) = collect_from(connector, &collector).await;
        result.unwrap();

        let samples = sink.into_samples();
        assert_eq!(samples.len(), 4);
        assert_eq!(
            value_of(&samples, "sshping_icmp_packet_loss_percent"),
            Some(0.0)
        );
        assert_eq!(value_of(&samples, "sshping_icmp_rtt_avg_ms"), Some(5.5));
        assert_eq!(value_of(&samples, "sshping_icmp_status"), Some(1.0));
        assert_eq!(value_of(&samples, "sshping_icmp_jitter_ms"), Some(11.145));

        let sample = &samples[0];
        assert_eq!(sample.label("source"), Some("sw1"));
        assert_eq!(sample.label("dest"), Some("10.0.0.1"));
        assert_eq!(sample.label("target"), Some("10.0.0.1"));
    }

    #[tokio::test]
    async fn test_collect_without_jitter() {
        let collector = IcmpCollector::new(5, false);
        let connector =
            MockConnector::new().with_response("sw1", &collector.command("10.0.0.1"), UP_OUTPUT);
        let (result, sink) = collect_from(connector, &collector).await;
        result.unwrap();
        let samples = sink.into_samples();
        assert_eq!(samples.len(), 3);
        assert_eq!(value_of(&samples, "sshping_icmp_jitter_ms"), None);
    }

    #[tokio::test]
    async fn test_collect_down_and_undetermined_emit_status_zero() {
        let collector = IcmpCollector::new(5, true);
        let down = "--- 10.0.0.1 ping statistics ---\n5 packets transmitted, 0 received, 100% packet loss\n";
        let connector =
            MockConnector::new().with_response("sw1", &collector.command("10.0.0.1"), down);
        let (result, sink) = collect_from(connector, &collector).await;
        result.unwrap();
        let samples = sink.into_samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(
            value_of(&samples, "sshping_icmp_packet_loss_percent"),
            Some(100.0)
        );
        assert_eq!(value_of(&samples, "sshping_icmp_status"), Some(0.0));

        let header_only = "--- 10.0.0.1 ping statistics ---\n";
        let connector =
            MockConnector::new().with_response("sw1", &collector.command("10.0.0.1"), header_only);
        let (result, sink) = collect_from(connector, &collector).await;
        result.unwrap();
        let samples = sink.into_samples();
        assert_eq!(value_of(&samples, "sshping_icmp_status"), Some(0.0));
        assert_eq!(value_of(&samples, "sshping_icmp_rtt_avg_ms"), None);
    }

    #[tokio::test]
    async fn test_collect_empty_output_is_soft_failure() {
        let collector = IcmpCollector::new(5, true);
        let connector = MockConnector::new().with_response(
            "sw1",
            &collector.command("10.0.0.1"),
            "% Unrecognized host or address.\n",
        );
        let (result, sink) = collect_from(connector, &collector).await;
        assert!(result.is_ok());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_collect_surfaces_errors() {
        let collector = IcmpCollector::new(5, true);
        let malformed = "--- h ping statistics ---\n1 packets transmitted, 1 received, x% packet loss\n";
        let connector =
            MockConnector::new().with_response("sw1", &collector.command("10.0.0.1"), malformed);
        let (result, sink) = collect_from(connector, &collector).await;
        assert!(matches!(result, Err(CollectError::Parse(_))));
        assert!(sink.is_empty());

        let failure = TransportError::Connection("connection reset".to_string());
        let connector = MockConnector::new().with_command_failure(
            "sw1",
            &collector.command("10.0.0.1"),
            failure.clone(),
        );
        let (result, _) = collect_from(connector, &collector).await;
        assert_eq!(result, Err(CollectError::Transport(failure)));
    }
}
