//! Prometheus text exposition of a scrape snapshot.
//!
//! Every scrape gets its own `prometheus::Registry`, so overlapping scrapes
//! and reloads never share registration state.

use std::collections::HashMap;

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use crate::collector::MetricDescriptor;
use crate::scrape::ScrapeSnapshot;

/// Content type of [`encode`]'s output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Encodes `snapshot` in the Prometheus text format.
///
/// Families without samples are omitted. Samples of families missing from
/// `snapshot.descriptors` are still encoded.
pub fn encode(snapshot: &ScrapeSnapshot) -> Result<String, prometheus::Error> {
    let registry = Registry::new();
    let mut families: HashMap<&'static str, GaugeVec> = HashMap::new();

    let sampled = snapshot.samples.iter().map(|s| s.descriptor);
    for descriptor in snapshot.descriptors.iter().copied().chain(sampled) {
        if families.contains_key(descriptor.name) {
            continue;
        }
        let family = gauge_family(descriptor)?;
        registry.register(Box::new(family.clone()))?;
        families.insert(descriptor.name, family);
    }

    for sample in &snapshot.samples {
        let Some(family) = families.get(sample.descriptor.name) else {
            continue;
        };
        let values: Vec<&str> = sample.label_values.iter().map(String::as_str).collect();
        family.get_metric_with_label_values(&values)?.set(sample.value);
    }

    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

fn gauge_family(descriptor: &MetricDescriptor) -> Result<GaugeVec, prometheus::Error> {
    GaugeVec::new(Opts::new(descriptor.name, descriptor.help), descriptor.labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::SampleSink;
    use crate::collector::icmp::{PACKET_LOSS, STATUS};
    use crate::scrape::UP;

    fn snapshot() -> ScrapeSnapshot {
        let mut sink = SampleSink::new();
        sink.gauge(&PACKET_LOSS, &["sw1", "baidu.com", "baidu.com"], 40.0)
            .unwrap();
        sink.gauge(&STATUS, &["sw1", "baidu.com", "baidu.com"], 1.0)
            .unwrap();
        sink.gauge(&UP, &["sw1"], 1.0).unwrap();
        sink.gauge(&UP, &["sw2"], 0.0).unwrap();
        ScrapeSnapshot {
            generation: 1,
            descriptors: vec![&PACKET_LOSS, &STATUS, &UP],
            samples: sink.into_samples(),
        }
    }

    #[test]
    fn test_encode_text_format() {
        let text = encode(&snapshot()).unwrap();
        assert!(text.contains("# HELP sshping_icmp_packet_loss_percent"));
        assert!(text.contains("# TYPE sshping_icmp_packet_loss_percent gauge"));
        let loss = text
            .lines()
            .find(|l| l.starts_with("sshping_icmp_packet_loss_percent{"))
            .unwrap();
        assert!(loss.contains(r#"source="sw1""#));
        assert!(loss.contains(r#"dest="baidu.com""#));
        assert!(loss.contains(r#"target="baidu.com""#));
        assert!(loss.ends_with(" 40"));
        assert!(text.contains(r#"sshping_up{source="sw1"} 1"#));
        assert!(text.contains(r#"sshping_up{source="sw2"} 0"#));
    }

    #[test]
    fn test_families_without_samples_are_omitted() {
        let mut snapshot = snapshot();
        snapshot.samples.retain(|s| s.descriptor.name == "sshping_up");
        let text = encode(&snapshot).unwrap();
        assert!(!text.contains("sshping_icmp_status"));
        assert!(text.contains("sshping_up"));
    }

    #[test]
    fn test_empty_snapshot_encodes_to_empty_body() {
        let snapshot = ScrapeSnapshot {
            generation: 3,
            descriptors: vec![&UP],
            samples: Vec::new(),
        };
        assert_eq!(encode(&snapshot).unwrap(), "");
    }

    #[test]
    fn test_each_encode_uses_a_fresh_registry() {
        let snapshot = snapshot();
        let first = encode(&snapshot).unwrap();
        let second = encode(&snapshot).unwrap();
        assert_eq!(first, second);
    }
}
