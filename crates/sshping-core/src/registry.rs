//! Collector registry for one configuration generation.
//!
//! Maps every feature key to at most one shared collector instance, and every
//! device host to the ordered collectors it has enabled. Built on initial
//! load and on every reload; building never touches the network.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::collector::{IcmpCollector, MetricCollector, MetricDescriptor};
use crate::config::ExporterConfig;
use crate::config::features::Feature;
use crate::device::Device;

/// A collector bound to the feature key that enabled it.
pub type BoundCollector = (Feature, Arc<dyn MetricCollector>);

/// Feature key → singleton collector, device host → enabled collectors.
pub struct CollectorRegistry {
    collectors: BTreeMap<Feature, Arc<dyn MetricCollector>>,
    devices: HashMap<String, Vec<BoundCollector>>,
}

impl CollectorRegistry {
    /// Builds the registry for `devices` using collector settings from `config`.
    ///
    /// Feature keys without a collector implementation are skipped even when
    /// enabled. Every device gets an entry, possibly empty.
    pub fn build(config: &ExporterConfig, devices: &[Device]) -> Self {
        let mut collectors: BTreeMap<Feature, Arc<dyn MetricCollector>> = BTreeMap::new();
        let mut device_map = HashMap::with_capacity(devices.len());

        for device in devices {
            let mut enabled = Vec::new();
            for feature in Feature::ALL {
                if !device.features.is_enabled(feature) {
                    continue;
                }
                let collector = match collectors.entry(feature) {
                    Entry::Occupied(existing) => Some(existing.get().clone()),
                    Entry::Vacant(slot) => {
                        new_collector(feature, config).map(|created| slot.insert(created).clone())
                    }
                };
                if let Some(collector) = collector {
                    enabled.push((feature, collector));
                }
            }
            device_map.insert(device.host.clone(), enabled);
        }

        Self {
            collectors,
            devices: device_map,
        }
    }

    /// Collectors enabled for `host`, in feature order. Empty for unknown hosts.
    pub fn collectors_for(&self, host: &str) -> &[BoundCollector] {
        self.devices.get(host).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Feature keys enabled for `host`, in order.
    pub fn features_for(&self, host: &str) -> Vec<Feature> {
        self.collectors_for(host).iter().map(|(f, _)| *f).collect()
    }

    /// Shared instance for `feature`, if any device enabled it.
    pub fn collector(&self, feature: Feature) -> Option<&Arc<dyn MetricCollector>> {
        self.collectors.get(&feature)
    }

    /// Every metric family the instantiated collectors may emit.
    pub fn descriptors(&self) -> Vec<&'static MetricDescriptor> {
        self.collectors
            .values()
            .flat_map(|c| c.describe().iter())
            .collect()
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    pub fn collector_count(&self) -> usize {
        self.collectors.len()
    }
}

impl std::fmt::Debug for CollectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let collectors: Vec<&str> = self.collectors.keys().map(|k| k.key()).collect();
        f.debug_struct("CollectorRegistry")
            .field("collectors", &collectors)
            .field("devices", &self.devices.len())
            .finish()
    }
}

/// Collector factory. `None` for feature keys that have no collector yet.
fn new_collector(feature: Feature, config: &ExporterConfig) -> Option<Arc<dyn MetricCollector>> {
    match feature {
        Feature::Icmp => Some(Arc::new(IcmpCollector::new(
            config.ping.count,
            config.ping.jitter,
        ))),
        Feature::Bgp
        | Feature::Environment
        | Feature::Facts
        | Feature::Interfaces
        | Feature::Optics => None,
    }
}
