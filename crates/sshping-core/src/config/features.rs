//! Feature keys and per-device feature toggles.

use serde::{Deserialize, Serialize};

/// A device-capability family that may have a collector attached.
///
/// Only `Icmp` has a collector today; the remaining keys are accepted in
/// configuration so existing config documents keep loading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Feature {
    Icmp,
    Bgp,
    Environment,
    Facts,
    Interfaces,
    Optics,
}

impl Feature {
    /// All known feature keys, in registry order.
    pub const ALL: [Feature; 6] = [
        Feature::Icmp,
        Feature::Bgp,
        Feature::Environment,
        Feature::Facts,
        Feature::Interfaces,
        Feature::Optics,
    ];

    /// Stable key used in config documents and logs.
    pub fn key(self) -> &'static str {
        match self {
            Feature::Icmp => "icmp",
            Feature::Bgp => "bgp",
            Feature::Environment => "environment",
            Feature::Facts => "facts",
            Feature::Interfaces => "interfaces",
            Feature::Optics => "optics",
        }
    }
}

impl std::fmt::Display for Feature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Tri-state feature switches. `None` means "inherit".
///
/// Global toggles are overridden key by key by a device's own toggles.
/// A key that is unset everywhere counts as enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureToggles {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icmp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bgp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interfaces: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optics: Option<bool>,
}

impl FeatureToggles {
    pub fn get(&self, feature: Feature) -> Option<bool> {
        match feature {
            Feature::Icmp => self.icmp,
            Feature::Bgp => self.bgp,
            Feature::Environment => self.environment,
            Feature::Facts => self.facts,
            Feature::Interfaces => self.interfaces,
            Feature::Optics => self.optics,
        }
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        let slot = match feature {
            Feature::Icmp => &mut self.icmp,
            Feature::Bgp => &mut self.bgp,
            Feature::Environment => &mut self.environment,
            Feature::Facts => &mut self.facts,
            Feature::Interfaces => &mut self.interfaces,
            Feature::Optics => &mut self.optics,
        };
        *slot = Some(enabled);
    }

    /// Returns a copy where every key set in `overrides` replaces ours.
    pub fn merged(&self, overrides: &FeatureToggles) -> FeatureToggles {
        let mut out = self.clone();
        for feature in Feature::ALL {
            if let Some(enabled) = overrides.get(feature) {
                out.set(feature, enabled);
            }
        }
        out
    }

    pub fn is_enabled(&self, feature: Feature) -> bool {
        self.get(feature).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_feature_is_enabled() {
        let toggles = FeatureToggles::default();
        assert!(toggles.is_enabled(Feature::Icmp));
        assert!(toggles.is_enabled(Feature::Optics));
    }

    #[test]
    fn test_device_override_wins_per_key() {
        let mut global = FeatureToggles::default();
        global.set(Feature::Icmp, true);
        global.set(Feature::Bgp, false);

        let mut device = FeatureToggles::default();
        device.set(Feature::Icmp, false);

        let merged = global.merged(&device);
        assert_eq!(merged.icmp, Some(false));
        assert_eq!(merged.bgp, Some(false));
        assert_eq!(merged.facts, None);
    }

    #[test]
    fn test_feature_keys_are_unique() {
        let mut keys: Vec<&str> = Feature::ALL.iter().map(|f| f.key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), Feature::ALL.len());
    }
}
