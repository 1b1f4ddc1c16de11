use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::internal::common::error::GresError;
use crate::internal::common::{Map, Set};
use crate::internal::resources::amount::MemAmount;
use crate::internal::resources::descriptor::{DeviceFamily, DeviceGroup};
use crate::internal::resources::map::split_type_name;
use crate::internal::resources::request::AffinityPolicy;

/// Upper bound for socket indices in a device layout
const MAX_SOCKETS: u32 = 1024;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeviceTypeConfig {
    /// Type identifier, e.g. "gpu" or "gpu:a100"
    pub name: String,
    pub family: DeviceFamily,
    #[serde(default)]
    pub shared: bool,
    /// Node name (or "*") -> device groups
    #[serde(default)]
    pub nodes: Map<String, Vec<DeviceGroup>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct GresConfig {
    pub device_types: Vec<DeviceTypeConfig>,
    /// Affinity policy for types that are not GPU-like
    pub default_affinity: AffinityPolicy,
    /// Affinity policy for GPU-like types
    pub gpu_affinity: AffinityPolicy,
    /// Memory reserved per allocated device when a request does not say otherwise
    pub default_mem_per_device: Map<String, MemAmount>,
    /// Types projected into accounting; `None` tracks every type
    pub tracked_types: Option<Vec<String>>,
}

impl GresConfig {
    pub fn from_json_str(text: &str) -> crate::Result<Self> {
        let config: GresConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        log::debug!("Loading device configuration from {}", path.display());
        Self::from_json_str(&text)
    }

    pub fn affinity_for(&self, gpu_like: bool) -> AffinityPolicy {
        if gpu_like {
            self.gpu_affinity
        } else {
            self.default_affinity
        }
    }

    pub fn is_tracked(&self, type_name: &str) -> bool {
        self.tracked_types
            .as_ref()
            .is_none_or(|types| types.iter().any(|t| t == type_name))
    }

    pub fn validate(&self) -> crate::Result<()> {
        let mut names = Set::default();
        for device_type in &self.device_types {
            let (base, subtype) = split_type_name(&device_type.name);
            if base.is_empty() || subtype.is_some_and(|s| s.is_empty()) {
                return Err(GresError::ConfigError(format!(
                    "Invalid device type name '{}'",
                    device_type.name
                )));
            }
            if !names.insert(device_type.name.as_str()) {
                return Err(GresError::ConfigError(format!(
                    "Device type {} defined twice",
                    device_type.name
                )));
            }
            for (node, groups) in &device_type.nodes {
                for group in groups {
                    if group.shares_per_device == 0 {
                        return Err(GresError::ConfigError(format!(
                            "Device type {} on node {node} has zero shares per device",
                            device_type.name
                        )));
                    }
                    if !device_type.shared && group.shares_per_device != 1 {
                        return Err(GresError::ConfigError(format!(
                            "Device type {} is not shared but defines shares on node {node}",
                            device_type.name
                        )));
                    }
                    if group
                        .sockets
                        .as_ref()
                        .is_some_and(|s| s.iter().any(|s| *s >= MAX_SOCKETS))
                    {
                        return Err(GresError::ConfigError(format!(
                            "Device type {} on node {node} has an invalid socket",
                            device_type.name
                        )));
                    }
                }
            }
        }
        for name in self.default_mem_per_device.keys() {
            if !names.contains(name.as_str()) {
                return Err(GresError::ConfigError(format!(
                    "Memory per device set for unknown device type {name}"
                )));
            }
        }
        Ok(())
    }
}
