use serde::{Deserialize, Serialize};

use crate::internal::common::Map;
use crate::internal::common::ids::SocketId;
use crate::internal::resources::amount::DeviceCount;
use crate::internal::resources::node::NodeTopology;

/// Layout entry key that applies to every node without an explicit entry
pub const ANY_NODE: &str = "*";

fn default_shares() -> DeviceCount {
    1
}

/// A group of identical devices with the same socket affinity
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct DeviceGroup {
    pub count: u32,
    #[serde(default)]
    pub sockets: Option<Vec<u32>>,
    #[serde(default = "default_shares")]
    pub shares_per_device: DeviceCount,
}

impl DeviceGroup {
    pub fn new(count: u32) -> Self {
        DeviceGroup {
            count,
            sockets: None,
            shares_per_device: 1,
        }
    }

    pub fn with_sockets(count: u32, sockets: &[u32]) -> Self {
        DeviceGroup {
            count,
            sockets: Some(sockets.to_vec()),
            shares_per_device: 1,
        }
    }
}

/// One enumerated item: `count` devices of `type_name` with optional socket affinity
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DeviceDescriptorItem {
    pub type_name: String,
    pub sockets: Option<Vec<SocketId>>,
    pub count: u32,
    pub shares_per_device: DeviceCount,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DeviceFamily {
    Gpu,
    Nic,
    Generic,
}

/// Contract of the device plugin layer.
///
/// Plugins are consulted when a node is (re)registered, never during allocation calls;
/// their answers are cached in the node's device pools.
pub trait DevicePlugin: Send + Sync {
    /// Devices present on the node, in device index order
    fn enumerate(&self, node: &NodeTopology) -> Vec<DeviceDescriptorItem>;

    fn is_shared(&self, type_name: &str) -> bool;

    /// GPU-like types use the GPU default for binding enforcement
    fn is_gpu_like(&self, type_name: &str) -> bool;
}

/// Per-node device layout for a single type name, taken from static configuration
#[derive(Debug, Clone)]
pub struct StaticLayout {
    type_name: String,
    shared: bool,
    nodes: Map<String, Vec<DeviceGroup>>,
}

impl StaticLayout {
    pub fn new(type_name: &str, shared: bool, nodes: Map<String, Vec<DeviceGroup>>) -> Self {
        StaticLayout {
            type_name: type_name.to_string(),
            shared,
            nodes,
        }
    }

    fn owns(&self, type_name: &str) -> bool {
        self.type_name == type_name
    }

    fn enumerate(&self, node: &NodeTopology) -> Vec<DeviceDescriptorItem> {
        let Some(groups) = self
            .nodes
            .get(&node.name)
            .or_else(|| self.nodes.get(ANY_NODE))
        else {
            return Vec::new();
        };
        groups
            .iter()
            .filter(|g| g.count > 0)
            .map(|g| DeviceDescriptorItem {
                type_name: self.type_name.clone(),
                sockets: g
                    .sockets
                    .as_ref()
                    .map(|s| s.iter().map(|&s| SocketId::new(s)).collect()),
                count: g.count,
                shares_per_device: if self.shared { g.shares_per_device } else { 1 },
            })
            .collect()
    }
}

pub struct GpuPlugin {
    layout: StaticLayout,
}

impl GpuPlugin {
    pub fn new(layout: StaticLayout) -> Self {
        GpuPlugin { layout }
    }
}

impl DevicePlugin for GpuPlugin {
    fn enumerate(&self, node: &NodeTopology) -> Vec<DeviceDescriptorItem> {
        self.layout.enumerate(node)
    }

    fn is_shared(&self, type_name: &str) -> bool {
        self.layout.owns(type_name) && self.layout.shared
    }

    fn is_gpu_like(&self, type_name: &str) -> bool {
        self.layout.owns(type_name)
    }
}

pub struct NicPlugin {
    layout: StaticLayout,
}

impl NicPlugin {
    pub fn new(layout: StaticLayout) -> Self {
        NicPlugin { layout }
    }
}

impl DevicePlugin for NicPlugin {
    fn enumerate(&self, node: &NodeTopology) -> Vec<DeviceDescriptorItem> {
        self.layout.enumerate(node)
    }

    // Network adapters are never split between jobs
    fn is_shared(&self, _type_name: &str) -> bool {
        false
    }

    fn is_gpu_like(&self, _type_name: &str) -> bool {
        false
    }
}

pub struct GenericPlugin {
    layout: StaticLayout,
}

impl GenericPlugin {
    pub fn new(layout: StaticLayout) -> Self {
        GenericPlugin { layout }
    }
}

impl DevicePlugin for GenericPlugin {
    fn enumerate(&self, node: &NodeTopology) -> Vec<DeviceDescriptorItem> {
        self.layout.enumerate(node)
    }

    fn is_shared(&self, type_name: &str) -> bool {
        self.layout.owns(type_name) && self.layout.shared
    }

    fn is_gpu_like(&self, _type_name: &str) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::resources::node::NodeTopologyBuilder;

    fn node(name: &str) -> NodeTopology {
        NodeTopologyBuilder::default().name(name).build().unwrap()
    }

    #[test]
    fn test_static_layout_fallback() {
        let mut nodes = Map::default();
        nodes.insert("n1".to_string(), vec![DeviceGroup::with_sockets(2, &[0])]);
        nodes.insert(ANY_NODE.to_string(), vec![DeviceGroup::new(1)]);
        let plugin = GpuPlugin::new(StaticLayout::new("gpu", false, nodes));

        let items = plugin.enumerate(&node("n1"));
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].count, 2);
        assert_eq!(items[0].sockets, Some(vec![SocketId::new(0)]));

        let items = plugin.enumerate(&node("n2"));
        assert_eq!(items[0].count, 1);
        assert_eq!(items[0].sockets, None);
        assert!(plugin.is_gpu_like("gpu"));
        assert!(!plugin.is_shared("gpu"));
    }

    #[test]
    fn test_shares_only_for_shared_layouts() {
        let mut nodes = Map::default();
        nodes.insert(
            ANY_NODE.to_string(),
            vec![DeviceGroup {
                count: 2,
                sockets: None,
                shares_per_device: 50,
            }],
        );
        let shared = GpuPlugin::new(StaticLayout::new("mps", true, nodes.clone()));
        assert_eq!(shared.enumerate(&node("x"))[0].shares_per_device, 50);
        assert!(shared.is_shared("mps"));

        let generic = GenericPlugin::new(StaticLayout::new("fpga", false, nodes));
        assert_eq!(generic.enumerate(&node("x"))[0].shares_per_device, 1);
        assert!(!generic.is_gpu_like("fpga"));
    }
}
