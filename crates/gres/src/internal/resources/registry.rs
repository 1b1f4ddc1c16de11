use smallvec::SmallVec;

use crate::internal::common::error::GresError;
use crate::internal::config::GresConfig;
use crate::internal::resources::descriptor::{
    DeviceFamily, DevicePlugin, GenericPlugin, GpuPlugin, NicPlugin, StaticLayout,
};
use crate::internal::resources::map::DeviceTypeMap;
use crate::internal::resources::node::{DevicePoolLayout, NodeInventory};

/// Device plugins together with the registry of type names they report
pub struct DeviceRegistry {
    plugins: Vec<Box<dyn DevicePlugin>>,
    types: DeviceTypeMap,
}

impl DeviceRegistry {
    pub fn new(plugins: Vec<Box<dyn DevicePlugin>>) -> Self {
        DeviceRegistry {
            plugins,
            types: DeviceTypeMap::default(),
        }
    }

    /// Creates built-in plugins for configured device types.
    /// Type ids are allocated in configuration order.
    pub fn from_config(config: &GresConfig) -> Self {
        let mut types = DeviceTypeMap::default();
        let plugins = config
            .device_types
            .iter()
            .map(|dt| {
                types.get_or_allocate_id(&dt.name);
                let layout = StaticLayout::new(&dt.name, dt.shared, dt.nodes.clone());
                let plugin: Box<dyn DevicePlugin> = match dt.family {
                    DeviceFamily::Gpu => Box::new(GpuPlugin::new(layout)),
                    DeviceFamily::Nic => Box::new(NicPlugin::new(layout)),
                    DeviceFamily::Generic => Box::new(GenericPlugin::new(layout)),
                };
                plugin
            })
            .collect();
        DeviceRegistry { plugins, types }
    }

    #[inline]
    pub fn types(&self) -> &DeviceTypeMap {
        &self.types
    }

    /// Asks every plugin for the devices of the node and rebuilds its pools.
    pub fn refresh_node(&mut self, node: &mut NodeInventory) -> crate::Result<()> {
        let n_sockets = node.topology().sockets;
        let mut layouts: Vec<DevicePoolLayout> = Vec::new();
        for plugin in &self.plugins {
            for item in plugin.enumerate(node.topology()) {
                let type_id = self.types.get_or_allocate_id(&item.type_name);
                let affinity: SmallVec<[_; 2]> = match &item.sockets {
                    Some(sockets) => {
                        if let Some(socket) = sockets.iter().find(|s| s.as_num() >= n_sockets) {
                            return Err(GresError::ConfigError(format!(
                                "Device type {} refers to socket {socket} but node {} has {n_sockets} socket(s)",
                                item.type_name,
                                node.name()
                            )));
                        }
                        sockets.iter().copied().collect()
                    }
                    None => SmallVec::new(),
                };
                let position = match layouts.iter().position(|l| l.type_id == type_id) {
                    Some(position) => position,
                    None => {
                        layouts.push(DevicePoolLayout {
                            type_id,
                            shared: plugin.is_shared(&item.type_name),
                            gpu_like: plugin.is_gpu_like(&item.type_name),
                            capacity: Vec::new(),
                            affinity: Vec::new(),
                        });
                        layouts.len() - 1
                    }
                };
                let layout = &mut layouts[position];
                for _ in 0..item.count {
                    layout.capacity.push(item.shares_per_device);
                    layout.affinity.push(affinity.clone());
                }
            }
        }
        node.apply_layout(layouts)
    }
}
