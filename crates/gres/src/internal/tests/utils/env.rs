use crate::internal::alloc::engine::AllocationEngine;
use crate::internal::common::ids::DeviceTypeId;
use crate::internal::common::lock::{ExclusiveAccess, ResourceLock};
use crate::internal::config::GresConfig;
use crate::internal::resources::amount::MemAmount;
use crate::internal::resources::map::DeviceTypeMap;
use crate::internal::resources::request::AffinityPolicy;

pub const GPU: DeviceTypeId = DeviceTypeId::new(0);
pub const NIC: DeviceTypeId = DeviceTypeId::new(1);
pub const MPS: DeviceTypeId = DeviceTypeId::new(2);

pub struct TestEnv {
    pub lock: ResourceLock,
    pub config: GresConfig,
    pub types: DeviceTypeMap,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::with_config(GresConfig::default())
    }
}

impl TestEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GresConfig) -> Self {
        TestEnv {
            lock: ResourceLock::new(),
            config,
            types: DeviceTypeMap::from_names(&["gpu", "nic", "mps"]),
        }
    }

    pub fn gpu_affinity(mut self, policy: AffinityPolicy) -> Self {
        self.config.gpu_affinity = policy;
        self
    }

    pub fn default_mem(mut self, type_name: &str, mb: u64) -> Self {
        self.config
            .default_mem_per_device
            .insert(type_name.to_string(), MemAmount::from_mb(mb));
        self
    }

    pub fn engine<'a>(&'a self, access: &'a ExclusiveAccess<'_>) -> AllocationEngine<'a> {
        AllocationEngine::new(&self.config, &self.types, access)
    }
}
