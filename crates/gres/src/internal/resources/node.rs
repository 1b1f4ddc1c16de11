use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::internal::common::bitmap::{Bitmap, CoreBitmap, DeviceBitmap};
use crate::internal::common::error::GresError;
use crate::internal::common::ids::{DeviceIndex, DeviceTypeId, NodeId, SocketId};
use crate::internal::resources::amount::{DeviceCount, MemAmount, NumOfCpus};

/// CPU and memory layout of a node, maintained by the controller's node record
#[derive(Builder, Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[builder(pattern = "owned")]
pub struct NodeTopology {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default = "1")]
    pub sockets: u32,
    #[builder(default = "1")]
    pub cores_per_socket: u32,
    #[builder(default = "1")]
    pub threads_per_core: u32,
    #[builder(default)]
    pub real_memory: MemAmount,
}

impl NodeTopology {
    #[inline]
    pub fn n_cores(&self) -> u32 {
        self.sockets * self.cores_per_socket
    }

    #[inline]
    pub fn n_cpus(&self) -> NumOfCpus {
        self.n_cores() * self.threads_per_core
    }

    pub fn socket_of_core(&self, core: u32) -> SocketId {
        SocketId::new(core / self.cores_per_socket.max(1))
    }

    /// Sockets touched by the given cores
    pub fn sockets_of_cores(&self, cores: &CoreBitmap) -> Bitmap {
        let mut sockets = Bitmap::new(self.sockets);
        for core in cores.iter() {
            sockets.try_set(self.socket_of_core(core).as_num());
        }
        sockets
    }
}

/// Allocation state of a single device type on a node
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct DevicePool {
    type_id: DeviceTypeId,
    shared: bool,
    gpu_like: bool,
    /// Units per device; 1 for non-shared types, number of shares for shared types
    capacity: Vec<DeviceCount>,
    allocated: Vec<DeviceCount>,
    /// Devices with a non-zero allocation
    alloc_bitmap: DeviceBitmap,
    /// Devices affine to each socket; None when the node reports no affinity
    socket_bitmaps: Option<Vec<DeviceBitmap>>,
    total: DeviceCount,
    alloc_count: DeviceCount,
}

/// Layout of a pool as reported by a device plugin
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct DevicePoolLayout {
    pub type_id: DeviceTypeId,
    pub shared: bool,
    pub gpu_like: bool,
    pub capacity: Vec<DeviceCount>,
    /// For each device, sockets it is affine to (empty = no affinity information)
    pub affinity: Vec<SmallVec<[SocketId; 2]>>,
}

impl DevicePool {
    pub fn new(layout: DevicePoolLayout, n_sockets: u32) -> Self {
        let n_devices = layout.capacity.len() as u32;
        let socket_bitmaps = if layout.affinity.iter().any(|a| !a.is_empty()) {
            let mut bitmaps = vec![Bitmap::new(n_devices); n_sockets as usize];
            for (device, sockets) in layout.affinity.iter().enumerate() {
                for socket in sockets {
                    if let Some(bitmap) = bitmaps.get_mut(socket.as_usize()) {
                        bitmap.set(device as u32);
                    }
                }
            }
            Some(bitmaps)
        } else {
            None
        };
        DevicePool {
            type_id: layout.type_id,
            shared: layout.shared,
            gpu_like: layout.gpu_like,
            total: layout.capacity.iter().sum(),
            allocated: vec![0; layout.capacity.len()],
            capacity: layout.capacity,
            alloc_bitmap: Bitmap::new(n_devices),
            socket_bitmaps,
            alloc_count: 0,
        }
    }

    #[inline]
    pub fn type_id(&self) -> DeviceTypeId {
        self.type_id
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.shared
    }

    #[inline]
    pub fn is_gpu_like(&self) -> bool {
        self.gpu_like
    }

    #[inline]
    pub fn n_devices(&self) -> u32 {
        self.capacity.len() as u32
    }

    #[inline]
    pub fn total(&self) -> DeviceCount {
        self.total
    }

    #[inline]
    pub fn alloc_count(&self) -> DeviceCount {
        self.alloc_count
    }

    #[inline]
    pub fn free_count(&self) -> DeviceCount {
        self.total - self.alloc_count
    }

    #[inline]
    pub fn alloc_bitmap(&self) -> &DeviceBitmap {
        &self.alloc_bitmap
    }

    pub fn capacity_of(&self, device: DeviceIndex) -> DeviceCount {
        self.capacity.get(device.as_usize()).copied().unwrap_or(0)
    }

    pub fn allocated_of(&self, device: DeviceIndex) -> DeviceCount {
        self.allocated.get(device.as_usize()).copied().unwrap_or(0)
    }

    pub fn free_units_of(&self, device: DeviceIndex) -> DeviceCount {
        self.capacity_of(device) - self.allocated_of(device)
    }

    pub fn has_affinity(&self) -> bool {
        self.socket_bitmaps.is_some()
    }

    pub fn socket_bitmaps(&self) -> Option<&[DeviceBitmap]> {
        self.socket_bitmaps.as_deref()
    }

    /// Devices affine to any of the given sockets.
    /// Without affinity information every device is considered affine.
    pub fn affine_devices(&self, sockets: &Bitmap) -> DeviceBitmap {
        match &self.socket_bitmaps {
            Some(bitmaps) => {
                let mut result = Bitmap::new(self.n_devices());
                for socket in sockets.iter() {
                    if let Some(bitmap) = bitmaps.get(socket as usize) {
                        result.union_with(bitmap);
                    }
                }
                result
            }
            None => Bitmap::full(self.n_devices()),
        }
    }

    /// Devices without any allocation
    pub fn free_devices(&self) -> DeviceBitmap {
        let mut free = Bitmap::full(self.n_devices());
        free.subtract(&self.alloc_bitmap);
        free
    }

    pub(crate) fn claim_units(&mut self, device: DeviceIndex, units: DeviceCount) {
        let i = device.as_usize();
        assert!(self.allocated[i] + units <= self.capacity[i]);
        self.allocated[i] += units;
        self.alloc_count += units;
        if units > 0 {
            self.alloc_bitmap.set(device.as_num());
        }
    }

    /// Releases units of a device; returns the number of units that were really released
    pub(crate) fn release_units(&mut self, device: DeviceIndex, units: DeviceCount) -> DeviceCount {
        let Some(allocated) = self.allocated.get_mut(device.as_usize()) else {
            return 0;
        };
        let released = units.min(*allocated);
        *allocated -= released;
        self.alloc_count -= released;
        if *allocated == 0 {
            self.alloc_bitmap.clear(device.as_num());
        }
        released
    }

    fn same_layout(&self, layout: &DevicePoolLayout) -> bool {
        self.shared == layout.shared && self.capacity == layout.capacity
    }

    pub fn check_invariants(&self) -> bool {
        self.alloc_count <= self.total
            && self.allocated.iter().sum::<DeviceCount>() == self.alloc_count
            && self
                .allocated
                .iter()
                .zip(self.capacity.iter())
                .enumerate()
                .all(|(i, (a, c))| a <= c && (*a > 0) == self.alloc_bitmap.contains(i as u32))
            && self.socket_bitmaps.as_ref().is_none_or(|bitmaps| {
                bitmaps
                    .iter()
                    .all(|b| b.overlap_count(&self.alloc_bitmap) <= b.count())
            })
    }
}

/// Device resource inventory of one cluster node
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct NodeInventory {
    node_id: NodeId,
    topology: NodeTopology,
    /// Sorted by type id
    pools: SmallVec<[DevicePool; 2]>,
    mem_allocated: MemAmount,
}

impl NodeInventory {
    pub fn new(node_id: NodeId, topology: NodeTopology) -> Self {
        NodeInventory {
            node_id,
            topology,
            pools: SmallVec::new(),
            mem_allocated: MemAmount::ZERO,
        }
    }

    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.topology.name
    }

    #[inline]
    pub fn topology(&self) -> &NodeTopology {
        &self.topology
    }

    #[inline]
    pub fn pools(&self) -> &[DevicePool] {
        &self.pools
    }

    pub fn pool(&self, type_id: DeviceTypeId) -> Option<&DevicePool> {
        self.pools
            .binary_search_by_key(&type_id, |p| p.type_id)
            .ok()
            .map(|i| &self.pools[i])
    }

    pub(crate) fn pool_mut(&mut self, type_id: DeviceTypeId) -> Option<&mut DevicePool> {
        self.pools
            .binary_search_by_key(&type_id, |p| p.type_id)
            .ok()
            .map(|i| &mut self.pools[i])
    }

    #[inline]
    pub fn mem_allocated(&self) -> MemAmount {
        self.mem_allocated
    }

    pub fn mem_available(&self) -> MemAmount {
        self.topology.real_memory.saturating_sub(self.mem_allocated)
    }

    pub(crate) fn reserve_mem(&mut self, mem: MemAmount) {
        self.mem_allocated += mem;
    }

    /// Returns memory that was really released
    pub(crate) fn release_mem(&mut self, mem: MemAmount) -> MemAmount {
        let released = mem.min(self.mem_allocated);
        self.mem_allocated -= released;
        released
    }

    pub fn has_device_allocation(&self) -> bool {
        self.pools.iter().any(|p| p.alloc_count > 0)
    }

    pub fn has_devices(&self) -> bool {
        self.pools.iter().any(|p| p.total > 0)
    }

    /// Replaces pools by a new layout reported by plugins.
    /// Pools with an unchanged layout keep their allocation state.
    /// Fails without modification if a pool with allocations would change or disappear.
    pub fn apply_layout(&mut self, mut layouts: Vec<DevicePoolLayout>) -> crate::Result<()> {
        layouts.sort_by_key(|l| l.type_id);
        for pool in &self.pools {
            if pool.alloc_count == 0 {
                continue;
            }
            let unchanged = layouts
                .iter()
                .find(|l| l.type_id == pool.type_id)
                .is_some_and(|l| pool.same_layout(l));
            if !unchanged {
                return Err(GresError::ConfigError(format!(
                    "Device type {} on node {} changed while it is allocated",
                    pool.type_id, self.topology.name
                )));
            }
        }
        let sockets = self.topology.sockets;
        let mut old_pools = std::mem::take(&mut self.pools);
        self.pools = layouts
            .into_iter()
            .map(|layout| {
                match old_pools
                    .iter()
                    .position(|p| p.type_id == layout.type_id && p.same_layout(&layout))
                {
                    Some(i) => {
                        let mut pool = old_pools.swap_remove(i);
                        pool.gpu_like = layout.gpu_like;
                        pool
                    }
                    None => DevicePool::new(layout, sockets),
                }
            })
            .collect();
        log::debug!(
            "Node {} refreshed with {} device pool(s)",
            self.topology.name,
            self.pools.len()
        );
        Ok(())
    }

    /// Conservation check used by tests and debug assertions
    pub fn check_invariants(&self) -> bool {
        self.pools.iter().all(|p| p.check_invariants())
            && self.mem_allocated <= self.topology.real_memory
    }
}
