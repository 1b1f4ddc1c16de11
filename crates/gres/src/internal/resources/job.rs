use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::internal::common::bitmap::{Bitmap, DeviceBitmap};
use crate::internal::common::ids::{DeviceIndex, DeviceTypeId, JobId, NodeId, NodePosition};
use crate::internal::common::index::IndexVec;
use crate::internal::resources::amount::{DeviceCount, MemAmount};
use crate::internal::resources::request::{DeviceAmount, JobRequest};

/// Units of one device bound to a job on a node
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub struct DeviceBinding {
    pub index: DeviceIndex,
    /// 1 for non-shared types, number of shares for shared types
    pub units: DeviceCount,
    /// Units currently held by steps that decremented the job allocation
    pub step_units: DeviceCount,
}

/// What a job holds of one device type on one node
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct FragmentEntry {
    type_id: DeviceTypeId,
    requested: DeviceCount,
    /// Width is the number of devices of the node pool at binding time
    devices: DeviceBitmap,
    /// Sorted by device index, one item per bit set in `devices`
    bindings: SmallVec<[DeviceBinding; 4]>,
    mem_reserved: MemAmount,
    step_mem: MemAmount,
}

impl FragmentEntry {
    pub fn new(type_id: DeviceTypeId, requested: DeviceCount) -> Self {
        FragmentEntry {
            type_id,
            requested,
            devices: Bitmap::default(),
            bindings: SmallVec::new(),
            mem_reserved: MemAmount::ZERO,
            step_mem: MemAmount::ZERO,
        }
    }

    #[inline]
    pub fn type_id(&self) -> DeviceTypeId {
        self.type_id
    }

    #[inline]
    pub fn requested(&self) -> DeviceCount {
        self.requested
    }

    #[inline]
    pub fn devices(&self) -> &DeviceBitmap {
        &self.devices
    }

    #[inline]
    pub fn bindings(&self) -> &[DeviceBinding] {
        &self.bindings
    }

    pub fn binding(&self, index: DeviceIndex) -> Option<&DeviceBinding> {
        self.bindings
            .binary_search_by_key(&index, |b| b.index)
            .ok()
            .map(|i| &self.bindings[i])
    }

    pub(crate) fn binding_mut(&mut self, index: DeviceIndex) -> Option<&mut DeviceBinding> {
        self.bindings
            .binary_search_by_key(&index, |b| b.index)
            .ok()
            .map(|i| &mut self.bindings[i])
    }

    /// Units bound on the node
    pub fn bound(&self) -> DeviceCount {
        self.bindings.iter().map(|b| b.units).sum()
    }

    pub fn step_held(&self) -> DeviceCount {
        self.bindings.iter().map(|b| b.step_units).sum()
    }

    pub fn available_for_steps(&self) -> DeviceCount {
        self.bound() - self.step_held()
    }

    #[inline]
    pub fn mem_reserved(&self) -> MemAmount {
        self.mem_reserved
    }

    #[inline]
    pub fn step_mem(&self) -> MemAmount {
        self.step_mem
    }

    pub(crate) fn set_step_mem(&mut self, mem: MemAmount) {
        self.step_mem = mem;
    }

    pub(crate) fn bind(
        &mut self,
        width: u32,
        bindings: impl IntoIterator<Item = (DeviceIndex, DeviceCount)>,
        mem: MemAmount,
    ) {
        let mut devices = Bitmap::new(width);
        let mut bindings: SmallVec<[DeviceBinding; 4]> = bindings
            .into_iter()
            .map(|(index, units)| {
                devices.set(index.as_num());
                DeviceBinding {
                    index,
                    units,
                    step_units: 0,
                }
            })
            .collect();
        bindings.sort_unstable_by_key(|b| b.index);
        self.devices = devices;
        self.bindings = bindings;
        self.mem_reserved = mem;
        self.step_mem = MemAmount::ZERO;
    }

    pub(crate) fn unbind(&mut self) {
        self.devices.clear_all();
        self.bindings.clear();
        self.mem_reserved = MemAmount::ZERO;
        self.step_mem = MemAmount::ZERO;
    }

    pub(crate) fn reset_steps(&mut self) {
        for binding in &mut self.bindings {
            binding.step_units = 0;
        }
        self.step_mem = MemAmount::ZERO;
    }
}

/// Job's part on a single node
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct NodeFragment {
    /// Sorted by type id
    entries: SmallVec<[FragmentEntry; 2]>,
    whole_node: bool,
    /// The fragment holds units in the node inventory
    bound: bool,
    /// Node the fragment was bound to last time
    node_id: Option<NodeId>,
    /// Units are claimed in the inventory of this process; not persisted, so a record loaded
    /// after a restart can be applied exactly once
    #[serde(skip)]
    applied: bool,
}

impl NodeFragment {
    pub(crate) fn new(entries: SmallVec<[FragmentEntry; 2]>, whole_node: bool) -> Self {
        let mut fragment = NodeFragment {
            entries,
            whole_node,
            bound: false,
            node_id: None,
            applied: false,
        };
        fragment.entries.sort_unstable_by_key(|e| e.type_id);
        fragment
    }

    #[inline]
    pub fn entries(&self) -> &[FragmentEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [FragmentEntry] {
        &mut self.entries
    }

    pub fn entry(&self, type_id: DeviceTypeId) -> Option<&FragmentEntry> {
        self.entries
            .binary_search_by_key(&type_id, |e| e.type_id)
            .ok()
            .map(|i| &self.entries[i])
    }

    pub(crate) fn entry_mut(&mut self, type_id: DeviceTypeId) -> Option<&mut FragmentEntry> {
        self.entries
            .binary_search_by_key(&type_id, |e| e.type_id)
            .ok()
            .map(|i| &mut self.entries[i])
    }

    #[inline]
    pub fn is_whole_node(&self) -> bool {
        self.whole_node
    }

    #[inline]
    pub fn is_bound(&self) -> bool {
        self.bound
    }

    #[inline]
    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.node_id.is_none()
    }

    pub fn bound_of(&self, type_id: DeviceTypeId) -> DeviceCount {
        self.entry(type_id).map(|e| e.bound()).unwrap_or(0)
    }

    pub fn mem_reserved(&self) -> MemAmount {
        self.entries.iter().map(|e| e.mem_reserved).sum()
    }

    #[inline]
    pub fn is_applied(&self) -> bool {
        self.applied
    }

    pub(crate) fn mark_bound(&mut self, node_id: NodeId) {
        self.bound = true;
        self.applied = true;
        self.node_id = Some(node_id);
    }

    pub(crate) fn mark_released(&mut self) {
        self.bound = false;
        self.applied = false;
        for entry in &mut self.entries {
            entry.reset_steps();
        }
    }

    pub(crate) fn clear(&mut self) {
        for entry in &mut self.entries {
            entry.unbind();
        }
        self.whole_node = false;
        self.bound = false;
        self.applied = false;
        self.node_id = None;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, Eq, PartialEq)]
pub struct TypeTotal {
    pub type_id: DeviceTypeId,
    pub bound: DeviceCount,
}

/// Device resources of one job across all of its nodes
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct JobClaim {
    job_id: JobId,
    request: JobRequest,
    nodes: IndexVec<NodePosition, NodeFragment>,
    /// Units bound per type over all nodes; sorted by type id
    totals: SmallVec<[TypeTotal; 2]>,
}

impl JobClaim {
    pub fn new(job_id: JobId, request: JobRequest, node_count: u32) -> Self {
        JobClaim {
            job_id,
            request,
            nodes: IndexVec::filled(NodeFragment::default(), node_count as usize),
            totals: SmallVec::new(),
        }
    }

    #[inline]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[inline]
    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub(crate) fn request_mut(&mut self) -> &mut JobRequest {
        &mut self.request
    }

    #[inline]
    pub fn node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    #[inline]
    pub fn fragments(&self) -> &IndexVec<NodePosition, NodeFragment> {
        &self.nodes
    }

    pub(crate) fn fragments_mut(&mut self) -> &mut IndexVec<NodePosition, NodeFragment> {
        &mut self.nodes
    }

    pub fn fragment(&self, position: NodePosition) -> Option<&NodeFragment> {
        self.nodes.get_at(position)
    }

    pub(crate) fn fragment_mut(&mut self, position: NodePosition) -> Option<&mut NodeFragment> {
        self.nodes.get_at_mut(position)
    }

    /// Units of the type bound at the position that are not held by steps
    pub fn available_for_steps(&self, position: NodePosition, type_id: DeviceTypeId) -> DeviceCount {
        self.fragment(position)
            .filter(|f| f.is_bound())
            .and_then(|f| f.entry(type_id))
            .map(|e| e.available_for_steps())
            .unwrap_or(0)
    }

    #[inline]
    pub fn totals(&self) -> &[TypeTotal] {
        &self.totals
    }

    pub fn total_bound(&self, type_id: DeviceTypeId) -> DeviceCount {
        self.totals
            .iter()
            .find(|t| t.type_id == type_id)
            .map(|t| t.bound)
            .unwrap_or(0)
    }

    /// Units of the type currently held in node inventories, excluding one position
    pub(crate) fn bound_elsewhere(&self, type_id: DeviceTypeId, except: NodePosition) -> DeviceCount {
        self.nodes
            .iter_enumerated()
            .filter(|(pos, f)| *pos != except && f.is_bound())
            .map(|(_, f)| f.bound_of(type_id))
            .sum()
    }

    /// Every node is bound and every per-job amount has been reached
    pub fn is_satisfied(&self) -> bool {
        self.nodes.iter().all(|f| f.is_bound())
            && self.request.entries().iter().all(|rq| match rq.amount {
                DeviceAmount::PerJob(n) => self.total_bound(rq.type_id) >= n,
                _ => true,
            })
    }

    pub(crate) fn recompute_totals(&mut self) {
        let mut totals: SmallVec<[TypeTotal; 2]> = SmallVec::new();
        for fragment in self.nodes.iter().filter(|f| f.is_bound()) {
            for entry in fragment.entries() {
                match totals.binary_search_by_key(&entry.type_id, |t| t.type_id) {
                    Ok(i) => totals[i].bound += entry.bound(),
                    Err(i) => totals.insert(
                        i,
                        TypeTotal {
                            type_id: entry.type_id,
                            bound: entry.bound(),
                        },
                    ),
                }
            }
        }
        self.totals = totals;
    }
}
