use smallvec::SmallVec;
use std::marker::PhantomData;

use crate::internal::alloc::selection::{device_order, eligible_units, pick_units};
use crate::internal::common::bitmap::{CoreBitmap, DeviceBitmap, NodeBitmap};
use crate::internal::common::error::{AllocError, AllocResult};
use crate::internal::common::ids::{DeviceIndex, DeviceTypeId, NodeId, NodePosition};
use crate::internal::common::lock::{ExclusiveAccess, ReadAccess};
use crate::internal::config::GresConfig;
use crate::internal::resources::amount::{DeviceCount, MemAmount};
use crate::internal::resources::job::{FragmentEntry, JobClaim, NodeFragment};
use crate::internal::resources::map::DeviceTypeMap;
use crate::internal::resources::node::{DevicePool, NodeInventory};
use crate::internal::resources::request::{AffinityPolicy, DeviceAmount, DeviceRequest};

/// Devices of one type granted to a job on a node
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct GrantedDevices {
    pub type_id: DeviceTypeId,
    pub devices: DeviceBitmap,
    pub count: DeviceCount,
}

/// Result of a successful allocation on one node
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NodeGrant {
    pub node_id: NodeId,
    pub position: NodePosition,
    pub devices: SmallVec<[GrantedDevices; 2]>,
    pub mem: MemAmount,
}

impl NodeGrant {
    fn new(node_id: NodeId, position: NodePosition, fragment: &NodeFragment) -> Self {
        NodeGrant {
            node_id,
            position,
            devices: fragment
                .entries()
                .iter()
                .map(|e| GrantedDevices {
                    type_id: e.type_id(),
                    devices: e.devices().clone(),
                    count: e.bound(),
                })
                .collect(),
            mem: fragment.mem_reserved(),
        }
    }

    pub fn get(&self, type_id: DeviceTypeId) -> Option<&GrantedDevices> {
        self.devices.iter().find(|d| d.type_id == type_id)
    }
}

/// Builds a fragment requesting every device present on the node.
/// A node without devices gives an empty fragment.
pub fn select_whole_node(_access: &impl ReadAccess, node: &NodeInventory) -> NodeFragment {
    whole_node_fragment(node)
}

fn whole_node_fragment(node: &NodeInventory) -> NodeFragment {
    NodeFragment::new(
        node.pools()
            .iter()
            .filter(|p| p.total() > 0)
            .map(|p| FragmentEntry::new(p.type_id(), p.total()))
            .collect(),
        true,
    )
}

fn all_units(pool: &DevicePool) -> impl Iterator<Item = (DeviceIndex, DeviceCount)> + '_ {
    (0..pool.n_devices()).map(|d| {
        let device = DeviceIndex::new(d);
        (device, pool.capacity_of(device))
    })
}

fn claim_on_node(node: &mut NodeInventory, entries: &[FragmentEntry]) {
    for entry in entries {
        if let Some(pool) = node.pool_mut(entry.type_id()) {
            for binding in entry.bindings() {
                pool.claim_units(binding.index, binding.units);
            }
        }
        node.reserve_mem(entry.mem_reserved());
    }
}

/// Job level entry points of the allocator.
///
/// All of them mutate node inventories or job claims, so the engine can only be created
/// while the resource lock is held exclusively.
pub struct AllocationEngine<'a> {
    config: &'a GresConfig,
    types: &'a DeviceTypeMap,
    _access: PhantomData<&'a ()>,
}

impl<'a> AllocationEngine<'a> {
    pub fn new(
        config: &'a GresConfig,
        types: &'a DeviceTypeMap,
        _access: &'a ExclusiveAccess<'_>,
    ) -> Self {
        AllocationEngine {
            config,
            types,
            _access: PhantomData,
        }
    }

    fn type_name(&self, type_id: DeviceTypeId) -> &str {
        self.types.display_name(type_id)
    }

    fn mem_per_device(&self, request: &DeviceRequest) -> MemAmount {
        request.mem_per_device.unwrap_or_else(|| {
            self.types
                .get_name(request.type_id)
                .and_then(|name| self.config.default_mem_per_device.get(name))
                .copied()
                .unwrap_or_default()
        })
    }

    fn check_unbound(&self, job: &JobClaim, position: NodePosition) -> AllocResult<()> {
        let fragment = job.fragment(position).ok_or_else(|| {
            AllocError::Inconsistent(format!(
                "Job {} has no node at position {position}",
                job.job_id()
            ))
        })?;
        if fragment.is_bound() {
            return Err(AllocError::Inconsistent(format!(
                "Job {} is already allocated at position {position}",
                job.job_id()
            )));
        }
        Ok(())
    }

    /// Binds every device of the node to the job.
    /// Fails when anything on the node is already allocated.
    pub fn alloc_whole_node(
        &self,
        job: &mut JobClaim,
        node: &mut NodeInventory,
        position: NodePosition,
    ) -> AllocResult<NodeGrant> {
        self.check_unbound(job, position)?;
        if node.has_device_allocation() || !node.mem_allocated().is_zero() {
            return Err(AllocError::Infeasible(format!(
                "Node {} is partially allocated",
                node.name()
            )));
        }
        let mut fragment = whole_node_fragment(node);
        for entry in fragment.entries_mut() {
            if let Some(pool) = node.pool(entry.type_id()) {
                entry.bind(pool.n_devices(), all_units(pool), MemAmount::ZERO);
            }
        }
        claim_on_node(node, fragment.entries());
        fragment.mark_bound(node.node_id());
        log::debug!(
            "Job {} allocated whole node {} at position {position}",
            job.job_id(),
            node.name()
        );
        let grant = NodeGrant::new(node.node_id(), position, &fragment);
        job.fragments_mut()[position] = fragment;
        job.recompute_totals();
        Ok(grant)
    }

    /// Allocates devices requested by the job on the node at the given position.
    ///
    /// With `is_new_allocation == false` the devices recorded in the claim are applied again
    /// (claims restored after a controller restart) instead of being selected.
    pub fn alloc(
        &self,
        job: &mut JobClaim,
        node: &mut NodeInventory,
        position: NodePosition,
        cores: Option<&CoreBitmap>,
        is_new_allocation: bool,
    ) -> AllocResult<NodeGrant> {
        if !is_new_allocation {
            return self.rehydrate(job, node, position);
        }
        self.check_unbound(job, position)?;
        let entries = self.plan(job, node, position, cores)?;
        let mem: MemAmount = entries.iter().map(|e| e.mem_reserved()).sum();
        if mem > node.mem_available() {
            return Err(AllocError::Infeasible(format!(
                "Node {} has {} of memory available, {mem} needed for devices",
                node.name(),
                node.mem_available()
            )));
        }
        claim_on_node(node, &entries);
        let mut fragment = NodeFragment::new(entries, false);
        fragment.mark_bound(node.node_id());
        log::debug!(
            "Job {} allocated devices on node {} at position {position}: {}",
            job.job_id(),
            node.name(),
            self.describe(&fragment)
        );
        let grant = NodeGrant::new(node.node_id(), position, &fragment);
        job.fragments_mut()[position] = fragment;
        job.recompute_totals();
        Ok(grant)
    }

    fn describe(&self, fragment: &NodeFragment) -> String {
        fragment
            .entries()
            .iter()
            .map(|e| format!("{}:{}[{}]", self.type_name(e.type_id()), e.bound(), e.devices()))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Selects devices for every requested type without touching anything
    fn plan(
        &self,
        job: &JobClaim,
        node: &NodeInventory,
        position: NodePosition,
        cores: Option<&CoreBitmap>,
    ) -> AllocResult<SmallVec<[FragmentEntry; 2]>> {
        let topology = node.topology();
        let sockets = cores.map(|c| topology.sockets_of_cores(c));
        let n_sockets = sockets
            .as_ref()
            .map(|s| s.count())
            .unwrap_or(topology.sockets) as DeviceCount;

        let mut entries = SmallVec::new();
        for request in job.request().entries() {
            let name = self.type_name(request.type_id);
            let needed = match request.amount {
                DeviceAmount::PerNode(n) => Some(n),
                DeviceAmount::PerSocket(n) => n.checked_mul(n_sockets),
                DeviceAmount::PerTask(n) => {
                    n.checked_mul(job.request().tasks_per_node() as DeviceCount)
                }
                DeviceAmount::PerJob(n) => {
                    Some(n.saturating_sub(job.bound_elsewhere(request.type_id, position)))
                }
                DeviceAmount::All => {
                    Some(node.pool(request.type_id).map(|p| p.total()).unwrap_or(0))
                }
            }
            .ok_or_else(|| {
                AllocError::Infeasible(format!(
                    "Job {} requests more devices of type {name} than can be counted",
                    job.job_id()
                ))
            })?;
            let Some(pool) = node.pool(request.type_id) else {
                if needed > 0 && !matches!(request.amount, DeviceAmount::PerJob(_)) {
                    return Err(AllocError::Infeasible(format!(
                        "Node {} has no devices of type {name}",
                        node.name()
                    )));
                }
                entries.push(FragmentEntry::new(request.type_id, 0));
                continue;
            };

            let picked = if needed == 0 {
                SmallVec::new()
            } else if request.amount == DeviceAmount::All {
                if pool.alloc_count() > 0 {
                    return Err(AllocError::Infeasible(format!(
                        "Devices of type {name} on node {} are partially allocated",
                        node.name()
                    )));
                }
                all_units(pool).collect()
            } else {
                let policy = request
                    .affinity
                    .unwrap_or_else(|| self.config.affinity_for(pool.is_gpu_like()));
                let affine = match &sockets {
                    Some(sockets) if pool.has_affinity() => Some(pool.affine_devices(sockets)),
                    _ => None,
                };
                let enforced = policy == AffinityPolicy::Enforced;
                if enforced && affine.as_ref().is_some_and(|a| a.is_empty()) {
                    return Err(AllocError::InvalidTopology(format!(
                        "No device of type {name} on node {} is affine to the allocated cores",
                        node.name()
                    )));
                }
                let order = device_order(
                    (0..pool.n_devices()).map(DeviceIndex::new),
                    affine.as_ref(),
                    enforced,
                );
                let candidates = || order.iter().map(|d| (*d, pool.free_units_of(*d)));
                let needed = match request.amount {
                    DeviceAmount::PerJob(_) => {
                        needed.min(eligible_units(candidates(), pool.is_shared()))
                    }
                    _ => needed,
                };
                pick_units(candidates(), needed, pool.is_shared()).ok_or_else(|| {
                    AllocError::Infeasible(format!(
                        "Node {} cannot provide {needed} unit(s) of {name} ({} free)",
                        node.name(),
                        eligible_units(candidates(), pool.is_shared())
                    ))
                })?
            };

            let units: DeviceCount = picked.iter().map(|(_, u)| u).sum();
            let mut entry = FragmentEntry::new(request.type_id, needed);
            entry.bind(
                pool.n_devices(),
                picked,
                self.mem_per_device(request).times(units),
            );
            entries.push(entry);
        }
        Ok(entries)
    }

    fn rehydrate(
        &self,
        job: &mut JobClaim,
        node: &mut NodeInventory,
        position: NodePosition,
    ) -> AllocResult<NodeGrant> {
        let inconsistent = |msg: String| {
            AllocError::Inconsistent(format!(
                "Job {} cannot be restored on node {}: {msg}",
                job.job_id(),
                node.name()
            ))
        };
        let fragment = job
            .fragment(position)
            .ok_or_else(|| inconsistent(format!("no node at position {position}")))?;
        match fragment.node_id() {
            None => return Err(inconsistent("no recorded allocation".to_string())),
            Some(node_id) if node_id != node.node_id() => {
                return Err(inconsistent(format!("recorded for node {node_id}")));
            }
            Some(_) => {}
        }
        if fragment.is_applied() {
            return Err(inconsistent(format!("position {position} is already applied")));
        }
        for entry in fragment.entries() {
            if entry.bindings().is_empty() {
                continue;
            }
            let name = self.type_name(entry.type_id());
            let pool = node
                .pool(entry.type_id())
                .ok_or_else(|| inconsistent(format!("device type {name} is missing")))?;
            if entry.devices().len() != pool.n_devices() {
                return Err(inconsistent(format!(
                    "device type {name} has {} device(s), {} recorded",
                    pool.n_devices(),
                    entry.devices().len()
                )));
            }
            if let Some(binding) = entry
                .bindings()
                .iter()
                .find(|b| b.units > pool.free_units_of(b.index))
            {
                return Err(inconsistent(format!(
                    "device {name}[{}] is already in use",
                    binding.index
                )));
            }
        }
        if fragment.mem_reserved() > node.mem_available() {
            return Err(inconsistent(format!(
                "{} of memory recorded, {} available",
                fragment.mem_reserved(),
                node.mem_available()
            )));
        }

        claim_on_node(node, fragment.entries());
        let node_id = node.node_id();
        if let Some(fragment) = job.fragment_mut(position) {
            fragment.mark_bound(node_id);
        }
        job.recompute_totals();
        log::debug!(
            "Job {} restored devices on node {} at position {position}",
            job.job_id(),
            node.name()
        );
        Ok(NodeGrant::new(node_id, position, &job.fragments()[position]))
    }

    /// Returns the devices held by the job at the position back to the node.
    ///
    /// Entries stay in the claim for accounting. A record restored after a restart may not
    /// match the node exactly; with `is_stale_restart_record` the drift is logged and as much
    /// as possible is released.
    pub fn dealloc(
        &self,
        job: &mut JobClaim,
        node: &mut NodeInventory,
        position: NodePosition,
        is_stale_restart_record: bool,
        is_resize: bool,
    ) -> AllocResult<()> {
        let job_id = job.job_id();
        let tolerate = |msg: String| {
            if is_stale_restart_record {
                log::warn!(
                    "Job {job_id} on node {}: {msg}; ignored for a restored record",
                    node.name()
                );
                Ok(())
            } else {
                Err(AllocError::Inconsistent(format!(
                    "Job {job_id} on node {}: {msg}",
                    node.name()
                )))
            }
        };
        let Some(fragment) = job.fragment(position) else {
            return tolerate(format!("no node at position {position}"));
        };
        if !fragment.is_bound() {
            return tolerate(format!("nothing allocated at position {position}"));
        }
        if fragment.node_id() != Some(node.node_id()) {
            return tolerate(format!(
                "position {position} belongs to another node ({:?})",
                fragment.node_id()
            ));
        }

        let mut drift = Vec::new();
        for entry in fragment.entries() {
            if entry.bindings().is_empty() {
                continue;
            }
            let name = self.type_name(entry.type_id());
            match node.pool(entry.type_id()) {
                Some(pool) if pool.n_devices() == entry.devices().len() => {
                    for binding in entry.bindings() {
                        if pool.allocated_of(binding.index) < binding.units {
                            drift.push(format!("{name}[{}] is not allocated", binding.index));
                        }
                    }
                }
                _ => drift.push(format!("device type {name} changed")),
            }
        }
        if node.mem_allocated() < fragment.mem_reserved() {
            drift.push(format!(
                "{} of memory recorded, {} allocated",
                fragment.mem_reserved(),
                node.mem_allocated()
            ));
        }
        if !drift.is_empty() {
            tolerate(drift.join(", "))?;
        }

        for entry in fragment.entries() {
            if let Some(pool) = node.pool_mut(entry.type_id()) {
                for binding in entry.bindings() {
                    pool.release_units(binding.index, binding.units);
                }
            }
            node.release_mem(entry.mem_reserved());
        }
        if let Some(fragment) = job.fragment_mut(position) {
            fragment.mark_released();
        }
        job.recompute_totals();
        if is_resize {
            log::debug!(
                "Job {job_id} released devices on node {} after resize",
                node.name()
            );
        } else {
            log::debug!("Job {job_id} released devices on node {}", node.name());
        }
        Ok(())
    }

    /// Moves fragments of `from` into `into`, a node goes from its position in `from_nodes`
    /// to its position in `into_nodes`. Node inventories are not touched.
    pub fn merge(
        &self,
        from: &mut JobClaim,
        from_nodes: &NodeBitmap,
        into: &mut JobClaim,
        into_nodes: &NodeBitmap,
    ) {
        let into_count = into_nodes.count() as usize;
        if into.fragments().len() < into_count {
            into.fragments_mut()
                .resize(into_count, NodeFragment::default());
        }
        for node in from_nodes.iter() {
            if !into_nodes.contains(node) {
                log::warn!(
                    "Merging job {} into {}: node {node} is not a node of the target",
                    from.job_id(),
                    into.job_id()
                );
                continue;
            }
            let from_position = NodePosition::new(from_nodes.rank(node));
            let into_position = NodePosition::new(into_nodes.rank(node));
            let Some(fragment) = from.fragment_mut(from_position) else {
                continue;
            };
            let fragment = std::mem::take(fragment);
            debug_assert!(!into.fragments()[into_position].is_bound());
            into.fragments_mut()[into_position] = fragment;
        }
        for request in from.request().entries() {
            into.request_mut().add_missing(request.clone());
        }
        from.recompute_totals();
        into.recompute_totals();
        log::debug!("Job {} merged into job {}", from.job_id(), into.job_id());
    }

    /// Forgets bound devices in every fragment, requested amounts stay
    pub fn clear_alloc(&self, job: &mut JobClaim) {
        let job_id = job.job_id();
        for (position, fragment) in job.fragments_mut().iter_enumerated_mut() {
            if fragment.is_bound() {
                log::warn!("Job {job_id} cleared while still allocated at position {position}");
            }
            fragment.clear();
        }
        job.recompute_totals();
    }
}
