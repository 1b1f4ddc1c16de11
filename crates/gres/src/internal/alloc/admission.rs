use smallvec::SmallVec;

use crate::internal::alloc::selection::{device_order, eligible_units, pick_units};
use crate::internal::common::bitmap::{CoreBitmap, NodeBitmap};
use crate::internal::common::error::{AllocError, AllocResult};
use crate::internal::common::ids::NodePosition;
use crate::internal::common::lock::{ExclusiveAccess, ReadAccess};
use crate::internal::resources::amount::{DeviceCount, NumOfCpus};
use crate::internal::resources::job::JobClaim;
use crate::internal::resources::node::NodeInventory;
use crate::internal::resources::request::{StepAmount, StepFlags, StepRequest};
use crate::internal::resources::step::{StepClaim, StepFragment, StepFragmentEntry};

/// CPUs of a node usable by a step once devices are taken into account
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StepCpuLimit {
    /// No device derived limit applies
    Unlimited,
    Limited(NumOfCpus),
}

impl StepCpuLimit {
    /// The step cannot run on the node
    pub fn is_saturated(&self) -> bool {
        matches!(self, StepCpuLimit::Limited(0))
    }

    pub fn cpus(&self) -> Option<NumOfCpus> {
        match self {
            StepCpuLimit::Unlimited => None,
            StepCpuLimit::Limited(n) => Some(*n),
        }
    }
}

pub struct StepTestArgs<'a> {
    pub request: &'a StepRequest,
    pub job: &'a JobClaim,
    pub position: NodePosition,
    pub node_cpus: NumOfCpus,
    pub tasks_on_node: u32,
    pub first_step_node: bool,
    /// Use what the job holds, ignore units held by running steps
    pub ignore_alloc: bool,
    pub test_mem: bool,
}

pub fn step_test(_access: &impl ReadAccess, args: &StepTestArgs) -> StepCpuLimit {
    let fragment = args.job.fragment(args.position).filter(|f| f.is_bound());
    let flags = args.request.flags();
    let tasks = args.tasks_on_node as DeviceCount;
    let mut limit: Option<NumOfCpus> = None;

    for request in args.request.entries() {
        let (bound, held, mem_reserved, step_mem) = fragment
            .and_then(|f| f.entry(request.type_id))
            .map(|e| (e.bound(), e.step_held(), e.mem_reserved(), e.step_mem()))
            .unwrap_or_default();
        let mut avail = if args.ignore_alloc {
            bound
        } else {
            bound - held
        };
        if args.test_mem && !mem_reserved.is_zero() {
            if let Some(mem_per_device) = request.mem_per_device.filter(|m| !m.is_zero()) {
                let mem = if args.ignore_alloc {
                    mem_reserved
                } else {
                    mem_reserved.saturating_sub(step_mem)
                };
                avail = avail.min(mem_per_device.fits_into(mem));
            }
        }

        let needed = match request.amount {
            StepAmount::PerNode(n) => n,
            StepAmount::PerTask(n) => n.saturating_mul(tasks),
            StepAmount::PerStep(_) => DeviceCount::from(args.first_step_node),
        };
        if avail < needed
            || (flags.contains(StepFlags::ONE_TASK_PER_DEVICE) && avail < tasks)
        {
            log::debug!(
                "Step of job {} does not fit at position {}: {avail} unit(s) of type {} available, {needed} needed",
                args.job.job_id(),
                args.position,
                request.type_id
            );
            return StepCpuLimit::Limited(0);
        }
        if let Some(cpus_per_device) = request.cpus_per_device {
            let ceiling = avail
                .saturating_mul(cpus_per_device as DeviceCount)
                .min(NumOfCpus::MAX as DeviceCount) as NumOfCpus;
            limit = Some(limit.map_or(ceiling, |l| l.min(ceiling)));
        }
    }
    match limit {
        Some(cpus) => StepCpuLimit::Limited(cpus.min(args.node_cpus)),
        None => StepCpuLimit::Unlimited,
    }
}

/// Narrows candidate positions for steps requesting a number of units for the whole step.
///
/// Positions where the job has nothing left for steps are removed, unless they are needed
/// to keep `min_nodes` candidates (the lowest positions are kept). When the remaining
/// candidates together cannot provide the requested units, no candidate is left.
pub fn step_test_per_step(
    _access: &impl ReadAccess,
    step: &StepClaim,
    job: &JobClaim,
    candidates: &mut NodeBitmap,
    min_nodes: u32,
) {
    for request in step.request().entries() {
        let StepAmount::PerStep(count) = request.amount else {
            continue;
        };
        let available =
            |position: u32| job.available_for_steps(NodePosition::new(position), request.type_id);

        let non_empty = candidates.iter().filter(|p| available(*p) > 0).count() as u32;
        let mut keep = min_nodes.saturating_sub(non_empty);
        let empty: SmallVec<[u32; 8]> = candidates.iter().filter(|p| available(*p) == 0).collect();
        for position in empty {
            if keep > 0 {
                keep -= 1;
            } else {
                candidates.clear(position);
            }
        }

        let total: DeviceCount = candidates.iter().map(available).sum();
        if total < count {
            log::debug!(
                "Job {} has {total} unit(s) of type {} for steps, step {} needs {count}",
                job.job_id(),
                request.type_id,
                step.step_id()
            );
            candidates.clear_all();
            return;
        }
    }
}

pub struct StepAllocArgs<'a> {
    pub position: NodePosition,
    pub node: &'a NodeInventory,
    pub cores: Option<&'a CoreBitmap>,
    pub tasks_on_node: u32,
    /// Nodes of the step that are not allocated yet, this one included
    pub remaining_nodes: u32,
    /// Subtract the step's units from what the job has available for other steps
    pub decr_job_alloc: bool,
}

/// Binds a part of the job's devices at the position to the step
pub fn step_alloc(
    _access: &ExclusiveAccess<'_>,
    step: &mut StepClaim,
    job: &mut JobClaim,
    args: &StepAllocArgs,
) -> AllocResult<()> {
    let position = args.position;
    if step.job_id() != job.job_id() {
        return Err(AllocError::Inconsistent(format!(
            "Step {}.{} does not belong to job {}",
            step.job_id(),
            step.step_id(),
            job.job_id()
        )));
    }
    let fragment = job.fragment(position).ok_or_else(|| {
        AllocError::Inconsistent(format!(
            "Job {} has no node at position {position}",
            job.job_id()
        ))
    })?;
    if !fragment.is_bound() {
        return Err(AllocError::Infeasible(format!(
            "Job {} has no devices at position {position}",
            job.job_id()
        )));
    }
    match step.fragment(position) {
        None => {
            return Err(AllocError::Inconsistent(format!(
                "Step {}.{} has no node at position {position}",
                step.job_id(),
                step.step_id()
            )));
        }
        Some(f) if !f.is_empty() => {
            return Err(AllocError::Inconsistent(format!(
                "Step {}.{} is already allocated at position {position}",
                step.job_id(),
                step.step_id()
            )));
        }
        Some(_) => {}
    }

    let flags = step.request().flags();
    let hard_affinity = flags.contains(StepFlags::EXCLUSIVE_BINDING);
    let sockets = args
        .cores
        .map(|c| args.node.topology().sockets_of_cores(c));
    let tasks = args.tasks_on_node as DeviceCount;

    let mut planned: SmallVec<[StepFragmentEntry; 2]> = SmallVec::new();
    for request in step.request().entries() {
        let type_id = request.type_id;
        let needed = match request.amount {
            StepAmount::PerNode(n) => Some(n),
            StepAmount::PerTask(n) => n.checked_mul(tasks),
            StepAmount::PerStep(n) => Some(
                n.saturating_sub(step.total_count(type_id))
                    .div_ceil(args.remaining_nodes.max(1) as DeviceCount),
            ),
        }
        .ok_or_else(|| {
            AllocError::Infeasible(format!(
                "Step {}.{} requests more units of type {type_id} than can be counted",
                step.job_id(),
                step.step_id()
            ))
        })?;
        if needed == 0 {
            continue;
        }
        let entry = fragment.entry(type_id).ok_or_else(|| {
            AllocError::Infeasible(format!(
                "Job {} has no devices of type {type_id} at position {position}",
                job.job_id()
            ))
        })?;
        let pool = args.node.pool(type_id).ok_or_else(|| {
            AllocError::Inconsistent(format!(
                "Node {} has no devices of type {type_id}",
                args.node.name()
            ))
        })?;
        let affine = match &sockets {
            Some(sockets) if pool.has_affinity() => Some(pool.affine_devices(sockets)),
            _ => None,
        };
        if hard_affinity && affine.as_ref().is_some_and(|a| !a.overlaps(entry.devices())) {
            return Err(AllocError::InvalidTopology(format!(
                "No device of type {type_id} held by job {} is affine to the step's cores",
                job.job_id()
            )));
        }

        let order = device_order(
            entry.bindings().iter().map(|b| b.index),
            affine.as_ref(),
            hard_affinity,
        );
        let candidates = || {
            order.iter().filter_map(|d| {
                entry.binding(*d).map(|b| {
                    let free = if args.decr_job_alloc {
                        b.units - b.step_units
                    } else {
                        b.units
                    };
                    (*d, free)
                })
            })
        };
        let needed = match request.amount {
            StepAmount::PerStep(_) => needed.min(eligible_units(candidates(), pool.is_shared())),
            _ => needed,
        };
        if needed == 0 {
            continue;
        }
        let picked = pick_units(candidates(), needed, pool.is_shared()).ok_or_else(|| {
            AllocError::Infeasible(format!(
                "Job {} cannot give {needed} unit(s) of type {type_id} to step {} at position {position}",
                job.job_id(),
                step.step_id()
            ))
        })?;
        let count: DeviceCount = picked.iter().map(|(_, u)| u).sum();
        let mem = request.mem_per_device.unwrap_or_default().times(count);
        if args.decr_job_alloc
            && !entry.mem_reserved().is_zero()
            && mem > entry.mem_reserved().saturating_sub(entry.step_mem())
        {
            return Err(AllocError::Infeasible(format!(
                "Job {} has not enough memory for devices of type {type_id} left for step {}",
                job.job_id(),
                step.step_id()
            )));
        }
        planned.push(StepFragmentEntry::new(
            type_id,
            entry.devices().len(),
            picked,
            mem,
        ));
    }

    if planned.is_empty() {
        return Ok(());
    }
    if args.decr_job_alloc {
        if let Some(fragment) = job.fragment_mut(position) {
            for step_entry in &planned {
                if let Some(entry) = fragment.entry_mut(step_entry.type_id()) {
                    for (index, units) in step_entry.units() {
                        if let Some(binding) = entry.binding_mut(*index) {
                            binding.step_units += units;
                        }
                    }
                    let step_mem = entry.step_mem() + step_entry.mem();
                    entry.set_step_mem(step_mem);
                }
            }
        }
    }
    log::debug!(
        "Step {}.{} allocated devices at position {position}",
        step.job_id(),
        step.step_id()
    );
    step.set_fragment(position, StepFragment::new(planned, args.decr_job_alloc));
    Ok(())
}

/// Returns the step's devices at the position back to its job
pub fn step_dealloc(
    _access: &ExclusiveAccess<'_>,
    step: &mut StepClaim,
    job: &mut JobClaim,
    position: NodePosition,
) -> AllocResult<()> {
    let fragment = step.fragment(position).ok_or_else(|| {
        AllocError::Inconsistent(format!(
            "Step {}.{} has no node at position {position}",
            step.job_id(),
            step.step_id()
        ))
    })?;
    if fragment.is_empty() {
        return Ok(());
    }

    if fragment.decr_job_alloc() {
        if let Some(job_fragment) = job.fragment(position).filter(|f| f.is_bound()) {
            for step_entry in fragment.entries() {
                let entry = job_fragment.entry(step_entry.type_id());
                let consistent = entry.is_some_and(|entry| {
                    entry.step_mem() >= step_entry.mem()
                        && step_entry.units().iter().all(|(index, units)| {
                            entry.binding(*index).is_some_and(|b| b.step_units >= *units)
                        })
                });
                if !consistent {
                    return Err(AllocError::Inconsistent(format!(
                        "Job {} does not record devices of type {} held by step {} at position {position}",
                        job.job_id(),
                        step_entry.type_id(),
                        step.step_id()
                    )));
                }
            }
            if let Some(job_fragment) = job.fragment_mut(position) {
                for step_entry in fragment.entries() {
                    if let Some(entry) = job_fragment.entry_mut(step_entry.type_id()) {
                        for (index, units) in step_entry.units() {
                            if let Some(binding) = entry.binding_mut(*index) {
                                binding.step_units -= units;
                            }
                        }
                        let step_mem = entry.step_mem() - step_entry.mem();
                        entry.set_step_mem(step_mem);
                    }
                }
            }
        }
    }
    step.take_fragment(position);
    log::debug!(
        "Step {}.{} released devices at position {position}",
        step.job_id(),
        step.step_id()
    );
    Ok(())
}
