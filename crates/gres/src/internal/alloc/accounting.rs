//! Read-only projections of claims and inventories for accounting and operator tools.
//!
//! Nothing here fails: unknown type ids are rendered as "unknown" and missing positions
//! are counted as zero.

use smallvec::SmallVec;

use crate::internal::common::bitmap::Bitmap;
use crate::internal::common::ids::{DeviceTypeId, NodePosition};
use crate::internal::common::lock::ReadAccess;
use crate::internal::common::utils::{format_comma_delimited, run_lengths};
use crate::internal::config::GresConfig;
use crate::internal::resources::TresVec;
use crate::internal::resources::amount::DeviceCount;
use crate::internal::resources::job::{JobClaim, NodeFragment};
use crate::internal::resources::map::DeviceTypeMap;
use crate::internal::resources::node::NodeInventory;
use crate::internal::resources::step::StepClaim;

const NOT_AVAILABLE: &str = "N/A";

fn empty_tres(types: &DeviceTypeMap) -> TresVec {
    TresVec::filled(0, types.len())
}

fn add_fragment(tres: &mut TresVec, fragment: &NodeFragment) {
    for entry in fragment.entries() {
        if let Some(count) = tres.get_at_mut(entry.type_id()) {
            *count += entry.bound();
        }
    }
}

/// Units bound to the job on all nodes, per type
pub fn job_tres(_access: &impl ReadAccess, types: &DeviceTypeMap, job: &JobClaim) -> TresVec {
    let mut tres = empty_tres(types);
    for fragment in job.fragments().iter() {
        add_fragment(&mut tres, fragment);
    }
    tres
}

pub fn job_node_tres(
    _access: &impl ReadAccess,
    types: &DeviceTypeMap,
    job: &JobClaim,
    position: NodePosition,
) -> TresVec {
    let mut tres = empty_tres(types);
    if let Some(fragment) = job.fragment(position) {
        add_fragment(&mut tres, fragment);
    }
    tres
}

pub fn step_tres(_access: &impl ReadAccess, types: &DeviceTypeMap, step: &StepClaim) -> TresVec {
    let mut tres = empty_tres(types);
    for fragment in step.fragments().iter() {
        for entry in fragment.entries() {
            if let Some(count) = tres.get_at_mut(entry.type_id()) {
                *count += entry.count();
            }
        }
    }
    tres
}

/// `gpu=4,nic=2`; zero counts and types that are not tracked are left out
pub fn tres_string(types: &DeviceTypeMap, config: &GresConfig, tres: &TresVec) -> String {
    format_comma_delimited(
        tres.iter_enumerated()
            .filter(|(_, count)| **count > 0)
            .map(|(type_id, count)| (types.display_name(type_id), count))
            .filter(|(name, _)| config.is_tracked(name))
            .map(|(name, count)| format!("{name}={count}")),
    )
}

fn format_runs(
    types: &DeviceTypeMap,
    type_ids: &[DeviceTypeId],
    count_at: impl Fn(NodePosition, DeviceTypeId) -> DeviceCount,
    n_positions: u32,
) -> String {
    let mut items = Vec::new();
    for type_id in type_ids {
        let name = types.display_name(*type_id);
        let runs = run_lengths(
            (0..n_positions).map(|position| count_at(NodePosition::new(position), *type_id)),
        );
        for (count, length) in runs {
            if length > 1 {
                items.push(format!("{name}={count}(x{length})"));
            } else {
                items.push(format!("{name}={count}"));
            }
        }
    }
    format_comma_delimited(items)
}

fn sorted_types(type_ids: impl Iterator<Item = DeviceTypeId>) -> SmallVec<[DeviceTypeId; 4]> {
    let mut type_ids: SmallVec<[DeviceTypeId; 4]> = type_ids.collect();
    type_ids.sort_unstable();
    type_ids.dedup();
    type_ids
}

/// Per node counts of each type in position order, e.g. `gpu=2(x3),gpu=1,nic=1(x4)`
pub fn job_alloc_string(
    _access: &impl ReadAccess,
    types: &DeviceTypeMap,
    job: &JobClaim,
) -> String {
    let fragments = job.fragments();
    let type_ids = sorted_types(
        fragments
            .iter()
            .flat_map(|f| f.entries().iter().map(|e| e.type_id())),
    );
    format_runs(
        types,
        &type_ids,
        |position, type_id| fragments[position].bound_of(type_id),
        fragments.len() as u32,
    )
}

pub fn step_alloc_string(
    _access: &impl ReadAccess,
    types: &DeviceTypeMap,
    step: &StepClaim,
) -> String {
    let fragments = step.fragments();
    let type_ids = sorted_types(
        fragments
            .iter()
            .flat_map(|f| f.entries().iter().map(|e| e.type_id())),
    );
    format_runs(
        types,
        &type_ids,
        |position, type_id| fragments[position].count_of(type_id),
        fragments.len() as u32,
    )
}

/// Devices of the job at the position, e.g. `gpu:2(IDX:0-1)`
pub fn job_node_detail(
    _access: &impl ReadAccess,
    types: &DeviceTypeMap,
    job: &JobClaim,
    position: NodePosition,
) -> String {
    let Some(fragment) = job.fragment(position) else {
        return NOT_AVAILABLE.to_string();
    };
    let items: Vec<String> = fragment
        .entries()
        .iter()
        .filter(|e| e.bound() > 0)
        .map(|e| {
            format!(
                "{}:{}(IDX:{})",
                types.display_name(e.type_id()),
                e.bound(),
                e.devices()
            )
        })
        .collect();
    if items.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        items.join(",")
    }
}

/// Devices allocated on the node, e.g. `gpu:2(IDX:0-1)`
pub fn node_used_string(
    _access: &impl ReadAccess,
    types: &DeviceTypeMap,
    node: &NodeInventory,
) -> String {
    let items: Vec<String> = node
        .pools()
        .iter()
        .filter(|p| p.alloc_count() > 0)
        .map(|p| {
            format!(
                "{}:{}(IDX:{})",
                types.display_name(p.type_id()),
                p.alloc_count(),
                p.alloc_bitmap()
            )
        })
        .collect();
    if items.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        items.join(",")
    }
}

/// Configured devices of the node with their sockets, e.g. `gpu:4(S:0-1)`
pub fn node_config_string(
    _access: &impl ReadAccess,
    types: &DeviceTypeMap,
    node: &NodeInventory,
) -> String {
    let items: Vec<String> = node
        .pools()
        .iter()
        .map(|p| {
            let name = types.display_name(p.type_id());
            match p.socket_bitmaps() {
                Some(bitmaps) => {
                    let sockets = Bitmap::from_indices(
                        bitmaps.len() as u32,
                        bitmaps
                            .iter()
                            .enumerate()
                            .filter(|(_, b)| !b.is_empty())
                            .map(|(socket, _)| socket as u32),
                    );
                    format!("{name}:{}(S:{sockets})", p.total())
                }
                None => format!("{name}:{}", p.total()),
            }
        })
        .collect();
    if items.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        items.join(",")
    }
}
