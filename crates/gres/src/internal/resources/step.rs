use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::internal::common::bitmap::{Bitmap, DeviceBitmap, NodeBitmap};
use crate::internal::common::ids::{DeviceIndex, DeviceTypeId, JobId, NodePosition, StepId};
use crate::internal::common::index::IndexVec;
use crate::internal::resources::amount::{DeviceCount, MemAmount};
use crate::internal::resources::request::StepRequest;

#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct StepFragmentEntry {
    type_id: DeviceTypeId,
    devices: DeviceBitmap,
    /// (device, units) sorted by device index
    units: SmallVec<[(DeviceIndex, DeviceCount); 4]>,
    mem: MemAmount,
}

impl StepFragmentEntry {
    pub(crate) fn new(
        type_id: DeviceTypeId,
        width: u32,
        units: SmallVec<[(DeviceIndex, DeviceCount); 4]>,
        mem: MemAmount,
    ) -> Self {
        let mut devices = Bitmap::new(width);
        for (index, _) in &units {
            devices.set(index.as_num());
        }
        let mut units = units;
        units.sort_unstable_by_key(|(index, _)| *index);
        StepFragmentEntry {
            type_id,
            devices,
            units,
            mem,
        }
    }

    #[inline]
    pub fn type_id(&self) -> DeviceTypeId {
        self.type_id
    }

    #[inline]
    pub fn devices(&self) -> &DeviceBitmap {
        &self.devices
    }

    #[inline]
    pub fn units(&self) -> &[(DeviceIndex, DeviceCount)] {
        &self.units
    }

    pub fn count(&self) -> DeviceCount {
        self.units.iter().map(|(_, u)| u).sum()
    }

    #[inline]
    pub fn mem(&self) -> MemAmount {
        self.mem
    }
}

/// Step's part on a single node of its job
#[derive(Serialize, Deserialize, Debug, Clone, Default, Eq, PartialEq)]
pub struct StepFragment {
    entries: SmallVec<[StepFragmentEntry; 2]>,
    /// Whether the holding was subtracted from the job's units available for steps
    decr_job_alloc: bool,
}

impl StepFragment {
    pub(crate) fn new(entries: SmallVec<[StepFragmentEntry; 2]>, decr_job_alloc: bool) -> Self {
        StepFragment {
            entries,
            decr_job_alloc,
        }
    }

    #[inline]
    pub fn entries(&self) -> &[StepFragmentEntry] {
        &self.entries
    }

    pub fn entry(&self, type_id: DeviceTypeId) -> Option<&StepFragmentEntry> {
        self.entries.iter().find(|e| e.type_id == type_id)
    }

    #[inline]
    pub fn decr_job_alloc(&self) -> bool {
        self.decr_job_alloc
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count_of(&self, type_id: DeviceTypeId) -> DeviceCount {
        self.entry(type_id).map(|e| e.count()).unwrap_or(0)
    }
}

/// Device resources held by one step; positions are positions in the parent job
#[derive(Serialize, Deserialize, Debug, Clone, Eq, PartialEq)]
pub struct StepClaim {
    job_id: JobId,
    step_id: StepId,
    request: StepRequest,
    nodes: IndexVec<NodePosition, StepFragment>,
    /// Positions where the step holds a fragment
    node_in_use: NodeBitmap,
}

impl StepClaim {
    pub fn new(job_id: JobId, step_id: StepId, request: StepRequest, job_node_count: u32) -> Self {
        StepClaim {
            job_id,
            step_id,
            request,
            nodes: IndexVec::filled(StepFragment::default(), job_node_count as usize),
            node_in_use: Bitmap::new(job_node_count),
        }
    }

    #[inline]
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    #[inline]
    pub fn step_id(&self) -> StepId {
        self.step_id
    }

    #[inline]
    pub fn request(&self) -> &StepRequest {
        &self.request
    }

    #[inline]
    pub fn fragments(&self) -> &IndexVec<NodePosition, StepFragment> {
        &self.nodes
    }

    pub(crate) fn fragments_mut(&mut self) -> &mut IndexVec<NodePosition, StepFragment> {
        &mut self.nodes
    }

    pub fn fragment(&self, position: NodePosition) -> Option<&StepFragment> {
        self.nodes.get_at(position)
    }

    #[inline]
    pub fn node_in_use(&self) -> &NodeBitmap {
        &self.node_in_use
    }

    /// Units of the type held on all nodes
    pub fn total_count(&self, type_id: DeviceTypeId) -> DeviceCount {
        self.nodes.iter().map(|f| f.count_of(type_id)).sum()
    }

    pub(crate) fn set_fragment(&mut self, position: NodePosition, fragment: StepFragment) {
        self.node_in_use.set(position.as_num());
        self.nodes[position] = fragment;
    }

    pub(crate) fn take_fragment(&mut self, position: NodePosition) -> StepFragment {
        self.node_in_use.clear(position.as_num());
        std::mem::take(&mut self.nodes[position])
    }

    pub(crate) fn rebuild_node_in_use(&mut self) {
        let mut in_use = Bitmap::new(self.nodes.len() as u32);
        for (position, fragment) in self.nodes.iter_enumerated() {
            if !fragment.is_empty() {
                in_use.set(position.as_num());
            }
        }
        self.node_in_use = in_use;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn test_step_claim_fragments() {
        let mut claim = StepClaim::new(1.into(), 0.into(), StepRequest::default(), 3);
        let entry = StepFragmentEntry::new(
            0.into(),
            4,
            smallvec![(3.into(), 1), (1.into(), 1)],
            MemAmount::from_mb(10),
        );
        assert_eq!(entry.devices().to_string(), "1,3");
        assert_eq!(entry.units()[0].0, DeviceIndex::new(1));

        claim.set_fragment(2.into(), StepFragment::new(smallvec![entry], true));
        assert_eq!(claim.node_in_use().to_string(), "2");
        assert_eq!(claim.total_count(0.into()), 2);

        let fragment = claim.take_fragment(2.into());
        assert!(fragment.decr_job_alloc());
        assert!(claim.node_in_use().is_empty());
        assert_eq!(claim.total_count(0.into()), 0);
    }
}
