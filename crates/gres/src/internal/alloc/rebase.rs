use crate::internal::common::bitmap::NodeBitmap;
use crate::internal::common::error::{AllocError, AllocResult};
use crate::internal::common::ids::NodePosition;
use crate::internal::common::index::IndexVec;
use crate::internal::common::lock::ExclusiveAccess;
use crate::internal::resources::job::{JobClaim, NodeFragment};
use crate::internal::resources::step::{StepClaim, StepFragment};

/// A claim with one fragment per node position
pub trait PerNodeClaim {
    type Fragment: Default;

    fn position_fragments(&mut self) -> &mut IndexVec<NodePosition, Self::Fragment>;

    /// Refreshes derived state once the fragments were moved
    fn after_rebase(&mut self);

    fn describe(&self) -> String;
}

impl PerNodeClaim for JobClaim {
    type Fragment = NodeFragment;

    fn position_fragments(&mut self) -> &mut IndexVec<NodePosition, NodeFragment> {
        JobClaim::fragments_mut(self)
    }

    fn after_rebase(&mut self) {
        self.recompute_totals();
    }

    fn describe(&self) -> String {
        format!("job {}", self.job_id())
    }
}

impl PerNodeClaim for StepClaim {
    type Fragment = StepFragment;

    fn position_fragments(&mut self) -> &mut IndexVec<NodePosition, StepFragment> {
        StepClaim::fragments_mut(self)
    }

    fn after_rebase(&mut self) {
        self.rebuild_node_in_use();
    }

    fn describe(&self) -> String {
        format!("step {}.{}", self.job_id(), self.step_id())
    }
}

/// Moves fragments from positions in `old_nodes` to positions in `new_nodes`.
///
/// Fragments of nodes missing in `new_nodes` are dropped, nodes that are new get empty
/// fragments. Devices of dropped nodes have to be released by the caller beforehand.
pub fn state_rebase<C: PerNodeClaim>(
    _access: &ExclusiveAccess<'_>,
    claim: &mut C,
    old_nodes: &NodeBitmap,
    new_nodes: &NodeBitmap,
) -> AllocResult<()> {
    let n_fragments = claim.position_fragments().len();
    if n_fragments != old_nodes.count() as usize {
        return Err(AllocError::Inconsistent(format!(
            "Rebase of {}: {n_fragments} fragment(s) for {} node(s)",
            claim.describe(),
            old_nodes.count()
        )));
    }
    if old_nodes == new_nodes {
        return Ok(());
    }
    let mut old_fragments = std::mem::take(claim.position_fragments());
    let fragments: IndexVec<NodePosition, C::Fragment> = new_nodes
        .iter()
        .map(|node| {
            if old_nodes.contains(node) {
                std::mem::take(&mut old_fragments[NodePosition::new(old_nodes.rank(node))])
            } else {
                C::Fragment::default()
            }
        })
        .collect();
    log::debug!(
        "Rebase of {}: nodes {old_nodes} -> {new_nodes}",
        claim.describe()
    );
    *claim.position_fragments() = fragments;
    claim.after_rebase();
    Ok(())
}
