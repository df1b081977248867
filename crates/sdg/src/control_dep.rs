//! Control dependence, derived from the post-dominance frontiers: a block
//! `b` is control-dependent on every block in its frontier, since those are
//! exactly the branches at which `b`'s post-dominance ends. Cross-procedure
//! control dependence is not added here; the interprocedural linker carries
//! the effect through call edges.

use crate::{GraphId, SystemDependenceGraph};

pub(crate) fn compute(sdg: &mut SystemDependenceGraph, graph: GraphId) {
    for i in 0..sdg.graphs[graph].blocks.len() {
        let block = sdg.graphs[graph].blocks[i];
        let frontier = sdg.blocks[block].postdom_frontier.clone();
        for controller in frontier {
            sdg.add_block_control_dep(controller, block);
        }
    }
}
