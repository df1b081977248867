//! The mark phase: reverse (or forward) reachability over the dependence
//! edges, assigning a fresh slice id to every node and block it visits.

use log::debug;
use sdg::{DgNode, SystemDependenceGraph};
use workqueue::WorkQueue;

/// Marks everything the criteria depend on. Returns the slice id used.
pub(crate) fn mark(
    sdg: &mut SystemDependenceGraph,
    criteria: &[DgNode],
    forward: bool,
) -> u32 {
    sdg.last_slice_id += 1;
    let slice_id = sdg.last_slice_id;

    let mut queue: WorkQueue<DgNode> = WorkQueue::with_none(sdg.nodes.len());
    queue.extend(criteria.iter().copied());

    while let Some(node) = queue.take() {
        sdg.nodes[node].slice_id = slice_id;
        if let Some(block) = sdg.nodes[node].block {
            sdg.blocks[block].slice_id = slice_id;
        }

        let (data, control) = if forward {
            (&sdg.edges.data, &sdg.edges.control)
        } else {
            (&sdg.edges.rev_data, &sdg.edges.rev_control)
        };
        for next in data.iter(node) {
            queue.insert(next);
        }
        for next in control.iter(node) {
            queue.insert(next);
        }

        if let Some(block) = sdg.nodes[node].block {
            if forward {
                // everything in a dependent block runs because this branch
                // runs
                for dependent in
                    sdg.edges.block_control.iter(block).collect::<Vec<_>>()
                {
                    for &next in &sdg.blocks[dependent].nodes {
                        queue.insert(next);
                    }
                }
            } else {
                // the branch deciding whether this block runs
                for controller in
                    sdg.edges.rev_block_control.iter(block).collect::<Vec<_>>()
                {
                    if let Some(branch) = sdg.blocks[controller].last_node() {
                        queue.insert(branch);
                    }
                }
            }
        }

        if !forward {
            // everything in a procedure depends on the procedure running at
            // all; the entry node carries that to the call sites
            queue.insert(sdg.graphs[sdg.nodes[node].graph].entry_node);
        }
    }

    debug!("marked {} nodes with slice id {slice_id}", {
        sdg.nodes.iter().filter(|n| n.slice_id == slice_id).count()
    });

    slice_id
}
