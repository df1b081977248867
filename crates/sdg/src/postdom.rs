//! Post-dominator and dominator trees over the blocks of one procedure,
//! using the iterative algorithm of Cooper, Harvey and Kennedy. The
//! post-dominator tree is rooted at the unique exit (synthetic when the
//! procedure has several returning blocks); both trees and their frontiers
//! are recorded on the blocks.

use std::cmp::Ordering;

use ahash::AHashMap;

use crate::{DgBlockId, GraphId, SystemDependenceGraph};

/// Computes ipdom/idom, tree children and both frontiers for `graph`.
pub(crate) fn compute(sdg: &mut SystemDependenceGraph, graph: GraphId) {
    // post dominators need an exit to be rooted at
    if let Some(exit) = sdg.graphs[graph].exit_block {
        let ipdom = dominator_tree(sdg, exit, true);
        for (block, dominator) in &ipdom {
            if block != dominator {
                sdg.set_ipdom(*block, *dominator);
            }
        }
        frontiers(sdg, graph, true);
    }

    if let Some(entry) = sdg.graphs[graph].entry_block {
        let idom = dominator_tree(sdg, entry, false);
        for (block, dominator) in &idom {
            if block != dominator {
                sdg.set_idom(*block, *dominator);
            }
        }
        frontiers(sdg, graph, false);
    }
}

/// Blocks of `graph` in BFS order over its post-dominator tree, exit first.
/// Useful to clients that traverse the tree bottom-up (reverse this order).
pub fn compute_block_orders(sdg: &SystemDependenceGraph, graph: GraphId) -> Vec<DgBlockId> {
    let mut order = Vec::new();
    let Some(exit) = sdg.graphs[graph].exit_block else { return order };
    order.push(exit);
    let mut next = 0;
    while next < order.len() {
        let block = order[next];
        next += 1;
        order.extend(sdg.blocks[block].postdom_children.iter().copied());
    }
    order
}

fn successors(sdg: &SystemDependenceGraph, block: DgBlockId, reverse: bool) -> Vec<DgBlockId> {
    if reverse {
        sdg.blocks[block].predecessors.clone()
    } else {
        let mut succs = Vec::new();
        for &(succ, _) in &sdg.blocks[block].successors {
            if !succs.contains(&succ) {
                succs.push(succ);
            }
        }
        succs
    }
}

/// Immediate (post-)dominators of every reachable block; the root maps to
/// itself, unreachable blocks are absent.
fn dominator_tree(
    sdg: &SystemDependenceGraph,
    root: DgBlockId,
    reverse: bool,
) -> AHashMap<DgBlockId, DgBlockId> {
    // post-order of the (reversed) CFG from the root
    let mut postorder = Vec::new();
    {
        // the walk follows the tree's own edge direction: predecessors for
        // post dominance, successors for dominance
        let mut visited: AHashMap<DgBlockId, bool> = AHashMap::new();
        let mut stack = vec![(root, successors(sdg, root, reverse))];
        visited.insert(root, true);
        loop {
            while let Some(succ) = stack.last_mut().and_then(|(_, succs)| succs.pop()) {
                if !visited.contains_key(&succ) {
                    visited.insert(succ, true);
                    let succs = successors(sdg, succ, reverse);
                    stack.push((succ, succs));
                }
            }
            match stack.pop() {
                Some((block, _)) => postorder.push(block),
                None => break,
            }
        }
    }
    debug_assert_eq!(postorder.last(), Some(&root));

    // rpo numbering: the root gets 2, the rest count up
    let mut rpo: AHashMap<DgBlockId, u32> = AHashMap::new();
    let mut idom: AHashMap<DgBlockId, DgBlockId> = AHashMap::new();
    rpo.insert(root, 2);
    idom.insert(root, root);
    for (i, &block) in postorder.iter().rev().skip(1).enumerate() {
        rpo.insert(block, i as u32 + 3);
    }

    let intersect = |idom: &AHashMap<DgBlockId, DgBlockId>,
                     rpo: &AHashMap<DgBlockId, u32>,
                     mut a: DgBlockId,
                     mut b: DgBlockId| {
        loop {
            match rpo[&a].cmp(&rpo[&b]) {
                Ordering::Less => b = idom[&b],
                Ordering::Greater => a = idom[&a],
                Ordering::Equal => return a,
            }
        }
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &block in postorder.iter().rev().skip(1) {
            // predecessors in the walked direction: CFG successors for post
            // dominance, CFG predecessors for dominance
            let preds = successors(sdg, block, !reverse);
            let mut new_idom = None;
            for pred in preds {
                if !idom.contains_key(&pred) {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(cur) => intersect(&idom, &rpo, cur, pred),
                });
            }
            if let Some(new_idom) = new_idom {
                if idom.get(&block) != Some(&new_idom) {
                    idom.insert(block, new_idom);
                    changed = true;
                }
            }
        }
    }

    idom
}

/// (Post-)dominance frontiers bottom-up over the tree, as in Cytron et al.:
/// the local part takes CFG neighbours whose immediate (post-)dominator is
/// not `b`; the up part lifts the children's frontiers.
fn frontiers(sdg: &mut SystemDependenceGraph, graph: GraphId, reverse: bool) {
    // BFS over the tree, then walk it in reverse
    let order = if reverse {
        compute_block_orders(sdg, graph)
    } else {
        let mut order = Vec::new();
        let Some(entry) = sdg.graphs[graph].entry_block else { return };
        order.push(entry);
        let mut next = 0;
        while next < order.len() {
            let block = order[next];
            next += 1;
            order.extend(sdg.blocks[block].dom_children.iter().copied());
        }
        order
    };

    for &block in order.iter().rev() {
        let mut frontier = Vec::new();

        // DF-local: predecessors for the post-dominance frontier, successors
        // for the dominance frontier
        for neighbour in successors(sdg, block, reverse) {
            let ndom =
                if reverse { sdg.blocks[neighbour].ipdom() } else { sdg.blocks[neighbour].idom() };
            if ndom.is_some() && ndom != Some(block) && !frontier.contains(&neighbour) {
                frontier.push(neighbour);
            }
        }

        // DF-up
        let children = if reverse {
            sdg.blocks[block].postdom_children.clone()
        } else {
            sdg.blocks[block].dom_children.clone()
        };
        for child in children {
            let child_frontier = if reverse {
                sdg.blocks[child].postdom_frontier.clone()
            } else {
                sdg.blocks[child].dom_frontier.clone()
            };
            for candidate in child_frontier {
                let cdom = if reverse {
                    sdg.blocks[candidate].ipdom()
                } else {
                    sdg.blocks[candidate].idom()
                };
                if cdom.is_some()
                    && cdom != Some(block)
                    && candidate != block
                    && !frontier.contains(&candidate)
                {
                    frontier.push(candidate);
                }
            }
        }

        if reverse {
            sdg.blocks[block].postdom_frontier = frontier;
        } else {
            sdg.blocks[block].dom_frontier = frontier;
        }
    }
}
