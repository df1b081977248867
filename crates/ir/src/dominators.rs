use std::cmp::Ordering;

use stdx::packed_option::PackedOption;
use typed_index_collections::{TiSlice, TiVec};

use crate::{Block, FunctionData};

#[derive(Debug, Clone, PartialEq, Eq)]
struct DomTreeNode {
    /// Number of this node in a reverse post-order traversal of the CFG,
    /// starting from 2. Unreachable nodes get 0.
    rpo_number: u32,
    /// The immediate dominator, `None` for the entry block and unreachable
    /// blocks.
    idom: PackedOption<Block>,
}

/// The dominator tree of a function, built with Keith D. Cooper's
/// "Simple, Fast Dominator Algorithm".
#[derive(Default)]
pub struct DominatorTree {
    nodes: TiVec<Block, DomTreeNode>,
    /// CFG post-order of all reachable blocks.
    postorder: Vec<Block>,
}

impl DominatorTree {
    pub fn compute(func: &FunctionData) -> DominatorTree {
        let mut tree = DominatorTree {
            nodes: vec![
                DomTreeNode { rpo_number: 0, idom: None.into() };
                func.blocks.len()
            ]
            .into(),
            postorder: func.postorder(),
        };
        tree.compute_domtree(func);
        tree
    }

    pub fn cfg_postorder(&self) -> &[Block] {
        &self.postorder
    }

    pub fn idom(&self, block: Block) -> Option<Block> {
        self.nodes[block].idom.expand()
    }

    pub fn is_reachable(&self, block: Block) -> bool {
        self.nodes[block].rpo_number != 0
    }

    pub fn dominates(&self, dominator: Block, mut block: Block) -> bool {
        while self.nodes[block].rpo_number > self.nodes[dominator].rpo_number {
            match self.nodes[block].idom.expand() {
                Some(parent) => block = parent,
                None => return false,
            }
        }
        block == dominator
    }

    /// Blocks in BFS order over the dominator tree: every block is visited
    /// after its immediate dominator. This is the construction order of the
    /// pointer-graph builder.
    pub fn dom_tree_bfs_order(&self) -> Vec<Block> {
        let mut children: TiVec<Block, Vec<Block>> =
            vec![Vec::new(); self.nodes.len()].into();
        for (block, node) in self.nodes.iter_enumerated() {
            if let Some(idom) = node.idom.expand() {
                children[idom].push(block);
            }
        }

        let mut order = Vec::with_capacity(self.postorder.len());
        match self.postorder.last() {
            Some(&entry) => order.push(entry),
            None => return order,
        }
        let mut next = 0;
        while next < order.len() {
            let block = order[next];
            next += 1;
            order.extend(children[block].iter().copied());
        }
        order
    }

    fn compute_domtree(&mut self, func: &FunctionData) {
        // (entry, rest) of the reverse post-order
        let (entry_block, postorder) = match self.postorder.as_slice().split_last() {
            Some((&entry, rest)) => (entry, rest),
            None => return,
        };
        debug_assert_eq!(entry_block, func.entry());

        let preds = func.predecessors();

        // first pass: assign RPO numbers. The entry gets 2, the rest start at
        // 3; every visited node has at least one already-numbered predecessor.
        self.nodes[entry_block].rpo_number = 2;
        for (rpo_idx, &block) in postorder.iter().rev().enumerate() {
            self.nodes[block].rpo_number = rpo_idx as u32 + 3;
            self.nodes[block].idom = self.compute_idom(block, &preds).into();
        }

        // iterate until convergence; a single pass suffices for reducible
        // control flow
        let mut changed = true;
        while changed {
            changed = false;
            for &block in postorder.iter().rev() {
                let idom = self.compute_idom(block, &preds).into();
                if self.nodes[block].idom != idom {
                    self.nodes[block].idom = idom;
                    changed = true;
                }
            }
        }
    }

    fn compute_idom(&self, block: Block, preds: &TiSlice<Block, Vec<Block>>) -> Block {
        let mut reachable_preds =
            preds[block].iter().copied().filter(|&bb| self.nodes[bb].rpo_number > 1);

        let mut idom =
            reachable_preds.next().expect("block must have one reachable predecessor");

        for pred in reachable_preds {
            idom = self.common_dominator(idom, pred);
        }

        idom
    }

    fn common_dominator(&self, mut bb1: Block, mut bb2: Block) -> Block {
        loop {
            match self.nodes[bb1].rpo_number.cmp(&self.nodes[bb2].rpo_number) {
                Ordering::Less => bb2 = self.nodes[bb2].idom.expect("unreachable block"),
                Ordering::Greater => bb1 = self.nodes[bb1].idom.expect("unreachable block"),
                Ordering::Equal => return bb1,
            }
        }
    }
}
