//! The system dependence graph.
//!
//! One arena owns every node and every basic block of every procedure;
//! per-procedure [`DependenceGraph`]s reference their slices of it.
//! Dependence edges live in graph-wide bit matrices, always materialised in
//! both directions so the mirror invariants can be checked cheaply and
//! slicing can walk either way.

use bitset::SparseBitMatrix;
use stdx::{impl_debug, impl_idx_from};
use typed_index_collections::TiVec;

use ahash::AHashMap;
use ir::{Func, Location};

pub use crate::builder::build;
pub use crate::data_dep::{DataDepStats, DataflowFlags};
pub use crate::postdom::compute_block_orders;

mod builder;
mod control_dep;
mod data_dep;
mod interproc;
mod postdom;

#[cfg(test)]
mod tests;

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct DgNode(u32);
impl_idx_from!(DgNode(u32));
impl_debug!(match DgNode{n => "n{}",n.0;});

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct DgBlockId(u32);
impl_idx_from!(DgBlockId(u32));
stdx::impl_idx_math!(DgBlockId(u32));
impl_debug!(match DgBlockId{b => "dgbb{}",b.0;});

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct GraphId(u32);
impl_idx_from!(GraphId(u32));
impl_debug!(match GraphId{g => "dg{}",g.0;});

/// Ordered parameter nodes: one input per argument plus an optional output
/// for the returned value.
#[derive(Debug, Clone, Default)]
pub struct Parameters {
    pub input: Vec<DgNode>,
    pub output: Option<DgNode>,
}

#[derive(Debug, Clone)]
pub struct CallData {
    /// Graphs of the procedures this site may invoke.
    pub callees: Vec<GraphId>,
    /// Actual parameters of the call.
    pub params: Parameters,
    /// Thread-create sites get no synchronous return edge.
    pub is_fork: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgumentKind {
    FormalIn(u32),
    FormalOut,
    ActualIn(u32),
    ActualOut,
}

#[derive(Debug, Clone)]
pub enum DgNodeKind {
    /// The procedure-entry node, first node of the entry block.
    Entry,
    Instruction,
    Call(CallData),
    Argument(ArgumentKind),
}

#[derive(Debug, Clone)]
pub struct DgNodeData {
    pub kind: DgNodeKind,
    pub graph: GraphId,
    /// The block holding this node; parameter nodes live outside blocks.
    pub block: Option<DgBlockId>,
    /// The IR point this node stands for, if any.
    pub loc: Option<Location>,
    /// 0 = not in any slice.
    pub slice_id: u32,
}

#[derive(Debug, Clone)]
pub struct DgBlockData {
    pub graph: GraphId,
    /// The IR block, `None` for a synthetic exit.
    pub block: Option<ir::Block>,
    /// Nodes in execution order; the terminator node is last.
    pub nodes: Vec<DgNode>,
    /// Successor edges labelled by branch label (0 for unconditional).
    pub successors: Vec<(DgBlockId, u8)>,
    pub predecessors: Vec<DgBlockId>,

    /// Immediate post-dominator; set exactly once per build.
    ipdom: Option<DgBlockId>,
    pub postdom_children: Vec<DgBlockId>,
    pub postdom_frontier: Vec<DgBlockId>,
    /// The forward duals.
    idom: Option<DgBlockId>,
    pub dom_children: Vec<DgBlockId>,
    pub dom_frontier: Vec<DgBlockId>,

    /// Call nodes inside this block, for fast interprocedural walks.
    pub call_sites: Vec<DgNode>,
    /// 0 = not in any slice.
    pub slice_id: u32,
}

impl DgBlockData {
    fn new(graph: GraphId, block: Option<ir::Block>) -> DgBlockData {
        DgBlockData {
            graph,
            block,
            nodes: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            ipdom: None,
            postdom_children: Vec::new(),
            postdom_frontier: Vec::new(),
            idom: None,
            dom_children: Vec::new(),
            dom_frontier: Vec::new(),
            call_sites: Vec::new(),
            slice_id: 0,
        }
    }

    pub fn ipdom(&self) -> Option<DgBlockId> {
        self.ipdom
    }

    pub fn idom(&self) -> Option<DgBlockId> {
        self.idom
    }

    /// The terminator node, if the block has any nodes.
    pub fn last_node(&self) -> Option<DgNode> {
        self.nodes.last().copied()
    }
}

/// The dependence graph of one procedure.
#[derive(Debug, Clone)]
pub struct DependenceGraph {
    pub func: Func,
    /// The procedure-entry node.
    pub entry_node: DgNode,
    /// Blocks in IR order; a synthetic exit, if any, comes last.
    pub blocks: Vec<DgBlockId>,
    /// `None` once the entry block has been removed.
    pub entry_block: Option<DgBlockId>,
    /// The unique exit: the single returning block or the synthetic exit.
    pub exit_block: Option<DgBlockId>,
    /// Formal parameters.
    pub params: Parameters,
}

/// Dependence edges of the whole SDG, kept mirrored: `A` in
/// `control_deps[B]` iff `B` in `rev_control_deps[A]`, and likewise for the
/// data edges.
#[derive(Debug, Clone)]
pub struct DependenceEdges {
    /// def -> use
    pub data: SparseBitMatrix<DgNode, DgNode>,
    /// use -> def
    pub rev_data: SparseBitMatrix<DgNode, DgNode>,
    /// controlling node -> dependent node
    pub control: SparseBitMatrix<DgNode, DgNode>,
    pub rev_control: SparseBitMatrix<DgNode, DgNode>,
    /// controlling block -> dependent block
    pub block_control: SparseBitMatrix<DgBlockId, DgBlockId>,
    pub rev_block_control: SparseBitMatrix<DgBlockId, DgBlockId>,
}

impl DependenceEdges {
    fn new(num_nodes: usize, num_blocks: usize) -> DependenceEdges {
        DependenceEdges {
            data: SparseBitMatrix::new(num_nodes, num_nodes),
            rev_data: SparseBitMatrix::new(num_nodes, num_nodes),
            control: SparseBitMatrix::new(num_nodes, num_nodes),
            rev_control: SparseBitMatrix::new(num_nodes, num_nodes),
            block_control: SparseBitMatrix::new(num_blocks, num_blocks),
            rev_block_control: SparseBitMatrix::new(num_blocks, num_blocks),
        }
    }
}

#[derive(Debug)]
pub struct SystemDependenceGraph {
    pub nodes: TiVec<DgNode, DgNodeData>,
    pub blocks: TiVec<DgBlockId, DgBlockData>,
    pub graphs: TiVec<GraphId, DependenceGraph>,
    /// The graph of the entry procedure.
    pub entry: Option<GraphId>,
    pub edges: DependenceEdges,
    /// Monotone counter handing out slice ids; 0 means "not in any slice".
    pub last_slice_id: u32,

    node_of_loc: AHashMap<(Func, Location), DgNode>,
    graph_of_func: AHashMap<Func, GraphId>,
}

impl SystemDependenceGraph {
    pub(crate) fn empty() -> SystemDependenceGraph {
        SystemDependenceGraph {
            nodes: TiVec::new(),
            blocks: TiVec::new(),
            graphs: TiVec::new(),
            entry: None,
            edges: DependenceEdges::new(0, 0),
            last_slice_id: 0,
            node_of_loc: AHashMap::new(),
            graph_of_func: AHashMap::new(),
        }
    }

    pub(crate) fn init_edges(&mut self) {
        self.edges = DependenceEdges::new(self.nodes.len(), self.blocks.len());
    }

    pub fn graph_of(&self, func: Func) -> Option<GraphId> {
        self.graph_of_func.get(&func).copied()
    }

    pub fn node_of(&self, func: Func, loc: Location) -> Option<DgNode> {
        self.node_of_loc.get(&(func, loc)).copied()
    }

    pub(crate) fn record_node(&mut self, func: Func, loc: Location, node: DgNode) {
        self.node_of_loc.insert((func, loc), node);
    }

    pub(crate) fn record_graph(&mut self, func: Func, graph: GraphId) {
        self.graph_of_func.insert(func, graph);
    }

    pub fn add_data_dep(&mut self, def: DgNode, use_: DgNode) -> bool {
        self.edges.rev_data.insert(use_, def);
        self.edges.data.insert(def, use_)
    }

    pub fn add_control_dep(&mut self, controller: DgNode, dependent: DgNode) -> bool {
        self.edges.rev_control.insert(dependent, controller);
        self.edges.control.insert(controller, dependent)
    }

    pub fn add_block_control_dep(&mut self, controller: DgBlockId, dependent: DgBlockId) -> bool {
        self.edges.rev_block_control.insert(dependent, controller);
        self.edges.block_control.insert(controller, dependent)
    }

    /// Records the immediate post-dominator of `block`, asserting it is set
    /// at most once per build.
    pub(crate) fn set_ipdom(&mut self, block: DgBlockId, ipdom: DgBlockId) {
        assert!(self.blocks[block].ipdom.is_none(), "{block:?} already has a post-dominator");
        self.blocks[block].ipdom = Some(ipdom);
        self.blocks[ipdom].postdom_children.push(block);
    }

    pub(crate) fn set_idom(&mut self, block: DgBlockId, idom: DgBlockId) {
        assert!(self.blocks[block].idom.is_none(), "{block:?} already has a dominator");
        self.blocks[block].idom = Some(idom);
        self.blocks[idom].dom_children.push(block);
    }

    /// The callees recorded on a call node.
    pub fn callees(&self, node: DgNode) -> &[GraphId] {
        match &self.nodes[node].kind {
            DgNodeKind::Call(call) => &call.callees,
            _ => &[],
        }
    }

    /// Removes every edge to and from `block`, reconnecting its predecessors
    /// to its non-self successors with the predecessor's labels preserved.
    /// Afterwards the block is fully disconnected: no CFG edges and no
    /// control-dependence edges (including any on itself) remain.
    pub fn isolate_block(&mut self, block: DgBlockId) {
        let preds = self.blocks[block].predecessors.clone();
        let succs = self.blocks[block].successors.clone();

        for &pred in &preds {
            // replace each pred -> block edge by edges to every non-self
            // successor, keeping the label of the replaced edge
            let edges = std::mem::take(&mut self.blocks[pred].successors);
            let mut new_edges = Vec::with_capacity(edges.len());
            for (target, label) in edges {
                if target != block {
                    new_edges.push((target, label));
                    continue;
                }
                for &(succ, _) in &succs {
                    if succ == block {
                        continue; // self-loops die with the block
                    }
                    if !new_edges.contains(&(succ, label)) {
                        new_edges.push((succ, label));
                    }
                    if !self.blocks[succ].predecessors.contains(&pred) {
                        self.blocks[succ].predecessors.push(pred);
                    }
                }
            }
            self.blocks[pred].successors = new_edges;
        }

        for &(succ, _) in &succs {
            self.blocks[succ].predecessors.retain(|&p| p != block);
        }
        self.blocks[block].successors.clear();
        self.blocks[block].predecessors.clear();

        // detach control dependence in both directions
        let controllers: Vec<DgBlockId> = self.edges.rev_block_control.iter(block).collect();
        for controller in controllers {
            self.edges.block_control.remove(controller, block);
            self.edges.rev_block_control.remove(block, controller);
        }
        let dependents: Vec<DgBlockId> = self.edges.block_control.iter(block).collect();
        for dependent in dependents {
            self.edges.rev_block_control.remove(dependent, block);
            self.edges.block_control.remove(block, dependent);
        }
    }

    /// Isolates `block`, detaches its nodes and destroys it. A removed entry
    /// block leaves its procedure without one.
    pub fn remove_block(&mut self, block: DgBlockId) {
        self.isolate_block(block);

        for node in std::mem::take(&mut self.blocks[block].nodes) {
            self.nodes[node].block = None;
        }
        self.blocks[block].call_sites.clear();

        let graph = self.blocks[block].graph;
        if self.graphs[graph].entry_block == Some(block) {
            self.graphs[graph].entry_block = None;
        }
        if self.graphs[graph].exit_block == Some(block) {
            self.graphs[graph].exit_block = None;
        }
        self.graphs[graph].blocks.retain(|&b| b != block);
    }
}
