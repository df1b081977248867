//! The pointer graph and the flow of points-to information through it.
//!
//! Every abstract pointer operation of the program becomes a [`PgNode`];
//! nodes reference each other through operand/user edges (mirrored) and are
//! chained by CFG successor/predecessor edges (mirrored) inside their
//! procedure's [`Subgraph`]. [`PointerAnalysis`] builds the graph from a
//! module and drives the fixed point.

use std::collections::btree_set;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use stdx::{impl_debug, impl_idx_from};
use typed_index_collections::TiVec;

pub use crate::analysis::PtaStats;
pub use crate::builder::{BuildError, NodeOrigin, PointerAnalysis};
pub use crate::validator::{validate, ValidatorReport};

mod analysis;
mod builder;
mod validator;

#[cfg(test)]
mod tests;

/// Id of a pointer-graph node. Id 0 is reserved and invalid.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct PgNode(u32);
impl_idx_from!(PgNode(u32));
impl_debug!(match PgNode{n => "pg{}",n.0;});

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct SubgraphId(u32);
impl_idx_from!(SubgraphId(u32));
impl_debug!(match SubgraphId{s => "subg{}",s.0;});

/// A byte offset into an abstract memory object; `UNKNOWN` when it cannot be
/// determined statically.
#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Offset(pub u64);

impl Offset {
    pub const UNKNOWN: Offset = Offset(u64::MAX);

    pub fn is_unknown(self) -> bool {
        self == Offset::UNKNOWN
    }

    /// Offset addition; `UNKNOWN` is absorbing.
    pub fn add(self, other: Offset) -> Offset {
        if self.is_unknown() || other.is_unknown() {
            Offset::UNKNOWN
        } else {
            Offset(self.0 + other.0)
        }
    }
}

impl fmt::Debug for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unknown() {
            write!(f, "?")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// A single points-to fact: an object and an offset into it.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct Pointer {
    pub target: PgNode,
    pub offset: Offset,
}

impl Pointer {
    pub fn new(target: PgNode, offset: u64) -> Pointer {
        Pointer { target, offset: Offset(offset) }
    }

    pub fn unknown_offset(target: PgNode) -> Pointer {
        Pointer { target, offset: Offset::UNKNOWN }
    }
}

/// An ordered set of [`Pointer`]s. Ordering keeps every client iteration
/// deterministic; insertion never removes facts, which makes the fixed point
/// monotone.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PointsToSet {
    set: BTreeSet<Pointer>,
}

impl PointsToSet {
    pub fn new() -> PointsToSet {
        PointsToSet::default()
    }

    /// Returns whether the set changed.
    pub fn add(&mut self, ptr: Pointer) -> bool {
        self.set.insert(ptr)
    }

    /// Returns whether the set changed.
    pub fn union(&mut self, other: &PointsToSet) -> bool {
        let before = self.set.len();
        self.set.extend(other.set.iter().copied());
        self.set.len() != before
    }

    pub fn contains(&self, ptr: &Pointer) -> bool {
        self.set.contains(ptr)
    }

    pub fn points_to_target(&self, target: PgNode) -> bool {
        self.iter().any(|ptr| ptr.target == target)
    }

    /// Do the two sets share a target object?
    pub fn overlaps_objects(&self, other: &PointsToSet) -> bool {
        self.iter().any(|ptr| other.points_to_target(ptr.target))
    }

    pub fn iter(&self) -> btree_set::Iter<'_, Pointer> {
        self.set.iter()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

impl<'a> IntoIterator for &'a PointsToSet {
    type Item = &'a Pointer;
    type IntoIter = btree_set::Iter<'a, Pointer>;

    fn into_iter(self) -> Self::IntoIter {
        self.set.iter()
    }
}

impl FromIterator<Pointer> for PointsToSet {
    fn from_iter<I: IntoIterator<Item = Pointer>>(iter: I) -> Self {
        PointsToSet { set: iter.into_iter().collect() }
    }
}

/// The operation a node stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PgNodeKind {
    /// Occupant of the reserved id 0.
    Invalid,
    /// The null sentinel object.
    Null,
    /// The unknown-memory sentinel object.
    UnknownMem,
    /// An abstract memory object; its identity is the node id.
    Alloc { heap: bool, zero_initialized: bool },
    Load,
    Store,
    Gep { offset: Offset },
    Memcpy { len: Offset },
    Cast,
    Phi,
    /// A pointer constant.
    Constant { pointer: Pointer },
    /// The singleton location of a procedure, target of function pointers.
    Function { func: ir::Func },
    Call,
    CallFuncptr,
    CallReturn,
    Entry { func: ir::Func },
    Return,
    Fork,
    Join,
    Free,
    Invalidate,
    /// Conservatively may point anywhere.
    Unknown,
}

impl PgNodeKind {
    pub fn is_memory_object(&self) -> bool {
        matches!(
            self,
            PgNodeKind::Alloc { .. }
                | PgNodeKind::Null
                | PgNodeKind::UnknownMem
                | PgNodeKind::Function { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct PgNodeData {
    pub kind: PgNodeKind,
    pub operands: Vec<PgNode>,
    /// Mirror of `operands`: every node that uses this node.
    pub users: Vec<PgNode>,
    /// CFG edges inside the pointer graph.
    pub successors: Vec<PgNode>,
    pub predecessors: Vec<PgNode>,
    pub points_to: PointsToSet,
    pub parent: Option<SubgraphId>,
    /// `CALL`/`CALL_FUNCPTR` nodes pair with their `CALL_RETURN`; forks pair
    /// with joins.
    pub paired: Option<PgNode>,
}

impl PgNodeData {
    fn new(kind: PgNodeKind) -> PgNodeData {
        PgNodeData {
            kind,
            operands: Vec::new(),
            users: Vec::new(),
            successors: Vec::new(),
            predecessors: Vec::new(),
            points_to: PointsToSet::new(),
            parent: None,
            paired: None,
        }
    }

    pub fn is_isolated(&self) -> bool {
        self.operands.is_empty()
            && self.users.is_empty()
            && self.successors.is_empty()
            && self.predecessors.is_empty()
    }
}

/// The pointer graph of one procedure.
#[derive(Debug, Clone)]
pub struct Subgraph {
    pub func: ir::Func,
    /// The `ENTRY` node.
    pub root: PgNode,
    /// The unified return, if the procedure can return.
    pub ret: Option<PgNode>,
    /// The node gathering variadic arguments.
    pub vararg: Option<PgNode>,
    /// One `RETURN` node per return instruction.
    pub return_nodes: Vec<PgNode>,
}

/// Owns every [`PgNodeData`] and every [`Subgraph`] plus the process-wide
/// call graph (caller entry to callee entry).
#[derive(Debug, Clone)]
pub struct PointerGraph {
    nodes: TiVec<PgNode, PgNodeData>,
    subgraphs: TiVec<SubgraphId, Subgraph>,
    pub nullptr: PgNode,
    pub unknown_memory: PgNode,
    root: Option<PgNode>,
    call_graph: BTreeMap<PgNode, BTreeSet<PgNode>>,
}

impl Default for PointerGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl PointerGraph {
    pub fn new() -> PointerGraph {
        let mut nodes: TiVec<PgNode, PgNodeData> = TiVec::new();
        nodes.push(PgNodeData::new(PgNodeKind::Invalid));
        let nullptr = nodes.push_and_get_key(PgNodeData::new(PgNodeKind::Null));
        let unknown_memory = nodes.push_and_get_key(PgNodeData::new(PgNodeKind::UnknownMem));

        nodes[nullptr].points_to.add(Pointer::new(nullptr, 0));
        nodes[unknown_memory].points_to.add(Pointer::unknown_offset(unknown_memory));

        PointerGraph {
            nodes,
            subgraphs: TiVec::new(),
            nullptr,
            unknown_memory,
            root: None,
            call_graph: BTreeMap::new(),
        }
    }

    /// Number of node slots, including the reserved id 0.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn node(&self, node: PgNode) -> &PgNodeData {
        &self.nodes[node]
    }

    pub fn node_mut(&mut self, node: PgNode) -> &mut PgNodeData {
        &mut self.nodes[node]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (PgNode, &PgNodeData)> {
        self.nodes.iter_enumerated().skip(1)
    }

    pub fn points_to(&self, node: PgNode) -> &PointsToSet {
        &self.nodes[node].points_to
    }

    pub fn root(&self) -> Option<PgNode> {
        self.root
    }

    pub fn set_root(&mut self, root: PgNode) {
        self.root = Some(root);
    }

    pub fn subgraph(&self, id: SubgraphId) -> &Subgraph {
        &self.subgraphs[id]
    }

    pub fn subgraph_mut(&mut self, id: SubgraphId) -> &mut Subgraph {
        &mut self.subgraphs[id]
    }

    pub fn subgraphs(&self) -> impl Iterator<Item = (SubgraphId, &Subgraph)> {
        self.subgraphs.iter_enumerated()
    }

    pub fn create_subgraph(&mut self, subgraph: Subgraph) -> SubgraphId {
        self.subgraphs.push_and_get_key(subgraph)
    }

    pub fn register_call(&mut self, caller_entry: PgNode, callee_entry: PgNode) -> bool {
        debug_assert!(matches!(self.nodes[caller_entry].kind, PgNodeKind::Entry { .. }));
        debug_assert!(matches!(self.nodes[callee_entry].kind, PgNodeKind::Entry { .. }));
        self.call_graph.entry(caller_entry).or_default().insert(callee_entry)
    }

    pub fn call_graph(&self) -> &BTreeMap<PgNode, BTreeSet<PgNode>> {
        &self.call_graph
    }

    // per-kind constructors

    fn create(&mut self, kind: PgNodeKind) -> PgNode {
        self.nodes.push_and_get_key(PgNodeData::new(kind))
    }

    pub fn create_alloc(&mut self, heap: bool) -> PgNode {
        self.create(PgNodeKind::Alloc { heap, zero_initialized: false })
    }

    pub fn create_load(&mut self, ptr: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::Load);
        self.add_operand(node, ptr);
        node
    }

    pub fn create_store(&mut self, value: PgNode, ptr: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::Store);
        self.add_operand(node, value);
        self.add_operand(node, ptr);
        node
    }

    pub fn create_gep(&mut self, base: PgNode, offset: Offset) -> PgNode {
        let node = self.create(PgNodeKind::Gep { offset });
        self.add_operand(node, base);
        node
    }

    pub fn create_memcpy(&mut self, dst: PgNode, src: PgNode, len: Offset) -> PgNode {
        let node = self.create(PgNodeKind::Memcpy { len });
        self.add_operand(node, dst);
        self.add_operand(node, src);
        node
    }

    pub fn create_cast(&mut self, value: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::Cast);
        self.add_operand(node, value);
        node
    }

    pub fn create_phi(&mut self) -> PgNode {
        self.create(PgNodeKind::Phi)
    }

    pub fn create_constant(&mut self, pointer: Pointer) -> PgNode {
        let node = self.create(PgNodeKind::Constant { pointer });
        self.nodes[node].points_to.add(pointer);
        node
    }

    pub fn create_function(&mut self, func: ir::Func) -> PgNode {
        self.create(PgNodeKind::Function { func })
    }

    pub fn create_call(&mut self) -> PgNode {
        self.create(PgNodeKind::Call)
    }

    pub fn create_funcptr_call(&mut self, callee: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::CallFuncptr);
        self.add_operand(node, callee);
        node
    }

    pub fn create_call_return(&mut self) -> PgNode {
        self.create(PgNodeKind::CallReturn)
    }

    pub fn create_entry(&mut self, func: ir::Func) -> PgNode {
        self.create(PgNodeKind::Entry { func })
    }

    pub fn create_return(&mut self) -> PgNode {
        self.create(PgNodeKind::Return)
    }

    pub fn create_fork(&mut self, callee: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::Fork);
        self.add_operand(node, callee);
        node
    }

    pub fn create_join(&mut self) -> PgNode {
        self.create(PgNodeKind::Join)
    }

    pub fn create_free(&mut self, ptr: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::Free);
        self.add_operand(node, ptr);
        node
    }

    pub fn create_invalidate(&mut self, ptr: PgNode) -> PgNode {
        let node = self.create(PgNodeKind::Invalidate);
        self.add_operand(node, ptr);
        node
    }

    pub fn create_unknown(&mut self) -> PgNode {
        let node = self.create(PgNodeKind::Unknown);
        self.nodes[node].points_to.add(Pointer::unknown_offset(self.unknown_memory));
        node
    }

    // edges

    pub fn add_operand(&mut self, node: PgNode, operand: PgNode) {
        debug_assert_ne!(usize::from(operand), 0);
        self.nodes[node].operands.push(operand);
        self.nodes[operand].users.push(node);
    }

    pub fn has_operand(&self, node: PgNode, operand: PgNode) -> bool {
        self.nodes[node].operands.contains(&operand)
    }

    /// Adds `operand` unless it is already present; used where the same
    /// actual feeds one formal through several call sites.
    pub fn add_operand_once(&mut self, node: PgNode, operand: PgNode) {
        if !self.has_operand(node, operand) {
            self.add_operand(node, operand);
        }
    }

    pub fn add_successor(&mut self, from: PgNode, to: PgNode) {
        if !self.nodes[from].successors.contains(&to) {
            self.nodes[from].successors.push(to);
            self.nodes[to].predecessors.push(from);
        }
    }

    /// Replaces the single successor of `from` (the provisional shortcut of
    /// an unresolved call) with `to`.
    pub fn replace_single_successor(&mut self, from: PgNode, to: PgNode) {
        assert_eq!(self.nodes[from].successors.len(), 1);
        let old = self.nodes[from].successors[0];
        self.nodes[from].successors.clear();
        self.nodes[old].predecessors.retain(|&pred| pred != from);
        self.add_successor(from, to);
    }

    pub fn set_paired(&mut self, a: PgNode, b: PgNode) {
        self.nodes[a].paired = Some(b);
        self.nodes[b].paired = Some(a);
    }

    /// Removes a node. The node must be isolated: no operands, users or CFG
    /// edges may remain.
    pub fn remove(&mut self, node: PgNode) {
        assert!(usize::from(node) > 0, "cannot remove the reserved node");
        assert!(self.nodes[node].is_isolated(), "only isolated nodes can be removed");
        self.nodes[node] = PgNodeData::new(PgNodeKind::Invalid);
    }
}
