//! Lowering of an IR module into the pointer graph.
//!
//! Subgraphs are registered before their bodies are built so cyclic call
//! graphs terminate; interprocedural operands (actual to formal, return to
//! call-return) are wired in a separate pass once every referenced procedure
//! exists. Function-pointer calls are wired lazily by
//! [`PointerAnalysis::resolve_new_callees`] as the fixed point discovers
//! their targets.

use std::collections::BTreeSet;

use ahash::AHashMap;
use ir::{known_names, Block, Const, Func, Global, GlobalInit, InstIdx, Module, Op, Operand, Ty};
use log::warn;
use stdx::impl_display;
use typed_index_collections::TiVec;

use crate::{Offset, PgNode, PgNodeKind, Pointer, PointerGraph, PointsToSet, Subgraph, SubgraphId};

#[derive(Debug, PartialEq, Eq)]
pub enum BuildError {
    MissingEntry(String),
    MissingOperand { func: String, value: String },
}

impl_display! {
    match BuildError {
        BuildError::MissingEntry(name) => "no defined function `{}` in the module", name;
        BuildError::MissingOperand{func,value} => "missing value {} in function @{}", value, func;
    }
}
impl std::error::Error for BuildError {}

type BuildResult<T> = Result<T, BuildError>;

/// Where a node came from, for mapping analysis results back to the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOrigin {
    Value(Func, ir::Value),
    Global(Global),
}

/// First and last node of a lowered instruction sequence.
type Seq = Option<(PgNode, PgNode)>;

pub(crate) struct DirectCall {
    pub call: PgNode,
    pub call_return: PgNode,
    pub callee: Func,
    pub actuals: Vec<Option<PgNode>>,
}

pub(crate) struct FuncptrCall {
    pub call: PgNode,
    pub call_return: PgNode,
    pub actuals: Vec<Option<PgNode>>,
    pub resolved: BTreeSet<Func>,
}

pub(crate) struct ForkSite {
    pub fork: PgNode,
    /// The argument passed to the spawned procedure.
    pub arg: Option<PgNode>,
    pub resolved: BTreeSet<Func>,
}

/// Pointer analysis of one module: the graph, the builder state needed to
/// splice in callees discovered later, and the fixed-point driver (see
/// `analysis.rs`).
pub struct PointerAnalysis<'a> {
    pub(crate) module: &'a Module,
    pub(crate) pg: PointerGraph,
    pub(crate) entry: Func,

    value_nodes: AHashMap<(Func, ir::Value), PgNode>,
    global_nodes: TiVec<Global, PgNode>,
    function_nodes: AHashMap<Func, PgNode>,
    subgraphs_map: AHashMap<Func, SubgraphId>,
    origins: AHashMap<PgNode, NodeOrigin>,

    wire_queue: Vec<DirectCall>,
    pub(crate) funcptr_calls: Vec<FuncptrCall>,
    pub(crate) forks: Vec<ForkSite>,
    pub(crate) joins: Vec<PgNode>,
}

impl<'a> PointerAnalysis<'a> {
    /// Builds the pointer graph of `module` starting from `entry_name`.
    pub fn build(module: &'a Module, entry_name: &str) -> BuildResult<PointerAnalysis<'a>> {
        let entry = module
            .function_by_name(entry_name)
            .filter(|f| !module.functions[*f].is_declaration())
            .ok_or_else(|| BuildError::MissingEntry(entry_name.to_owned()))?;

        let mut builder = PointerAnalysis {
            module,
            pg: PointerGraph::new(),
            entry,
            value_nodes: AHashMap::new(),
            global_nodes: TiVec::new(),
            function_nodes: AHashMap::new(),
            subgraphs_map: AHashMap::new(),
            origins: AHashMap::new(),
            wire_queue: Vec::new(),
            funcptr_calls: Vec::new(),
            forks: Vec::new(),
            joins: Vec::new(),
        };

        // globals first; nodes can use them as operands
        let globals_seq = builder.build_globals();

        let subg = builder.create_or_get_subgraph(entry)?;
        let mut root = builder.pg.subgraph(subg).root;

        // the global initialisers run before the entry procedure
        if let Some((first, last)) = globals_seq {
            builder.pg.add_successor(last, root);
            root = first;
        }
        builder.pg.set_root(root);

        builder.drain_wire_queue();
        Ok(builder)
    }

    pub fn graph(&self) -> &PointerGraph {
        &self.pg
    }

    pub fn entry_func(&self) -> Func {
        self.entry
    }

    pub fn subgraph_of(&self, func: Func) -> Option<SubgraphId> {
        self.subgraphs_map.get(&func).copied()
    }

    pub fn node_of_value(&self, func: Func, value: ir::Value) -> Option<PgNode> {
        self.value_nodes.get(&(func, value)).copied()
    }

    pub fn node_of_global(&self, global: Global) -> PgNode {
        self.global_nodes[global]
    }

    pub fn origin(&self, node: PgNode) -> Option<NodeOrigin> {
        self.origins.get(&node).copied()
    }

    pub fn points_to_of_value(&self, func: Func, value: ir::Value) -> Option<&PointsToSet> {
        Some(self.pg.points_to(self.node_of_value(func, value)?))
    }

    /// Source name of a memory object: the `!name` of its alloc or the name
    /// of its global.
    pub fn object_name(&self, node: PgNode) -> Option<&str> {
        match self.origin(node)? {
            NodeOrigin::Value(func, value) => {
                self.module.functions[func].value_names.get(&value).map(String::as_str)
            }
            NodeOrigin::Global(global) => Some(&self.module.globals[global].name),
        }
    }

    /// The functions a points-to set may name.
    pub fn functions_pointed_by(&self, set: &PointsToSet) -> Vec<Func> {
        let mut res = Vec::new();
        for ptr in set {
            if let PgNodeKind::Function { func } = self.pg.node(ptr.target).kind {
                if !res.contains(&func) {
                    res.push(func);
                }
            }
        }
        res
    }

    // --- building ---

    fn build_globals(&mut self) -> Seq {
        let mut seq: Vec<PgNode> = Vec::new();
        for (id, data) in self.module.globals.iter_enumerated() {
            let node = self.pg.create_alloc(false);
            if data.init == GlobalInit::Zero {
                self.set_zero_initialized(node);
            }
            self.pg.node_mut(node).points_to.add(Pointer::new(node, 0));
            self.origins.insert(node, NodeOrigin::Global(id));
            self.global_nodes.push(node);
            seq.push(node);
        }

        // pointer-valued initialisers become stores at the graph root
        for (id, data) in self.module.globals.iter_enumerated() {
            let target = self.global_nodes[id];
            let value = match data.init {
                GlobalInit::Null => self.pg.nullptr,
                GlobalInit::Addr(g) => {
                    let constant = Pointer::new(self.global_nodes[g], 0);
                    self.pg.create_constant(constant)
                }
                GlobalInit::FuncAddr(f) => self.function_node(f),
                _ => continue,
            };
            let store = self.pg.create_store(value, target);
            seq.push(store);
        }

        for pair in seq.windows(2) {
            self.pg.add_successor(pair[0], pair[1]);
        }
        Some((*seq.first()?, *seq.last()?))
    }

    fn function_node(&mut self, func: Func) -> PgNode {
        if let Some(&node) = self.function_nodes.get(&func) {
            return node;
        }
        let node = self.pg.create_function(func);
        self.pg.node_mut(node).points_to.add(Pointer::new(node, 0));
        self.function_nodes.insert(func, node);
        node
    }

    fn set_zero_initialized(&mut self, node: PgNode) {
        if let PgNodeKind::Alloc { zero_initialized, .. } = &mut self.pg.node_mut(node).kind {
            *zero_initialized = true;
        }
    }

    pub(crate) fn create_or_get_subgraph(&mut self, func: Func) -> BuildResult<SubgraphId> {
        if let Some(&subg) = self.subgraphs_map.get(&func) {
            return Ok(subg);
        }
        self.build_function(func)
    }

    fn build_function(&mut self, func: Func) -> BuildResult<SubgraphId> {
        let module: &'a Module = self.module;
        let data = &module.functions[func];
        assert!(!data.is_declaration(), "cannot build an undefined function");

        let root = self.pg.create_entry(func);

        // formal arguments gather actuals like phis
        let mut prev = root;
        for param in data.param_values() {
            let arg = self.pg.create_phi();
            self.value_nodes.insert((func, param), arg);
            self.origins.insert(arg, NodeOrigin::Value(func, param));
            self.pg.add_successor(prev, arg);
            prev = arg;
        }
        let vararg = if data.sig.variadic {
            let node = self.pg.create_phi();
            self.pg.add_successor(prev, node);
            prev = node;
            Some(node)
        } else {
            None
        };

        // register before building the body so recursion terminates
        let subg = self.pg.create_subgraph(Subgraph {
            func,
            root,
            ret: None,
            vararg,
            return_nodes: Vec::new(),
        });
        self.subgraphs_map.insert(func, subg);

        let domtree = ir::DominatorTree::compute(data);
        let order = domtree.dom_tree_bfs_order();

        let mut block_seq: TiVec<Block, Seq> = vec![None; data.blocks.len()].into();
        let mut return_nodes = Vec::new();

        for &bb in &order {
            block_seq[bb] = self.build_block(func, subg, bb, &mut return_nodes)?;
        }

        // intraprocedural CFG edges; blocks that produced no node are
        // stepped through transitively
        for first in first_nodes_from(data, data.entry(), &block_seq) {
            self.pg.add_successor(prev, first);
        }
        for (bb, seq) in block_seq.iter_enumerated() {
            let (_, last) = match seq {
                Some(seq) => *seq,
                None => continue,
            };
            for succ in data.successors(bb) {
                for first in first_nodes_from(data, succ, &block_seq) {
                    self.pg.add_successor(last, first);
                }
            }
        }

        // unified return
        let ret = if return_nodes.is_empty() {
            None
        } else {
            let ret = self.pg.create_return();
            for &node in &return_nodes {
                self.pg.add_successor(node, ret);
                self.pg.add_operand(ret, node);
            }
            Some(ret)
        };

        {
            let subgraph = self.pg.subgraph_mut(subg);
            subgraph.ret = ret;
            subgraph.return_nodes = return_nodes;
        }

        // phis gather values from blocks built later, so their operands are
        // added in a second pass
        self.add_phi_operands(func);
        self.assign_parents(subg);

        Ok(subg)
    }

    /// Marks every node reachable from the subgraph root that has no parent
    /// yet. Nodes belonging to callees already carry their own parent.
    fn assign_parents(&mut self, subg: SubgraphId) {
        let root = self.pg.subgraph(subg).root;
        let mut stack = vec![root];
        let mut visited = BTreeSet::new();
        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            match self.pg.node(node).parent {
                None => self.pg.node_mut(node).parent = Some(subg),
                Some(parent) if parent == subg => {}
                Some(_) => continue,
            }
            let succs = self.pg.node(node).successors.clone();
            stack.extend(succs);
        }
    }

    fn build_block(
        &mut self,
        func: Func,
        subg: SubgraphId,
        bb: Block,
        return_nodes: &mut Vec<PgNode>,
    ) -> BuildResult<Seq> {
        let module: &'a Module = self.module;
        let data = &module.functions[func];

        // phi nodes are created now and filled in the second pass, so
        // forward references resolve
        for phi in &*data.blocks[bb].phis {
            let node = self.pg.create_phi();
            self.pg.node_mut(node).parent = Some(subg);
            self.value_nodes.insert((func, phi.dst), node);
            self.origins.insert(node, NodeOrigin::Value(func, phi.dst));
        }

        let mut seq: Seq = None;
        for idx in data.blocks[bb].instructions.keys() {
            let inst_seq = self.build_instruction(func, subg, bb, idx)?;
            seq = chain(&mut self.pg, seq, inst_seq);
        }

        // a returning terminator becomes a RETURN node fed by its operand
        if let Some(ir::Terminator::Ret(value)) = &data.blocks[bb].terminator {
            let operand = value.as_ref().and_then(|op| self.try_get_operand(func, op));
            let node = self.pg.create_return();
            if let Some(operand) = operand {
                self.pg.add_operand(node, operand);
            }
            self.pg.node_mut(node).parent = Some(subg);
            seq = chain(&mut self.pg, seq, Some((node, node)));
            return_nodes.push(node);
        }

        Ok(seq)
    }

    fn add_phi_operands(&mut self, func: Func) {
        let module: &'a Module = self.module;
        let data = &module.functions[func];
        for block in &data.blocks {
            for phi in &*block.phis {
                let node = self.value_nodes[&(func, phi.dst)];
                for (_, op) in &phi.sources {
                    if let Some(operand) = self.try_get_operand(func, op) {
                        self.pg.add_operand_once(node, operand);
                    }
                }
            }
        }
    }

    /// Resolves an operand to its node, or `None` when the value carries no
    /// pointer information.
    fn try_get_operand(&mut self, func: Func, op: &Operand) -> Option<PgNode> {
        match op {
            Operand::Value(value) => self.value_nodes.get(&(func, *value)).copied(),
            Operand::Const(Const::Null) => Some(self.pg.nullptr),
            Operand::Const(c) if c.is_zero() => Some(self.pg.nullptr),
            // some constant we cannot model
            Operand::Const(_) => Some(self.pg.unknown_memory),
            Operand::Global(global) => Some(self.global_nodes[*global]),
            Operand::FuncAddr(f) => Some(self.function_node(*f)),
        }
    }

    /// Like [`Self::try_get_operand`], but a missing pointer-typed value is
    /// fatal; a missing non-pointer value degrades to unknown memory.
    fn get_operand(&mut self, func: Func, op: &Operand) -> BuildResult<PgNode> {
        if let Some(node) = self.try_get_operand(func, op) {
            return Ok(node);
        }
        let data = &self.module.functions[func];
        let pointerish = match op {
            Operand::Value(v) => data.value_ty(*v).map_or(true, |ty| ty.contains_pointer()),
            _ => false,
        };
        if pointerish {
            Err(BuildError::MissingOperand { func: data.name.clone(), value: format!("{op:?}") })
        } else {
            Ok(self.pg.unknown_memory)
        }
    }

    fn build_instruction(
        &mut self,
        func: Func,
        subg: SubgraphId,
        bb: Block,
        idx: InstIdx,
    ) -> BuildResult<Seq> {
        let inst = self.module.functions[func].blocks[bb].instructions[idx].clone();

        match &inst.op {
            // irrelevant to pointers
            Op::Cmp | Op::Binary(_) => Ok(None),
            Op::Alloc(_) => {
                let node = self.pg.create_alloc(false);
                self.pg.node_mut(node).points_to.add(Pointer::new(node, 0));
                Ok(self.finish_leaf(func, subg, node, inst.dst))
            }
            Op::Load(_) => {
                let ptr = self.get_operand(func, &inst.args[0])?;
                let node = self.pg.create_load(ptr);
                Ok(self.finish_leaf(func, subg, node, inst.dst))
            }
            Op::Store => {
                let value = self.get_operand(func, &inst.args[0])?;
                let ptr = self.get_operand(func, &inst.args[1])?;
                let node = self.pg.create_store(value, ptr);
                Ok(self.finish_leaf(func, subg, node, None))
            }
            Op::Gep => {
                let base = self.get_operand(func, &inst.args[0])?;
                let offset = constant_offset(&inst.args[1]);
                let node = self.pg.create_gep(base, offset);
                Ok(self.finish_leaf(func, subg, node, inst.dst))
            }
            Op::Memcpy => {
                let dst = self.get_operand(func, &inst.args[0])?;
                let src = self.get_operand(func, &inst.args[1])?;
                let len = constant_offset(&inst.args[2]);
                let node = self.pg.create_memcpy(dst, src, len);
                Ok(self.finish_leaf(func, subg, node, None))
            }
            Op::Memset => Ok(self.build_memset(func, subg, &inst)),
            Op::Cast(_) => {
                let node = match self.try_get_operand(func, &inst.args[0]) {
                    Some(value) => self.pg.create_cast(value),
                    // int-to-pointer and friends
                    None => self.pg.create_unknown(),
                };
                Ok(self.finish_leaf(func, subg, node, inst.dst))
            }
            Op::Call(ret_ty) => self.build_call(func, subg, &inst, ret_ty.clone()),
            Op::Unknown(_) => {
                warn!(
                    "unhandled instruction in @{}, treated as unknown",
                    self.module.functions[func].name
                );
                let node = self.pg.create_unknown();
                Ok(self.finish_leaf(func, subg, node, inst.dst))
            }
        }
    }

    fn build_memset(&mut self, func: Func, subg: SubgraphId, inst: &ir::Instruction) -> Seq {
        let zeroing = matches!(&inst.args[1], Operand::Const(c) if c.is_zero());
        let dst = self.try_get_operand(func, &inst.args[0])?;

        if zeroing && matches!(self.pg.node(dst).kind, PgNodeKind::Alloc { .. }) {
            self.set_zero_initialized(dst);
            return None;
        }

        if !zeroing {
            warn!("non-zero memset in @{}", self.module.functions[func].name);
        }
        // fallback: a store of null (or unknown) to the whole object
        let value = if zeroing { self.pg.nullptr } else { self.pg.unknown_memory };
        let gep = self.pg.create_gep(dst, Offset::UNKNOWN);
        let store = self.pg.create_store(value, gep);
        self.pg.node_mut(gep).parent = Some(subg);
        self.pg.node_mut(store).parent = Some(subg);
        self.pg.add_successor(gep, store);
        Some((gep, store))
    }

    fn build_call(
        &mut self,
        func: Func,
        subg: SubgraphId,
        inst: &ir::Instruction,
        ret_ty: Ty,
    ) -> BuildResult<Seq> {
        let dst = inst.dst;

        match inst.args[0] {
            Operand::FuncAddr(callee) => {
                let name = self.module.functions[callee].name.clone();

                if known_names::ALLOCATION.contains(&name.as_str()) {
                    let node = self.pg.create_alloc(true);
                    if name == known_names::ZEROING_ALLOCATION {
                        self.set_zero_initialized(node);
                    }
                    self.pg.node_mut(node).points_to.add(Pointer::new(node, 0));
                    return Ok(self.finish_leaf(func, subg, node, dst));
                }
                if name == known_names::FREE {
                    let seq = self.try_get_operand(func, &inst.args[1]).map(|ptr| {
                        let node = self.pg.create_free(ptr);
                        self.pg.node_mut(node).parent = Some(subg);
                        (node, node)
                    });
                    return Ok(seq);
                }
                if name == known_names::THREAD_CREATE {
                    return Ok(self.build_fork(func, subg, inst));
                }
                if name == known_names::THREAD_JOIN {
                    let node = self.pg.create_join();
                    self.joins.push(node);
                    return Ok(self.finish_leaf(func, subg, node, None));
                }

                if self.module.functions[callee].is_declaration() {
                    // an undefined function returning a value is modelled as
                    // unknown; a void one cannot affect pointers
                    if ret_ty.is_void() {
                        return Ok(None);
                    }
                    let node = self.pg.create_unknown();
                    return Ok(self.finish_leaf(func, subg, node, dst));
                }

                let (call, call_return) = self.create_call_pair(func, subg, dst, None);
                let actuals = self.resolve_actuals(func, inst);
                self.create_or_get_subgraph(callee)?;
                self.wire_queue.push(DirectCall { call, call_return, callee, actuals });
                Ok(Some((call, call_return)))
            }
            Operand::Value(_) => {
                let callee_node = self.get_operand(func, &inst.args[0])?;
                let (call, call_return) = self.create_call_pair(func, subg, dst, Some(callee_node));
                let actuals = self.resolve_actuals(func, inst);
                self.funcptr_calls.push(FuncptrCall {
                    call,
                    call_return,
                    actuals,
                    resolved: BTreeSet::new(),
                });
                Ok(Some((call, call_return)))
            }
            _ => {
                warn!(
                    "call through an unsupported operand in @{}",
                    self.module.functions[func].name
                );
                let node = self.pg.create_unknown();
                Ok(self.finish_leaf(func, subg, node, dst))
            }
        }
    }

    fn create_call_pair(
        &mut self,
        func: Func,
        subg: SubgraphId,
        dst: Option<ir::Value>,
        funcptr: Option<PgNode>,
    ) -> (PgNode, PgNode) {
        let call = match funcptr {
            Some(callee) => self.pg.create_funcptr_call(callee),
            None => self.pg.create_call(),
        };
        let call_return = self.pg.create_call_return();
        self.pg.set_paired(call, call_return);
        self.pg.node_mut(call).parent = Some(subg);
        self.pg.node_mut(call_return).parent = Some(subg);
        // provisional shortcut until a callee is spliced in
        self.pg.add_successor(call, call_return);
        // the returned pointers live in the call-return node
        if let Some(dst) = dst {
            self.value_nodes.insert((func, dst), call_return);
            self.origins.insert(call_return, NodeOrigin::Value(func, dst));
        }
        (call, call_return)
    }

    fn finish_leaf(
        &mut self,
        func: Func,
        subg: SubgraphId,
        node: PgNode,
        dst: Option<ir::Value>,
    ) -> Seq {
        self.pg.node_mut(node).parent = Some(subg);
        if let Some(dst) = dst {
            self.value_nodes.insert((func, dst), node);
            self.origins.insert(node, NodeOrigin::Value(func, dst));
        }
        Some((node, node))
    }

    fn build_fork(&mut self, func: Func, subg: SubgraphId, inst: &ir::Instruction) -> Seq {
        // pthread_create(handle, attr, start_routine, arg)
        let start = inst.args.get(3).and_then(|op| self.try_get_operand(func, op))?;
        let arg = inst.args.get(4).and_then(|op| self.try_get_operand(func, op));
        let fork = self.pg.create_fork(start);
        self.forks.push(ForkSite { fork, arg, resolved: BTreeSet::new() });
        self.finish_leaf(func, subg, fork, None)
    }

    fn resolve_actuals(&mut self, func: Func, inst: &ir::Instruction) -> Vec<Option<PgNode>> {
        inst.args[1..].iter().map(|op| self.try_get_operand(func, op)).collect()
    }

    /// Wires queued calls: CFG splicing, actual/formal operands and return
    /// sites. Runs after the initial build and after every ad-hoc build.
    pub(crate) fn drain_wire_queue(&mut self) {
        while let Some(call) = self.wire_queue.pop() {
            self.wire_call(call);
        }
    }

    fn wire_call(&mut self, info: DirectCall) {
        let DirectCall { call, call_return, callee, actuals } = info;
        let subg = self.subgraphs_map[&callee];
        let (root, ret, vararg) = {
            let subgraph = self.pg.subgraph(subg);
            (subgraph.root, subgraph.ret, subgraph.vararg)
        };

        // replace the provisional call -> call-return shortcut once we know
        // the callee returns; a non-returning callee keeps it, since the
        // resolved target may be an approximation
        if ret.is_some()
            && self.pg.node(call).successors.len() == 1
            && self.pg.node(call).successors[0] == call_return
        {
            self.pg.replace_single_successor(call, root);
        } else {
            self.pg.add_successor(call, root);
        }
        if let Some(ret) = ret {
            self.pg.add_successor(ret, call_return);
            self.pg.add_operand_once(call_return, ret);
        }

        self.add_argument_operands(callee, &actuals, vararg);

        // the call graph links caller entry to callee entry
        if let Some(caller_subg) = self.pg.node(call).parent {
            let caller_entry = self.pg.subgraph(caller_subg).root;
            self.pg.register_call(caller_entry, root);
        }
    }

    fn add_argument_operands(
        &mut self,
        callee: Func,
        actuals: &[Option<PgNode>],
        vararg: Option<PgNode>,
    ) {
        let params: Vec<ir::Value> = self.module.functions[callee].param_values().collect();
        for (i, actual) in actuals.iter().enumerate() {
            let actual = match actual {
                Some(node) => *node,
                None => continue,
            };
            match params.get(i) {
                Some(&param) => {
                    let formal = self.value_nodes[&(callee, param)];
                    self.pg.add_operand_once(formal, actual);
                }
                None => {
                    if let Some(vararg) = vararg {
                        self.pg.add_operand_once(vararg, actual);
                    }
                }
            }
        }
    }

    /// Whether `callee` accepts a call with `num_actuals` arguments.
    pub(crate) fn call_is_compatible(&self, callee: Func, num_actuals: usize) -> bool {
        let sig = &self.module.functions[callee].sig;
        sig.params.len() == num_actuals || (sig.variadic && num_actuals >= sig.params.len())
    }

    /// Splices newly discovered callees of function-pointer calls and forks
    /// into the graph. Returns `true` if anything changed.
    pub(crate) fn resolve_new_callees(&mut self) -> BuildResult<bool> {
        let mut changed = false;

        for i in 0..self.funcptr_calls.len() {
            let (call, call_return, num_actuals) = {
                let site = &self.funcptr_calls[i];
                (site.call, site.call_return, site.actuals.len())
            };
            let callee_node = self.pg.node(call).operands[0];
            let targets = self.functions_pointed_by(self.pg.points_to(callee_node));

            for target in targets {
                if self.funcptr_calls[i].resolved.contains(&target)
                    || !self.call_is_compatible(target, num_actuals)
                {
                    continue;
                }
                self.funcptr_calls[i].resolved.insert(target);
                changed = true;

                if self.module.functions[target].is_declaration() {
                    let unknown = self.pg.create_unknown();
                    self.pg.add_operand_once(call_return, unknown);
                    continue;
                }

                self.create_or_get_subgraph(target)?;
                let actuals = self.funcptr_calls[i].actuals.clone();
                self.wire_queue.push(DirectCall { call, call_return, callee: target, actuals });
            }
        }

        for i in 0..self.forks.len() {
            let fork = self.forks[i].fork;
            let start_node = self.pg.node(fork).operands[0];
            let targets = self.functions_pointed_by(self.pg.points_to(start_node));

            for target in targets {
                if self.forks[i].resolved.contains(&target)
                    || self.module.functions[target].is_declaration()
                {
                    continue;
                }
                self.forks[i].resolved.insert(target);
                changed = true;

                let subg = self.create_or_get_subgraph(target)?;
                let root = self.pg.subgraph(subg).root;
                // the spawned procedure runs concurrently; no synchronous
                // return edge
                self.pg.add_successor(fork, root);
                if let Some(arg) = self.forks[i].arg {
                    let param = self.module.functions[target].param_values().next();
                    if let Some(param) = param {
                        let formal = self.value_nodes[&(target, param)];
                        self.pg.add_operand_once(formal, arg);
                    }
                }

                // joins install the deferred return edges
                let return_nodes = self.pg.subgraph(subg).return_nodes.clone();
                for join in self.joins.clone() {
                    for &ret in &return_nodes {
                        self.pg.add_operand_once(join, ret);
                        self.pg.add_successor(ret, join);
                    }
                }
            }
        }

        self.drain_wire_queue();
        Ok(changed)
    }
}

fn chain(pg: &mut PointerGraph, seq: Seq, next: Seq) -> Seq {
    match (seq, next) {
        (None, next) => next,
        (seq, None) => seq,
        (Some((first, last)), Some((next_first, next_last))) => {
            pg.add_successor(last, next_first);
            Some((first, next_last))
        }
    }
}

/// First lowered nodes reachable from `start`, stepping through blocks that
/// lowered to nothing.
fn first_nodes_from(
    data: &ir::FunctionData,
    start: Block,
    block_seq: &TiVec<Block, Seq>,
) -> Vec<PgNode> {
    let mut firsts = Vec::new();
    let mut visited = vec![false; data.blocks.len()];
    let mut stack = vec![start];
    while let Some(bb) = stack.pop() {
        if std::mem::replace(&mut visited[usize::from(bb)], true) {
            continue;
        }
        match block_seq[bb] {
            Some((first, _)) => {
                if !firsts.contains(&first) {
                    firsts.push(first)
                }
            }
            None => stack.extend(data.successors(bb)),
        }
    }
    firsts
}
