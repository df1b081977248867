//! Data dependence.
//!
//! SSA def-to-use edges come straight from the value table. Memory edges
//! come from a reaching-definitions analysis per procedure: every
//! memory-writing instruction is an interned definition site with the cells
//! it may write (from the pointer analysis); a load depends on every
//! reaching definition whose cells may overlap the loaded ones. Call sites
//! participate as definitions and uses of their callees' summaries in the
//! interprocedural mode.

use ahash::AHashMap;
use bitset::BitSet;
use data_flow::{Forward, GenKill, GenKillAnalysis};
use ir::{Func, InstIdx, Location, LocationKind, Module, Op, Operand, ValueDef};
use pta::{Offset, PgNode, PointerAnalysis, PointsToSet};
use stdx::{impl_debug, impl_idx_from};
use typed_index_collections::TiVec;
use typed_indexmap::TiSet;

use crate::interproc::{object_is_local, summaries, Summaries};
use crate::{DgNode, DgNodeKind, GraphId, SystemDependenceGraph};

/// Switches between whole-program and intraprocedural data flow, and whether
/// call sites participate as definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataflowFlags {
    pub interprocedural: bool,
    pub bb_no_callsites: bool,
}

impl Default for DataflowFlags {
    fn default() -> Self {
        DataflowFlags { interprocedural: true, bb_no_callsites: false }
    }
}

/// Aggregated reaching-definitions statistics over all procedures.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataDepStats {
    pub blocks: u64,
    pub iterations: u64,
    pub processed_blocks: u64,
}

#[derive(PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
struct Def(u32);
impl_idx_from!(Def(u32));
impl_debug!(match Def{d => "def{}",d.0;});

/// One memory-writing instruction.
struct DefSite {
    node: DgNode,
    /// The cells this site may write.
    cells: PointsToSet,
    /// Set when the write definitely and exclusively hits this single cell.
    strong: Option<(PgNode, Offset)>,
}

struct DefInterner {
    /// Interned definition locations.
    locations: TiSet<Def, (ir::Block, InstIdx)>,
    sites: TiVec<Def, DefSite>,
    strong_groups: AHashMap<(PgNode, Offset), BitSet<Def>>,
}

struct ReachingDefs<'a> {
    intern: &'a DefInterner,
}

impl GenKillAnalysis for ReachingDefs<'_> {
    type Idx = Def;
    type Direction = Forward;

    const NAME: &'static str = "reaching-definitions";

    fn domain_size(&self, _func: &ir::FunctionData) -> usize {
        self.intern.sites.len()
    }

    fn instruction_effect(
        &self,
        trans: &mut impl GenKill<Def>,
        _inst: &ir::Instruction,
        idx: InstIdx,
        bb: ir::Block,
    ) {
        if let Some(def) = self.intern.locations.index(&(bb, idx)) {
            if let Some(key) = self.intern.sites[def].strong {
                trans.kill_set(&self.intern.strong_groups[&key]);
            }
            trans.gen(def);
        }
    }
}

pub(crate) fn compute(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    pa: &PointerAnalysis<'_>,
    flags: DataflowFlags,
) -> DataDepStats {
    let summaries = summaries(sdg, module, pa);
    let mut stats = DataDepStats::default();

    for graph in sdg.graphs.keys().collect::<Vec<_>>() {
        ssa_edges(sdg, module, graph);
        memory_edges(sdg, module, pa, graph, flags, &summaries, &mut stats);
    }

    stats
}

/// The node defining `value` in `func`: the instruction or phi node, or the
/// formal-in argument for parameters.
fn def_node(sdg: &SystemDependenceGraph, graph: GraphId, func: Func, value: ir::Value, module: &Module) -> Option<DgNode> {
    match module.functions[func].value_def(value) {
        ValueDef::Param(i) => sdg.graphs[graph].params.input.get(i as usize).copied(),
        ValueDef::Inst(bb, idx) => {
            sdg.node_of(func, Location { block: bb, kind: LocationKind::Instruction(idx) })
        }
        ValueDef::Phi(bb, idx) => {
            sdg.node_of(func, Location { block: bb, kind: LocationKind::Phi(idx) })
        }
        ValueDef::Invalid => None,
    }
}

fn ssa_edges(sdg: &mut SystemDependenceGraph, module: &Module, graph: GraphId) {
    let func = sdg.graphs[graph].func;
    let data = &module.functions[func];

    for (bb, block) in data.blocks.iter_enumerated() {
        for (idx, phi) in block.phis.iter_enumerated() {
            let node = sdg
                .node_of(func, Location { block: bb, kind: LocationKind::Phi(idx) })
                .expect("phi without a node");
            for (src_bb, op) in &phi.sources {
                if let Operand::Value(v) = op {
                    if let Some(def) = def_node(sdg, graph, func, *v, module) {
                        sdg.add_data_dep(def, node);
                    }
                }
                // the chosen value depends on the path taken, so the phi
                // hangs onto the terminators of its source blocks
                let src_term =
                    sdg.node_of(func, Location { block: *src_bb, kind: LocationKind::Terminator });
                if let Some(src_term) = src_term {
                    sdg.add_control_dep(src_term, node);
                }
            }
        }

        for (idx, inst) in block.instructions.iter_enumerated() {
            let node = sdg
                .node_of(func, Location { block: bb, kind: LocationKind::Instruction(idx) })
                .expect("instruction without a node");

            let call_params = match &sdg.nodes[node].kind {
                DgNodeKind::Call(call) => Some((call.params.input.clone(), call.params.output)),
                _ => None,
            };
            match call_params {
                Some((actual_in, actual_out)) => {
                    // the called value itself
                    if let Operand::Value(v) = &inst.args[0] {
                        if let Some(def) = def_node(sdg, graph, func, *v, module) {
                            sdg.add_data_dep(def, node);
                        }
                    }
                    // caller computations feed the actual-ins, which feed
                    // the call
                    for (i, op) in inst.args[1..].iter().enumerate() {
                        let actual = actual_in[i];
                        if let Operand::Value(v) = op {
                            if let Some(def) = def_node(sdg, graph, func, *v, module) {
                                sdg.add_data_dep(def, actual);
                            }
                        }
                        sdg.add_data_dep(actual, node);
                        sdg.add_control_dep(node, actual);
                    }
                    // the returned value arrives through the actual-out
                    if let Some(actual_out) = actual_out {
                        sdg.add_data_dep(actual_out, node);
                        sdg.add_control_dep(node, actual_out);
                    }
                }
                None => {
                    for op in inst.args.iter() {
                        if let Operand::Value(v) = op {
                            if let Some(def) = def_node(sdg, graph, func, *v, module) {
                                sdg.add_data_dep(def, node);
                            }
                        }
                    }
                }
            }
        }

        if let Some(term) = &block.terminator {
            let node = sdg
                .node_of(func, Location { block: bb, kind: LocationKind::Terminator })
                .expect("terminator without a node");
            let mut used = Vec::new();
            term.visit_operands(|op| {
                if let Operand::Value(v) = op {
                    used.push(*v);
                }
            });
            for v in used {
                if let Some(def) = def_node(sdg, graph, func, v, module) {
                    sdg.add_data_dep(def, node);
                }
            }
        }
    }
}

/// The cells an operand may point at.
fn operand_cells(pa: &PointerAnalysis<'_>, func: Func, op: &Operand) -> PointsToSet {
    match op {
        Operand::Value(v) => pa.points_to_of_value(func, *v).cloned().unwrap_or_default(),
        Operand::Global(g) => {
            let node = pa.node_of_global(*g);
            pa.graph().points_to(node).clone()
        }
        _ => PointsToSet::new(),
    }
}

/// May two cell sets name a common location? `UNKNOWN` offsets and the
/// unknown-memory object overlap everything.
fn cells_overlap(pa: &PointerAnalysis<'_>, a: &PointsToSet, b: &PointsToSet) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let unknown = pa.graph().unknown_memory;
    if a.points_to_target(unknown) || b.points_to_target(unknown) {
        return true;
    }
    a.iter().any(|pa_| {
        b.iter().any(|pb| {
            pa_.target == pb.target
                && (pa_.offset == pb.offset
                    || pa_.offset.is_unknown()
                    || pb.offset.is_unknown())
        })
    })
}

fn intern_defs(
    sdg: &SystemDependenceGraph,
    module: &Module,
    pa: &PointerAnalysis<'_>,
    graph: GraphId,
    flags: DataflowFlags,
    summaries: &Summaries,
) -> DefInterner {
    let func = sdg.graphs[graph].func;
    let data = &module.functions[func];
    let call_defs = flags.interprocedural && !flags.bb_no_callsites;

    let mut locations: TiSet<Def, (ir::Block, InstIdx)> = TiSet::new();
    let mut sites: TiVec<Def, DefSite> = TiVec::new();

    for (bb, block) in data.blocks.iter_enumerated() {
        for (idx, inst) in block.instructions.iter_enumerated() {
            let node = match sdg
                .node_of(func, Location { block: bb, kind: LocationKind::Instruction(idx) })
            {
                Some(node) => node,
                None => continue,
            };

            let cells = match &inst.op {
                Op::Store => operand_cells(pa, func, &inst.args[1]),
                Op::Memcpy | Op::Memset => operand_cells(pa, func, &inst.args[0]),
                Op::Call(_) if call_defs => {
                    let mut cells = PointsToSet::new();
                    for &callee in sdg.callees(node) {
                        for &object in &summaries[callee].defs {
                            cells.add(pta::Pointer::unknown_offset(object));
                        }
                    }
                    cells
                }
                _ => continue,
            };
            if cells.is_empty() {
                continue;
            }

            // a store to exactly one concrete, singly-instantiated cell
            // overwrites it for sure
            let strong = match (&inst.op, cells.len()) {
                (Op::Store, 1) => {
                    let cell = *cells.iter().next().unwrap();
                    let unique = matches!(
                        pa.graph().node(cell.target).kind,
                        pta::PgNodeKind::Alloc { heap: false, .. }
                    );
                    (unique && !cell.offset.is_unknown()).then_some((cell.target, cell.offset))
                }
                _ => None,
            };

            let (def, new) = locations.ensure((bb, idx));
            debug_assert!(new);
            debug_assert_eq!(def, sites.next_key());
            sites.push(DefSite { node, cells, strong });
        }
    }

    let mut strong_groups: AHashMap<(PgNode, Offset), BitSet<Def>> = AHashMap::new();
    for (def, site) in sites.iter_enumerated() {
        if let Some(key) = site.strong {
            strong_groups
                .entry(key)
                .or_insert_with(|| BitSet::new_empty(sites.len()))
                .insert(def);
        }
    }

    DefInterner { locations, sites, strong_groups }
}

fn memory_edges(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    pa: &PointerAnalysis<'_>,
    graph: GraphId,
    flags: DataflowFlags,
    summaries: &Summaries,
    stats: &mut DataDepStats,
) {
    let func = sdg.graphs[graph].func;
    let data = &module.functions[func];
    let entry_node = sdg.graphs[graph].entry_node;

    let intern = intern_defs(sdg, module, pa, graph, flags, summaries);
    let results = ReachingDefs { intern: &intern }.into_engine(data).iterate_to_fixpoint();
    stats.blocks += results.stats.blocks;
    stats.iterations += results.stats.iterations;
    stats.processed_blocks += results.stats.processed_blocks;

    let mut cursor = results.as_results_cursor(data);
    let mut new_edges: Vec<(DgNode, DgNode)> = Vec::new();

    for (bb, block) in data.blocks.iter_enumerated() {
        for (idx, inst) in block.instructions.iter_enumerated() {
            let node = match sdg
                .node_of(func, Location { block: bb, kind: LocationKind::Instruction(idx) })
            {
                Some(node) => node,
                None => continue,
            };

            // what does this instruction read from memory?
            let used_cells = match &inst.op {
                Op::Load(_) => operand_cells(pa, func, &inst.args[0]),
                Op::Memcpy => operand_cells(pa, func, &inst.args[1]),
                Op::Call(_) if flags.interprocedural => {
                    let mut cells = PointsToSet::new();
                    for &callee in sdg.callees(node) {
                        for &object in &summaries[callee].uses {
                            cells.add(pta::Pointer::unknown_offset(object));
                        }
                    }
                    cells
                }
                _ => continue,
            };
            if used_cells.is_empty() {
                continue;
            }

            cursor.seek_before(data, Location { block: bb, kind: LocationKind::Instruction(idx) });
            let mut found = false;
            for def in cursor.get().iter() {
                let site = &intern.sites[def];
                if cells_overlap(pa, &site.cells, &used_cells) {
                    new_edges.push((site.node, node));
                    found = true;
                }
            }

            // memory that was not written here may have been written by a
            // caller; route the dependence through the procedure entry
            if flags.interprocedural {
                let foreign = used_cells
                    .iter()
                    .any(|cell| !object_is_local(pa, func, cell.target));
                if foreign || !found {
                    new_edges.push((entry_node, node));
                }
            }
        }
    }

    for (def, use_) in new_edges {
        sdg.add_data_dep(def, use_);
    }
}
