//! Interprocedural glue.
//!
//! Call sites gain a control edge to their callees' entry nodes, actual-in
//! nodes feed formal-ins, returns feed the formal-out which feeds the
//! actual-out. Memory crossing the boundary rides on procedure def/use
//! summaries: a callee's non-local stores feed the call site, and loads
//! whose memory may come from outside are routed through the procedure
//! entry (see `data_dep.rs`). Fork sites get no synchronous return edge;
//! joins collect the spawned procedures' returns instead.

use std::collections::BTreeSet;

use ir::{Func, Module, Terminator};
use pta::{PgNode, PgNodeKind, PointerAnalysis};
use typed_index_collections::TiVec;

use crate::{DataflowFlags, DgNode, DgNodeKind, GraphId, SystemDependenceGraph};

/// Transitive memory def/use summary of one procedure.
#[derive(Debug, Default, Clone)]
pub(crate) struct Summary {
    pub defs: BTreeSet<PgNode>,
    pub uses: BTreeSet<PgNode>,
}

pub(crate) type Summaries = TiVec<GraphId, Summary>;

/// Is `object` a stack allocation belonging to `func` itself? Such memory
/// cannot be named by callers, so it stays out of the summaries.
pub(crate) fn object_is_local(pa: &PointerAnalysis<'_>, func: Func, object: PgNode) -> bool {
    if !matches!(pa.graph().node(object).kind, PgNodeKind::Alloc { heap: false, .. }) {
        return false;
    }
    match pa.origin(object) {
        Some(pta::NodeOrigin::Value(owner, _)) => owner == func,
        _ => false,
    }
}

/// Per-procedure def/use object summaries, closed transitively over the
/// call graph.
pub(crate) fn summaries(
    sdg: &SystemDependenceGraph,
    module: &Module,
    pa: &PointerAnalysis<'_>,
) -> Summaries {
    let mut summaries: Summaries = vec![Summary::default(); sdg.graphs.len()].into();

    // direct effects
    for (graph, dg) in sdg.graphs.iter_enumerated() {
        let func = dg.func;
        let data = &module.functions[func];
        for block in &data.blocks {
            for inst in &*block.instructions {
                let (def_op, use_op) = match &inst.op {
                    ir::Op::Store => (Some(&inst.args[1]), None),
                    ir::Op::Memcpy => (Some(&inst.args[0]), Some(&inst.args[1])),
                    ir::Op::Memset => (Some(&inst.args[0]), None),
                    ir::Op::Load(_) => (None, Some(&inst.args[0])),
                    _ => (None, None),
                };
                for (op, into_defs) in
                    [(def_op, true), (use_op, false)].into_iter().filter_map(|(op, d)| {
                        op.map(|op| (op, d))
                    })
                {
                    let cells = match op {
                        ir::Operand::Value(v) => {
                            pa.points_to_of_value(func, *v).cloned().unwrap_or_default()
                        }
                        ir::Operand::Global(g) => {
                            pa.graph().points_to(pa.node_of_global(*g)).clone()
                        }
                        _ => continue,
                    };
                    for cell in &cells {
                        if object_is_local(pa, func, cell.target) {
                            continue;
                        }
                        if into_defs {
                            summaries[graph].defs.insert(cell.target);
                        } else {
                            summaries[graph].uses.insert(cell.target);
                        }
                    }
                }
            }
        }
    }

    // close over the call graph; recursion converges because the sets only
    // grow
    let mut changed = true;
    while changed {
        changed = false;
        for (graph, dg) in sdg.graphs.iter_enumerated() {
            let mut extra = Summary::default();
            for &block in &dg.blocks {
                for &call in &sdg.blocks[block].call_sites {
                    for &callee in sdg.callees(call) {
                        extra.defs.extend(summaries[callee].defs.iter().copied());
                        extra.uses.extend(summaries[callee].uses.iter().copied());
                    }
                }
            }
            for def in extra.defs {
                changed |= summaries[graph].defs.insert(def);
            }
            for use_ in extra.uses {
                changed |= summaries[graph].uses.insert(use_);
            }
        }
    }

    summaries
}

pub(crate) fn link(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    pa: &PointerAnalysis<'_>,
    flags: DataflowFlags,
) {
    let call_nodes: Vec<DgNode> = sdg
        .nodes
        .iter_enumerated()
        .filter(|(_, data)| matches!(data.kind, DgNodeKind::Call(_)))
        .map(|(node, _)| node)
        .collect();

    for call in call_nodes {
        let (callees, actual_in, actual_out, is_fork) = match &sdg.nodes[call].kind {
            DgNodeKind::Call(data) => (
                data.callees.clone(),
                data.params.input.clone(),
                data.params.output,
                data.is_fork,
            ),
            _ => unreachable!(),
        };

        for callee in callees {
            let entry_node = sdg.graphs[callee].entry_node;
            let formal_in = sdg.graphs[callee].params.input.clone();
            let formal_out = sdg.graphs[callee].params.output;
            let callee_func = sdg.graphs[callee].func;

            // the callee runs because the call runs
            sdg.add_control_dep(call, entry_node);

            // actual -> formal; a fork passes its single payload argument
            // to the spawned procedure's first formal
            if is_fork {
                if let (Some(&actual), Some(&formal)) = (actual_in.get(3), formal_in.first()) {
                    sdg.add_data_dep(actual, formal);
                }
            } else {
                for (actual, formal) in actual_in.iter().zip(formal_in.iter()) {
                    sdg.add_data_dep(*actual, *formal);
                }
            }
            for &formal in &formal_in {
                sdg.add_control_dep(entry_node, formal);
            }

            // return sites feed the formal-out, which feeds the actual-out;
            // forks have no synchronous return edge, the join collects it
            if !is_fork {
                if let Some(formal_out) = formal_out {
                    link_returns(sdg, module, callee, callee_func, formal_out);
                    if let Some(actual_out) = actual_out {
                        sdg.add_data_dep(formal_out, actual_out);
                    }
                }
            }

            // the callee's stores of memory the caller can name flow back
            // into the call site
            if flags.interprocedural {
                link_escaping_defs(sdg, module, pa, callee, call);
            }

            // memory flowing into the callee is routed through its entry
            // node: the definitions reaching the call feed it via the
            // caller's reaching-definition edges on the call node
            sdg.add_data_dep(call, entry_node);
        }
    }

    if flags.interprocedural {
        link_joins(sdg, module);
    }
}

fn link_returns(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    callee: GraphId,
    callee_func: Func,
    formal_out: DgNode,
) {
    let blocks = sdg.graphs[callee].blocks.clone();
    for block in blocks {
        let Some(bb) = sdg.blocks[block].block else { continue };
        let is_ret = matches!(
            module.functions[callee_func].blocks[bb].terminator,
            Some(Terminator::Ret(_))
        );
        if is_ret {
            if let Some(term_node) = sdg.blocks[block].last_node() {
                sdg.add_data_dep(term_node, formal_out);
            }
        }
    }
}

/// Data edges from every non-local memory definition in the callee (and its
/// transitive callees) to the call site, standing in for formal-out nodes of
/// the affected objects.
fn link_escaping_defs(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    pa: &PointerAnalysis<'_>,
    callee: GraphId,
    call: DgNode,
) {
    // transitive closure of callee graphs
    let mut closure = vec![callee];
    let mut next = 0;
    while next < closure.len() {
        let graph = closure[next];
        next += 1;
        for &block in &sdg.graphs[graph].blocks.clone() {
            for &site in &sdg.blocks[block].call_sites.clone() {
                for &g in sdg.callees(site) {
                    if !closure.contains(&g) {
                        closure.push(g);
                    }
                }
            }
        }
    }

    let mut edges = Vec::new();
    for &graph in &closure {
        let func = sdg.graphs[graph].func;
        let data = &module.functions[func];
        for (bb, block) in data.blocks.iter_enumerated() {
            for (idx, inst) in block.instructions.iter_enumerated() {
                let writes = match &inst.op {
                    ir::Op::Store => Some(&inst.args[1]),
                    ir::Op::Memcpy | ir::Op::Memset => Some(&inst.args[0]),
                    _ => None,
                };
                let Some(ptr) = writes else { continue };
                let cells = match ptr {
                    ir::Operand::Value(v) => {
                        pa.points_to_of_value(func, *v).cloned().unwrap_or_default()
                    }
                    ir::Operand::Global(g) => pa.graph().points_to(pa.node_of_global(*g)).clone(),
                    _ => continue,
                };
                let escapes = cells.iter().any(|cell| !object_is_local(pa, func, cell.target));
                if !escapes {
                    continue;
                }
                let loc =
                    ir::Location { block: bb, kind: ir::LocationKind::Instruction(idx) };
                if let Some(node) = sdg.node_of(func, loc) {
                    edges.push(node);
                }
            }
        }
    }

    for def in edges {
        sdg.add_data_dep(def, call);
    }
}

/// `pthread_join` sites depend on the returns of every spawned procedure:
/// the deferred return edge.
fn link_joins(sdg: &mut SystemDependenceGraph, module: &Module) {
    let mut joins = Vec::new();
    let mut spawned = Vec::new();

    for (node, data) in sdg.nodes.iter_enumerated() {
        let DgNodeKind::Call(call) = &data.kind else { continue };
        if call.is_fork {
            spawned.extend(call.callees.iter().copied());
            continue;
        }
        let func = sdg.graphs[data.graph].func;
        let Some(loc) = data.loc else { continue };
        let ir::LocationKind::Instruction(idx) = loc.kind else { continue };
        let inst = &module.functions[func].blocks[loc.block].instructions[idx];
        if let Some(direct) = inst.direct_callee() {
            if module.functions[direct].name == ir::known_names::THREAD_JOIN {
                joins.push(node);
            }
        }
    }

    for &join in &joins {
        for &graph in &spawned {
            let func = sdg.graphs[graph].func;
            let formal_out = sdg.graphs[graph].params.output;
            if let Some(formal_out) = formal_out {
                sdg.add_data_dep(formal_out, join);
            } else {
                // procedures returning nothing still synchronise the join
                link_returns_to(sdg, module, graph, func, join);
            }
        }
    }
}

fn link_returns_to(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    graph: GraphId,
    func: Func,
    target: DgNode,
) {
    let blocks = sdg.graphs[graph].blocks.clone();
    for block in blocks {
        let Some(bb) = sdg.blocks[block].block else { continue };
        if matches!(module.functions[func].blocks[bb].terminator, Some(Terminator::Ret(_))) {
            if let Some(term_node) = sdg.blocks[block].last_node() {
                sdg.add_data_dep(term_node, target);
            }
        }
    }
}
