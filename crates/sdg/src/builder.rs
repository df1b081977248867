//! Construction of the SDG from a module and its pointer analysis.
//!
//! Every procedure the pointer analysis built a subgraph for gets a
//! [`DependenceGraph`]: blocks mirror the IR blocks (plus a synthetic exit
//! when returns are not unique), every phi, instruction and terminator
//! becomes a node, call instructions become call nodes carrying actual
//! parameter nodes and resolved callees.

use ir::{Func, Location, LocationKind, Module, Op, Operand, Terminator};
use pta::PointerAnalysis;

use crate::{
    ArgumentKind, CallData, DataflowFlags, DgBlockData, DgNode, DgNodeData, DgNodeKind,
    DependenceGraph, Parameters, SystemDependenceGraph,
};

/// Builds the full SDG: structure, post-dominators, control and data
/// dependence, and the interprocedural linking.
pub fn build(
    module: &Module,
    pa: &PointerAnalysis<'_>,
    flags: DataflowFlags,
) -> (SystemDependenceGraph, crate::DataDepStats) {
    let mut sdg = SystemDependenceGraph::empty();

    // one graph per procedure the pointer analysis reached, in discovery
    // order; the entry procedure is always the first subgraph
    let funcs: Vec<Func> = pa.graph().subgraphs().map(|(_, subg)| subg.func).collect();
    for func in &funcs {
        build_graph(&mut sdg, module, *func);
    }
    sdg.entry = sdg.graph_of(pa.entry_func());

    // callee graphs may be created after their call sites; resolve them now
    // that every graph exists
    resolve_callees(&mut sdg, module, pa);

    sdg.init_edges();

    for graph in sdg.graphs.keys().collect::<Vec<_>>() {
        crate::postdom::compute(&mut sdg, graph);
        crate::control_dep::compute(&mut sdg, graph);
    }

    let stats = crate::data_dep::compute(&mut sdg, module, pa, flags);
    crate::interproc::link(&mut sdg, module, pa, flags);

    (sdg, stats)
}

fn build_graph(sdg: &mut SystemDependenceGraph, module: &Module, func: Func) {
    let data = &module.functions[func];
    debug_assert!(!data.is_declaration());

    let graph = sdg.graphs.next_key();
    sdg.record_graph(func, graph);

    // blocks first so nodes can be placed
    let first_block = sdg.blocks.next_key();
    for bb in data.blocks.keys() {
        sdg.blocks.push(DgBlockData::new(graph, Some(bb)));
    }
    let dg_block = |bb: ir::Block| first_block + usize::from(bb);

    // CFG edges with branch labels
    for (bb, block_data) in data.blocks.iter_enumerated() {
        if let Some(term) = &block_data.terminator {
            for (succ, label) in term.labeled_successors() {
                let from = dg_block(bb);
                let to = dg_block(succ);
                sdg.blocks[from].successors.push((to, label));
                if !sdg.blocks[to].predecessors.contains(&from) {
                    sdg.blocks[to].predecessors.push(from);
                }
            }
        }
    }

    // the unique exit: a single returning block, or a synthetic one joining
    // all of them
    let exits: Vec<ir::Block> = data
        .blocks
        .iter_enumerated()
        .filter(|(_, b)| b.terminator.as_ref().map_or(false, Terminator::is_exit))
        .map(|(bb, _)| bb)
        .collect();
    let exit_block = match exits.as_slice() {
        [] => None,
        [single] => Some(dg_block(*single)),
        many => {
            let exit = sdg.blocks.push_and_get_key(DgBlockData::new(graph, None));
            for &bb in many {
                let from = dg_block(bb);
                sdg.blocks[from].successors.push((exit, 0));
                sdg.blocks[exit].predecessors.push(from);
            }
            Some(exit)
        }
    };

    // the entry node anchors interprocedural control dependence
    let entry_node = sdg.nodes.push_and_get_key(DgNodeData {
        kind: DgNodeKind::Entry,
        graph,
        block: Some(dg_block(data.entry())),
        loc: None,
        slice_id: 0,
    });
    sdg.blocks[dg_block(data.entry())].nodes.push(entry_node);

    // formal parameters
    let mut params = Parameters::default();
    for i in 0..data.sig.params.len() {
        let node = sdg.nodes.push_and_get_key(DgNodeData {
            kind: DgNodeKind::Argument(ArgumentKind::FormalIn(i as u32)),
            graph,
            block: None,
            loc: None,
            slice_id: 0,
        });
        params.input.push(node);
    }
    if !data.sig.ret.is_void() {
        let node = sdg.nodes.push_and_get_key(DgNodeData {
            kind: DgNodeKind::Argument(ArgumentKind::FormalOut),
            graph,
            block: None,
            loc: None,
            slice_id: 0,
        });
        params.output = Some(node);
    }

    // nodes, in execution order per block
    for (bb, block_data) in data.blocks.iter_enumerated() {
        let block = dg_block(bb);

        for phi in block_data.phis.keys() {
            let loc = Location { block: bb, kind: LocationKind::Phi(phi) };
            push_node(sdg, func, graph, block, loc, DgNodeKind::Instruction);
        }

        for (idx, inst) in block_data.instructions.iter_enumerated() {
            let loc = Location { block: bb, kind: LocationKind::Instruction(idx) };
            let kind = match &inst.op {
                Op::Call(_) => {
                    let call = build_call_data(sdg, module, graph, inst);
                    DgNodeKind::Call(call)
                }
                _ => DgNodeKind::Instruction,
            };
            let is_call = matches!(kind, DgNodeKind::Call(_));
            let node = push_node(sdg, func, graph, block, loc, kind);
            if is_call {
                sdg.blocks[block].call_sites.push(node);
            }
        }

        if block_data.terminator.is_some() {
            let loc = Location { block: bb, kind: LocationKind::Terminator };
            push_node(sdg, func, graph, block, loc, DgNodeKind::Instruction);
        }
    }

    sdg.graphs.push(DependenceGraph {
        func,
        entry_node,
        blocks: {
            let mut blocks: Vec<_> = data.blocks.keys().map(dg_block).collect();
            if let Some(exit) = exit_block {
                if !blocks.contains(&exit) {
                    blocks.push(exit);
                }
            }
            blocks
        },
        entry_block: Some(dg_block(data.entry())),
        exit_block,
        params,
    });
}

fn push_node(
    sdg: &mut SystemDependenceGraph,
    func: Func,
    graph: crate::GraphId,
    block: crate::DgBlockId,
    loc: Location,
    kind: DgNodeKind,
) -> DgNode {
    let node = sdg.nodes.push_and_get_key(DgNodeData {
        kind,
        graph,
        block: Some(block),
        loc: Some(loc),
        slice_id: 0,
    });
    sdg.blocks[block].nodes.push(node);
    sdg.record_node(func, loc, node);
    node
}

fn build_call_data(
    sdg: &mut SystemDependenceGraph,
    module: &Module,
    graph: crate::GraphId,
    inst: &ir::Instruction,
) -> CallData {
    let is_fork = matches!(
        &inst.args[0],
        Operand::FuncAddr(f) if module.functions[*f].name == ir::known_names::THREAD_CREATE
    );

    let mut params = Parameters::default();
    for i in 0..inst.args.len().saturating_sub(1) {
        let node = sdg.nodes.push_and_get_key(DgNodeData {
            kind: DgNodeKind::Argument(ArgumentKind::ActualIn(i as u32)),
            graph,
            block: None,
            loc: None,
            slice_id: 0,
        });
        params.input.push(node);
    }
    if inst.dst.is_some() {
        let node = sdg.nodes.push_and_get_key(DgNodeData {
            kind: DgNodeKind::Argument(ArgumentKind::ActualOut),
            graph,
            block: None,
            loc: None,
            slice_id: 0,
        });
        params.output = Some(node);
    }

    CallData { callees: Vec::new(), params, is_fork }
}

/// Fills in the callee graphs of every call node: the direct target, or what
/// the pointer analysis found for the called value. Fork sites record the
/// spawned procedure instead.
fn resolve_callees(sdg: &mut SystemDependenceGraph, module: &Module, pa: &PointerAnalysis<'_>) {
    for node in sdg.nodes.keys().collect::<Vec<_>>() {
        let (graph, loc, is_fork) = match &sdg.nodes[node].kind {
            DgNodeKind::Call(call) => {
                (sdg.nodes[node].graph, sdg.nodes[node].loc.unwrap(), call.is_fork)
            }
            _ => continue,
        };
        let func = sdg.graphs[graph].func;
        let inst = match loc.kind {
            LocationKind::Instruction(idx) => &module.functions[func].blocks[loc.block].instructions[idx],
            _ => continue,
        };

        let target_op = if is_fork { inst.args.get(3) } else { Some(&inst.args[0]) };
        let targets: Vec<Func> = match target_op {
            Some(Operand::FuncAddr(f)) => vec![*f],
            Some(Operand::Value(v)) => pa
                .points_to_of_value(func, *v)
                .map(|pts| pa.functions_pointed_by(pts))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        let callees: Vec<_> = targets
            .into_iter()
            .filter(|f| !module.functions[*f].is_declaration())
            .filter_map(|f| sdg.graph_of(f))
            .collect();

        if let DgNodeKind::Call(call) = &mut sdg.nodes[node].kind {
            call.callees = callees;
        }
    }
}
