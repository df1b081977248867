//! Mapping slicing criteria to SDG nodes.
//!
//! The grammar: `line:variable` matches loads/stores of the named variable
//! on that source line; `:name` (empty line part) matches everything
//! touching the global of that name; `name` matches call sites of `name`;
//! `name()` is the data form of a call-site criterion; `ret` matches the
//! returns of the entry procedure.

use ir::{Func, LocationKind, Module, Op, Operand};
use log::{info, warn};
use pta::{PointerAnalysis, PointsToSet};
use sdg::{DgNode, SystemDependenceGraph};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Criterion {
    LineVar { line: u32, var: String },
    GlobalVar { name: String },
    CallSite { name: String },
    Ret,
}

fn parse_criteria(spec: &str) -> Vec<Criterion> {
    let mut criteria = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
        if part == "ret" {
            criteria.push(Criterion::Ret);
        } else if let Some((line, var)) = part.split_once(':') {
            if line.is_empty() {
                criteria.push(Criterion::GlobalVar { name: var.to_owned() });
            } else {
                match line.parse() {
                    Ok(line) => criteria.push(Criterion::LineVar { line, var: var.to_owned() }),
                    Err(_) => warn!(
                        "invalid line `{line}`: needs to be a number or empty for globals"
                    ),
                }
            }
        } else if let Some(name) = part.strip_suffix("()") {
            warn!(
                "found a data slicing criterion `{part}`; \
                 this is not fully supported, so adding to be sound"
            );
            criteria.push(Criterion::CallSite { name: name.to_owned() });
        } else {
            criteria.push(Criterion::CallSite { name: part.to_owned() });
        }
    }
    criteria
}

/// Does the instruction use memory that may be the named variable? An empty
/// or unknown points-to set conservatively matches, as it may still be a
/// definition of the variable.
fn touches_variable(
    pa: &PointerAnalysis<'_>,
    func: Func,
    ptr: &Operand,
    var: &str,
) -> bool {
    let cells: Option<PointsToSet> = match ptr {
        Operand::Value(v) => pa.points_to_of_value(func, *v).cloned(),
        Operand::Global(g) => Some(pa.graph().points_to(pa.node_of_global(*g)).clone()),
        _ => None,
    };
    let Some(cells) = cells else { return true };
    cells.iter().any(|cell| {
        cell.target == pa.graph().unknown_memory
            || pa.object_name(cell.target) == Some(var)
    })
}

fn is_call_to(module: &Module, sdg: &SystemDependenceGraph, node: DgNode, name: &str) -> bool {
    let data = &sdg.nodes[node].kind;
    let sdg::DgNodeKind::Call(_) = data else { return false };

    let graph = sdg.nodes[node].graph;
    let func = sdg.graphs[graph].func;
    let Some(loc) = sdg.nodes[node].loc else { return false };
    let LocationKind::Instruction(idx) = loc.kind else { return false };
    let inst = &module.functions[func].blocks[loc.block].instructions[idx];

    // undefined callees are matched by name directly; resolved ones through
    // their graphs
    if let Some(direct) = inst.direct_callee() {
        if module.functions[direct].name == name {
            return true;
        }
    }
    sdg.callees(node)
        .iter()
        .any(|&callee| module.functions[sdg.graphs[callee].func].name == name)
}

pub(crate) fn find_criteria(
    module: &Module,
    pa: &PointerAnalysis<'_>,
    sdg: &SystemDependenceGraph,
    spec: &str,
) -> Vec<DgNode> {
    let criteria = parse_criteria(spec);
    let mut nodes = Vec::new();
    let mut push = |node: DgNode, nodes: &mut Vec<DgNode>| {
        if !nodes.contains(&node) {
            nodes.push(node);
        }
    };

    for criterion in &criteria {
        match criterion {
            Criterion::Ret => {
                let Some(entry) = sdg.entry else { continue };
                let func = sdg.graphs[entry].func;
                for &block in &sdg.graphs[entry].blocks {
                    let Some(bb) = sdg.blocks[block].block else { continue };
                    let data = &module.functions[func].blocks[bb];
                    if matches!(data.terminator, Some(ir::Terminator::Ret(_))) {
                        if let Some(node) = sdg.blocks[block].last_node() {
                            push(node, &mut nodes);
                        }
                    }
                }
            }
            Criterion::CallSite { name } => {
                for (node, _) in sdg.nodes.iter_enumerated() {
                    if is_call_to(module, sdg, node, name) {
                        push(node, &mut nodes);
                    }
                }
            }
            Criterion::LineVar { line, var } => {
                for (node, data) in sdg.nodes.iter_enumerated() {
                    let Some(loc) = data.loc else { continue };
                    let LocationKind::Instruction(idx) = loc.kind else { continue };
                    let func = sdg.graphs[data.graph].func;
                    let inst = &module.functions[func].blocks[loc.block].instructions[idx];
                    if inst.line != *line {
                        continue;
                    }
                    let matched = match &inst.op {
                        Op::Load(_) => touches_variable(pa, func, &inst.args[0], var),
                        Op::Store => touches_variable(pa, func, &inst.args[1], var),
                        _ => false,
                    };
                    if matched {
                        info!("matched line {line} with variable {var}");
                        push(node, &mut nodes);
                    }
                }
            }
            Criterion::GlobalVar { name } => {
                let Some(global) = module.global_by_name(name) else {
                    continue;
                };
                info!("matched global variable {name}");
                let object = pa.node_of_global(global);
                for (node, data) in sdg.nodes.iter_enumerated() {
                    let Some(loc) = data.loc else { continue };
                    let LocationKind::Instruction(idx) = loc.kind else { continue };
                    let func = sdg.graphs[data.graph].func;
                    let inst = &module.functions[func].blocks[loc.block].instructions[idx];
                    let ptr = match &inst.op {
                        Op::Load(_) => &inst.args[0],
                        Op::Store => &inst.args[1],
                        _ => continue,
                    };
                    let touches = match ptr {
                        Operand::Global(g) => pa.node_of_global(*g) == object,
                        Operand::Value(v) => pa
                            .points_to_of_value(func, *v)
                            .map_or(false, |pts| pts.points_to_target(object)),
                        _ => false,
                    };
                    if touches {
                        push(node, &mut nodes);
                    }
                }
            }
        }
    }

    nodes
}

/// Expands the criterion set with call sites of the named procedures found
/// by scanning the CFG backwards from every primary criterion, descending
/// into callee exit blocks at call sites.
pub(crate) fn expand_secondary_criteria(
    module: &Module,
    sdg: &SystemDependenceGraph,
    spec: &str,
    criteria: &mut Vec<DgNode>,
) {
    let names: Vec<String> = parse_criteria(spec)
        .into_iter()
        .filter_map(|criterion| match criterion {
            Criterion::CallSite { name } => Some(name),
            other => {
                warn!("unsupported secondary criterion {other:?}");
                None
            }
        })
        .collect();
    if names.is_empty() {
        return;
    }

    let mut queue = workqueue::WorkQueue::<sdg::DgBlockId>::with_none(sdg.blocks.len());
    let mut found = Vec::new();

    let mut check = |node: DgNode,
                     queue: &mut workqueue::WorkQueue<sdg::DgBlockId>,
                     found: &mut Vec<DgNode>| {
        for name in &names {
            if is_call_to(module, sdg, node, name) && !found.contains(&node) {
                found.push(node);
            }
        }
        // descend into procedures this site calls
        for &callee in sdg.callees(node) {
            if let Some(exit) = sdg.graphs[callee].exit_block {
                queue.insert(exit);
            }
        }
    };

    // nodes before each criterion in its own block first
    for &criterion in criteria.iter() {
        let Some(block) = sdg.nodes[criterion].block else { continue };
        for &node in &sdg.blocks[block].nodes {
            if node == criterion {
                break;
            }
            check(node, &mut queue, &mut found);
        }
        for &pred in &sdg.blocks[block].predecessors {
            queue.insert(pred);
        }
    }

    // then everything backwards through the CFG
    while let Some(block) = queue.take() {
        let nodes = sdg.blocks[block].nodes.clone();
        for node in nodes {
            check(node, &mut queue, &mut found);
        }
        for &pred in &sdg.blocks[block].predecessors {
            queue.insert(pred);
        }
    }

    for node in found {
        if !criteria.contains(&node) {
            criteria.push(node);
        }
    }
}
