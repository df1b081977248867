//! The sweep phase: rewriting the module according to a marking.
//!
//! Instructions without the slice id are dropped; an unmarked conditional
//! branch is retargeted to its block's immediate post-dominator; blocks left
//! without content are removed with their edges reconnected; finally unused
//! globals and functions disappear to a fixed point.

use ahash::{AHashMap, AHashSet};
use ir::{
    Block, Const, Func, FunctionData, Global, GlobalInit, Location, LocationKind, Module, Operand,
    Terminator, ValueDef,
};
use log::debug;
use sdg::SystemDependenceGraph;
use typed_index_collections::TiVec;

/// Everything the sweep needs, extracted from the SDG so the analyses can be
/// dropped before the module is mutated.
pub(crate) struct Marking {
    kept: AHashSet<(Func, Location)>,
    live_funcs: AHashSet<Func>,
    /// Immediate post-dominators of real blocks, for branch retargeting.
    ipdom: AHashMap<(Func, Block), Block>,
}

pub(crate) fn extract_marking(sdg: &SystemDependenceGraph, slice_id: u32) -> Marking {
    let mut marking = Marking {
        kept: AHashSet::new(),
        live_funcs: AHashSet::new(),
        ipdom: AHashMap::new(),
    };

    for data in &sdg.nodes {
        if data.slice_id != slice_id {
            continue;
        }
        let func = sdg.graphs[data.graph].func;
        marking.live_funcs.insert(func);
        if let Some(loc) = data.loc {
            marking.kept.insert((func, loc));
        }
    }

    for (_, dg) in sdg.graphs.iter_enumerated() {
        for &block in &dg.blocks {
            let (Some(bb), Some(ipdom)) = (sdg.blocks[block].block, sdg.blocks[block].ipdom())
            else {
                continue;
            };
            if let Some(ipdom_bb) = sdg.blocks[ipdom].block {
                marking.ipdom.insert((dg.func, bb), ipdom_bb);
            }
        }
    }

    marking
}

pub(crate) fn sweep(module: &mut Module, marking: &Marking) {
    let originally_defined: Vec<Func> = module
        .functions
        .keys()
        .filter(|&f| !module.functions[f].is_declaration())
        .collect();

    for func_id in module.functions.keys().collect::<Vec<_>>() {
        if module.functions[func_id].is_declaration() {
            continue;
        }
        if !marking.live_funcs.contains(&func_id) {
            // nothing of this procedure is in the slice
            module.functions[func_id].blocks = TiVec::new();
            module.functions[func_id].recompute_value_defs();
            continue;
        }
        sweep_function(module, func_id, marking);
    }

    // a procedure the surviving code still calls must stay callable, even if
    // nothing in its body made the slice: give it a bare return
    let mut referenced: AHashSet<Func> = AHashSet::new();
    for func in &module.functions {
        for block in &func.blocks {
            block.visit_operands(|op| {
                if let Operand::FuncAddr(f) = op {
                    referenced.insert(*f);
                }
            });
        }
    }
    for func_id in originally_defined {
        if referenced.contains(&func_id) && module.functions[func_id].is_declaration() {
            make_stub_body(&mut module.functions[func_id]);
        }
    }
}

/// A minimal body: one block returning a zero value of the signature's
/// return type.
fn make_stub_body(func: &mut FunctionData) {
    let ret = match &func.sig.ret {
        ty if ty.is_void() => Terminator::Ret(None),
        ir::Ty::Ptr(_) => Terminator::Ret(Some(Operand::Const(Const::Null))),
        ir::Ty::Int(bits) => {
            Terminator::Ret(Some(Operand::Const(Const::Int { bits: *bits, value: 0 })))
        }
        _ => Terminator::Ret(Some(Operand::Const(Const::Undef))),
    };
    func.blocks = TiVec::new();
    func.blocks.push(ir::BlockData { terminator: Some(ret), ..ir::BlockData::default() });
    func.recompute_value_defs();
}

fn sweep_function(module: &mut Module, func_id: Func, marking: &Marking) {
    let kept = close_over_operands(module, func_id, marking);
    let func = &mut module.functions[func_id];
    let kept = |loc: Location| kept.contains(&loc);

    for (bb, block) in func.blocks.iter_mut_enumerated() {
        let mut idx = 0usize;
        block.phis.raw.retain(|_| {
            let keep = kept(Location { block: bb, kind: LocationKind::Phi(idx.into()) });
            idx += 1;
            keep
        });

        let mut idx = 0usize;
        block.instructions.raw.retain(|_| {
            let keep = kept(Location { block: bb, kind: LocationKind::Instruction(idx.into()) });
            idx += 1;
            keep
        });
    }

    // terminators after the retention, so dangling operands can be detected
    func.recompute_value_defs();

    for bb in func.blocks.keys().collect::<Vec<_>>() {
        let term_kept = kept(Location { block: bb, kind: LocationKind::Terminator });
        let value_gone = |func: &FunctionData, op: &Operand| match op {
            Operand::Value(v) => {
                matches!(func.values.get(*v), Some(ValueDef::Invalid) | None)
            }
            _ => false,
        };

        let term = func.blocks[bb].terminator.clone();
        let new_term = match term {
            None => None,
            Some(Terminator::Ret(value)) => {
                // a procedure in the slice still has to return
                let value = value.map(|op| {
                    if value_gone(func, &op) {
                        Operand::Const(Const::Undef)
                    } else {
                        op
                    }
                });
                Some(Terminator::Ret(value))
            }
            Some(term @ (Terminator::Goto(_) | Terminator::Unreachable)) => Some(term),
            Some(term) if term_kept => Some(term),
            Some(term) => {
                // an unmarked conditional: nothing in the slice cares which
                // way it goes, so jump straight to the join
                match marking.ipdom.get(&(func_id, bb)) {
                    Some(&target) => Some(Terminator::Goto(target)),
                    None => {
                        // no unique join below; keep the branch with its
                        // condition scrubbed if the condition is gone
                        let mut term = term;
                        if let Terminator::Br { condition, .. }
                        | Terminator::Switch { discr: condition, .. } = &mut term
                        {
                            if value_gone(func, condition) {
                                *condition = Operand::Const(Const::Undef);
                            }
                        }
                        Some(term)
                    }
                }
            }
        };
        func.blocks[bb].terminator = new_term;
    }

    simplify_blocks(func);
    func.recompute_value_defs();
}

/// The kept locations of one procedure, closed over SSA operands: whatever
/// stays must not reference a removed definition. For backward slices this
/// is already a fixpoint; forward slices rely on it.
fn close_over_operands(
    module: &Module,
    func_id: Func,
    marking: &Marking,
) -> AHashSet<Location> {
    let func = &module.functions[func_id];
    let mut kept: AHashSet<Location> = marking
        .kept
        .iter()
        .filter(|(f, _)| *f == func_id)
        .map(|(_, loc)| *loc)
        .collect();

    let def_loc = |v: &ir::Value| match func.value_def(*v) {
        ValueDef::Inst(bb, idx) => {
            Some(Location { block: bb, kind: LocationKind::Instruction(idx) })
        }
        ValueDef::Phi(bb, idx) => Some(Location { block: bb, kind: LocationKind::Phi(idx) }),
        ValueDef::Param(_) | ValueDef::Invalid => None,
    };

    let mut queue: Vec<Location> = kept.iter().copied().collect();
    while let Some(loc) = queue.pop() {
        let mut used = Vec::new();
        match loc.kind {
            LocationKind::Phi(idx) => {
                for (_, op) in &func.blocks[loc.block].phis[idx].sources {
                    if let Operand::Value(v) = op {
                        used.push(*v);
                    }
                }
            }
            LocationKind::Instruction(idx) => {
                func.blocks[loc.block].instructions[idx].visit_operands(|op| {
                    if let Operand::Value(v) = op {
                        used.push(*v);
                    }
                });
            }
            // terminator operands are scrubbed instead of chased
            LocationKind::Terminator => {}
        }
        for v in used {
            if let Some(def) = def_loc(&v) {
                if kept.insert(def) {
                    queue.push(def);
                }
            }
        }
    }

    kept
}

/// Removes unreachable blocks, collapses empty forwarding blocks and
/// renumbers what is left.
fn simplify_blocks(func: &mut FunctionData) {
    loop {
        // reachability from the entry
        let mut reachable = vec![false; func.blocks.len()];
        let mut stack = vec![func.entry()];
        while let Some(bb) = stack.pop() {
            if std::mem::replace(&mut reachable[usize::from(bb)], true) {
                continue;
            }
            stack.extend(func.successors(bb));
        }

        // drop phi sources coming from unreachable predecessors
        for block in func.blocks.iter_mut() {
            for phi in block.phis.iter_mut() {
                phi.sources.retain(|(src, _)| reachable[usize::from(*src)]);
            }
        }

        // collapse empty forwarding blocks whose target carries no phis
        let mut forwarded: TiVec<Block, Option<Block>> =
            vec![None; func.blocks.len()].into();
        for (bb, block) in func.blocks.iter_enumerated() {
            if bb == func.entry() || !reachable[usize::from(bb)] {
                continue;
            }
            if block.phis.is_empty() && block.instructions.is_empty() {
                if let Some(Terminator::Goto(target)) = block.terminator {
                    if target != bb && func.blocks[target].phis.is_empty() {
                        forwarded[bb] = Some(target);
                    }
                }
            }
        }
        let resolve = |mut bb: Block, forwarded: &TiVec<Block, Option<Block>>| {
            // forwarding chains terminate because a chain revisiting a block
            // would need a CFG cycle of empty gotos, unreachable from entry
            let mut hops = 0;
            while let Some(next) = forwarded[bb] {
                bb = next;
                hops += 1;
                if hops > forwarded.len() {
                    break;
                }
            }
            bb
        };

        let mut changed = false;
        for bb in func.blocks.keys().collect::<Vec<_>>() {
            if let Some(term) = &mut func.blocks[bb].terminator {
                let mut targets = Vec::new();
                term.visit_successors(|succ| targets.push(succ));
                term.visit_successors_mut(|succ| {
                    let new = resolve(*succ, &forwarded);
                    if new != *succ {
                        *succ = new;
                    }
                });
                let mut new_targets = Vec::new();
                func.blocks[bb].terminator.as_ref().unwrap().visit_successors(|succ| {
                    new_targets.push(succ)
                });
                changed |= targets != new_targets;
            }
        }

        // renumber, dropping unreachable and fully forwarded blocks
        let mut reachable = vec![false; func.blocks.len()];
        let mut stack = vec![func.entry()];
        while let Some(bb) = stack.pop() {
            if std::mem::replace(&mut reachable[usize::from(bb)], true) {
                continue;
            }
            stack.extend(func.successors(bb));
        }

        let mut remap: TiVec<Block, Option<Block>> = vec![None; func.blocks.len()].into();
        let mut new_blocks: TiVec<Block, ir::BlockData> = TiVec::new();
        for (bb, block) in std::mem::take(&mut func.blocks).into_iter().enumerate() {
            let bb = Block::from(bb);
            if reachable[usize::from(bb)] {
                remap[bb] = Some(new_blocks.push_and_get_key(block));
            }
        }
        for block in new_blocks.iter_mut() {
            if let Some(term) = &mut block.terminator {
                term.visit_successors_mut(|succ| *succ = remap[*succ].unwrap());
            }
            for phi in block.phis.iter_mut() {
                phi.sources.retain(|(src, _)| remap[*src].is_some());
                for (src, _) in phi.sources.iter_mut() {
                    *src = remap[*src].unwrap();
                }
            }
        }
        let removed = remap.iter().any(Option::is_none);
        func.blocks = new_blocks;

        if !(changed || removed) {
            break;
        }
    }
}

/// Replaces the entry procedure's body with a single empty return; used when
/// no node matched the criterion.
pub(crate) fn make_entry_empty(module: &mut Module, entry: &str) {
    let Some(func_id) = module.function_by_name(entry) else { return };
    make_stub_body(&mut module.functions[func_id]);
}

/// Removes globals and functions nothing reachable from the entry uses.
/// Declarations whose last caller was sliced away disappear with it.
pub(crate) fn remove_unused(module: &mut Module, entry: &str) {
    let Some(entry_id) = module.function_by_name(entry) else { return };

    // transitively mark what the entry procedure touches
    let mut used_funcs: AHashSet<Func> = AHashSet::new();
    let mut used_globals: AHashSet<Global> = AHashSet::new();
    let mut func_queue = vec![entry_id];
    let mut global_queue: Vec<Global> = Vec::new();

    while !(func_queue.is_empty() && global_queue.is_empty()) {
        while let Some(func) = func_queue.pop() {
            if !used_funcs.insert(func) {
                continue;
            }
            for block in &module.functions[func].blocks {
                block.visit_operands(|op| match op {
                    Operand::FuncAddr(f) => func_queue.push(*f),
                    Operand::Global(g) => global_queue.push(*g),
                    _ => {}
                });
            }
        }
        while let Some(global) = global_queue.pop() {
            if !used_globals.insert(global) {
                continue;
            }
            match module.globals[global].init {
                GlobalInit::Addr(g) => global_queue.push(g),
                GlobalInit::FuncAddr(f) => func_queue.push(f),
                _ => {}
            }
        }
    }

    let removed_funcs = module.functions.len() - used_funcs.len();
    let removed_globals = module.globals.len() - used_globals.len();
    if removed_funcs == 0 && removed_globals == 0 {
        return;
    }
    debug!("removing {removed_funcs} unused functions and {removed_globals} unused globals");

    // compact both tables and rewrite every reference
    let mut func_remap: TiVec<Func, Option<Func>> = vec![None; module.functions.len()].into();
    let mut new_funcs: TiVec<Func, FunctionData> = TiVec::new();
    for (id, func) in std::mem::take(&mut module.functions).into_iter().enumerate() {
        let id = Func::from(id);
        if used_funcs.contains(&id) {
            func_remap[id] = Some(new_funcs.push_and_get_key(func));
        }
    }

    let mut global_remap: TiVec<Global, Option<Global>> =
        vec![None; module.globals.len()].into();
    let mut new_globals: TiVec<Global, ir::GlobalData> = TiVec::new();
    for (id, global) in std::mem::take(&mut module.globals).into_iter().enumerate() {
        let id = Global::from(id);
        if used_globals.contains(&id) {
            global_remap[id] = Some(new_globals.push_and_get_key(global));
        }
    }

    for func in new_funcs.iter_mut() {
        for block in func.blocks.iter_mut() {
            let remap_op = |op: &mut Operand| match op {
                Operand::FuncAddr(f) => *f = func_remap[*f].unwrap(),
                Operand::Global(g) => *g = global_remap[*g].unwrap(),
                _ => {}
            };
            for phi in block.phis.iter_mut() {
                for (_, op) in phi.sources.iter_mut() {
                    remap_op(op);
                }
            }
            for inst in block.instructions.iter_mut() {
                for op in inst.args.iter_mut() {
                    remap_op(op);
                }
            }
            if let Some(term) = &mut block.terminator {
                match term {
                    Terminator::Br { condition, .. } => remap_op(condition),
                    Terminator::Switch { discr, .. } => remap_op(discr),
                    Terminator::Ret(Some(op)) => remap_op(op),
                    _ => {}
                }
            }
        }
    }
    for global in new_globals.iter_mut() {
        match &mut global.init {
            GlobalInit::Addr(g) => *g = global_remap[*g].unwrap(),
            GlobalInit::FuncAddr(f) => *f = func_remap[*f].unwrap(),
            _ => {}
        }
    }

    module.functions = new_funcs;
    module.globals = new_globals;
}
