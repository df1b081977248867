//! A block-level gen/kill data-flow framework.
//!
//! Analyses describe their transfer functions per phi/instruction/terminator;
//! the [`Engine`] sweeps the CFG in (reverse) DFS post-order until no block
//! state changes, recording statistics about the run.

use std::fmt::Debug;

use bitset::BitSet;
use ir::{Block, FunctionData, Instruction, Location, LocationKind, Phi, Terminator};

pub use crate::direction::{Backward, Direction, Forward};
pub use crate::engine::{DataflowStats, Engine, Results};

mod direction;
mod engine;

/// The legal operations of a gen/kill transfer function.
pub trait GenKill<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> {
    /// Inserts `elem` into the state vector.
    fn gen(&mut self, elem: T);

    /// Removes `elem` from the state vector.
    fn kill(&mut self, elem: T);

    /// Calls `gen` for each element of `elems`.
    fn gen_set(&mut self, elems: &BitSet<T>);

    /// Calls `kill` for each element of `elems`.
    fn kill_set(&mut self, elems: &BitSet<T>);
}

impl<T: From<usize> + Into<usize> + Copy + PartialEq + Debug> GenKill<T> for BitSet<T> {
    fn gen(&mut self, elem: T) {
        self.insert(elem);
    }

    fn kill(&mut self, elem: T) {
        self.remove(elem);
    }

    fn gen_set(&mut self, elems: &BitSet<T>) {
        self.union(elems);
    }

    fn kill_set(&mut self, elems: &BitSet<T>) {
        self.subtract(elems);
    }
}

/// A gen/kill dataflow problem over a bit-set domain.
///
/// The default effects leave the state unchanged. Effects of a block are
/// applied in execution order: phis, then instructions, then the terminator.
pub trait GenKillAnalysis {
    type Idx: From<usize> + Into<usize> + Copy + PartialEq + Debug;
    type Direction: Direction;

    /// A descriptive name, used only for debugging.
    const NAME: &'static str;

    fn domain_size(&self, func: &FunctionData) -> usize;

    /// Mutates the state on entry to the start block (the entry block for
    /// forward analyses, every exit block for backward ones).
    fn initialize_start_block(&self, _func: &FunctionData, _state: &mut BitSet<Self::Idx>) {}

    fn phi_effect(
        &self,
        _trans: &mut impl GenKill<Self::Idx>,
        _phi: &Phi,
        _bb: Block,
        _idx: ir::PhiIdx,
    ) {
    }

    fn instruction_effect(
        &self,
        _trans: &mut impl GenKill<Self::Idx>,
        _inst: &Instruction,
        _idx: ir::InstIdx,
        _bb: Block,
    ) {
    }

    fn terminator_effect(
        &self,
        _trans: &mut impl GenKill<Self::Idx>,
        _term: &Terminator,
        _bb: Block,
    ) {
    }

    /// Creates an [`Engine`] to find the fixpoint for this problem.
    fn into_engine(self, func: &FunctionData) -> Engine<'_, Self>
    where
        Self: Sized,
    {
        Engine::new(func, self)
    }
}

pub(crate) fn apply_block_effects<A: GenKillAnalysis>(
    analysis: &A,
    func: &FunctionData,
    state: &mut BitSet<A::Idx>,
    bb: Block,
) {
    let data = &func.blocks[bb];
    for (idx, phi) in data.phis.iter_enumerated() {
        analysis.phi_effect(state, phi, bb, idx);
    }
    for (idx, inst) in data.instructions.iter_enumerated() {
        analysis.instruction_effect(state, inst, idx, bb);
    }
    if let Some(term) = &data.terminator {
        analysis.terminator_effect(state, term, bb);
    }
}

/// Inspects [`Results`] at arbitrary locations inside a block by replaying
/// the block's transfer functions from its entry state.
///
/// Only meaningful for forward analyses.
pub struct ResultsCursor<'a, A: GenKillAnalysis> {
    results: &'a Results<A>,
    state: BitSet<A::Idx>,
    pos: Option<Block>,
}

impl<'a, A: GenKillAnalysis> ResultsCursor<'a, A> {
    pub fn new(func: &FunctionData, results: &'a Results<A>) -> ResultsCursor<'a, A> {
        ResultsCursor {
            state: BitSet::new_empty(results.analysis.domain_size(func)),
            results,
            pos: None,
        }
    }

    pub fn analysis(&self) -> &A {
        &self.results.analysis
    }

    /// The state before any effect of `bb` has been applied.
    pub fn seek_to_block_entry(&mut self, bb: Block) {
        self.state.clone_from(&self.results.entry_sets[bb]);
        self.pos = Some(bb);
    }

    /// The state right before the effect at `loc` is applied.
    pub fn seek_before(&mut self, func: &FunctionData, loc: Location) {
        self.seek_to_block_entry(loc.block);
        let data = &func.blocks[loc.block];
        let analysis = &self.results.analysis;

        let phi_end = match loc.kind {
            LocationKind::Phi(phi) => usize::from(phi),
            _ => data.phis.len(),
        };
        for (idx, phi) in data.phis.iter_enumerated().take(phi_end) {
            analysis.phi_effect(&mut self.state, phi, loc.block, idx);
        }
        let inst_end = match loc.kind {
            LocationKind::Phi(_) => 0,
            LocationKind::Instruction(inst) => usize::from(inst),
            LocationKind::Terminator => data.instructions.len(),
        };
        for (idx, inst) in data.instructions.iter_enumerated().take(inst_end) {
            analysis.instruction_effect(&mut self.state, inst, idx, loc.block);
        }
    }

    /// The state after every effect of `bb`.
    pub fn seek_to_block_end(&mut self, func: &FunctionData, bb: Block) {
        self.seek_to_block_entry(bb);
        apply_block_effects(&self.results.analysis, func, &mut self.state, bb);
    }

    pub fn get(&self) -> &BitSet<A::Idx> {
        &self.state
    }
}
