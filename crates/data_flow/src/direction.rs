use bitset::BitSet;
use ir::{Block, FunctionData};
use typed_index_collections::TiVec;

use crate::{apply_block_effects, GenKillAnalysis};

/// Traversal direction of an analysis.
pub trait Direction {
    const IS_FORWARD: bool;

    /// The order blocks are swept in.
    fn block_order(func: &FunctionData) -> Vec<Block>;

    /// Which blocks receive the exit state of `bb`.
    fn flow_targets(func: &FunctionData, preds: &TiVec<Block, Vec<Block>>, bb: Block)
        -> Vec<Block>;

    /// Which blocks the analysis starts at.
    fn start_blocks(func: &FunctionData) -> Vec<Block>;

    fn apply_effects_in_block<A: GenKillAnalysis>(
        analysis: &A,
        func: &FunctionData,
        state: &mut BitSet<A::Idx>,
        bb: Block,
    );
}

pub struct Forward;

impl Direction for Forward {
    const IS_FORWARD: bool = true;

    fn block_order(func: &FunctionData) -> Vec<Block> {
        func.reverse_postorder()
    }

    fn flow_targets(
        func: &FunctionData,
        _preds: &TiVec<Block, Vec<Block>>,
        bb: Block,
    ) -> Vec<Block> {
        func.successors(bb)
    }

    fn start_blocks(func: &FunctionData) -> Vec<Block> {
        vec![func.entry()]
    }

    fn apply_effects_in_block<A: GenKillAnalysis>(
        analysis: &A,
        func: &FunctionData,
        state: &mut BitSet<A::Idx>,
        bb: Block,
    ) {
        apply_block_effects(analysis, func, state, bb);
    }
}

pub struct Backward;

impl Direction for Backward {
    const IS_FORWARD: bool = false;

    fn block_order(func: &FunctionData) -> Vec<Block> {
        func.postorder()
    }

    fn flow_targets(
        _func: &FunctionData,
        preds: &TiVec<Block, Vec<Block>>,
        bb: Block,
    ) -> Vec<Block> {
        preds[bb].clone()
    }

    fn start_blocks(func: &FunctionData) -> Vec<Block> {
        func.blocks
            .iter_enumerated()
            .filter(|(_, data)| data.terminator.as_ref().map_or(false, |t| t.is_exit()))
            .map(|(bb, _)| bb)
            .collect()
    }

    fn apply_effects_in_block<A: GenKillAnalysis>(
        analysis: &A,
        func: &FunctionData,
        state: &mut BitSet<A::Idx>,
        bb: Block,
    ) {
        // effects run in reverse execution order for backward problems
        let data = &func.blocks[bb];
        if let Some(term) = &data.terminator {
            analysis.terminator_effect(state, term, bb);
        }
        for (idx, inst) in data.instructions.iter_enumerated().rev() {
            analysis.instruction_effect(state, inst, idx, bb);
        }
        for (idx, phi) in data.phis.iter_enumerated().rev() {
            analysis.phi_effect(state, phi, bb, idx);
        }
    }
}
