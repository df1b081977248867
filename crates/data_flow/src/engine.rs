//! The fixpoint solver.

use bitset::BitSet;
use ir::{Block, FunctionData};
use log::trace;
use typed_index_collections::TiVec;

use crate::{Direction, GenKillAnalysis, ResultsCursor};

/// Counters of one solver run; the block count, the number of whole-CFG
/// sweeps, and the number of block visits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DataflowStats {
    pub blocks: u64,
    pub iterations: u64,
    pub processed_blocks: u64,
}

/// An analysis that has converged to a fixpoint.
pub struct Results<A: GenKillAnalysis> {
    pub analysis: A,
    /// The dataflow state on entry to each block (in the direction of the
    /// analysis).
    pub entry_sets: TiVec<Block, BitSet<A::Idx>>,
    pub stats: DataflowStats,
}

impl<A: GenKillAnalysis> Results<A> {
    pub fn as_results_cursor<'a>(&'a self, func: &FunctionData) -> ResultsCursor<'a, A> {
        ResultsCursor::new(func, self)
    }
}

/// A solver for a gen/kill dataflow problem.
pub struct Engine<'a, A: GenKillAnalysis> {
    func: &'a FunctionData,
    analysis: A,
}

impl<'a, A: GenKillAnalysis> Engine<'a, A> {
    pub fn new(func: &'a FunctionData, analysis: A) -> Engine<'a, A> {
        Engine { func, analysis }
    }

    /// Sweeps the blocks in (reverse) DFS post-order until no entry state
    /// changes.
    pub fn iterate_to_fixpoint(self) -> Results<A> {
        let Engine { func, analysis } = self;

        let domain_size = analysis.domain_size(func);
        let mut entry_sets: TiVec<Block, BitSet<A::Idx>> =
            vec![BitSet::new_empty(domain_size); func.blocks.len()].into();
        if func.blocks.is_empty() {
            return Results { analysis, entry_sets, stats: DataflowStats::default() };
        }
        for bb in A::Direction::start_blocks(func) {
            analysis.initialize_start_block(func, &mut entry_sets[bb]);
        }

        let order = A::Direction::block_order(func);
        let preds = func.predecessors();

        let mut stats =
            DataflowStats { blocks: func.blocks.len() as u64, ..DataflowStats::default() };

        // `state` is reused between blocks to avoid reallocating
        let mut state = BitSet::new_empty(domain_size);
        let mut changed = true;
        while changed {
            changed = false;
            stats.iterations += 1;

            for &bb in &order {
                stats.processed_blocks += 1;

                state.clone_from(&entry_sets[bb]);
                A::Direction::apply_effects_in_block(&analysis, func, &mut state, bb);

                for target in A::Direction::flow_targets(func, &preds, bb) {
                    if entry_sets[target].union(&state) {
                        changed = true;
                    }
                }
            }
        }

        trace!(
            "{}: fixpoint after {} iterations over {} blocks",
            A::NAME,
            stats.iterations,
            stats.blocks
        );

        Results { analysis, entry_sets, stats }
    }
}
