//! The points-to fixed point.
//!
//! Memory objects are keyed by `(allocation node, offset)` for field
//! sensitivity; an `UNKNOWN` offset collapses to the object-wide cell. All
//! updates are weak (monotone unions), so the sweep terminates once no set
//! grows. After every stable sweep, newly discovered function-pointer
//! targets are spliced in and the sweep restarts until the graph stops
//! growing too.

use ahash::AHashMap;
use log::debug;

use crate::builder::{BuildError, PointerAnalysis};
use crate::{Offset, PgNode, PgNodeKind, Pointer, PointsToSet};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PtaStats {
    pub nodes: usize,
    pub iterations: u64,
    pub processed: u64,
}

/// Abstract memory: the points-to set stored in every `(object, offset)`
/// cell. Iteration order of the map is never observable; cell contents are
/// ordered sets.
#[derive(Debug, Default)]
struct Memory {
    cells: AHashMap<(PgNode, Offset), PointsToSet>,
}

impl Memory {
    fn write(&mut self, target: PgNode, offset: Offset, values: &PointsToSet) -> bool {
        self.cells.entry((target, offset)).or_default().union(values)
    }

    /// Union of the cell at `offset` and the object-wide cell.
    fn read_into(&self, target: PgNode, offset: Offset, out: &mut PointsToSet) -> bool {
        let mut changed = false;
        if offset.is_unknown() {
            for ((cell_target, _), set) in &self.cells {
                if *cell_target == target {
                    changed |= out.union(set);
                }
            }
        } else {
            if let Some(set) = self.cells.get(&(target, offset)) {
                changed |= out.union(set);
            }
            if let Some(set) = self.cells.get(&(target, Offset::UNKNOWN)) {
                changed |= out.union(set);
            }
        }
        changed
    }

    fn object_cells(&self, target: PgNode) -> Vec<(Offset, PointsToSet)> {
        let mut cells: Vec<_> = self
            .cells
            .iter()
            .filter(|((cell_target, _), _)| *cell_target == target)
            .map(|((_, offset), set)| (*offset, set.clone()))
            .collect();
        cells.sort_by_key(|(offset, _)| *offset);
        cells
    }
}

impl<'a> PointerAnalysis<'a> {
    /// Runs the points-to fixed point; [`PointerAnalysis::build`] must have
    /// succeeded first.
    pub fn run(&mut self) -> Result<PtaStats, BuildError> {
        let mut mem = Memory::default();
        let mut stats = PtaStats::default();

        loop {
            let order = self.cfg_order();

            loop {
                stats.iterations += 1;
                let mut changed = false;
                for &node in &order {
                    stats.processed += 1;
                    changed |= self.update_node(&mut mem, node);
                }
                if !changed {
                    break;
                }
            }

            // splice in function-pointer targets discovered this round
            if !self.resolve_new_callees()? {
                break;
            }
        }

        stats.nodes = self.pg.len();
        debug!(
            "points-to fixpoint: {} nodes, {} iterations, {} node visits",
            stats.nodes, stats.iterations, stats.processed
        );
        Ok(stats)
    }

    /// All nodes reachable over PG CFG edges from the root, in BFS order.
    fn cfg_order(&self) -> Vec<PgNode> {
        let mut order = Vec::with_capacity(self.pg.len());
        let mut queue = workqueue::WorkQueue::<PgNode>::with_none(self.pg.len());
        if let Some(root) = self.pg.root() {
            queue.insert(root);
        }
        while let Some(node) = queue.take() {
            order.push(node);
            for &succ in &self.pg.node(node).successors {
                queue.insert(succ);
            }
        }
        order
    }

    fn update_node(&mut self, mem: &mut Memory, node: PgNode) -> bool {
        let kind = self.pg.node(node).kind.clone();
        match kind {
            PgNodeKind::Load => self.update_load(mem, node),
            PgNodeKind::Store => self.update_store(mem, node),
            PgNodeKind::Gep { offset } => self.update_gep(node, offset),
            PgNodeKind::Memcpy { len } => self.update_memcpy(mem, node, len),
            PgNodeKind::Cast
            | PgNodeKind::Phi
            | PgNodeKind::CallReturn
            | PgNodeKind::Return
            | PgNodeKind::Join => self.update_union(node),

            // static points-to or no points-to at all
            PgNodeKind::Invalid
            | PgNodeKind::Null
            | PgNodeKind::UnknownMem
            | PgNodeKind::Alloc { .. }
            | PgNodeKind::Constant { .. }
            | PgNodeKind::Function { .. }
            | PgNodeKind::Call
            | PgNodeKind::CallFuncptr
            | PgNodeKind::Entry { .. }
            | PgNodeKind::Fork
            | PgNodeKind::Free
            | PgNodeKind::Invalidate
            | PgNodeKind::Unknown => false,
        }
    }

    /// `points_to = union of operand points-to sets`.
    fn update_union(&mut self, node: PgNode) -> bool {
        let mut acc = PointsToSet::new();
        for i in 0..self.pg.node(node).operands.len() {
            let operand = self.pg.node(node).operands[i];
            acc.union(self.pg.points_to(operand));
        }
        self.pg.node_mut(node).points_to.union(&acc)
    }

    fn update_load(&mut self, mem: &mut Memory, node: PgNode) -> bool {
        let ptr = self.pg.node(node).operands[0];
        let ptr_pts: Vec<Pointer> = self.pg.points_to(ptr).iter().copied().collect();

        let mut acc = PointsToSet::new();
        for p in ptr_pts {
            if p.target == self.pg.unknown_memory {
                acc.add(Pointer::unknown_offset(self.pg.unknown_memory));
                continue;
            }
            mem.read_into(p.target, p.offset, &mut acc);
            // zeroed memory reads as null until something is stored there
            if let PgNodeKind::Alloc { zero_initialized: true, .. } = self.pg.node(p.target).kind {
                acc.add(Pointer::new(self.pg.nullptr, 0));
            }
        }
        self.pg.node_mut(node).points_to.union(&acc)
    }

    fn update_store(&mut self, mem: &mut Memory, node: PgNode) -> bool {
        let value = self.pg.node(node).operands[0];
        let ptr = self.pg.node(node).operands[1];
        let values = self.pg.points_to(value).clone();
        if values.is_empty() {
            return false;
        }

        let targets: Vec<Pointer> = self.pg.points_to(ptr).iter().copied().collect();
        let mut changed = false;
        for q in targets {
            if q.target == self.pg.nullptr {
                continue;
            }
            changed |= mem.write(q.target, q.offset, &values);
        }
        changed
    }

    fn update_gep(&mut self, node: PgNode, offset: Offset) -> bool {
        let base = self.pg.node(node).operands[0];
        let base_pts: Vec<Pointer> = self.pg.points_to(base).iter().copied().collect();

        let mut changed = false;
        for ptr in base_pts {
            let new = Pointer { target: ptr.target, offset: ptr.offset.add(offset) };
            changed |= self.pg.node_mut(node).points_to.add(new);
        }
        changed
    }

    fn update_memcpy(&mut self, mem: &mut Memory, node: PgNode, len: Offset) -> bool {
        let dst = self.pg.node(node).operands[0];
        let src = self.pg.node(node).operands[1];
        let dst_pts: Vec<Pointer> = self.pg.points_to(dst).iter().copied().collect();
        let src_pts: Vec<Pointer> = self.pg.points_to(src).iter().copied().collect();

        let mut changed = false;
        for s in &src_pts {
            for (cell_offset, values) in mem.object_cells(s.target) {
                for d in &dst_pts {
                    // only a fully known range copies field-precisely
                    let imprecise = s.offset.is_unknown()
                        || d.offset.is_unknown()
                        || len.is_unknown()
                        || cell_offset.is_unknown();
                    let target_offset = if imprecise {
                        Offset::UNKNOWN
                    } else {
                        if cell_offset.0 < s.offset.0 || cell_offset.0 >= s.offset.0 + len.0 {
                            continue;
                        }
                        Offset(d.offset.0 + (cell_offset.0 - s.offset.0))
                    };
                    changed |= mem.write(d.target, target_offset, &values);
                }
            }
        }
        changed
    }
}
