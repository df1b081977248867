//! Structural validation of a built pointer graph.
//!
//! Broken mirror edges or corrupted sentinels would silently poison the
//! fixed point, so the builder runs this after construction; errors are
//! fatal, warnings are logged and execution continues.

use std::fmt;

use crate::{Offset, PgNode, PgNodeKind, Pointer, PointerGraph};

#[derive(Debug, Default)]
pub struct ValidatorReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidatorReport {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for ValidatorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for err in &self.errors {
            writeln!(f, "error: {err}")?;
        }
        for warning in &self.warnings {
            writeln!(f, "warning: {warning}")?;
        }
        Ok(())
    }
}

/// Checks the §operand/user and successor/predecessor mirrors, the sentinel
/// points-to sets, and per-kind operand arity.
pub fn validate(pg: &PointerGraph) -> ValidatorReport {
    let mut report = ValidatorReport::default();

    check_sentinels(pg, &mut report);

    for (id, node) in pg.nodes() {
        if matches!(node.kind, PgNodeKind::Invalid) {
            continue;
        }

        for &operand in &node.operands {
            if !pg.node(operand).users.contains(&id) {
                report.errors.push(format!("{id:?} has operand {operand:?} without a user edge"));
            }
        }
        for &user in &node.users {
            if !pg.node(user).operands.contains(&id) {
                report.errors.push(format!("{id:?} has user {user:?} without an operand edge"));
            }
        }
        for &succ in &node.successors {
            if !pg.node(succ).predecessors.contains(&id) {
                report
                    .errors
                    .push(format!("{id:?} has successor {succ:?} without a predecessor edge"));
            }
        }
        for &pred in &node.predecessors {
            if !pg.node(pred).successors.contains(&id) {
                report
                    .errors
                    .push(format!("{id:?} has predecessor {pred:?} without a successor edge"));
            }
        }

        let arity_ok = match node.kind {
            PgNodeKind::Load
            | PgNodeKind::Gep { .. }
            | PgNodeKind::Free
            | PgNodeKind::Invalidate
            | PgNodeKind::CallFuncptr
            | PgNodeKind::Fork => !node.operands.is_empty(),
            PgNodeKind::Store | PgNodeKind::Memcpy { .. } => node.operands.len() == 2,
            PgNodeKind::Alloc { .. }
            | PgNodeKind::Constant { .. }
            | PgNodeKind::Function { .. }
            | PgNodeKind::Call
            | PgNodeKind::Entry { .. }
            | PgNodeKind::Unknown => node.operands.is_empty(),
            _ => true,
        };
        if !arity_ok {
            report.errors.push(format!(
                "{id:?} ({:?}) has {} operands",
                node.kind,
                node.operands.len()
            ));
        }

        if matches!(node.kind, PgNodeKind::Phi) && node.operands.is_empty() {
            // formal parameters of uncalled procedures have no source
            report.warnings.push(format!("{id:?} is a phi without operands"));
        }
        // globals, constants and function locations live outside procedures
        let procedural = !matches!(
            node.kind,
            PgNodeKind::Null
                | PgNodeKind::UnknownMem
                | PgNodeKind::Constant { .. }
                | PgNodeKind::Function { .. }
                | PgNodeKind::Alloc { .. }
                | PgNodeKind::Store
        );
        if procedural && node.parent.is_none() {
            report.warnings.push(format!("{id:?} belongs to no subgraph"));
        }
    }

    for (_, subgraph) in pg.subgraphs() {
        if !matches!(pg.node(subgraph.root).kind, PgNodeKind::Entry { .. }) {
            report.errors.push(format!("subgraph root {:?} is not an entry node", subgraph.root));
        }
    }

    report
}

fn check_sentinels(pg: &PointerGraph, report: &mut ValidatorReport) {
    let null_pts = pg.points_to(pg.nullptr);
    if null_pts.len() != 1 || !null_pts.contains(&Pointer::new(pg.nullptr, 0)) {
        report.errors.push("the null sentinel's points-to set was corrupted".to_owned());
    }

    let unknown_pts = pg.points_to(pg.unknown_memory);
    if unknown_pts.len() != 1
        || !unknown_pts
            .contains(&Pointer { target: pg.unknown_memory, offset: Offset::UNKNOWN })
    {
        report.errors.push("the unknown-memory sentinel's points-to set was corrupted".to_owned());
    }
}
