//! Structural verification of modules.
//!
//! Run on freshly parsed input and again on sliced output; a module that
//! fails here would make every downstream analysis meaningless.

use std::fmt;

use crate::{Block, FunctionData, Module, Operand, Terminator, ValueDef};

#[derive(Debug)]
pub struct VerifyError {
    pub errors: Vec<String>,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for VerifyError {}

impl Module {
    pub fn verify(&self) -> Result<(), VerifyError> {
        let mut errors = Vec::new();
        for func in &self.functions {
            if !func.is_declaration() {
                verify_function(func, &mut errors);
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(VerifyError { errors })
        }
    }
}

fn undefined_use(func: &FunctionData, op: &Operand) -> Option<String> {
    if let Operand::Value(value) = op {
        match func.values.get(*value) {
            Some(ValueDef::Invalid) | None => return Some(format!("{value:?}")),
            _ => {}
        }
    }
    None
}

fn verify_function(func: &FunctionData, errors: &mut Vec<String>) {
    let name = &func.name;
    let num_blocks = func.blocks.len();
    let block_ok = |bb: Block| usize::from(bb) < num_blocks;

    for (bb, data) in func.blocks.iter_enumerated() {
        for phi in &*data.phis {
            for (pred, op) in &phi.sources {
                if !block_ok(*pred) {
                    errors.push(format!("@{name}: phi in {bb:?} names missing block {pred:?}"));
                }
                if let Some(value) = undefined_use(func, op) {
                    errors.push(format!("@{name}: use of undefined value {value} in {bb:?}"));
                }
            }
        }

        for inst in &*data.instructions {
            inst.visit_operands(|op| {
                if let Some(value) = undefined_use(func, op) {
                    errors.push(format!("@{name}: use of undefined value {value} in {bb:?}"));
                }
            });
        }

        match &data.terminator {
            None => errors.push(format!("@{name}: {bb:?} has no terminator")),
            Some(term) => {
                term.visit_operands(|op| {
                    if let Some(value) = undefined_use(func, op) {
                        errors.push(format!(
                            "@{name}: use of undefined value {value} in terminator of {bb:?}"
                        ));
                    }
                });
                term.visit_successors(|succ| {
                    if !block_ok(succ) {
                        errors.push(format!(
                            "@{name}: terminator of {bb:?} targets missing block {succ:?}"
                        ));
                    }
                });
                if let Terminator::Ret(value) = term {
                    if func.sig.ret.is_void() != value.is_none() {
                        errors.push(format!(
                            "@{name}: return value of {bb:?} does not match the signature"
                        ));
                    }
                }
            }
        }
    }

    // phi sources must cover the predecessors exactly
    let preds = func.predecessors();
    for (bb, data) in func.blocks.iter_enumerated() {
        for phi in &*data.phis {
            for (pred, _) in &phi.sources {
                if block_ok(*pred) && !preds[bb].contains(pred) {
                    errors.push(format!(
                        "@{name}: phi of {bb:?} names {pred:?} which is not a predecessor"
                    ));
                }
            }
            for pred in &preds[bb] {
                if !phi.sources.iter().any(|(src, _)| src == pred) {
                    errors.push(format!("@{name}: phi of {bb:?} misses predecessor {pred:?}"));
                }
            }
        }
    }

    // the value table must point at live definitions
    for (value, def) in func.values.iter_enumerated() {
        let stale = match *def {
            ValueDef::Param(i) => i as usize >= func.sig.params.len(),
            ValueDef::Inst(bb, inst) => {
                !block_ok(bb)
                    || func.blocks[bb].instructions.get(inst).map_or(true, |i| i.dst != Some(value))
            }
            ValueDef::Phi(bb, phi) => {
                !block_ok(bb) || func.blocks[bb].phis.get(phi).map_or(true, |p| p.dst != value)
            }
            ValueDef::Invalid => false,
        };
        if stale {
            errors.push(format!("@{name}: stale definition entry for {value:?}"));
        }
    }
}
