//! Backward slicing of IR modules.
//!
//! The pipeline: pointer analysis, SDG construction, criterion matching,
//! mark (reverse reachability over the dependence edges), sweep (rewriting
//! the module), cleanup (dead globals and functions). The crate does no IO;
//! the driver feeds it a parsed module and writes whatever the [`Report`]
//! carries.

use ir::Module;
use log::{info, warn};
use pta::PointerAnalysis;
use sdg::DataflowFlags;
use stdx::impl_display;

pub use crate::annotate::AnnotationOpts;

mod annotate;
mod criteria;
mod dot_dump;
mod mark;
mod sweep;

#[cfg(test)]
mod tests;

#[derive(Debug, Clone)]
pub struct Opts {
    /// Comma-separated slicing criteria.
    pub criteria: String,
    /// Comma-separated secondary criteria.
    pub secondary_criteria: String,
    /// Name of the entry procedure.
    pub entry: String,
    /// Slice forward instead of backward.
    pub forward: bool,
    pub annotate: AnnotationOpts,
    pub dump_dg: bool,
    pub dump_dg_only: bool,
    pub dump_bb_only: bool,
    pub statistics: bool,
    /// Skip slicing, only remove unused parts of the module.
    pub remove_unused_only: bool,
    /// Verify the sliced module.
    pub verify: bool,
}

impl Default for Opts {
    fn default() -> Opts {
        Opts {
            criteria: String::new(),
            secondary_criteria: String::new(),
            entry: "main".to_owned(),
            forward: false,
            annotate: AnnotationOpts::default(),
            dump_dg: false,
            dump_dg_only: false,
            dump_bb_only: false,
            statistics: false,
            remove_unused_only: false,
            verify: true,
        }
    }
}

#[derive(Debug)]
pub enum SliceError {
    Build(pta::BuildError),
    Validator(String),
}

impl_display! {
    match SliceError {
        SliceError::Build(err) => "{}", err;
        SliceError::Validator(report) => "the pointer graph is broken right after building:\n{}", report;
    }
}
impl std::error::Error for SliceError {}

impl From<pta::BuildError> for SliceError {
    fn from(err: pta::BuildError) -> SliceError {
        SliceError::Build(err)
    }
}

/// Sizes of the defined parts of a module.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStats {
    pub globals: u64,
    pub functions: u64,
    pub blocks: u64,
    pub instructions: u64,
}

impl ModuleStats {
    pub fn of(module: &Module) -> ModuleStats {
        let mut stats = ModuleStats { globals: module.globals.len() as u64, ..Default::default() };
        for func in &module.functions {
            if func.is_declaration() {
                continue;
            }
            stats.functions += 1;
            for block in &func.blocks {
                stats.blocks += 1;
                stats.instructions += (block.phis.len() + block.instructions.len()) as u64;
                if block.terminator.is_some() {
                    stats.instructions += 1;
                }
            }
        }
        stats
    }
}

impl_display! {
    stats @ ModuleStats => "Globals/Functions/Blocks/Instr.: {} {} {} {}",
        stats.globals, stats.functions, stats.blocks, stats.instructions
}

/// What a run produced, beyond the rewritten module itself.
#[derive(Debug, Default)]
pub struct Report {
    pub stats_before: ModuleStats,
    pub stats_after: Option<ModuleStats>,
    /// Annotated listing, when requested.
    pub annotated: Option<String>,
    /// Dot rendering of the (unsliced) SDG, when requested.
    pub dot: Option<String>,
    /// No node matched the criterion; an empty entry was emitted.
    pub criterion_missed: bool,
    /// The sliced module failed verification (it is still returned).
    pub verify_error: Option<ir::VerifyError>,
}

/// Slices `module` in place according to `opts`.
pub fn run(module: &mut Module, opts: &Opts) -> Result<Report, SliceError> {
    let mut report = Report { stats_before: ModuleStats::of(module), ..Report::default() };

    if opts.remove_unused_only {
        sweep::remove_unused(module, &opts.entry);
        report.stats_after = Some(ModuleStats::of(module));
        return Ok(report);
    }

    let outcome = {
        let module = &*module;
        let mut pa = PointerAnalysis::build(module, &opts.entry)?;
        pa.run()?;

        let validation = pta::validate(pa.graph());
        for warning in &validation.warnings {
            warn!("{warning}");
        }
        if !validation.is_ok() {
            return Err(SliceError::Validator(validation.to_string()));
        }

        let (mut graph, _stats) = sdg::build(module, &pa, DataflowFlags::default());

        let mut criteria = criteria::find_criteria(module, &pa, &graph, &opts.criteria);
        if criteria.is_empty() {
            info!("did not find the slicing criteria: '{}'", opts.criteria);
            if opts.annotate.any() {
                report.annotated =
                    Some(annotate::annotate(module, &pa, &graph, opts, &[]));
            }
            None
        } else {
            criteria::expand_secondary_criteria(
                module,
                &graph,
                &opts.secondary_criteria,
                &mut criteria,
            );

            let slice_id = mark::mark(&mut graph, &criteria, opts.forward);

            if opts.annotate.any() {
                report.annotated =
                    Some(annotate::annotate(module, &pa, &graph, opts, &criteria));
            }
            if opts.dump_dg || opts.dump_dg_only || opts.dump_bb_only {
                report.dot = Some(dot_dump::render(module, &graph, opts.dump_bb_only));
            }

            Some(sweep::extract_marking(&graph, slice_id))
        }
    };

    if opts.dump_dg_only {
        return Ok(report);
    }

    match outcome {
        Some(marking) => {
            sweep::sweep(module, &marking);
        }
        None => {
            // no criterion matched: emit an empty entry procedure
            report.criterion_missed = true;
            sweep::make_entry_empty(module, &opts.entry);
        }
    }

    sweep::remove_unused(module, &opts.entry);
    report.stats_after = Some(ModuleStats::of(module));

    if opts.verify {
        if let Err(err) = module.verify() {
            report.verify_error = Some(err);
        }
    }

    Ok(report)
}
