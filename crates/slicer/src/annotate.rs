//! Emission of the annotated listing: the printed module interleaved with
//! comment lines describing dependences, points-to sets and the slice
//! marking.

use ahash::AHashMap;
use ir::{AnnotationSite, Func, Location, LocationKind, Module};
use pta::PointerAnalysis;
use sdg::{DgNode, SystemDependenceGraph};

use crate::Opts;

/// Which annotations to emit (`-annotate dd,cd,rd,pta,slice`).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationOpts {
    pub dd: bool,
    pub cd: bool,
    pub rd: bool,
    pub pta: bool,
    pub slice: bool,
}

impl AnnotationOpts {
    pub fn parse(spec: &str) -> AnnotationOpts {
        let mut opts = AnnotationOpts::default();
        for part in spec.split(',').map(str::trim) {
            match part {
                "dd" => opts.dd = true,
                "cd" => opts.cd = true,
                "rd" => opts.rd = true,
                "pta" => opts.pta = true,
                "slice" | "sl" | "slicer" => opts.slice = true,
                "" => {}
                other => log::warn!("unknown annotation option `{other}`"),
            }
        }
        opts
    }

    pub fn any(&self) -> bool {
        self.dd || self.cd || self.rd || self.pta || self.slice
    }
}

fn describe_node(sdg: &SystemDependenceGraph, node: DgNode) -> String {
    let data = &sdg.nodes[node];
    match data.loc {
        Some(loc) => {
            let kind = match loc.kind {
                LocationKind::Phi(idx) => format!("{idx:?}"),
                LocationKind::Instruction(idx) => format!("{idx:?}"),
                LocationKind::Terminator => "terminator".to_owned(),
            };
            format!("{:?}.{kind}", loc.block)
        }
        None => match data.kind {
            sdg::DgNodeKind::Entry => "entry".to_owned(),
            sdg::DgNodeKind::Instruction => "instruction".to_owned(),
            sdg::DgNodeKind::Call(_) => "call".to_owned(),
            sdg::DgNodeKind::Argument(_) => "argument".to_owned(),
        },
    }
}

pub(crate) fn annotate(
    module: &Module,
    pa: &PointerAnalysis<'_>,
    sdg: &SystemDependenceGraph,
    opts: &Opts,
    criteria: &[DgNode],
) -> String {
    // collect per-site comment lines up front; the printer hook only looks
    // them up
    let mut notes: AHashMap<(Func, Location), Vec<String>> = AHashMap::new();
    let slice_id = sdg.last_slice_id;

    for (node, data) in sdg.nodes.iter_enumerated() {
        let Some(loc) = data.loc else { continue };
        let func = sdg.graphs[data.graph].func;
        let entry = notes.entry((func, loc)).or_default();

        if opts.annotate.dd || opts.annotate.rd {
            let mut defs: Vec<String> =
                sdg.edges.rev_data.iter(node).map(|def| describe_node(sdg, def)).collect();
            defs.sort();
            if !defs.is_empty() {
                let label = if opts.annotate.dd { "dd" } else { "rd" };
                entry.push(format!("{label}: {}", defs.join(", ")));
            }
        }

        if opts.annotate.cd {
            if let Some(block) = data.block {
                let mut controllers: Vec<String> = sdg
                    .edges
                    .rev_block_control
                    .iter(block)
                    .filter_map(|controller| sdg.blocks[controller].block)
                    .map(|bb| format!("{bb:?}"))
                    .collect();
                controllers.sort();
                if !controllers.is_empty() && Some(node) == sdg.blocks[block].last_node() {
                    entry.push(format!("cd: {}", controllers.join(", ")));
                }
            }
        }

        if opts.annotate.pta {
            if let LocationKind::Instruction(idx) = loc.kind {
                let inst = &module.functions[func].blocks[loc.block].instructions[idx];
                if let Some(dst) = inst.dst {
                    if let Some(pts) = pa.points_to_of_value(func, dst) {
                        if !pts.is_empty() {
                            let objects: Vec<String> = pts
                                .iter()
                                .map(|ptr| {
                                    let name = pa
                                        .object_name(ptr.target)
                                        .unwrap_or("?")
                                        .to_owned();
                                    format!("{name}+{:?}", ptr.offset)
                                })
                                .collect();
                            entry.push(format!("pta: {}", objects.join(", ")));
                        }
                    }
                }
            }
        }

        if opts.annotate.slice && slice_id != 0 {
            if data.slice_id == slice_id {
                if criteria.contains(&node) {
                    entry.push("slice: criterion".to_owned());
                }
            } else {
                entry.push("slice: sliced away".to_owned());
            }
        }
    }

    let header = format!(
        "-- annotated by sliver --\n  criteria: '{}'\n  secondary criteria: '{}'\n  forward: {}\n",
        opts.criteria, opts.secondary_criteria, opts.forward
    );

    let body = module.print_annotated(|buf, site| {
        let key = match site {
            AnnotationSite::Phi(func, block, idx) => {
                Some((func, Location { block, kind: LocationKind::Phi(idx) }))
            }
            AnnotationSite::Instruction(func, block, idx) => {
                Some((func, Location { block, kind: LocationKind::Instruction(idx) }))
            }
            AnnotationSite::Terminator(func, block) => {
                Some((func, Location { block, kind: LocationKind::Terminator }))
            }
            AnnotationSite::Function(_) | AnnotationSite::Block(_, _) => None,
        };
        if let Some(key) = key {
            if let Some(lines) = notes.get(&key) {
                for line in lines {
                    buf.push_str(line);
                    buf.push('\n');
                }
            }
        }
    });

    let mut out = String::new();
    for line in header.lines() {
        out.push_str("; ");
        out.push_str(line);
        out.push('\n');
    }
    out.push_str(&body);
    out
}
