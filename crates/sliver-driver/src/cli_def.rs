use clap::{Arg, ArgAction, Command, ValueHint};

const ABOUT: &str = "Backward slicing for SSA IR modules.";

pub fn main_command() -> Command {
    Command::new("sliver")
        .version(env!("CARGO_PKG_VERSION"))
        .about(ABOUT)
        .args([
            criteria(),
            secondary_criteria(),
            entry(),
            forward(),
            annotate(),
            dump_dg(),
            dump_dg_only(),
            dump_bb_only(),
            statistics(),
            remove_unused_only(),
            dont_verify(),
            output(),
            input(),
        ])
        .arg_required_else_help(true)
}

pub const CRITERIA: &str = "criteria";
pub const SECONDARY_CRITERIA: &str = "secondary-criteria";
pub const ENTRY: &str = "entry";
pub const FORWARD: &str = "forward";
pub const ANNOTATE: &str = "annotate";
pub const DUMP_DG: &str = "dump-dg";
pub const DUMP_DG_ONLY: &str = "dump-dg-only";
pub const DUMP_BB_ONLY: &str = "dump-bb-only";
pub const STATISTICS: &str = "statistics";
pub const REMOVE_UNUSED_ONLY: &str = "remove-unused-only";
pub const DONT_VERIFY: &str = "dont-verify";
pub const OUTPUT: &str = "output";
pub const INPUT: &str = "input";

fn flag(name: &'static str) -> Arg {
    Arg::new(name).long(name).action(ArgAction::SetTrue)
}

fn criteria() -> Arg {
    Arg::new(CRITERIA)
        .short('c')
        .long(CRITERIA)
        .help("Slicing criterion, comma-separated.")
        .long_help(
            "Slicing criterion, comma-separated.\n\
             Forms: 'line:variable' (a source point), ':name' (a global \
             variable), 'name' (call sites of name), 'name()' (data \
             criterion on calls of name), 'ret' (returns of the entry).",
        )
        .value_name("CRIT")
        .num_args(1)
        .value_hint(ValueHint::Other)
}

fn secondary_criteria() -> Arg {
    Arg::new(SECONDARY_CRITERIA)
        .short('s')
        .long("sc")
        .help("Secondary criterion, comma-separated.")
        .value_name("CRIT")
        .num_args(1)
        .required(false)
}

fn entry() -> Arg {
    Arg::new(ENTRY)
        .long(ENTRY)
        .help("Entry procedure of the program.")
        .value_name("NAME")
        .default_value("main")
        .num_args(1)
}

fn forward() -> Arg {
    flag(FORWARD).help("Compute a forward slice instead of a backward one.")
}

fn annotate() -> Arg {
    Arg::new(ANNOTATE)
        .long(ANNOTATE)
        .help("Save an annotated listing of the module.")
        .long_help(
            "Save an annotated listing of the module.\n\
             (dd: data dependencies, cd: control dependencies, rd: reaching \
             definitions, pta: points-to information, slice: comment out \
             what is going to be sliced away.)\n\
             Use a comma-separated list for several of them.",
        )
        .value_name("val1,val2,...")
        .num_args(1)
}

fn dump_dg() -> Arg {
    flag(DUMP_DG).help("Dump the dependence graph to dot.")
}

fn dump_dg_only() -> Arg {
    flag(DUMP_DG_ONLY)
        .help("Only dump the dependence graph to dot, do not slice the module.")
}

fn dump_bb_only() -> Arg {
    flag(DUMP_BB_ONLY).help("Dump only the basic blocks of the dependence graph to dot.")
}

fn statistics() -> Arg {
    flag(STATISTICS).help("Print statistics about slicing.")
}

fn remove_unused_only() -> Arg {
    flag(REMOVE_UNUSED_ONLY).help("Only remove unused parts of the module.")
}

fn dont_verify() -> Arg {
    flag(DONT_VERIFY).help("Skip verification of the sliced module.")
}

fn output() -> Arg {
    Arg::new(OUTPUT)
        .short('o')
        .long(OUTPUT)
        .help("Where to write the sliced module. Defaults to <input>.sliced.")
        .value_name("FILE")
        .num_args(1)
        .value_hint(ValueHint::FilePath)
}

fn input() -> Arg {
    Arg::new(INPUT)
        .help("The module to slice.")
        .value_name("FILE")
        .required(true)
        .value_parser(clap::builder::ValueParser::path_buf())
        .value_hint(ValueHint::FilePath)
}
