use anyhow::{bail, Result};
use camino::Utf8PathBuf;
use clap::ArgMatches;
use slicer::{AnnotationOpts, Opts};

use crate::cli_def::{
    ANNOTATE, CRITERIA, DONT_VERIFY, DUMP_BB_ONLY, DUMP_DG, DUMP_DG_ONLY, ENTRY, FORWARD, INPUT,
    OUTPUT, REMOVE_UNUSED_ONLY, SECONDARY_CRITERIA, STATISTICS,
};

pub struct Paths {
    pub input: Utf8PathBuf,
    pub output: Utf8PathBuf,
    pub annotated: Utf8PathBuf,
    pub dot: Utf8PathBuf,
}

pub fn matches_to_opts(matches: &ArgMatches) -> Result<(Opts, Paths)> {
    let input: &std::path::PathBuf = matches.get_one(INPUT).unwrap();
    let Ok(input) = Utf8PathBuf::from_path_buf(input.clone()) else {
        bail!("the input path is not valid utf-8")
    };

    let criteria: String =
        matches.get_one::<String>(CRITERIA).cloned().unwrap_or_default();
    let remove_unused_only = matches.get_flag(REMOVE_UNUSED_ONLY);
    let dump_dg_only = matches.get_flag(DUMP_DG_ONLY);
    if criteria.is_empty() && !remove_unused_only && !dump_dg_only {
        bail!("no slicing criterion given, use -c");
    }

    let opts = Opts {
        criteria,
        secondary_criteria: matches
            .get_one::<String>(SECONDARY_CRITERIA)
            .cloned()
            .unwrap_or_default(),
        entry: matches.get_one::<String>(ENTRY).cloned().unwrap(),
        forward: matches.get_flag(FORWARD),
        annotate: AnnotationOpts::parse(
            matches.get_one::<String>(ANNOTATE).map(String::as_str).unwrap_or(""),
        ),
        // dump-dg-only implies dump-dg
        dump_dg: matches.get_flag(DUMP_DG) || dump_dg_only,
        dump_dg_only,
        dump_bb_only: matches.get_flag(DUMP_BB_ONLY),
        statistics: matches.get_flag(STATISTICS),
        remove_unused_only,
        verify: !matches.get_flag(DONT_VERIFY),
    };

    let output = match matches.get_one::<String>(OUTPUT) {
        Some(output) => Utf8PathBuf::from(output),
        None => input.with_extension("sliced"),
    };
    let paths = Paths {
        annotated: input.with_extension("debug.sir"),
        dot: input.with_extension("dot"),
        input,
        output,
    };

    Ok((opts, paths))
}
