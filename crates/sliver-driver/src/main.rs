use std::fs;
use std::io::Write;
use std::process::exit;

use anyhow::{Context, Result};
use clap::ArgMatches;
use log::info;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::cli_def::main_command;
use crate::cli_process::matches_to_opts;

mod cli_def;
mod cli_process;

pub fn main() {
    let matches = main_command().get_matches();

    let env = env_logger::Env::default().filter("SLIVER_LOG").write_style("SLIVER_LOG_STYLE");
    env_logger::Builder::new()
        .format_timestamp(None)
        .filter_level(log::LevelFilter::Warn)
        .parse_env(env)
        .init();

    match wrapped_main(matches) {
        Ok(code) => exit(code),
        Err(err) => {
            let mut stderr = StandardStream::stderr(ColorChoice::Auto);
            for cause in err.chain() {
                let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
                let _ = write!(&mut stderr, "error");
                let _ = stderr.set_color(&ColorSpec::new());
                let _ = writeln!(&mut stderr, ": {cause}");
            }
            exit(1)
        }
    }
}

fn wrapped_main(matches: ArgMatches) -> Result<i32> {
    let (opts, paths) = matches_to_opts(&matches)?;

    let src = fs::read_to_string(&paths.input)
        .with_context(|| format!("failed to read {}", paths.input))?;
    let mut module = ir::Module::parse(&src)
        .with_context(|| format!("failed to parse {}", paths.input))?;
    module.verify().with_context(|| format!("{} is not a valid module", paths.input))?;

    let report = slicer::run(&mut module, &opts)?;

    if opts.statistics {
        eprintln!("Statistics before {}", report.stats_before);
        if let Some(after) = report.stats_after {
            eprintln!("Statistics after {after}");
        }
    }

    if let Some(annotated) = &report.annotated {
        info!("saving the annotated module to {}", paths.annotated);
        fs::write(&paths.annotated, annotated)
            .with_context(|| format!("failed to write {}", paths.annotated))?;
    }
    if let Some(dot) = &report.dot {
        info!("saving the dependence graph to {}", paths.dot);
        fs::write(&paths.dot, dot).with_context(|| format!("failed to write {}", paths.dot))?;
    }

    if opts.dump_dg_only {
        return Ok(0);
    }

    info!("saving the sliced module to {}", paths.output);
    fs::write(&paths.output, module.print())
        .with_context(|| format!("failed to write {}", paths.output))?;

    // a verification failure still writes the output so it can be inspected
    if let Some(err) = &report.verify_error {
        let mut stderr = StandardStream::stderr(ColorChoice::Auto);
        let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
        let _ = writeln!(&mut stderr, "verifying the sliced module failed:");
        let _ = stderr.set_color(&ColorSpec::new());
        let _ = writeln!(&mut stderr, "{err}");
        return Ok(1);
    }

    Ok(0)
}
