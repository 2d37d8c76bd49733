use anyhow::{Context, Result};
use forge::{BuildLayout, BuildProfile, BuildReport, CancelToken, ExistenceCheck, Pipeline, SystemToolchain, Toolchain};
use log::{info, warn};
use std::fs;
use std::process::ExitCode;

use crate::cli::Cli;

pub fn run(cli: Cli) -> Result<ExitCode> {
    crate::logger::init(cli.level())?;

    // Resolve the profile first: a bad name must fail before anything is touched.
    let profile = BuildProfile::resolve(&cli.profile, cli.jobs, cli.force)?;

    let root = crate::targets::repo_root()?;
    // Tools run from the repo root; a relative --build-dir means the caller's directory.
    let build_dir = match &cli.build_dir {
        Some(dir) => std::env::current_dir().context("reading current directory")?.join(dir),
        None => root.join("build"),
    };
    let layout = BuildLayout::new(build_dir);
    let mut graph = crate::targets::image_tree(&root)?;
    if let Some(only) = &cli.only {
        graph = graph.restrict(only)?;
    }

    if cli.list {
        for target in graph.order()? {
            println!("{:<16} {}", target.name, target.triple());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let required = graph.required_tools(&layout, &profile, &ExistenceCheck);
    let tools = SystemToolchain::discover(&required)?.in_dir(&root);

    let cancel = CancelToken::new();
    let handler = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("interrupt received, stopping running tools");
        handler.cancel();
    })
    .context("installing interrupt handler")?;

    let report = Pipeline::new(&layout, Toolchain::uniform(&tools), cancel).run(&graph, &profile)?;
    finish(&layout, &report)
}

/// Print the summary, then persist the report. The summary is shown even
/// when the report cannot be written.
fn finish(layout: &BuildLayout, report: &BuildReport) -> Result<ExitCode> {
    report.log_summary();
    write_report(layout, report)?;
    Ok(ExitCode::from(report.exit_code()))
}

fn write_report(layout: &BuildLayout, report: &BuildReport) -> Result<()> {
    let path = layout.report_path();
    let json = serde_json::to_string_pretty(report).context("serializing build report")?;
    fs::write(&path, json).with_context(|| format!("writing {}", path.display()))?;
    info!("[info] Report: {}", path.display());
    Ok(())
}
