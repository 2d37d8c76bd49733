use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;

mod app;
mod cli;
mod logger;
mod targets;

fn main() -> Result<ExitCode> {
    let cli = crate::cli::Cli::parse();
    crate::app::run(cli)
}
