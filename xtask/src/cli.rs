use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "xtask")]
#[command(about = "Build the OS images: third-party archives, kernels, init and the UEFI loader")]
pub struct Cli {
    /// Build configuration: debug, release or relwithdebinfo
    #[arg(default_value = "debug")]
    pub profile: String,

    /// Maximum concurrent compiler processes (defaults to the CPU count)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Rebuild cached third-party archives even if they exist
    #[arg(long)]
    pub force: bool,

    /// Output directory (defaults to <repo>/build)
    #[arg(long)]
    pub build_dir: Option<PathBuf>,

    /// Build only this target and what it depends on
    #[arg(long)]
    pub only: Option<String>,

    /// List targets in build order and exit
    #[arg(long)]
    pub list: bool,

    /// Print every composed command line
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only print warnings and errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    pub fn level(&self) -> LevelFilter {
        if self.verbose {
            LevelFilter::Debug
        } else if self.quiet {
            LevelFilter::Warn
        } else {
            LevelFilter::Info
        }
    }
}
