//! CLI command definitions using clap

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use wpt_diff::MaxTests;

/// wpt-diff: run Web Platform Tests in Chromium, directly or through a
/// web proxy, and diff the results against Chrome's published run
#[derive(Parser, Debug)]
#[command(name = "wpt-diff")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output (auto, always, never)
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorArg,

    /// Subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the selected tests and report against Chrome
    Run(RunArgs),

    /// Print the URLs of the tests a run would execute
    List(SelectionArgs),
}

/// Options deciding which tests are selected
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Maximum number of tests to run, or "all"
    #[arg(long)]
    pub max_tests: Option<MaxTests>,

    /// Reach tests through the proxy's address bar
    #[arg(long)]
    pub under_proxy: bool,

    /// Only run tests whose path starts with this prefix
    #[arg(long)]
    pub scope: Option<String>,

    /// Explicit test file or directory to run (repeatable)
    #[arg(long = "test-path")]
    pub test_paths: Vec<String>,

    /// Shard to run (1-based)
    #[arg(long)]
    pub shard: Option<u32>,

    /// Total number of shards
    #[arg(long)]
    pub total_shards: Option<u32>,
}

/// Arguments for the run command
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Write failed subtests as JSON (stdout when no file is given)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub output_failed: Option<Option<PathBuf>>,

    /// Write diff and proxy WPT reports (stdout when no file is given)
    #[arg(long, value_name = "FILE", num_args = 0..=1)]
    pub report: Option<Option<PathBuf>>,

    /// Save progress to this checkpoint file
    #[arg(long, value_name = "FILE")]
    pub checkpoint: Option<PathBuf>,

    /// Resume from a checkpoint file
    #[arg(long, value_name = "FILE")]
    pub resume_from: Option<PathBuf>,

    /// Completed tests between checkpoint saves
    #[arg(long, value_name = "N")]
    pub checkpoint_interval: Option<usize>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Chromium binary to launch
    #[arg(long, value_name = "PATH")]
    pub chromium_path: Option<PathBuf>,

    /// Disable the Chromium sandbox (needed in most containers)
    #[arg(long)]
    pub no_sandbox: bool,
}

/// Color argument for CLI
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum ColorArg {
    /// Automatic color detection
    #[default]
    Auto,
    /// Always use colors
    Always,
    /// Never use colors
    Never,
}

impl From<ColorArg> for crate::config::ColorChoice {
    fn from(arg: ColorArg) -> Self {
        match arg {
            ColorArg::Auto => Self::Auto,
            ColorArg::Always => Self::Always,
            ColorArg::Never => Self::Never,
        }
    }
}
