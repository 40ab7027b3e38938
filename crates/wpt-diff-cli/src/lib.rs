//! wpt-diff CLI library
//!
//! Command-line front end for the wpt-diff runner: argument parsing, the
//! TOML config file, logging, progress output, and artifact writing.

mod commands;
mod config;
mod error;
pub mod logging;
mod output;
mod runner;

pub use commands::{Cli, ColorArg, Commands, RunArgs, SelectionArgs};
pub use config::{
    CliConfig, ColorChoice, ConfigFile, DebugSection, UrlsSection, Verbosity, WptSection,
    run_options, selection_options, validate_shard,
};
pub use error::{CliError, CliResult};
pub use output::{ProgressReporter, format_resume, format_tally, subtest_details};
pub use runner::{list_tests, run_tests, write_artifacts};
