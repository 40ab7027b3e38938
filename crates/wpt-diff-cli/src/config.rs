//! CLI configuration: verbosity, colors, and the TOML config file merged
//! with command-line flags into [`TestOptions`].

use crate::commands::{RunArgs, SelectionArgs};
use crate::error::{CliError, CliResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use wpt_diff::config::{
    DEFAULT_API_BASE_URL, DEFAULT_MAX_TESTS, DEFAULT_PROXY_BASE_URL, DEFAULT_TEST_BASE_URL,
};
use wpt_diff::{MaxTests, OutputTarget, ShardConfig, TestOptions, WptUrls};

/// CLI verbosity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum Verbosity {
    /// Quiet - errors only
    Quiet,
    /// Normal - default output
    #[default]
    Normal,
    /// Verbose - per-test lines and page console
    Verbose,
    /// Debug - maximum output
    Debug,
}

impl Verbosity {
    /// Derive from `-q` and the `-v` count
    #[must_use]
    pub const fn from_flags(quiet: bool, verbose: u8) -> Self {
        if quiet {
            return Self::Quiet;
        }
        match verbose {
            0 => Self::Normal,
            1 => Self::Verbose,
            _ => Self::Debug,
        }
    }

    /// Check if quiet mode
    #[must_use]
    pub const fn is_quiet(self) -> bool {
        matches!(self, Self::Quiet)
    }

    /// Check if verbose or higher
    #[must_use]
    pub const fn is_verbose(self) -> bool {
        matches!(self, Self::Verbose | Self::Debug)
    }

    /// Check if debug mode
    #[must_use]
    pub const fn is_debug(self) -> bool {
        matches!(self, Self::Debug)
    }

    /// Default log filter directive for this level
    #[must_use]
    pub const fn log_directive(self) -> &'static str {
        match self {
            Self::Quiet => "error",
            Self::Normal => "warn",
            Self::Verbose => "info",
            Self::Debug => "debug",
        }
    }
}

/// Color output choice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColorChoice {
    /// Always use colors
    Always,
    /// Use colors when stderr is a terminal
    #[default]
    Auto,
    /// Never use colors
    Never,
}

impl ColorChoice {
    /// Should use colors based on output detection
    #[must_use]
    pub fn should_color(self) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => std::io::IsTerminal::is_terminal(&std::io::stderr()),
        }
    }
}

/// Global presentation settings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CliConfig {
    /// Verbosity level
    pub verbosity: Verbosity,
    /// Color output choice
    pub color: ColorChoice,
}

impl CliConfig {
    /// Create new default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set verbosity
    #[must_use]
    pub const fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    /// Set color choice
    #[must_use]
    pub const fn with_color(mut self, color: ColorChoice) -> Self {
        self.color = color;
        self
    }
}

// ============================================================================
// Config file
// ============================================================================

/// `[debug]` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSection {
    pub debug: bool,
    pub verbose: bool,
}

/// `[wpt.urls]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UrlsSection {
    pub proxy_base_url: String,
    pub tests_base_url: String,
    pub api_base_url: String,
}

impl Default for UrlsSection {
    fn default() -> Self {
        Self {
            proxy_base_url: DEFAULT_PROXY_BASE_URL.to_string(),
            tests_base_url: DEFAULT_TEST_BASE_URL.to_string(),
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

/// `[wpt]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WptSection {
    pub max_tests: MaxTests,
    pub under_proxy: bool,
    pub urls: UrlsSection,
}

impl Default for WptSection {
    fn default() -> Self {
        Self {
            max_tests: MaxTests::Count(DEFAULT_MAX_TESTS),
            under_proxy: false,
            urls: UrlsSection::default(),
        }
    }
}

/// Parsed `config.toml`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub debug: DebugSection,
    pub wpt: WptSection,
}

impl ConfigFile {
    /// Load `path`, falling back to defaults when it does not exist
    pub fn load(path: &Path) -> CliResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text)
            .map_err(|e| CliError::config(format!("{}: {e}", path.display())))
    }

    /// Parse TOML text
    pub fn parse(text: &str) -> CliResult<Self> {
        toml::from_str(text).map_err(|e| CliError::config(e.to_string()))
    }

    fn wpt_urls(&self) -> WptUrls {
        WptUrls {
            test: self.wpt.urls.tests_base_url.clone(),
            api: self.wpt.urls.api_base_url.clone(),
            proxy: self.wpt.urls.proxy_base_url.clone(),
        }
    }
}

/// Validate the shard flags as a pair
pub fn validate_shard(shard: Option<u32>, total: Option<u32>) -> CliResult<Option<ShardConfig>> {
    match (shard, total) {
        (None, None) => Ok(None),
        (Some(current), Some(total)) => ShardConfig::new(current, total)
            .map(Some)
            .map_err(|e| CliError::invalid_argument(e.to_string())),
        (Some(_), None) => Err(CliError::invalid_argument(
            "--shard requires --total-shards",
        )),
        (None, Some(_)) => Err(CliError::invalid_argument(
            "--total-shards requires --shard",
        )),
    }
}

/// Merge file settings and selection flags; flags win
pub fn selection_options(
    file: &ConfigFile,
    args: &SelectionArgs,
    verbosity: Verbosity,
) -> CliResult<TestOptions> {
    let wpt_urls = file.wpt_urls();
    wpt_urls
        .validate()
        .map_err(|e| CliError::config(e.to_string()))?;

    let mut options = TestOptions::new()
        .with_wpt_urls(wpt_urls)
        .with_max_tests(args.max_tests.unwrap_or(file.wpt.max_tests))
        .with_under_proxy(args.under_proxy || file.wpt.under_proxy)
        .with_test_paths(args.test_paths.clone())
        .with_silent(verbosity.is_quiet());

    if let Some(scope) = args.scope.as_deref() {
        options = options.with_scope(scope);
    }
    if let Some(shard) = validate_shard(args.shard, args.total_shards)? {
        options = options.with_shard(shard.current, shard.total);
    }
    options.debug = file.debug.debug || verbosity.is_debug();
    options.verbose = file.debug.verbose || options.debug || verbosity.is_verbose();
    Ok(options)
}

fn output_target(flag: Option<&Option<std::path::PathBuf>>) -> Option<OutputTarget> {
    flag.map(|file| {
        file.as_ref()
            .map_or(OutputTarget::Stdout, |path| OutputTarget::File(path.clone()))
    })
}

/// Full options for `run`
pub fn run_options(file: &ConfigFile, args: &RunArgs, verbosity: Verbosity) -> CliResult<TestOptions> {
    let mut options = selection_options(file, &args.selection, verbosity)?;
    options.output_failed = output_target(args.output_failed.as_ref());
    options.report = output_target(args.report.as_ref());
    options.checkpoint_file.clone_from(&args.checkpoint);
    options.resume_from.clone_from(&args.resume_from);
    options.checkpoint_interval = args.checkpoint_interval;
    Ok(options)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::commands::{Cli, Commands};
    use clap::Parser;
    use std::path::PathBuf;

    fn run_args(args: &[&str]) -> RunArgs {
        match Cli::parse_from(std::iter::once("wpt-diff").chain(args.iter().copied())).command {
            Commands::Run(args) => args,
            Commands::List(_) => unreachable!(),
        }
    }

    mod verbosity_tests {
        use super::*;

        #[test]
        fn test_from_flags() {
            assert_eq!(Verbosity::from_flags(true, 3), Verbosity::Quiet);
            assert_eq!(Verbosity::from_flags(false, 0), Verbosity::Normal);
            assert_eq!(Verbosity::from_flags(false, 1), Verbosity::Verbose);
            assert_eq!(Verbosity::from_flags(false, 2), Verbosity::Debug);
        }

        #[test]
        fn test_log_directives() {
            assert_eq!(Verbosity::Quiet.log_directive(), "error");
            assert_eq!(Verbosity::Normal.log_directive(), "warn");
            assert_eq!(Verbosity::Debug.log_directive(), "debug");
        }
    }

    mod file_tests {
        use super::*;

        #[test]
        fn test_full_file() {
            let file = ConfigFile::parse(
                r#"
[debug]
debug = false
verbose = true

[wpt]
max_tests = "all"
under_proxy = true

[wpt.urls]
proxy_base_url = "http://localhost:8080"
tests_base_url = "http://web-platform.test:8000"
api_base_url = "https://wpt.fyi"
"#,
            )
            .unwrap();
            assert!(file.debug.verbose);
            assert_eq!(file.wpt.max_tests, MaxTests::All);
            assert!(file.wpt.under_proxy);
            assert_eq!(file.wpt.urls.proxy_base_url, "http://localhost:8080");
        }

        #[test]
        fn test_partial_file_keeps_defaults() {
            let file = ConfigFile::parse("[wpt]\nmax_tests = 5\n").unwrap();
            assert_eq!(file.wpt.max_tests, MaxTests::Count(5));
            assert_eq!(file.wpt.urls, UrlsSection::default());
            assert!(!file.debug.debug);
        }

        #[test]
        fn test_missing_file_is_default() {
            let dir = tempfile::TempDir::new().unwrap();
            let file = ConfigFile::load(&dir.path().join("config.toml")).unwrap();
            assert_eq!(file, ConfigFile::default());
            assert_eq!(file.wpt.max_tests, MaxTests::Count(30));
        }

        #[test]
        fn test_invalid_toml_is_config_error() {
            let dir = tempfile::TempDir::new().unwrap();
            let path = dir.path().join("config.toml");
            std::fs::write(&path, "[wpt\nmax_tests = ").unwrap();
            let err = ConfigFile::load(&path).unwrap_err();
            assert!(matches!(err, CliError::Config { .. }));
        }
    }

    mod merge_tests {
        use super::*;

        #[test]
        fn test_flags_override_file() {
            let file = ConfigFile::parse("[wpt]\nmax_tests = 5\n").unwrap();
            let args = run_args(&["run", "--max-tests", "all", "--under-proxy", "--scope", "/dom/"]);
            let options = run_options(&file, &args, Verbosity::Normal).unwrap();
            assert_eq!(options.max_tests, MaxTests::All);
            assert!(options.under_proxy);
            assert_eq!(options.scope.as_deref(), Some("/dom/"));
            assert!(!options.verbose);
        }

        #[test]
        fn test_output_targets() {
            let args = run_args(&["run", "--output-failed", "--report", "out/wpt.json"]);
            let options = run_options(&ConfigFile::default(), &args, Verbosity::Normal).unwrap();
            assert_eq!(options.output_failed, Some(OutputTarget::Stdout));
            assert_eq!(options.report, Some(OutputTarget::File(PathBuf::from("out/wpt.json"))));
        }

        #[test]
        fn test_invalid_url_rejected() {
            let file = ConfigFile::parse("[wpt.urls]\ntests_base_url = \"not a url\"\n").unwrap();
            let args = run_args(&["run"]);
            let err = run_options(&file, &args, Verbosity::Normal).unwrap_err();
            assert!(matches!(err, CliError::Config { .. }));
        }

        #[test]
        fn test_verbosity_flows_into_options() {
            let options = run_options(&ConfigFile::default(), &run_args(&["run"]), Verbosity::Debug).unwrap();
            assert!(options.debug);
            assert!(options.verbose);
            let quiet = run_options(&ConfigFile::default(), &run_args(&["run"]), Verbosity::Quiet).unwrap();
            assert!(quiet.silent);
        }
    }

    mod shard_tests {
        use super::*;

        #[test]
        fn test_pair_required() {
            assert!(matches!(
                validate_shard(Some(1), None),
                Err(CliError::InvalidArgument { .. })
            ));
            assert!(matches!(
                validate_shard(None, Some(4)),
                Err(CliError::InvalidArgument { .. })
            ));
            assert!(validate_shard(None, None).unwrap().is_none());
        }

        #[test]
        fn test_out_of_range_rejected() {
            assert!(validate_shard(Some(5), Some(4)).is_err());
            assert!(validate_shard(Some(0), Some(4)).is_err());
            assert!(validate_shard(Some(1), Some(0)).is_err());
            let shard = validate_shard(Some(2), Some(4)).unwrap().unwrap();
            assert_eq!((shard.current, shard.total), (2, 4));
        }
    }
}
