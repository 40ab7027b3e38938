//! wpt-diff: differential Web Platform Tests runner
//!
//! ## Usage
//!
//! ```bash
//! wpt-diff run                                  # 30 tests from config.toml defaults
//! wpt-diff run --under-proxy --max-tests all    # whole catalog through the proxy
//! wpt-diff run --scope /dom/ --report out/wpt.json --output-failed failed.json
//! wpt-diff list --shard 2 --total-shards 4      # URLs this shard would run
//! ```

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use wpt_diff::{BrowserConfig, ShutdownSignal};
use wpt_diff_cli::{
    Cli, CliConfig, CliResult, ColorChoice, Commands, ConfigFile, ProgressReporter, RunArgs,
    SelectionArgs, Verbosity, list_tests, logging, run_options, run_tests, selection_options,
};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start the async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = CliConfig::new()
        .with_verbosity(Verbosity::from_flags(cli.quiet, cli.verbose))
        .with_color(ColorChoice::from(cli.color));

    match cli.command {
        Commands::Run(args) => run_command(config, &args).await,
        Commands::List(args) => list_command(config, &args).await,
    }
}

async fn list_command(config: CliConfig, args: &SelectionArgs) -> CliResult<()> {
    let file = ConfigFile::load(&args.config)?;
    let options = selection_options(&file, args, config.verbosity)?;
    logging::init_logging(
        config.verbosity,
        options.debug,
        options.verbose,
        config.color.should_color(),
    );

    for url in list_tests(&options).await? {
        println!("{url}");
    }
    Ok(())
}

async fn run_command(config: CliConfig, args: &RunArgs) -> CliResult<()> {
    let file = ConfigFile::load(&args.selection.config)?;
    let options = run_options(&file, args, config.verbosity)?;
    let use_color = config.color.should_color();
    logging::init_logging(config.verbosity, options.debug, options.verbose, use_color);

    let reporter = Arc::new(ProgressReporter::new(
        use_color,
        options.silent,
        options.verbose,
    ));
    let shutdown = ShutdownSignal::new();
    tokio::spawn(watch_signals(shutdown.clone(), reporter.clone()));

    let browser = BrowserConfig::default()
        .with_headless(!args.headed)
        .with_chromium_path(args.chromium_path.clone());
    let browser = if args.no_sandbox {
        browser.with_no_sandbox()
    } else {
        browser
    };

    run_tests(&options, browser, reporter, shutdown).await?;
    Ok(())
}

/// First signal asks the run loop to stop; a second one exits at once
async fn watch_signals(shutdown: ShutdownSignal, reporter: Arc<ProgressReporter>) {
    #[cfg(unix)]
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();

    loop {
        #[cfg(unix)]
        {
            match terminate.as_mut() {
                Some(term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                None => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }

        if shutdown.trigger() {
            reporter.finish();
            reporter.warning("Shutting down gracefully, signal again to exit immediately");
        } else {
            std::process::exit(0);
        }
    }
}
