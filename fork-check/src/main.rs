//! fork-check - Main entry point
//!
//! Validates a project against a candidate fork of one of its dependencies.

use anyhow::Result;
use clap::Parser;
use fork_check::{
    candidate, config::Config, harness::report, invoker::CommandInvoker,
    shutdown::ShutdownCoordinator, utils, Candidate, Harness, RunOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Dependency manifest to repoint (overrides config)
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Fork URL to validate; prompted for when omitted
    #[arg(short, long, value_name = "URL")]
    fork: Option<String>,

    /// Branch of the fork (empty means the default branch)
    #[arg(short, long)]
    branch: Option<String>,

    /// Only rewrite keys under this dependency's table
    #[arg(short, long)]
    dependency: Option<String>,

    /// Branch used when none is given (overrides config)
    #[arg(long)]
    default_branch: Option<String>,

    /// Build stage limit in seconds, 0 for none (overrides config)
    #[arg(long, value_name = "SECS")]
    build_timeout: Option<u64>,

    /// Test stage limit in seconds, 0 for none (overrides config)
    #[arg(long, value_name = "SECS")]
    test_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(manifest) = &self.manifest {
            config.manifest.path = Some(manifest.clone());
        }
        if let Some(dependency) = &self.dependency {
            config.manifest.dependency = Some(dependency.clone());
        }
        if let Some(default_branch) = &self.default_branch {
            config.manifest.default_branch = default_branch.clone();
        }
        if let Some(secs) = self.build_timeout {
            config.build.timeout_secs = secs;
        }
        if let Some(secs) = self.test_timeout {
            config.test.timeout_secs = secs;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("fork-check: {e:#}");
            ExitCode::from(RunOutcome::AbortedBeforeRun.exit_code())
        }
    }
}

async fn run(args: Args) -> Result<RunOutcome> {
    // Load configuration
    let mut config = Config::load(args.config.as_deref())?;
    args.apply(&mut config);

    // Initialize logging
    utils::logger::init(&config.log.level)?;

    if args.print_config {
        print!("{}", config.to_toml()?);
        return Ok(RunOutcome::Success);
    }

    tracing::info!("Starting fork-check v{}", env!("CARGO_PKG_VERSION"));

    let candidate = match args.fork {
        Some(fork) => Candidate::new(fork, args.branch)?,
        None => candidate::prompt(std::io::stdin().lock(), std::io::stderr())?,
    };

    let harness = Harness::new(
        config.manifest_path()?,
        config.manifest_fields(),
        config.manifest.default_branch.clone(),
        CommandInvoker::new(config.build_command()?),
        CommandInvoker::new(config.test_command()?),
    );

    let shutdown = ShutdownCoordinator::new();
    let listener = shutdown.listen();

    let report = harness.run(&candidate, &shutdown.token()).await;
    listener.abort();

    report::emit(&report);
    Ok(report.outcome)
}
