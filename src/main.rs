//! Halldyll Reconcile CLI entrypoint.
//!
//! This is the main entrypoint for the halldyll-reconcile command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use halldyll_reconcile::cli::{Cli, Commands, OutputFormatter};
use halldyll_reconcile::config::{find_config_file, ConfigParser, EngineConfig, Manifest};
use halldyll_reconcile::error::Result;
use halldyll_reconcile::Context;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), &cli.manifest) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    init_logging(cli.verbose, &config.log_level);

    match run(cli, config) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, level: &str) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads `.env`, the engine configuration and environment overrides.
fn load_config(explicit: Option<&Path>, manifest: &Path) -> Result<EngineConfig> {
    let base = manifest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let parser = ConfigParser::new().with_base_path(base);
    parser.load_dotenv()?;

    let config_file: Option<PathBuf> = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_config_file(base).ok(),
    };
    parser.load_with_env(config_file.as_deref())
}

/// Runs the selected command. Returns false when the command completed but
/// the run did not succeed.
fn run(cli: Cli, config: EngineConfig) -> Result<bool> {
    let formatter = OutputFormatter::new(cli.output);
    let manifest = ConfigParser::new().load_manifest(&cli.manifest)?;

    match cli.command {
        Commands::Validate => cmd_validate(&manifest, config, &formatter),
        Commands::Plan { detailed } => cmd_plan(&manifest, config, detailed, &formatter),
        Commands::Apply { yes, continue_on_error } => {
            let config = if continue_on_error {
                config.with_continue_on_error(true)
            } else {
                config
            };
            cmd_apply(&manifest, config, yes, &formatter)
        }
    }
}

/// Validate command.
fn cmd_validate(manifest: &Manifest, config: EngineConfig, formatter: &OutputFormatter) -> Result<bool> {
    let ctx = Context::new(config);
    let instances = manifest.declare(&ctx)?;
    info!("Validated {} resource(s)", instances.len());
    eprintln!("{}", formatter.format_resources(&instances));
    Ok(true)
}

/// Plan command.
fn cmd_plan(
    manifest: &Manifest,
    config: EngineConfig,
    detailed: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let ctx = Context::new(config);
    manifest.declare(&ctx)?;

    let plans = ctx
        .instances()
        .iter()
        .map(|instance| ctx.plan(instance))
        .collect::<Result<Vec<_>>>()?;
    eprintln!("{}", formatter.format_plans(&plans, detailed));
    Ok(true)
}

/// Apply command.
fn cmd_apply(
    manifest: &Manifest,
    config: EngineConfig,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<bool> {
    let ctx = Context::new(config);
    manifest.declare(&ctx)?;

    let plans = ctx
        .instances()
        .iter()
        .map(|instance| ctx.plan(instance))
        .collect::<Result<Vec<_>>>()?;
    if plans.iter().all(|p| p.is_noop()) {
        eprintln!("{}", formatter.message("success", "No changes to apply."));
        return Ok(true);
    }

    eprintln!("{}", formatter.format_plans(&plans, false));

    // Confirm
    if !auto_approve {
        eprint!("Do you want to apply this plan? [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            eprintln!("Apply cancelled.");
            return Ok(true);
        }
    }

    debug!("Applying run {}", ctx.run_id());
    let report = ctx.converge_all();
    eprintln!("{}", formatter.format_run(&report));
    Ok(report.success)
}
