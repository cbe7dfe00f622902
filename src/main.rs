use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use shipr::exec::ExecutionContext;
use shipr::orchestration::RunSummary;
use shipr::{shiplog, shiplog_error, Error, Result, Shipfile, Shipr};

/// Shipr - dependency-ordered deployment tasks over ssh
#[derive(Parser, Debug)]
#[command(name = "shipr")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    SHIPR_DEBUG=1     Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Tasks to run (defaults to "default")
    pub tasks: Vec<String>,

    /// Environment section of the configuration to use
    #[arg(short = 'e', long = "env", default_value = "default")]
    pub environment: String,

    /// Working directory for local commands and shipfile discovery
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Path to the shipfile (searched upwards from the working directory if omitted)
    #[arg(short = 'f', long)]
    pub shipfile: Option<PathBuf>,

    /// Enable debug logging (writes to ~/.shipr/shipr.log)
    #[arg(short = 'd', long)]
    pub debug: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    shipr::log::init_with_debug(cli.debug);

    match run(cli) {
        Ok(summary) if summary.is_success() => ExitCode::SUCCESS,
        Ok(summary) => {
            let failed: Vec<String> = summary.failed.iter().chain(&summary.skipped).cloned().collect();
            shiplog_error!("{}", Error::RunFailed { failed });
            ExitCode::FAILURE
        }
        // Unknown tasks were already reported by the reporter.
        Err(Error::TaskNotFound(_)) => ExitCode::FAILURE,
        Err(e) => {
            shiplog_error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<RunSummary> {
    let cwd = match cli.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir()?,
    };
    let path = match cli.shipfile {
        Some(path) if path.is_relative() => cwd.join(path),
        Some(path) => path,
        None => Shipfile::discover(&cwd)?,
    };
    let shipfile = Shipfile::load(&path)?;

    let shipr = Shipr::new(cli.environment, ExecutionContext::terminal().with_cwd(&cwd));
    shipfile.apply(&shipr)?;
    if shipfile.needs_pool() {
        shipr.initialize()?;
    }

    shiplog!(
        "Starting run env={} tasks={:?} shipfile={}",
        shipr.environment(),
        cli.tasks,
        path.display()
    );
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let result = shipr.start(&cli.tasks).await;
        if let Err(e) = shipr.close().await {
            shiplog_error!("Failed to close connection pool: {}", e);
        }
        result
    })
}
