use crate::config::loader::GraderConfig;
use crate::config::types::{GradeError, PipelineResult, PipelineStatus};
use crate::pipeline::{self, GradeRequest};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file (defaults apply when omitted)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grade one problem of a submission
    CheckTask {
        /// Problem directory name, shared by both repositories
        #[arg(long)]
        problem: String,
        /// Student repository root
        #[arg(long)]
        student_repo: PathBuf,
        /// Private repository root with hidden tests and the reference solution
        #[arg(long)]
        private_repo: PathBuf,
    },
    /// Check that the toolchain and linter can be launched
    CheckDeps {
        /// Verbose output showing detailed version information
        #[arg(long)]
        verbose: bool,
    },
}

pub fn run() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::CheckTask {
            problem,
            student_repo,
            private_repo,
        } => {
            let status = check_task(cli.config, problem, student_repo, private_repo)?;
            std::process::exit(status.exit_code());
        }
        Commands::CheckDeps { verbose } => check_deps(cli.config, verbose),
    }
}

fn check_task(
    config_path: Option<PathBuf>,
    problem: String,
    student_repo: PathBuf,
    private_repo: PathBuf,
) -> Result<PipelineStatus> {
    let started_at = Utc::now();
    let request = GradeRequest::new(problem, student_repo, private_repo);

    let outcome = GraderConfig::load_or_default(config_path.as_deref())
        .and_then(|config| pipeline::grade(config, &request));
    let result = PipelineResult::from_outcome(&request.problem, &outcome, started_at);

    let report = serde_json::to_string_pretty(&result).context("Failed to serialize result")?;
    println!("{}", report);
    if let Err(err) = &outcome {
        eprintln!("Error: {}", err);
    }
    Ok(result.status)
}

fn check_deps(config_path: Option<PathBuf>, verbose: bool) -> Result<()> {
    let config = GraderConfig::load_or_default(config_path.as_deref())?;

    let versions = pipeline::tool_versions(&config).map_err(|err| match err {
        GradeError::Infrastructure(detail) => anyhow::anyhow!("dependency check failed: {}", detail),
        other => anyhow::Error::new(other),
    })?;

    eprintln!("All dependencies available");
    for (name, version) in versions {
        if verbose {
            eprintln!("  {:<10} {}", name, version);
        } else {
            eprintln!("  {}", name);
        }
    }
    Ok(())
}
