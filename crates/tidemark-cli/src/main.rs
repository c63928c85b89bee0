//! tidemark CLI tool.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(about = "Incremental, dependency-ordered package builds", long_about = None)]
struct Cli {
    /// Path to the project file
    #[arg(
        long,
        short = 'p',
        env = "TIDEMARK_PROJECT",
        default_value = "tidemark.kdl",
        global = true
    )]
    project: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect changed packages and build them in dependency order
    Build(BuildArgs),
    /// Show which packages a build would select, without building
    Plan(PlanArgs),
    /// Validate the project file
    Validate,
}

/// Options that decide which packages are considered.
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Branch to build; defaults to the checked-out branch
    #[arg(long, env = "TIDEMARK_BRANCH")]
    pub branch: Option<String>,

    /// Build every package regardless of changes
    #[arg(long)]
    pub all: bool,

    /// Only consider these packages
    #[arg(long, value_delimiter = ',')]
    pub include: Vec<String>,

    /// Pipeline stage; packages ignored on this stage are left out
    #[arg(long, env = "TIDEMARK_STAGE")]
    pub stage: Option<String>,
}

#[derive(Args, Debug)]
pub struct BuildArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Maximum number of concurrent builds
    #[arg(long, env = "TIDEMARK_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Minutes to wait for a single package build
    #[arg(long, env = "TIDEMARK_WAIT_MINUTES")]
    pub wait_minutes: Option<u64>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,

    /// Write a markdown summary of failures to this file
    #[arg(long)]
    pub error_report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    match cli.command {
        Commands::Build(args) => {
            commands::build::run(&cli.project, args).await?;
        }
        Commands::Plan(args) => {
            commands::plan::run(&cli.project, args).await?;
        }
        Commands::Validate => {
            commands::validate(&cli.project)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build_flags() {
        let cli = Cli::try_parse_from([
            "tidemark",
            "build",
            "--all",
            "--include",
            "core,base",
            "--concurrency",
            "2",
            "--error-report",
            "errors.md",
        ])
        .unwrap();

        match cli.command {
            Commands::Build(args) => {
                assert!(args.selection.all);
                assert_eq!(args.selection.include, vec!["core", "base"]);
                assert_eq!(args.concurrency, Some(2));
                assert_eq!(args.error_report, Some(PathBuf::from("errors.md")));
            }
            _ => panic!("expected build command"),
        }
    }
}
