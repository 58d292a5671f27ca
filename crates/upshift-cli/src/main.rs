use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

mod flows;
mod options;
mod render;

use flows::{generate_migrations, run_migrations_from_file};
use options::{parse_migrations_options, MigrationsCommand, RawMigrateOptions};

/// Setting this to "true" is equivalent to passing --verbose.
const VERBOSE_LOGGING_ENV: &str = "NX_VERBOSE_LOGGING";

#[derive(Parser, Debug)]
#[command(name = "upshift")]
#[command(about = "Plan and run package migrations for a workspace", long_about = None)]
struct Cli {
    /// Target as package@version, a bare version, or a package name
    package_and_version: Option<String>,
    /// Installed-version overrides, e.g. "pkg@1.0.0,other@2.0.0"
    #[arg(long)]
    from: Option<String>,
    /// Per-package target pins, e.g. "pkg@1.5.0"
    #[arg(long)]
    to: Option<String>,
    /// Confirm optional updates interactively
    #[arg(long)]
    interactive: bool,
    /// Run a previously generated migrations file instead of planning
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
    run_migrations: Option<String>,
    #[arg(long)]
    verbose: bool,
    /// Commit each migration that makes changes
    #[arg(long)]
    create_commits: bool,
    /// Commit message prefix used with --create-commits
    #[arg(long, value_name = "PREFIX")]
    commit_prefix: Option<String>,
    /// Workspace root; defaults to the current directory
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
}

fn main() -> Result<()> {
    run_cli(Cli::parse())
}

fn run_cli(cli: Cli) -> Result<()> {
    let verbose = cli.verbose
        || std::env::var(VERBOSE_LOGGING_ENV).is_ok_and(|value| value == "true");
    let root = match cli.root {
        Some(root) => root,
        None => std::env::current_dir().context("failed to resolve the current directory")?,
    };

    let raw = RawMigrateOptions {
        package_and_version: cli.package_and_version,
        from: cli.from,
        to: cli.to,
        interactive: cli.interactive,
        run_migrations: cli.run_migrations,
    };

    match parse_migrations_options(&raw)? {
        MigrationsCommand::RunMigrations { file } => run_migrations_from_file(
            &root,
            &file,
            verbose,
            cli.create_commits,
            cli.commit_prefix,
        ),
        MigrationsCommand::GenerateMigrations(options) => {
            generate_migrations(&root, options, verbose)
        }
    }
}
