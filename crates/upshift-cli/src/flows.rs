use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use upshift_core::manifest::{Migration, MigrationsFile};
use upshift_core::package_json::apply_plan_to_package_json;
use upshift_planner::Migrator;
use upshift_registry::NpmRegistry;
use upshift_runner::{NodeImplementationResolver, Runner};

use crate::options::{GenerateOptions, DEFAULT_MIGRATIONS_FILE};
use crate::render;

/// Plan the migration, rewrite the workspace manifest, and persist the
/// migration list when it is non-empty.
pub fn generate_migrations(root: &Path, options: GenerateOptions, verbose: bool) -> Result<()> {
    let registry = NpmRegistry;
    let mut migrator = Migrator::new(root, &registry)?
        .verbose(verbose)
        .interactive(options.interactive)
        .with_installed_overrides(options.from)
        .with_target_pins(options.to)
        .with_confirm(|message| {
            inquire::Confirm::new(message)
                .with_default(true)
                .prompt()
                .map_err(Into::into)
        });

    render::info("Fetching migration metadata; this can take a moment.");
    let plan = migrator.migrate(&options.target_package, &options.target_version)?;

    let manifest_changed = apply_plan_to_package_json(root, &plan.package_updates)?;
    if manifest_changed {
        render::success("package.json has been updated.");
    }

    if plan.migrations.is_empty() {
        render::info("No migrations to run: the workspace is already on the target versions.");
        return Ok(());
    }

    write_migrations_file(root, &plan.migrations)?;
    render::success(&format!(
        "{DEFAULT_MIGRATIONS_FILE} has been generated with {} migration(s).",
        plan.migrations.len()
    ));
    render::info("Next steps:");
    render::info("  - Review the planned changes in package.json and migrations.json");
    render::info(&format!(
        "  - Run them with: upshift --run-migrations={DEFAULT_MIGRATIONS_FILE}"
    ));
    Ok(())
}

fn write_migrations_file(root: &Path, migrations: &[Migration]) -> Result<()> {
    let document = MigrationsFile {
        migrations: migrations.to_vec(),
    };
    let mut serialized =
        serde_json::to_string_pretty(&document).context("failed to serialize the migration list")?;
    serialized.push('\n');
    let path = root.join(DEFAULT_MIGRATIONS_FILE);
    fs::write(&path, serialized).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}

/// Replay a previously generated migration list. The closing summary is
/// emitted on both the success and the failure path.
pub fn run_migrations_from_file(
    root: &Path,
    file: &str,
    verbose: bool,
    create_commits: bool,
    commit_prefix: Option<String>,
) -> Result<()> {
    let path = root.join(file);
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read migrations from {}", path.display()))?;
    let document: MigrationsFile = serde_json::from_str(&content)
        .with_context(|| format!("failed parsing {}", path.display()))?;

    let resolver = NodeImplementationResolver;
    let mut runner = Runner::new(root, &resolver)
        .verbose(verbose)
        .create_commits(create_commits);
    if let Some(prefix) = commit_prefix {
        runner = runner.commit_prefix(prefix);
    }

    let result = runner.run(&document.migrations);
    match &result {
        Ok(summary) => {
            for completed in &summary.completed {
                if let Some(sha) = &completed.commit_sha {
                    render::info(&format!("  committed {} as {sha}", completed.name));
                }
            }
            if !summary.no_changes.is_empty() {
                render::info("The following migrations made no changes:");
                for name in &summary.no_changes {
                    render::info(&format!("  - {name}"));
                }
            }
            render::success(&format!(
                "Successfully finished running migrations from '{file}'."
            ));
        }
        Err(_) => {
            render::error(&format!("Failed to run migrations from '{file}'."));
        }
    }
    result.map(|_| ())
}
