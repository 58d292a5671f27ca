use std::fs;
use std::path::{Path, PathBuf};

use anstyle::{AnsiColor, Effects, Style};
use anyhow::{anyhow, Context, Result};
use upshift_core::manifest::Migration;

mod commit;
mod host;
mod node_host;
mod package_manager;

pub use host::{flush_changes, ChangeKind, FileChange, FsTree};
pub use node_host::NodeImplementationResolver;
pub use package_manager::{install_packages, PackageManager};

use commit::commit_changes;

/// Any non-empty value skips the install that normally precedes the
/// first migration.
pub const SKIP_INSTALL_ENV: &str = "NX_MIGRATE_SKIP_INSTALL";

/// A migration implementation invoked against a virtual tree; changes are
/// collected from the tree afterwards.
pub trait MigrationImplementation {
    fn run(&self, tree: &mut FsTree, options: &serde_json::Value) -> Result<()>;
}

/// Turns a migration list entry into a runnable implementation. The
/// production resolver loads JavaScript through a `node` subprocess;
/// tests substitute closures over the tree.
pub trait ImplementationResolver {
    fn resolve(&self, root: &Path, migration: &Migration)
        -> Result<Box<dyn MigrationImplementation>>;
}

#[derive(Debug, Clone, Default)]
pub struct AdapterOutcome {
    pub made_changes: bool,
    pub logging_queue: Vec<String>,
}

/// Migrations whose `cli` is not `nx` are delegated verbatim to this
/// external adapter.
pub trait AngularMigrationAdapter {
    fn run(&self, root: &Path, package: &str, name: &str, verbose: bool) -> Result<AdapterOutcome>;
}

/// Default adapter for workspaces without the Angular devkit wired in.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedAngularAdapter;

impl AngularMigrationAdapter for UnsupportedAngularAdapter {
    fn run(
        &self,
        _root: &Path,
        package: &str,
        name: &str,
        _verbose: bool,
    ) -> Result<AdapterOutcome> {
        Err(anyhow!(
            "migration {name} from {package} needs the Angular devkit runner, which is not configured"
        ))
    }
}

static UNSUPPORTED_ADAPTER: UnsupportedAngularAdapter = UnsupportedAngularAdapter;

#[derive(Debug, Clone)]
pub struct CompletedMigration {
    pub package: String,
    pub name: String,
    pub changed_files: usize,
    pub commit_sha: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub completed: Vec<CompletedMigration>,
    pub no_changes: Vec<String>,
}

/// Replays an already-generated migration list against the working tree
/// in list order, flushing each migration's changes and optionally
/// committing them.
pub struct Runner<'a> {
    root: PathBuf,
    verbose: bool,
    create_commits: bool,
    commit_prefix: String,
    skip_install: bool,
    resolver: &'a dyn ImplementationResolver,
    angular: &'a dyn AngularMigrationAdapter,
}

impl<'a> Runner<'a> {
    pub fn new(root: impl Into<PathBuf>, resolver: &'a dyn ImplementationResolver) -> Self {
        let skip_install = std::env::var(SKIP_INSTALL_ENV)
            .map(|value| !value.is_empty())
            .unwrap_or(false);
        Self {
            root: root.into(),
            verbose: false,
            create_commits: false,
            commit_prefix: "chore: [nx migration] ".to_string(),
            skip_install,
            resolver,
            angular: &UNSUPPORTED_ADAPTER,
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn create_commits(mut self, create_commits: bool) -> Self {
        self.create_commits = create_commits;
        self
    }

    pub fn commit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_prefix = prefix.into();
        self
    }

    pub fn skip_install(mut self, skip_install: bool) -> Self {
        self.skip_install = skip_install;
        self
    }

    pub fn with_angular_adapter(mut self, adapter: &'a dyn AngularMigrationAdapter) -> Self {
        self.angular = adapter;
        self
    }

    pub fn run(&self, migrations: &[Migration]) -> Result<RunSummary> {
        let deps_before = dependency_snapshot(&self.root)?;
        if !self.skip_install {
            install_packages(&self.root, self.verbose)?;
        }

        let mut summary = RunSummary::default();
        for migration in migrations {
            println!(
                "{} {} from {}",
                colorize(heading_style(), "Running migration"),
                migration.name,
                migration.package
            );
            if migration.runs_through_nx() {
                self.run_host_migration(migration, &mut summary)?;
            } else {
                self.run_adapter_migration(migration, &mut summary)?;
            }
        }

        let deps_after = dependency_snapshot(&self.root)?;
        if deps_before != deps_after {
            install_packages(&self.root, self.verbose)?;
        }
        Ok(summary)
    }

    fn run_host_migration(&self, migration: &Migration, summary: &mut RunSummary) -> Result<()> {
        let implementation = self
            .resolver
            .resolve(&self.root, migration)
            .with_context(|| failure_label(migration))?;

        let mut tree = FsTree::new(&self.root);
        if let Err(err) = implementation.run(&mut tree, &serde_json::json!({})) {
            print_error(&failure_label(migration));
            return Err(err);
        }

        let changes = tree.list_changes();
        if changes.is_empty() {
            summary.no_changes.push(migration.name.clone());
            return Ok(());
        }

        flush_changes(&self.root, &changes)?;
        for change in &changes {
            print_change(change);
        }

        summary.completed.push(CompletedMigration {
            package: migration.package.clone(),
            name: migration.name.clone(),
            changed_files: changes.len(),
            commit_sha: self.maybe_commit(&migration.name),
        });
        Ok(())
    }

    fn run_adapter_migration(&self, migration: &Migration, summary: &mut RunSummary) -> Result<()> {
        let outcome = match self.angular.run(
            &self.root,
            &migration.package,
            &migration.name,
            self.verbose,
        ) {
            Ok(outcome) => outcome,
            Err(err) => {
                print_error(&failure_label(migration));
                return Err(err);
            }
        };

        for line in &outcome.logging_queue {
            println!("{line}");
        }
        if !outcome.made_changes {
            summary.no_changes.push(migration.name.clone());
            return Ok(());
        }

        summary.completed.push(CompletedMigration {
            package: migration.package.clone(),
            name: migration.name.clone(),
            changed_files: 0,
            commit_sha: self.maybe_commit(&migration.name),
        });
        Ok(())
    }

    /// Commit failures are reported but never abort the run.
    fn maybe_commit(&self, migration_name: &str) -> Option<String> {
        if !self.create_commits {
            return None;
        }
        let message = format!("{}{}", self.commit_prefix, migration_name);
        match commit_changes(&self.root, &message) {
            Ok(sha) => Some(sha),
            Err(err) => {
                print_error(&format!("Failed to commit migration {migration_name}: {err:#}"));
                None
            }
        }
    }
}

fn failure_label(migration: &Migration) -> String {
    format!(
        "Failed to run migration {} from package {}",
        migration.name, migration.package
    )
}

/// Stringified `(dependencies, devDependencies)` of the workspace
/// manifest, used to decide whether the run changed what is installed.
fn dependency_snapshot(root: &Path) -> Result<String> {
    let path = root.join("package.json");
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    let snapshot = serde_json::json!([
        document.get("dependencies"),
        document.get("devDependencies"),
    ]);
    Ok(snapshot.to_string())
}

fn heading_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightCyan.into()))
        .effects(Effects::BOLD)
}

fn error_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightRed.into()))
        .effects(Effects::BOLD)
}

fn change_style(kind: ChangeKind) -> Style {
    let color = match kind {
        ChangeKind::Create => AnsiColor::BrightGreen,
        ChangeKind::Update => AnsiColor::BrightBlue,
        ChangeKind::Delete => AnsiColor::BrightRed,
    };
    Style::new().fg_color(Some(color.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

fn print_change(change: &FileChange) {
    println!(
        "{} {}",
        colorize(change_style(change.kind), change.kind.as_str()),
        change.path
    );
}

fn print_error(message: &str) {
    println!("{}", colorize(error_style(), message));
}
