use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use upshift_core::MigrationsConfig;

mod fetcher;

pub use fetcher::MigrationFetcher;

/// The migration-relevant fields of a published package's metadata.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryViewResult {
    #[serde(default, rename = "nx-migrations")]
    pub nx_migrations: Option<MigrationsConfig>,
    #[serde(default, rename = "ng-update")]
    pub ng_update: Option<MigrationsConfig>,
}

impl RegistryViewResult {
    pub fn migrations_config(&self) -> Option<&MigrationsConfig> {
        self.nx_migrations.as_ref().or(self.ng_update.as_ref())
    }
}

/// Package-registry operations the fetcher consumes. Production traffic
/// goes through `NpmRegistry`; tests substitute in-memory fakes.
pub trait Registry {
    /// Resolves a tag, range, or version into a concrete published
    /// version. Resolution failure reports "No matching version" so
    /// callers can turn it into actionable guidance.
    fn resolve_version(&self, package: &str, spec: &str) -> Result<String>;

    /// Reads the `nx-migrations` / `ng-update` metadata for an exact
    /// published version.
    fn view(&self, package: &str, version: &str) -> Result<RegistryViewResult>;

    /// Downloads the package tarball into `dest_dir`, returning its path.
    fn pack(&self, dest_dir: &Path, package: &str, version: &str) -> Result<PathBuf>;

    /// Extracts a single file from a package tarball to `out_path`.
    fn extract_file_from_tarball(
        &self,
        tarball: &Path,
        entry: &str,
        out_path: &Path,
    ) -> Result<PathBuf>;

    /// Installs `package@spec` into a throwaway prefix, used when the
    /// registry metadata path is unavailable.
    fn temp_install(&self, dest_dir: &Path, package: &str, spec: &str) -> Result<()>;
}

/// Registry client backed by the `npm` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct NpmRegistry;

impl Registry for NpmRegistry {
    fn resolve_version(&self, package: &str, spec: &str) -> Result<String> {
        let output = run_npm(&["view", &format!("{package}@{spec}"), "version", "--json"], None);
        let raw = match output {
            Ok(raw) if !raw.trim().is_empty() => raw,
            _ => return Err(anyhow!("No matching version found for {package}@{spec}")),
        };

        let parsed: serde_json::Value = serde_json::from_str(raw.trim())
            .with_context(|| format!("unexpected npm view output for {package}@{spec}"))?;
        let resolved = match &parsed {
            serde_json::Value::String(version) => Some(version.clone()),
            // a range resolves to every matching version; the highest wins
            serde_json::Value::Array(versions) => versions
                .last()
                .and_then(serde_json::Value::as_str)
                .map(str::to_string),
            _ => None,
        };
        resolved.ok_or_else(|| anyhow!("No matching version found for {package}@{spec}"))
    }

    fn view(&self, package: &str, version: &str) -> Result<RegistryViewResult> {
        let raw = run_npm(
            &[
                "view",
                &format!("{package}@{version}"),
                "nx-migrations",
                "ng-update",
                "--json",
            ],
            None,
        )?;
        if raw.trim().is_empty() {
            return Ok(RegistryViewResult::default());
        }
        serde_json::from_str(raw.trim())
            .with_context(|| format!("unexpected npm view output for {package}@{version}"))
    }

    fn pack(&self, dest_dir: &Path, package: &str, version: &str) -> Result<PathBuf> {
        let raw = run_npm(
            &[
                "pack",
                &format!("{package}@{version}"),
                "--pack-destination",
                &dest_dir.display().to_string(),
            ],
            None,
        )?;
        let tarball_name = raw
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| anyhow!("npm pack produced no tarball for {package}@{version}"))?;
        Ok(dest_dir.join(tarball_name.trim()))
    }

    fn extract_file_from_tarball(
        &self,
        tarball: &Path,
        entry: &str,
        out_path: &Path,
    ) -> Result<PathBuf> {
        let scratch = TempWorkspace::create("untar")?;
        // npm tarballs root their content under `package/`
        let archive_entry = format!("package/{}", entry.trim_start_matches("./"));

        let output = Command::new("tar")
            .arg("-xzf")
            .arg(tarball)
            .arg("-C")
            .arg(scratch.path())
            .arg(&archive_entry)
            .output()
            .with_context(|| format!("failed to run tar on {}", tarball.display()))?;
        if !output.status.success() {
            return Err(anyhow!(
                "tar could not extract '{archive_entry}' from {}: {}",
                tarball.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }

        let extracted = scratch.path().join(&archive_entry);
        fs::copy(&extracted, out_path).with_context(|| {
            format!(
                "failed to copy extracted file to {}",
                out_path.display()
            )
        })?;
        Ok(out_path.to_path_buf())
    }

    fn temp_install(&self, dest_dir: &Path, package: &str, spec: &str) -> Result<()> {
        run_npm(
            &[
                "install",
                &format!("{package}@{spec}"),
                "--prefix",
                &dest_dir.display().to_string(),
                "--no-audit",
                "--no-fund",
            ],
            Some(dest_dir),
        )
        .map(|_| ())
    }
}

fn run_npm(args: &[&str], current_dir: Option<&Path>) -> Result<String> {
    let mut command = Command::new("npm");
    command.args(args);
    if let Some(dir) = current_dir {
        command.current_dir(dir);
    }

    let output = command
        .output()
        .with_context(|| format!("failed to run npm {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "npm {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// A scratch directory removed on drop, so both the success and the
/// failure paths of a fetch leave nothing behind.
pub struct TempWorkspace {
    path: PathBuf,
}

impl TempWorkspace {
    pub fn create(label: &str) -> Result<Self> {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let path = std::env::temp_dir().join(format!(
            "upshift-{label}-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&path)
            .with_context(|| format!("failed creating tmp dir: {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
