use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    Npm,
    Yarn,
    Pnpm,
}

impl PackageManager {
    /// Lockfile presence decides which package manager owns the
    /// workspace; npm is the fallback.
    pub fn detect(root: &Path) -> Self {
        if root.join("pnpm-lock.yaml").exists() {
            Self::Pnpm
        } else if root.join("yarn.lock").exists() {
            Self::Yarn
        } else {
            Self::Npm
        }
    }

    pub fn install_command(self) -> (&'static str, &'static [&'static str]) {
        match self {
            Self::Npm => ("npm", &["install"]),
            Self::Yarn => ("yarn", &["install"]),
            Self::Pnpm => ("pnpm", &["install"]),
        }
    }
}

pub fn install_packages(root: &Path, verbose: bool) -> Result<()> {
    let manager = PackageManager::detect(root);
    let (program, args) = manager.install_command();
    if verbose {
        println!("Installing dependencies with {program}");
    }

    let output = Command::new(program)
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("failed launching {program} install"))?;
    if !output.status.success() {
        anyhow::bail!(
            "{program} install failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
