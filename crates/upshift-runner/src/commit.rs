use std::path::Path;
use std::process::Command;

use anyhow::{Context, Result};

/// Stages everything and commits without hooks, returning the new HEAD
/// sha for reporting.
pub(crate) fn commit_changes(root: &Path, message: &str) -> Result<String> {
    run_git(root, &["add", "-A"])?;
    run_git(root, &["commit", "--no-verify", "-m", message])?;
    head_sha(root)
}

pub(crate) fn head_sha(root: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .context("failed launching git rev-parse")?;
    if !output.status.success() {
        anyhow::bail!(
            "git rev-parse failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn run_git(root: &Path, args: &[&str]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .current_dir(root)
        .output()
        .with_context(|| format!("failed launching git {}", args.join(" ")))?;
    if !output.status.success() {
        anyhow::bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
