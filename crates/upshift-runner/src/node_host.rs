use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use upshift_core::manifest::{Migration, MigrationsDocument};
use upshift_core::package_json::read_module_package_json;

use crate::{FsTree, ImplementationResolver, MigrationImplementation};

/// Drives a migration's JavaScript default export through a `node`
/// subprocess. The subprocess runs the implementation against the
/// workspace's own generator tree and reports the change list as JSON
/// without flushing, so flushing, diffing, and committing stay here.
const DRIVER_SOURCE: &str = r#"
const [, workspaceRoot, implementationPath, rawOptions] = process.argv;
const treeModulePath = require.resolve('nx/src/generators/tree', { paths: [workspaceRoot] });
const { FsTree } = require(treeModulePath);
const moduleExports = require(implementationPath);
const implementation = moduleExports.default ?? moduleExports;
const tree = new FsTree(workspaceRoot, false);
Promise.resolve(implementation(tree, JSON.parse(rawOptions)))
  .then(() => {
    const changes = tree.listChanges().map((change) => ({
      path: change.path,
      type: change.type,
      content: change.content ? change.content.toString('hex') : null,
    }));
    process.stdout.write(JSON.stringify(changes));
  })
  .catch((error) => {
    console.error(error && error.stack ? error.stack : String(error));
    process.exit(1);
  });
"#;

#[derive(Debug, Deserialize)]
struct DriverChange {
    path: String,
    #[serde(rename = "type")]
    kind: String,
    content: Option<String>,
}

/// Resolves a migration's implementation file through the package's own
/// migration metadata in `node_modules`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeImplementationResolver;

impl ImplementationResolver for NodeImplementationResolver {
    fn resolve(
        &self,
        root: &Path,
        migration: &Migration,
    ) -> Result<Box<dyn MigrationImplementation>> {
        let module_dir = root.join("node_modules").join(&migration.package);
        let manifest = read_module_package_json(root, &migration.package).with_context(|| {
            format!("package {} is not installed in the workspace", migration.package)
        })?;
        let config = manifest.migrations_config().ok_or_else(|| {
            anyhow!("package {} declares no migration metadata", migration.package)
        })?;
        let migrations_path = config.migrations_path().ok_or_else(|| {
            anyhow!("package {} declares no migrations file", migration.package)
        })?;

        let migrations_file = module_dir.join(migrations_path.trim_start_matches("./"));
        let content = fs::read_to_string(&migrations_file).with_context(|| {
            format!("failed to read {}", migrations_file.display())
        })?;
        let document = MigrationsDocument::from_json_str(&content)
            .with_context(|| format!("invalid migrations file: {}", migrations_file.display()))?;

        let generator = document.generators.get(&migration.name).ok_or_else(|| {
            anyhow!(
                "migration {} is not declared by package {}",
                migration.name,
                migration.package
            )
        })?;
        let declared = generator
            .implementation_path()
            .or(migration.implementation.as_deref())
            .ok_or_else(|| {
                anyhow!(
                    "migration {} from {} declares no implementation",
                    migration.name,
                    migration.package
                )
            })?;

        let migrations_dir = migrations_file
            .parent()
            .ok_or_else(|| anyhow!("migrations file has no parent directory"))?;
        let implementation_path = resolve_implementation_file(migrations_dir, declared)?;

        Ok(Box::new(NodeMigration {
            implementation_path,
        }))
    }
}

fn resolve_implementation_file(dir: &Path, declared: &str) -> Result<PathBuf> {
    let base = dir.join(declared.trim_start_matches("./"));
    let mut candidates = vec![base.clone()];
    for extension in ["js", "cjs"] {
        candidates.push(PathBuf::from(format!("{}.{extension}", base.display())));
    }

    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| anyhow!("implementation file not found for '{declared}'"))
}

struct NodeMigration {
    implementation_path: PathBuf,
}

impl MigrationImplementation for NodeMigration {
    fn run(&self, tree: &mut FsTree, options: &serde_json::Value) -> Result<()> {
        let output = Command::new("node")
            .arg("-e")
            .arg(DRIVER_SOURCE)
            .arg(tree.root())
            .arg(&self.implementation_path)
            .arg(options.to_string())
            .current_dir(tree.root())
            .output()
            .context("failed launching node")?;
        if !output.status.success() {
            bail!(
                "migration implementation {} failed: {}",
                self.implementation_path.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let changes: Vec<DriverChange> = serde_json::from_str(stdout.trim())
            .context("migration driver produced unreadable output")?;
        for change in changes {
            match change.kind.as_str() {
                "CREATE" | "UPDATE" => {
                    let content = change
                        .content
                        .as_deref()
                        .map(decode_hex)
                        .transpose()?
                        .unwrap_or_default();
                    tree.write(&change.path, content);
                }
                "DELETE" => tree.delete(&change.path),
                other => bail!("migration driver reported unknown change type '{other}'"),
            }
        }
        Ok(())
    }
}

pub(crate) fn decode_hex(input: &str) -> Result<Vec<u8>> {
    if !input.is_ascii() || input.len() % 2 != 0 {
        bail!("hex payload has odd length or stray characters");
    }
    (0..input.len())
        .step_by(2)
        .map(|index| {
            u8::from_str_radix(&input[index..index + 2], 16)
                .map_err(|_| anyhow!("invalid hex payload"))
        })
        .collect()
}
