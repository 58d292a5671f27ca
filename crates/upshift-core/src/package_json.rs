use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use crate::manifest::{AddToPackageJson, PlannedUpdate, RawPackageGroup};

/// The `nx-migrations` / `ng-update` value in a package manifest: either a
/// bare migrations-file path or an object carrying the path and an
/// optional package group.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum MigrationsConfig {
    Path(String),
    Detailed {
        #[serde(default)]
        migrations: Option<String>,
        #[serde(default, rename = "packageGroup")]
        package_group: Option<RawPackageGroup>,
    },
}

impl MigrationsConfig {
    pub fn migrations_path(&self) -> Option<&str> {
        match self {
            Self::Path(path) => Some(path),
            Self::Detailed { migrations, .. } => migrations.as_deref(),
        }
    }

    pub fn package_group(&self) -> Option<&RawPackageGroup> {
        match self {
            Self::Path(_) => None,
            Self::Detailed { package_group, .. } => package_group.as_ref(),
        }
    }
}

/// Read-side view over a `package.json`. Rewrites go through
/// `apply_plan_to_package_json`, which operates on the raw document so
/// unknown fields and key order survive.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJson {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub dev_dependencies: IndexMap<String, String>,
    #[serde(default)]
    pub peer_dependencies: IndexMap<String, String>,
    #[serde(default, rename = "nx-migrations")]
    pub nx_migrations: Option<MigrationsConfig>,
    #[serde(default, rename = "ng-update")]
    pub ng_update: Option<MigrationsConfig>,
}

impl PackageJson {
    pub fn from_json_str(input: &str) -> Result<Self> {
        serde_json::from_str(input).context("failed to parse package.json")
    }

    /// `nx-migrations` wins over the Angular-era `ng-update` key.
    pub fn migrations_config(&self) -> Option<&MigrationsConfig> {
        self.nx_migrations.as_ref().or(self.ng_update.as_ref())
    }

    pub fn has_dependency(&self, name: &str) -> bool {
        self.dependencies.contains_key(name) || self.dev_dependencies.contains_key(name)
    }
}

pub fn read_package_json(dir: &Path) -> Result<PackageJson> {
    let path = dir.join("package.json");
    let content = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    PackageJson::from_json_str(&content)
        .with_context(|| format!("failed parsing {}", path.display()))
}

/// Resolves a module's own manifest below the workspace root.
pub fn read_module_package_json(root: &Path, name: &str) -> Result<PackageJson> {
    read_package_json(&root.join("node_modules").join(name))
}

/// Applies the plan to the workspace manifest: planned packages already
/// present in `dependencies` or `devDependencies` get their version string
/// rewritten in place; absent packages are inserted into the section their
/// update names, and left alone entirely when the plan says `No`. The
/// document's other fields, key order, and trailing newline are preserved.
/// Returns whether the file was rewritten.
pub fn apply_plan_to_package_json(
    root: &Path,
    updates: &IndexMap<String, PlannedUpdate>,
) -> Result<bool> {
    let path = root.join("package.json");
    let original = fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let had_trailing_newline = original.ends_with('\n');

    let mut document: Value = serde_json::from_str(&original)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    let object = document
        .as_object_mut()
        .ok_or_else(|| anyhow!("{} is not a JSON object", path.display()))?;

    let mut changed = false;
    for (name, update) in updates {
        let version = update.version.to_string();
        if let Some(section) = section_containing(object, name) {
            let entry = object
                .get_mut(section)
                .and_then(Value::as_object_mut)
                .and_then(|section| section.get_mut(name))
                .ok_or_else(|| anyhow!("dependency section lost while rewriting {name}"))?;
            if entry.as_str() != Some(version.as_str()) {
                *entry = Value::String(version);
                changed = true;
            }
            continue;
        }

        let section = match update.add_to_package_json {
            AddToPackageJson::No => continue,
            AddToPackageJson::Dependencies => "dependencies",
            AddToPackageJson::DevDependencies => "devDependencies",
        };
        let section = object
            .entry(section.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let section = section
            .as_object_mut()
            .ok_or_else(|| anyhow!("'{}' in {} is not an object", name, path.display()))?;
        section.insert(name.clone(), Value::String(version));
        changed = true;
    }

    if !changed {
        return Ok(false);
    }

    let mut serialized = serde_json::to_string_pretty(&document)
        .context("failed to serialize package.json")?;
    if had_trailing_newline {
        serialized.push('\n');
    }
    fs::write(&path, serialized).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

fn section_containing(object: &serde_json::Map<String, Value>, name: &str) -> Option<&'static str> {
    for section in ["dependencies", "devDependencies"] {
        let present = object
            .get(section)
            .and_then(Value::as_object)
            .is_some_and(|section| section.contains_key(name));
        if present {
            return Some(section);
        }
    }
    None
}
