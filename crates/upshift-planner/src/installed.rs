use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use semver::Version;
use upshift_core::package_json::read_module_package_json;
use upshift_core::version::normalize_version;

const CANONICAL_PACKAGE: &str = "nx";
const LEGACY_PACKAGE: &str = "@nrwl/workspace";

/// Resolves the version of a package currently present in the workspace,
/// memoizing manifest reads. `None` is meaningful: the package is not
/// installed, so the planner treats its update as a pure add.
pub struct InstalledVersions {
    root: PathBuf,
    cache: HashMap<String, Option<Version>>,
}

impl InstalledVersions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: HashMap::new(),
        }
    }

    pub fn get(&mut self, name: &str, overrides: &BTreeMap<String, Version>) -> Option<Version> {
        if let Some(version) = overrides.get(name) {
            return Some(version.clone());
        }
        if let Some(cached) = self.cache.get(name) {
            return cached.clone();
        }

        let resolved = self.lookup(name);
        self.cache.insert(name.to_string(), resolved.clone());
        resolved
    }

    fn lookup(&self, name: &str) -> Option<Version> {
        match read_module_package_json(&self.root, name) {
            Ok(manifest) => manifest.version.as_deref().map(normalize_version),
            // workspaces that predate the package rename still carry the
            // old module on disk
            Err(_) if name == CANONICAL_PACKAGE => self.lookup(LEGACY_PACKAGE),
            Err(_) => None,
        }
    }
}
