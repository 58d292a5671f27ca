use std::collections::HashMap;
use std::fs;

use anyhow::{anyhow, Context, Result};
use upshift_core::manifest::{MigrationManifest, MigrationsDocument};
use upshift_core::package_json::read_module_package_json;
use upshift_core::version::normalize_version;
use upshift_core::{MigrationsConfig, PackageGroupMember, RawPackageGroup};

use crate::{Registry, TempWorkspace};

/// Resolves `(package, version-or-tag)` requests into migration manifests,
/// registry-first with a temporary-install fallback. Results are memoized
/// under both the request key and the resolved-version key so a tag-keyed
/// request aliases the concrete entry it resolved to.
pub struct MigrationFetcher<'a> {
    registry: &'a dyn Registry,
    verbose: bool,
    manifest_cache: HashMap<String, MigrationManifest>,
    resolved_version_cache: HashMap<String, String>,
}

impl<'a> MigrationFetcher<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Self {
            registry,
            verbose: false,
            manifest_cache: HashMap::new(),
            resolved_version_cache: HashMap::new(),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn fetch(&mut self, package: &str, spec: &str) -> Result<MigrationManifest> {
        let request_key = cache_key(package, spec);
        if let Some(cached) = self.manifest_cache.get(&request_key) {
            return Ok(cached.clone());
        }

        if self.verbose {
            println!("Fetching {package}@{spec}");
        }

        let manifest = match self.fetch_using_registry(package, spec) {
            Ok(manifest) => manifest,
            Err(registry_err) => {
                if self.verbose {
                    println!(
                        "Fetching {package}@{spec} from the registry failed: {registry_err:#}"
                    );
                    println!("Falling back to installing {package}@{spec} in a temporary directory");
                }
                self.fetch_using_install(package, spec)?
            }
        };

        let resolved_key = cache_key(package, &manifest.version.to_string());
        self.manifest_cache
            .insert(resolved_key, manifest.clone());
        self.manifest_cache.insert(request_key, manifest.clone());
        Ok(manifest)
    }

    fn resolve_version(&mut self, package: &str, spec: &str) -> Result<String> {
        let key = cache_key(package, spec);
        if let Some(resolved) = self.resolved_version_cache.get(&key) {
            return Ok(resolved.clone());
        }
        let resolved = self.registry.resolve_version(package, spec)?;
        self.resolved_version_cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn fetch_using_registry(&mut self, package: &str, spec: &str) -> Result<MigrationManifest> {
        let resolved = self.resolve_version(package, spec)?;
        if let Some(cached) = self.manifest_cache.get(&cache_key(package, &resolved)) {
            return Ok(cached.clone());
        }

        let version = normalize_version(&resolved);
        let view = self.registry.view(package, &resolved)?;
        let Some(config) = view.migrations_config() else {
            return Ok(MigrationManifest::empty(version));
        };

        let package_group = group_members(config);
        let Some(migrations_path) = config.migrations_path().map(str::to_string) else {
            let mut manifest = MigrationManifest::empty(version);
            manifest.package_group = package_group;
            return Ok(manifest);
        };

        let workdir = TempWorkspace::create("pack")?;
        let tarball = self.registry.pack(workdir.path(), package, &resolved)?;
        let out_path = workdir.path().join("migrations.json");
        let extracted = self
            .registry
            .extract_file_from_tarball(&tarball, &migrations_path, &out_path)
            .map_err(|_| migrations_file_missing(&migrations_path, package, &resolved))?;
        let content = fs::read_to_string(&extracted)
            .map_err(|_| migrations_file_missing(&migrations_path, package, &resolved))?;
        let document = MigrationsDocument::from_json_str(&content)
            .with_context(|| format!("invalid migrations file in {package}@{resolved}"))?;

        Ok(MigrationManifest {
            version,
            package_json_updates: document.package_json_updates,
            generators: document.generators,
            package_group,
        })
    }

    fn fetch_using_install(&mut self, package: &str, spec: &str) -> Result<MigrationManifest> {
        let workdir = TempWorkspace::create("install")?;
        fs::write(
            workdir.path().join("package.json"),
            "{\n  \"private\": true\n}\n",
        )
        .context("failed to seed temporary install directory")?;
        self.registry.temp_install(workdir.path(), package, spec)?;

        let module = read_module_package_json(workdir.path(), package)?;
        let installed = module
            .version
            .clone()
            .ok_or_else(|| anyhow!("installed package {package} declares no version"))?;
        let version = normalize_version(&installed);
        self.resolved_version_cache
            .insert(cache_key(package, spec), installed.clone());

        let Some(config) = module.migrations_config() else {
            return Ok(MigrationManifest::empty(version));
        };
        let package_group = group_members(config);
        let Some(migrations_path) = config.migrations_path() else {
            let mut manifest = MigrationManifest::empty(version);
            manifest.package_group = package_group;
            return Ok(manifest);
        };

        let migrations_file = workdir
            .path()
            .join("node_modules")
            .join(package)
            .join(migrations_path.trim_start_matches("./"));
        let content = fs::read_to_string(&migrations_file)
            .map_err(|_| migrations_file_missing(migrations_path, package, &installed))?;
        let document = MigrationsDocument::from_json_str(&content)
            .with_context(|| format!("invalid migrations file in {package}@{installed}"))?;

        Ok(MigrationManifest {
            version,
            package_json_updates: document.package_json_updates,
            generators: document.generators,
            package_group,
        })
    }
}

fn group_members(config: &MigrationsConfig) -> Vec<PackageGroupMember> {
    config
        .package_group()
        .cloned()
        .map(RawPackageGroup::into_members)
        .unwrap_or_default()
}

fn migrations_file_missing(file: &str, package: &str, version: &str) -> anyhow::Error {
    anyhow!("Failed to find migrations file {file} in package {package}@{version}")
}

fn cache_key(package: &str, version: &str) -> String {
    format!("{package}-{version}")
}
