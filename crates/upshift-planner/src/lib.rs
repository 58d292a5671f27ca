use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use semver::Version;
use upshift_core::manifest::{
    AddToPackageJson, GroupVersion, Migration, MigrationManifest, PackageJsonUpdateEntry,
    PackageUpdate, PlannedUpdate,
};
use upshift_core::package_json::{read_package_json, PackageJson};
use upshift_core::version::{clean_semver, normalize_version, parse_range, satisfies, VersionSpec};
use upshift_registry::{MigrationFetcher, Registry};

mod groups;
mod installed;

#[cfg(test)]
mod tests;

pub use installed::InstalledVersions;

use groups::{legacy_nrwl_package_group, package_rename_cutover};

const LEGACY_WORKSPACE_PACKAGE: &str = "@nrwl/workspace";
const CANONICAL_PACKAGE: &str = "nx";

/// The result of one planning run: the package-version plan in insertion
/// order and the ordered migration list derived from it.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub package_updates: IndexMap<String, PlannedUpdate>,
    pub migrations: Vec<Migration>,
}

/// Entries that could not be accepted inline because they carry `requires`
/// preconditions or interactive prompts; the outer walker revisits them in
/// declared order against live plan state.
struct CheckGroup {
    package: String,
    updates: Vec<(String, PackageJsonUpdateEntry)>,
}

/// Builds a consistent set of package version bumps and the ordered
/// migration list for one target. An instance lives for a single planning
/// run; its caches are discarded with it.
pub struct Migrator<'a> {
    registry: &'a dyn Registry,
    root_package_json: PackageJson,
    fetcher: MigrationFetcher<'a>,
    installed: InstalledVersions,
    interactive: bool,
    confirm: Box<dyn FnMut(&str) -> Result<bool> + 'a>,
    package_json_updates: IndexMap<String, PlannedUpdate>,
    collected_versions: BTreeMap<String, Version>,
    from_overrides: BTreeMap<String, Version>,
    to_pins: BTreeMap<String, VersionSpec>,
}

impl<'a> Migrator<'a> {
    pub fn new(root: impl Into<PathBuf>, registry: &'a dyn Registry) -> Result<Self> {
        let root = root.into();
        let root_package_json = read_package_json(&root)
            .with_context(|| format!("no workspace manifest at {}", root.display()))?;

        Ok(Self {
            registry,
            root_package_json,
            fetcher: MigrationFetcher::new(registry),
            installed: InstalledVersions::new(&root),
            interactive: false,
            confirm: Box::new(|_| Ok(true)),
            package_json_updates: IndexMap::new(),
            collected_versions: BTreeMap::new(),
            from_overrides: BTreeMap::new(),
            to_pins: BTreeMap::new(),
        })
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.fetcher = MigrationFetcher::new(self.registry).verbose(verbose);
        self
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// `--from` style overrides of what counts as installed.
    pub fn with_installed_overrides(mut self, overrides: BTreeMap<String, Version>) -> Self {
        self.from_overrides = overrides;
        self
    }

    /// `--to` style per-package target pins.
    pub fn with_target_pins(mut self, pins: BTreeMap<String, VersionSpec>) -> Self {
        self.to_pins = pins;
        self
    }

    pub fn with_confirm(mut self, confirm: impl FnMut(&str) -> Result<bool> + 'a) -> Self {
        self.confirm = Box::new(confirm);
        self
    }

    /// Override map after planning; package-group members that follow
    /// their parent inherit its entry here.
    pub fn installed_overrides(&self) -> &BTreeMap<String, Version> {
        &self.from_overrides
    }

    pub fn migrate(
        &mut self,
        target_package: &str,
        target_version: &VersionSpec,
    ) -> Result<MigrationPlan> {
        self.update_package_json(target_package, target_version)?;
        if matches!(target_package, CANONICAL_PACKAGE | LEGACY_WORKSPACE_PACKAGE) {
            self.maybe_prompt_cloud_connect();
        }
        let migrations = self.build_migration_list()?;
        Ok(MigrationPlan {
            package_updates: self.package_json_updates.clone(),
            migrations,
        })
    }

    /// Phase A: build the package-version plan by traversing fetched
    /// manifests from the root target.
    pub fn update_package_json(
        &mut self,
        target_package: &str,
        target_version: &VersionSpec,
    ) -> Result<()> {
        let root_target = PackageUpdate::new(target_version.to_string());
        let groups = self.populate_and_get_packages_to_check(target_package, &root_target)?;
        self.walk_check_groups(groups)
    }

    fn populate_and_get_packages_to_check(
        &mut self,
        package_name: &str,
        target: &PackageUpdate,
    ) -> Result<Vec<CheckGroup>> {
        let target_version = match self.to_pins.get(package_name) {
            Some(pin) => pin.to_string(),
            None => target.version.clone(),
        };

        // not installed: a pure add, no manifest graph to descend into
        if self.installed_version(package_name).is_none() {
            self.add_package_json_update(
                package_name,
                PlannedUpdate {
                    version: VersionSpec::parse(&target_version),
                    add_to_package_json: target.add_to_package_json.unwrap_or_default(),
                },
            );
            return Ok(Vec::new());
        }

        let mut manifest = match self.fetcher.fetch(package_name, &target_version) {
            Ok(manifest) => manifest,
            Err(err) if err.to_string().contains("No matching version") => {
                return Err(anyhow!(
                    "{err:#}\nRun the migration with --to=\"{package_name}@<version>\" to pin a published version"
                ));
            }
            Err(err) => return Err(err),
        };

        let resolved = manifest.version.clone();
        if let Some(collected) = self.collected_versions.get(package_name) {
            if *collected >= resolved {
                return Ok(Vec::new());
            }
        }
        self.collected_versions
            .insert(package_name.to_string(), resolved.clone());

        let package_group_order = self.add_package_group(package_name, &resolved, &mut manifest);
        let filtered = self.filter_package_json_updates(package_name, &manifest, &resolved);

        self.add_package_json_update(
            package_name,
            PlannedUpdate {
                version: VersionSpec::Exact(resolved),
                add_to_package_json: target.add_to_package_json.unwrap_or_default(),
            },
        );

        if filtered.is_empty() {
            return Ok(Vec::new());
        }

        let gated = filtered.iter().any(|(_, entry)| {
            (self.interactive && entry.prompt.is_some()) || !entry.requires.is_empty()
        });
        if gated {
            return Ok(vec![CheckGroup {
                package: package_name.to_string(),
                updates: filtered,
            }]);
        }

        let mut merged: IndexMap<String, PackageUpdate> = IndexMap::new();
        for (_, entry) in &filtered {
            for (name, update) in &entry.packages {
                merged.insert(name.clone(), update.clone());
            }
        }

        let mut children = Vec::new();
        for (name, update) in &merged {
            children.extend(self.populate_and_get_packages_to_check(name, update)?);
        }
        children.sort_by_key(|group| {
            package_group_order
                .iter()
                .position(|member| member == &group.package)
                .map(|index| index as i64)
                .unwrap_or(-1)
        });
        Ok(children)
    }

    fn walk_check_groups(&mut self, groups: Vec<CheckGroup>) -> Result<()> {
        for group in groups {
            let mut accepted: IndexMap<String, PackageUpdate> = IndexMap::new();
            for (_, entry) in &group.updates {
                if !self.are_requirements_met(&entry.requires, None) {
                    continue;
                }
                if self.interactive && !self.confirm_entry(entry)? {
                    continue;
                }
                // record immediately so later entries' requirements see
                // earlier same-group additions
                for (name, update) in &entry.packages {
                    self.add_package_json_update(
                        name,
                        PlannedUpdate {
                            version: VersionSpec::parse(&update.version),
                            add_to_package_json: update.add_to_package_json.unwrap_or_default(),
                        },
                    );
                    accepted.insert(name.clone(), update.clone());
                }
            }

            for (name, update) in &accepted {
                let children = self.populate_and_get_packages_to_check(name, update)?;
                self.walk_check_groups(children)?;
            }
        }
        Ok(())
    }

    fn confirm_entry(&mut self, entry: &PackageJsonUpdateEntry) -> Result<bool> {
        let Some(prompt) = &entry.prompt else {
            return Ok(true);
        };
        let packages = entry
            .packages
            .iter()
            .map(|(name, update)| format!("{name}@{}", update.version))
            .collect::<Vec<_>>()
            .join(", ");
        let message = format!("{prompt}\n  Applies: {packages}");
        (self.confirm)(&message)
    }

    /// Splices the normalized package group into the manifest as a pseudo
    /// update entry and returns the declared member order. Members that
    /// follow the parent inherit its installed-version override.
    fn add_package_group(
        &mut self,
        package_name: &str,
        target_version: &Version,
        manifest: &mut MigrationManifest,
    ) -> Vec<String> {
        let mut group = std::mem::take(&mut manifest.package_group);
        if package_name == LEGACY_WORKSPACE_PACKAGE && *target_version < package_rename_cutover() {
            group = legacy_nrwl_package_group();
        }
        if group.is_empty() {
            return Vec::new();
        }

        let parent_override = self.from_overrides.get(package_name).cloned();
        let mut order = Vec::with_capacity(group.len());
        let mut packages: IndexMap<String, PackageUpdate> = IndexMap::new();
        for member in &group {
            let version = match &member.version {
                GroupVersion::Follow => {
                    if let Some(parent_override) = &parent_override {
                        self.from_overrides
                            .entry(member.package.clone())
                            .or_insert_with(|| parent_override.clone());
                    }
                    target_version.to_string()
                }
                GroupVersion::Pinned(pinned) => pinned.to_string(),
            };
            order.push(member.package.clone());
            packages.insert(
                member.package.clone(),
                PackageUpdate {
                    version,
                    add_to_package_json: None,
                    always_add_to_package_json: Some(false),
                    if_package_installed: None,
                },
            );
        }

        manifest.package_json_updates.insert(
            format!("{target_version}--PackageGroup"),
            PackageJsonUpdateEntry {
                version: target_version.to_string(),
                packages,
                requires: IndexMap::new(),
                prompt: None,
            },
        );
        order
    }

    /// Keeps the update entries that apply to this traversal: versioned
    /// inside `(installed, target]`, with their package maps narrowed to
    /// updates that are installable, relevant, and not already covered by
    /// a higher collected version. Retained updates come out canonical.
    fn filter_package_json_updates(
        &mut self,
        package_name: &str,
        manifest: &MigrationManifest,
        target_version: &Version,
    ) -> Vec<(String, PackageJsonUpdateEntry)> {
        let installed = self.installed_version(package_name);
        let mut filtered = Vec::new();

        for (key, entry) in &manifest.package_json_updates {
            if entry.packages.is_empty() {
                continue;
            }
            let entry_version = normalize_version(&entry.version);
            if installed
                .as_ref()
                .is_some_and(|installed| entry_version <= *installed)
            {
                continue;
            }
            if entry_version > *target_version {
                continue;
            }

            let mut packages = IndexMap::new();
            for (name, update) in &entry.packages {
                if let Some(peer) = &update.if_package_installed {
                    if self.installed_version(peer).is_none() {
                        continue;
                    }
                }
                if !update.declares_package_json_placement()
                    && !self.root_package_json.has_dependency(name)
                {
                    continue;
                }
                if let Some(collected) = self.collected_versions.get(name) {
                    if normalize_version(&update.version) <= *collected {
                        continue;
                    }
                }
                packages.insert(name.clone(), update.canonical());
            }
            if packages.is_empty() {
                continue;
            }

            filtered.push((
                key.clone(),
                PackageJsonUpdateEntry {
                    version: entry.version.clone(),
                    packages,
                    requires: entry.requires.clone(),
                    prompt: entry.prompt.clone(),
                },
            ));
        }
        filtered
    }

    /// Upgrade-only record: a proposed update only replaces an existing
    /// plan entry when it is strictly newer under normalized comparison.
    fn add_package_json_update(&mut self, name: &str, update: PlannedUpdate) {
        let newer = match self.package_json_updates.get(name) {
            Some(existing) => update.version.comparable() > existing.version.comparable(),
            None => true,
        };
        if newer {
            self.package_json_updates.insert(name.to_string(), update);
        }
    }

    /// A requirement holds when the installed version, the planned
    /// version, or a caller-provided extra entry satisfies its range.
    pub fn are_requirements_met(
        &mut self,
        requires: &IndexMap<String, String>,
        extra: Option<&BTreeMap<String, String>>,
    ) -> bool {
        requires
            .iter()
            .all(|(name, range)| self.is_requirement_met(name, range, extra))
    }

    fn is_requirement_met(
        &mut self,
        name: &str,
        range: &str,
        extra: Option<&BTreeMap<String, String>>,
    ) -> bool {
        let Ok(range) = parse_range(range) else {
            return false;
        };

        if let Some(installed) = self.installed_version(name) {
            if satisfies(&installed, &range) {
                return true;
            }
        }
        if let Some(planned) = self.package_json_updates.get(name) {
            if satisfies(&clean_semver(&planned.version.to_string()), &range) {
                return true;
            }
        }
        if let Some(versions) = extra {
            if let Some(version) = versions.get(name) {
                if satisfies(&clean_semver(version), &range) {
                    return true;
                }
            }
        }
        false
    }

    /// Phase B: enumerate each planned, installed package's generators and
    /// keep those inside `(installed, planned]` whose requirements hold
    /// against the final plan. Plan insertion order outer, declared order
    /// inner.
    fn build_migration_list(&mut self) -> Result<Vec<Migration>> {
        let planned: Vec<(String, VersionSpec)> = self
            .package_json_updates
            .iter()
            .map(|(name, update)| (name.clone(), update.version.clone()))
            .collect();

        let mut migrations = Vec::new();
        for (package, planned_version) in planned {
            let Some(installed) = self.installed_version(&package) else {
                continue;
            };
            let manifest = self.fetcher.fetch(&package, &planned_version.to_string())?;
            let ceiling = planned_version.comparable();

            for (name, generator) in &manifest.generators {
                let version = normalize_version(&generator.version);
                if version <= installed || version > ceiling {
                    continue;
                }
                if !self.are_requirements_met(&generator.requires, None) {
                    continue;
                }
                migrations.push(Migration {
                    package: package.clone(),
                    name: name.clone(),
                    version: generator.version.clone(),
                    description: generator.description.clone(),
                    implementation: generator.implementation_path().map(str::to_string),
                    cli: generator.cli.clone(),
                });
            }
        }
        Ok(migrations)
    }

    /// Optional add-on prompt; declining or failing it never aborts the
    /// plan.
    fn maybe_prompt_cloud_connect(&mut self) {
        if !self.interactive {
            return;
        }
        if self.package_json_updates.contains_key("nx-cloud")
            || self.installed_version("nx-cloud").is_some()
        {
            return;
        }

        let accepted = (self.confirm)(
            "Would you like to connect the workspace to remote caching with nx-cloud?",
        )
        .unwrap_or(false);
        if accepted {
            self.add_package_json_update(
                "nx-cloud",
                PlannedUpdate {
                    version: VersionSpec::Latest,
                    add_to_package_json: AddToPackageJson::DevDependencies,
                },
            );
        }
    }

    fn installed_version(&mut self, name: &str) -> Option<Version> {
        self.installed.get(name, &self.from_overrides)
    }
}
