use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use semver::Version;
use upshift_core::{AddToPackageJson, VersionSpec};
use upshift_registry::{Registry, RegistryViewResult};

use crate::Migrator;

#[derive(Default)]
struct FakeRegistry {
    versions: HashMap<String, String>,
    views: HashMap<String, String>,
    migration_files: HashMap<String, String>,
}

impl FakeRegistry {
    /// Registers a published version. `config` is the raw `nx-migrations`
    /// value; `migrations` the migrations-file content served through the
    /// pack/extract path.
    fn publish(
        mut self,
        package: &str,
        version: &str,
        config: Option<&str>,
        migrations: Option<&str>,
    ) -> Self {
        self.versions
            .insert(format!("{package}@{version}"), version.to_string());
        if let Some(config) = config {
            self.views.insert(
                format!("{package}@{version}"),
                format!("{{ \"nx-migrations\": {config} }}"),
            );
        }
        if let Some(migrations) = migrations {
            self.migration_files
                .insert(format!("{package}@{version}"), migrations.to_string());
        }
        self
    }

    fn tag(mut self, package: &str, tag: &str, version: &str) -> Self {
        self.versions
            .insert(format!("{package}@{tag}"), version.to_string());
        self
    }
}

impl Registry for FakeRegistry {
    fn resolve_version(&self, package: &str, spec: &str) -> Result<String> {
        self.versions
            .get(&format!("{package}@{spec}"))
            .cloned()
            .ok_or_else(|| anyhow!("No matching version found for {package}@{spec}"))
    }

    fn view(&self, package: &str, version: &str) -> Result<RegistryViewResult> {
        match self.views.get(&format!("{package}@{version}")) {
            Some(raw) => Ok(serde_json::from_str(raw).expect("fake view must parse")),
            None => Ok(RegistryViewResult::default()),
        }
    }

    fn pack(&self, dest_dir: &Path, package: &str, version: &str) -> Result<PathBuf> {
        let key = format!("{package}@{version}");
        if !self.migration_files.contains_key(&key) {
            return Err(anyhow!("tarball unavailable for {key}"));
        }
        let tarball = dest_dir.join(format!("{}-{version}.tgz", package.replace('/', "-")));
        fs::write(&tarball, key)?;
        Ok(tarball)
    }

    fn extract_file_from_tarball(
        &self,
        tarball: &Path,
        _entry: &str,
        out_path: &Path,
    ) -> Result<PathBuf> {
        let key = fs::read_to_string(tarball)?;
        let content = self
            .migration_files
            .get(&key)
            .ok_or_else(|| anyhow!("entry missing from tarball"))?;
        fs::write(out_path, content)?;
        Ok(out_path.to_path_buf())
    }

    fn temp_install(&self, _dest_dir: &Path, package: &str, spec: &str) -> Result<()> {
        // mirror the package manager's resolution error for unknown
        // versions; anything else reaching this path is a test bug
        if !self.versions.contains_key(&format!("{package}@{spec}")) {
            return Err(anyhow!("No matching version found for {package}@{spec}"));
        }
        Err(anyhow!(
            "unexpected install fallback for {package}@{spec} in planner tests"
        ))
    }
}

struct Workspace {
    root: PathBuf,
}

impl Workspace {
    fn new(dependencies: &[(&str, &str)]) -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let root = std::env::temp_dir().join(format!(
            "upshift-planner-{}-{}",
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&root).expect("must create workspace root");

        let deps = dependencies
            .iter()
            .map(|(name, version)| format!("    \"{name}\": \"{version}\""))
            .collect::<Vec<_>>()
            .join(",\n");
        fs::write(
            root.join("package.json"),
            format!("{{\n  \"name\": \"workspace\",\n  \"dependencies\": {{\n{deps}\n  }}\n}}\n"),
        )
        .expect("must write workspace manifest");

        Self { root }
    }

    fn install(&self, name: &str, version: &str) -> &Self {
        let dir = self.root.join("node_modules").join(name);
        fs::create_dir_all(&dir).expect("must create module dir");
        fs::write(
            dir.join("package.json"),
            format!("{{ \"name\": \"{name}\", \"version\": \"{version}\" }}"),
        )
        .expect("must write module manifest");
        self
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn exact(version: &str) -> VersionSpec {
    VersionSpec::parse(version)
}

#[test]
fn plans_transitive_updates_through_update_entries() {
    let workspace = Workspace::new(&[("p", "1.0.0"), ("q", "0.1.0")]);
    workspace.install("p", "1.0.0").install("q", "0.1.0");

    let registry = FakeRegistry::default()
        .publish(
            "p",
            "2.0.0",
            Some(r#"{ "migrations": "./migrations.json" }"#),
            Some(
                r#"{
                    "packageJsonUpdates": {
                        "1.5.0": {
                            "version": "1.5.0",
                            "packages": { "q": { "version": "0.3.0" } }
                        }
                    }
                }"#,
            ),
        )
        .publish("q", "0.3.0", None, None);

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");

    assert_eq!(plan.package_updates["p"].version, exact("2.0.0"));
    assert_eq!(plan.package_updates["q"].version, exact("0.3.0"));
}

#[test]
fn records_uninstalled_packages_without_touching_the_manifest_section() {
    // q is not in the workspace at all; the update spells out
    // addToPackageJson: false, so the plan records it and nothing more
    let workspace = Workspace::new(&[("p", "1.0.0")]);
    workspace.install("p", "1.0.0");

    let registry = FakeRegistry::default()
        .publish(
            "p",
            "2.0.0",
            Some(r#"{ "migrations": "./migrations.json" }"#),
            Some(
                r#"{
                    "packageJsonUpdates": {
                        "1.5.0": {
                            "version": "1.5.0",
                            "packages": {
                                "q": { "version": "0.3.0", "addToPackageJson": false }
                            }
                        }
                    }
                }"#,
            ),
        )
        .publish("q", "0.3.0", None, None);

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");

    let planned_q = &plan.package_updates["q"];
    assert_eq!(planned_q.version, exact("0.3.0"));
    assert_eq!(planned_q.add_to_package_json, AddToPackageJson::No);
}

#[test]
fn proposals_from_other_packages_only_ever_raise_the_plan() {
    let seed = |q_version_from_r: &str| {
        let workspace = Workspace::new(&[("p", "1.0.0"), ("q", "0.1.0"), ("r", "1.0.0")]);
        workspace
            .install("p", "1.0.0")
            .install("q", "0.1.0")
            .install("r", "1.0.0");

        let registry = FakeRegistry::default()
            .publish(
                "p",
                "2.0.0",
                Some(r#"{ "migrations": "./migrations.json" }"#),
                Some(
                    r#"{
                        "packageJsonUpdates": {
                            "first": {
                                "version": "1.2.0",
                                "packages": { "q": { "version": "0.5.0" } }
                            },
                            "second": {
                                "version": "1.4.0",
                                "packages": { "r": { "version": "1.1.0" } }
                            }
                        }
                    }"#,
                ),
            )
            .publish(
                "r",
                "1.1.0",
                Some(r#"{ "migrations": "./migrations.json" }"#),
                Some(&format!(
                    r#"{{
                        "packageJsonUpdates": {{
                            "bump-q": {{
                                "version": "1.1.0",
                                "packages": {{ "q": {{ "version": "{q_version_from_r}" }} }}
                            }}
                        }}
                    }}"#,
                )),
            )
            .publish("q", "0.5.0", None, None)
            .publish("q", "0.4.0", None, None)
            .publish("q", "0.6.0", None, None);

        let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
        let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");
        plan.package_updates["q"].version.clone()
    };

    // a lower proposal arriving later is pruned by the collected version
    assert_eq!(seed("0.4.0"), exact("0.5.0"));
    // a higher proposal replaces the earlier plan entry
    assert_eq!(seed("0.6.0"), exact("0.6.0"));
}

#[test]
fn tag_targets_resolve_to_concrete_versions() {
    let workspace = Workspace::new(&[("p", "1.0.0")]);
    workspace.install("p", "1.0.0");

    let registry = FakeRegistry::default()
        .publish("p", "2.4.0", None, None)
        .tag("p", "latest", "2.4.0");

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator
        .migrate("p", &VersionSpec::Latest)
        .expect("must plan");

    assert_eq!(plan.package_updates["p"].version, exact("2.4.0"));
}

#[test]
fn mutually_referencing_package_groups_terminate() {
    let workspace = Workspace::new(&[("a", "1.0.0"), ("b", "1.0.0")]);
    workspace.install("a", "1.0.0").install("b", "1.0.0");

    let registry = FakeRegistry::default()
        .publish("a", "2.0.0", Some(r#"{ "packageGroup": ["a", "b"] }"#), None)
        .publish("b", "2.0.0", Some(r#"{ "packageGroup": ["b", "a"] }"#), None);

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator.migrate("a", &exact("2.0.0")).expect("must plan");

    assert_eq!(plan.package_updates["a"].version, exact("2.0.0"));
    assert_eq!(plan.package_updates["b"].version, exact("2.0.0"));
}

#[test]
fn requirements_see_additions_from_earlier_entries_in_the_same_group() {
    let workspace = Workspace::new(&[("p", "1.0.0"), ("dependent", "0.1.0")]);
    workspace.install("p", "1.0.0").install("dependent", "0.1.0");

    let registry = FakeRegistry::default()
        .publish(
            "p",
            "2.0.0",
            Some(r#"{ "migrations": "./migrations.json" }"#),
            Some(
                r#"{
                    "packageJsonUpdates": {
                        "add-helper": {
                            "version": "1.1.0",
                            "packages": {
                                "helper": { "version": "2.0.0", "addToPackageJson": "devDependencies" }
                            }
                        },
                        "needs-helper": {
                            "version": "1.2.0",
                            "requires": { "helper": ">=2.0.0" },
                            "packages": { "dependent": { "version": "0.2.0" } }
                        },
                        "needs-missing": {
                            "version": "1.3.0",
                            "requires": { "absent-peer": ">=1.0.0" },
                            "packages": { "dependent": { "version": "0.9.0" } }
                        }
                    }
                }"#,
            ),
        )
        .publish("helper", "2.0.0", None, None)
        .publish("dependent", "0.2.0", None, None);

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");

    assert_eq!(plan.package_updates["helper"].version, exact("2.0.0"));
    assert_eq!(
        plan.package_updates["helper"].add_to_package_json,
        AddToPackageJson::DevDependencies
    );
    // satisfied through the helper planned two entries earlier
    assert_eq!(plan.package_updates["dependent"].version, exact("0.2.0"));
}

#[test]
fn interactive_mode_honors_prompt_answers() {
    let workspace = Workspace::new(&[("p", "1.0.0"), ("q", "0.1.0"), ("r", "0.1.0")]);
    workspace
        .install("p", "1.0.0")
        .install("q", "0.1.0")
        .install("r", "0.1.0");

    let registry = FakeRegistry::default()
        .publish(
            "p",
            "2.0.0",
            Some(r#"{ "migrations": "./migrations.json" }"#),
            Some(
                r#"{
                    "packageJsonUpdates": {
                        "accepted": {
                            "version": "1.1.0",
                            "x-prompt": "Update the q integration?",
                            "packages": { "q": { "version": "0.2.0" } }
                        },
                        "declined": {
                            "version": "1.2.0",
                            "x-prompt": "Update the r integration?",
                            "packages": { "r": { "version": "0.2.0" } }
                        }
                    }
                }"#,
            ),
        )
        .publish("q", "0.2.0", None, None);

    let prompts = RefCell::new(Vec::new());
    let registry_ref = &registry;
    let mut migrator = Migrator::new(workspace.root(), registry_ref)
        .expect("must construct")
        .interactive(true)
        .with_confirm(|message| {
            prompts.borrow_mut().push(message.to_string());
            Ok(message.contains("Update the q integration?"))
        });

    let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");

    assert_eq!(plan.package_updates["q"].version, exact("0.2.0"));
    assert!(
        !plan.package_updates.contains_key("r"),
        "declined prompt must omit the entry"
    );
    let recorded = prompts.borrow();
    assert!(recorded
        .iter()
        .any(|message| message.contains("Update the q integration?")));
    assert!(recorded
        .iter()
        .any(|message| message.contains("Update the r integration?")));
}

#[test]
fn group_members_following_the_parent_inherit_its_override() {
    let workspace = Workspace::new(&[("parent", "1.0.0"), ("member", "1.0.0")]);
    workspace.install("parent", "1.0.0").install("member", "1.0.0");

    let registry = FakeRegistry::default()
        .publish(
            "parent",
            "3.0.0",
            Some(r#"{ "packageGroup": { "member": "*" } }"#),
            None,
        )
        .publish("member", "3.0.0", None, None);

    let mut overrides = BTreeMap::new();
    overrides.insert("parent".to_string(), Version::new(2, 0, 0));

    let mut migrator = Migrator::new(workspace.root(), &registry)
        .expect("must construct")
        .with_installed_overrides(overrides);
    let plan = migrator.migrate("parent", &exact("3.0.0")).expect("must plan");

    assert_eq!(plan.package_updates["member"].version, exact("3.0.0"));
    assert_eq!(
        migrator.installed_overrides().get("member"),
        Some(&Version::new(2, 0, 0))
    );
}

#[test]
fn legacy_workspace_targets_move_their_sibling_packages() {
    let workspace = Workspace::new(&[("@nrwl/workspace", "13.0.0"), ("@nrwl/jest", "13.0.0")]);
    workspace
        .install("@nrwl/workspace", "13.0.0")
        .install("@nrwl/jest", "13.0.0");

    let registry = FakeRegistry::default()
        .publish("@nrwl/workspace", "13.10.0", None, None)
        .publish("@nrwl/jest", "13.10.0", None, None);

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator
        .migrate("@nrwl/workspace", &exact("13.10.0"))
        .expect("must plan");

    assert_eq!(
        plan.package_updates["@nrwl/workspace"].version,
        exact("13.10.0")
    );
    assert_eq!(plan.package_updates["@nrwl/jest"].version, exact("13.10.0"));
    assert!(
        !plan.package_updates.contains_key("@nrwl/react"),
        "group members absent from the workspace stay out of the plan"
    );
}

#[test]
fn target_pins_override_the_requested_version() {
    let workspace = Workspace::new(&[("p", "1.0.0")]);
    workspace.install("p", "1.0.0");

    let registry = FakeRegistry::default().publish("p", "1.5.0", None, None);

    let mut pins = BTreeMap::new();
    pins.insert("p".to_string(), exact("1.5.0"));

    let mut migrator = Migrator::new(workspace.root(), &registry)
        .expect("must construct")
        .with_target_pins(pins);
    let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");

    assert_eq!(plan.package_updates["p"].version, exact("1.5.0"));
}

#[test]
fn unresolvable_targets_suggest_pinning_with_to() {
    let workspace = Workspace::new(&[("p", "1.0.0")]);
    workspace.install("p", "1.0.0");

    let registry = FakeRegistry::default();
    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");

    let err = migrator
        .migrate("p", &exact("9.0.0"))
        .expect_err("must fail");
    let message = err.to_string();
    assert!(message.contains("No matching version"));
    assert!(message.contains("--to=\"p@<version>\""));
}

#[test]
fn migration_list_respects_version_bounds_and_requirements() {
    let workspace = Workspace::new(&[("p", "1.0.0"), ("q", "0.1.0")]);
    workspace.install("p", "1.0.0");

    let registry = FakeRegistry::default()
        .publish(
            "p",
            "2.0.0",
            Some(r#"{ "migrations": "./migrations.json" }"#),
            Some(
                r#"{
                    "generators": {
                        "already-applied": { "version": "0.9.0" },
                        "mid-range": {
                            "version": "1.5.0",
                            "description": "rewrite configuration layout"
                        },
                        "at-target": { "version": "2.0.0" },
                        "beyond-target": { "version": "2.5.0" },
                        "unmet-requirement": {
                            "version": "1.6.0",
                            "requires": { "absent-peer": ">=1.0.0" }
                        }
                    },
                    "packageJsonUpdates": {
                        "1.5.0": {
                            "version": "1.5.0",
                            "packages": {
                                "q": { "version": "0.3.0", "addToPackageJson": "dependencies" }
                            }
                        }
                    }
                }"#,
            ),
        )
        .publish("q", "0.3.0", None, None);

    let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
    let plan = migrator.migrate("p", &exact("2.0.0")).expect("must plan");

    let names: Vec<&str> = plan
        .migrations
        .iter()
        .map(|migration| migration.name.as_str())
        .collect();
    assert_eq!(names, ["mid-range", "at-target"]);
    assert!(plan
        .migrations
        .iter()
        .all(|migration| migration.package == "p"));
    assert_eq!(
        plan.migrations[0].description.as_deref(),
        Some("rewrite configuration layout")
    );
}

#[test]
fn identical_inputs_produce_identical_migration_lists() {
    let build = || {
        let workspace = Workspace::new(&[
            ("parent", "1.0.0"),
            ("m1", "1.0.0"),
            ("m2", "1.0.0"),
        ]);
        workspace
            .install("parent", "1.0.0")
            .install("m1", "1.0.0")
            .install("m2", "1.0.0");

        let registry = FakeRegistry::default()
            .publish(
                "parent",
                "2.0.0",
                Some(r#"{ "packageGroup": ["m1", "m2"] }"#),
                None,
            )
            .publish(
                "m1",
                "2.0.0",
                Some(r#"{ "migrations": "./migrations.json" }"#),
                Some(r#"{ "generators": { "m1-step": { "version": "2.0.0" } } }"#),
            )
            .publish(
                "m2",
                "2.0.0",
                Some(r#"{ "migrations": "./migrations.json" }"#),
                Some(r#"{ "generators": { "m2-step": { "version": "2.0.0" } } }"#),
            );

        let mut migrator = Migrator::new(workspace.root(), &registry).expect("must construct");
        let plan = migrator.migrate("parent", &exact("2.0.0")).expect("must plan");
        plan.migrations
            .iter()
            .map(|migration| format!("{}:{}", migration.package, migration.name))
            .collect::<Vec<_>>()
    };

    let first = build();
    let second = build();
    assert_eq!(first, second);
    assert_eq!(first, ["m1:m1-step", "m2:m2-step"]);
}
