use anyhow::Context;
use indexmap::IndexMap;
use semver::Version;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::version::VersionSpec;

/// Where a planned package lands in the workspace manifest. `No` means the
/// plan records the package but the manifest writer leaves the file alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddToPackageJson {
    #[default]
    No,
    Dependencies,
    DevDependencies,
}

impl Serialize for AddToPackageJson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::No => serializer.serialize_bool(false),
            Self::Dependencies => serializer.serialize_str("dependencies"),
            Self::DevDependencies => serializer.serialize_str("devDependencies"),
        }
    }
}

impl<'de> Deserialize<'de> for AddToPackageJson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Section(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Flag(false) => Ok(Self::No),
            Raw::Flag(true) => Ok(Self::Dependencies),
            Raw::Section(section) => match section.as_str() {
                "dependencies" => Ok(Self::Dependencies),
                "devDependencies" => Ok(Self::DevDependencies),
                other => Err(D::Error::custom(format!(
                    "unknown package.json section '{other}'"
                ))),
            },
        }
    }
}

/// One package's slot inside a `packageJsonUpdates` entry, as declared by
/// the publisher. The planner canonicalizes this into `PlannedUpdate` when
/// an entry survives filtering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageUpdate {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_to_package_json: Option<AddToPackageJson>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub always_add_to_package_json: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub if_package_installed: Option<String>,
}

impl PackageUpdate {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            add_to_package_json: None,
            always_add_to_package_json: None,
            if_package_installed: None,
        }
    }

    /// Canonical form per the filtering rules: `alwaysAddToPackageJson`
    /// wins as `dependencies`, otherwise the declared section or `No`.
    pub fn canonical(&self) -> Self {
        let add_to = if self.always_add_to_package_json == Some(true) {
            AddToPackageJson::Dependencies
        } else {
            self.add_to_package_json.unwrap_or_default()
        };
        Self {
            version: self.version.clone(),
            add_to_package_json: Some(add_to),
            always_add_to_package_json: None,
            if_package_installed: None,
        }
    }

    /// Whether the update spells out its manifest placement. An explicit
    /// `false` counts: such a package is still planned, the writer just
    /// never touches the manifest for it.
    pub fn declares_package_json_placement(&self) -> bool {
        self.always_add_to_package_json == Some(true) || self.add_to_package_json.is_some()
    }
}

/// A keyed entry in a package's `packageJsonUpdates` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageJsonUpdateEntry {
    pub version: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub packages: IndexMap<String, PackageUpdate>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub requires: IndexMap<String, String>,
    #[serde(
        rename = "x-prompt",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationGenerator {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub requires: IndexMap<String, String>,
}

impl MigrationGenerator {
    pub fn implementation_path(&self) -> Option<&str> {
        self.implementation.as_deref().or(self.factory.as_deref())
    }

    pub fn runs_through_nx(&self) -> bool {
        match self.cli.as_deref() {
            None | Some("nx") => true,
            Some(_) => false,
        }
    }
}

/// The as-parsed shape of a package's migrations document. The older
/// `schematics` key is accepted and renamed to `generators` on load.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationsDocument {
    #[serde(default)]
    pub package_json_updates: IndexMap<String, PackageJsonUpdateEntry>,
    #[serde(default, alias = "schematics")]
    pub generators: IndexMap<String, MigrationGenerator>,
}

impl MigrationsDocument {
    pub fn from_json_str(input: &str) -> anyhow::Result<Self> {
        serde_json::from_str(input).context("failed to parse migrations document")
    }
}

/// A publisher-declared package group, as parsed: either an ordered list
/// of names or `{package, version}` objects, or an ordered map of
/// `package -> version`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPackageGroup {
    List(Vec<RawPackageGroupMember>),
    Map(IndexMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPackageGroupMember {
    Name(String),
    Entry { package: String, version: String },
}

/// Normalized group member. `Follow` covers both `"*"` versions and bare
/// name members: the member moves to the parent's resolved version and
/// inherits the parent's installed-version override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupVersion {
    Follow,
    Pinned(VersionSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageGroupMember {
    pub package: String,
    pub version: GroupVersion,
}

impl PackageGroupMember {
    pub fn follow(package: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: GroupVersion::Follow,
        }
    }

    pub fn pinned(package: impl Into<String>, version: &str) -> Self {
        Self {
            package: package.into(),
            version: GroupVersion::Pinned(VersionSpec::parse(version)),
        }
    }
}

impl RawPackageGroup {
    /// Flattens both raw shapes into ordered members, discriminating the
    /// string-or-object union exactly once.
    pub fn into_members(self) -> Vec<PackageGroupMember> {
        match self {
            Self::List(members) => members
                .into_iter()
                .map(|member| match member {
                    RawPackageGroupMember::Name(package) => PackageGroupMember::follow(package),
                    RawPackageGroupMember::Entry { package, version } => {
                        normalized_member(package, &version)
                    }
                })
                .collect(),
            Self::Map(members) => members
                .into_iter()
                .map(|(package, version)| normalized_member(package, &version))
                .collect(),
        }
    }
}

fn normalized_member(package: String, version: &str) -> PackageGroupMember {
    if version == "*" {
        PackageGroupMember::follow(package)
    } else {
        PackageGroupMember::pinned(package, version)
    }
}

/// A fetched, normalized migration manifest: the parsed document merged
/// with the registry-resolved version and the package group declared in
/// the package's own manifest.
#[derive(Debug, Clone)]
pub struct MigrationManifest {
    pub version: Version,
    pub package_json_updates: IndexMap<String, PackageJsonUpdateEntry>,
    pub generators: IndexMap<String, MigrationGenerator>,
    pub package_group: Vec<PackageGroupMember>,
}

impl MigrationManifest {
    pub fn empty(version: Version) -> Self {
        Self {
            version,
            package_json_updates: IndexMap::new(),
            generators: IndexMap::new(),
            package_group: Vec::new(),
        }
    }
}

/// A planned version bump for one package.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedUpdate {
    pub version: VersionSpec,
    pub add_to_package_json: AddToPackageJson,
}

/// One executable migration in the persisted list, ordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Migration {
    pub package: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implementation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cli: Option<String>,
}

impl Migration {
    pub fn runs_through_nx(&self) -> bool {
        match self.cli.as_deref() {
            None | Some("nx") => true,
            Some(_) => false,
        }
    }
}

/// On-disk shape of `migrations.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationsFile {
    pub migrations: Vec<Migration>,
}
