use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use semver::Version;
use upshift_core::version::{
    normalize_version, normalize_version_with_tag_check, VersionSpec, LATEST_TAG, NEXT_TAG,
};

const CANONICAL_PACKAGE: &str = "nx";
const LEGACY_PACKAGE: &str = "@nrwl/workspace";
pub const DEFAULT_MIGRATIONS_FILE: &str = "migrations.json";

/// Already-parsed flag values, before command selection.
#[derive(Debug, Clone, Default)]
pub struct RawMigrateOptions {
    pub package_and_version: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub interactive: bool,
    pub run_migrations: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MigrationsCommand {
    RunMigrations { file: String },
    GenerateMigrations(GenerateOptions),
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateOptions {
    pub target_package: String,
    pub target_version: VersionSpec,
    pub from: BTreeMap<String, Version>,
    pub to: BTreeMap<String, VersionSpec>,
    pub interactive: bool,
}

/// The presence of `run_migrations` selects runner mode; an empty value
/// means the default migrations file.
pub fn parse_migrations_options(raw: &RawMigrateOptions) -> Result<MigrationsCommand> {
    if let Some(file) = &raw.run_migrations {
        let file = if file.is_empty() {
            DEFAULT_MIGRATIONS_FILE
        } else {
            file.as_str()
        };
        return Ok(MigrationsCommand::RunMigrations {
            file: file.to_string(),
        });
    }

    let (target_package, target_version) =
        parse_target_package_and_version(raw.package_and_version.as_deref())?;
    let from = parse_package_version_list(raw.from.as_deref(), "from")?
        .into_iter()
        .map(|(package, version)| (package, normalize_version(&version)))
        .collect();
    let to = parse_package_version_list(raw.to.as_deref(), "to")?
        .into_iter()
        .map(|(package, version)| (package, VersionSpec::parse(&version)))
        .collect();

    Ok(MigrationsCommand::GenerateMigrations(GenerateOptions {
        target_package,
        target_version,
        from,
        to,
        interactive: raw.interactive,
    }))
}

fn parse_target_package_and_version(raw: Option<&str>) -> Result<(String, VersionSpec)> {
    let Some(raw) = raw.filter(|value| !value.is_empty()) else {
        return Err(anyhow!(
            "specify the migration target: 'package@version', a bare version, or a package name"
        ));
    };

    match raw.rfind('@') {
        // an `@` past index 0 separates package and version; index 0 is
        // just a scoped name
        Some(index) if index > 0 => {
            let package = normalize_slashes(&raw[..index]);
            let version = normalize_version_with_tag_check(&raw[index + 1..]);
            Ok((package, version))
        }
        _ => {
            if is_bare_version(raw) {
                let version = normalize_version_with_tag_check(raw);
                let package = if version.is_tag()
                    || version.comparable() >= normalize_version("14.0.0-beta.0")
                {
                    CANONICAL_PACKAGE
                } else {
                    LEGACY_PACKAGE
                };
                Ok((package.to_string(), version))
            } else {
                Ok((normalize_slashes(raw), VersionSpec::Latest))
            }
        }
    }
}

fn parse_package_version_list(
    raw: Option<&str>,
    parameter: &str,
) -> Result<Vec<(String, String)>> {
    let Some(raw) = raw.filter(|value| !value.trim().is_empty()) else {
        return Ok(Vec::new());
    };

    let mut pairs = Vec::new();
    for entry in raw.split(',') {
        let entry = entry.trim();
        match entry.rfind('@') {
            Some(index) if index > 0 => pairs.push((
                normalize_slashes(&entry[..index]),
                entry[index + 1..].to_string(),
            )),
            _ => {
                return Err(anyhow!(
                    "Incorrect '{parameter}' section. Use --{parameter}=\"package@version\""
                ));
            }
        }
    }
    Ok(pairs)
}

fn is_bare_version(raw: &str) -> bool {
    raw == LATEST_TAG || raw == NEXT_TAG || Version::parse(raw).is_ok() || is_numeric_shorthand(raw)
}

/// `N`, `N.N`, or `N.N.N`.
fn is_numeric_shorthand(raw: &str) -> bool {
    let parts: Vec<&str> = raw.split('.').collect();
    !raw.is_empty()
        && parts.len() <= 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.chars().all(|ch| ch.is_ascii_digit()))
}

fn normalize_slashes(name: &str) -> String {
    name.replace('\\', "/")
}
