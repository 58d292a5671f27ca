use std::fmt;

use semver::{Prerelease, Version, VersionReq};
use serde::{Deserialize, Serialize};

pub const LATEST_TAG: &str = "latest";
pub const NEXT_TAG: &str = "next";

/// A requested version: one of the distinguished distribution tags, or a
/// concrete semver triple. Tags never compare numerically with triples;
/// callers branch on tag-ness before comparing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VersionSpec {
    Latest,
    Next,
    Exact(Version),
}

impl VersionSpec {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            LATEST_TAG => Self::Latest,
            NEXT_TAG => Self::Next,
            other => Self::Exact(normalize_version(other)),
        }
    }

    pub fn is_tag(&self) -> bool {
        !matches!(self, Self::Exact(_))
    }

    pub fn as_exact(&self) -> Option<&Version> {
        match self {
            Self::Exact(version) => Some(version),
            _ => None,
        }
    }

    /// Normalized form used when a tag ends up in a numeric comparison:
    /// tags collapse to `0.0.0`, matching `normalize_version` on arbitrary
    /// unrecognizable input.
    pub fn comparable(&self) -> Version {
        match self {
            Self::Exact(version) => version.clone(),
            _ => Version::new(0, 0, 0),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => f.write_str(LATEST_TAG),
            Self::Next => f.write_str(NEXT_TAG),
            Self::Exact(version) => write!(f, "{version}"),
        }
    }
}

impl From<String> for VersionSpec {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<VersionSpec> for String {
    fn from(spec: VersionSpec) -> Self {
        spec.to_string()
    }
}

/// Canonicalizes an arbitrary version string into a comparable triple.
///
/// The input is split at the first `-` into a semver part and a pre-release
/// part, missing `major.minor.patch` components default to `0`, and the
/// first of `{full, semver-only, x.y.0, x.0.0}` that parses as a version
/// strictly greater than `0.0.0` wins. Unrecognizable input collapses to
/// `0.0.0`; this function never fails.
pub fn normalize_version(version: &str) -> Version {
    let trimmed = version.trim();
    let (semver_part, prerelease) = match trimmed.split_once('-') {
        Some((semver_part, prerelease)) => (semver_part, Some(prerelease)),
        None => (trimmed, None),
    };

    let mut components = semver_part.splitn(3, '.');
    let major = component_or_zero(components.next());
    let minor = component_or_zero(components.next());
    let patch = component_or_zero(components.next());

    let plain = format!("{major}.{minor}.{patch}");
    let full = match prerelease {
        Some(prerelease) if !prerelease.is_empty() => format!("{plain}-{prerelease}"),
        _ => plain.clone(),
    };
    let without_patch = format!("{major}.{minor}.0");
    let without_patch_and_minor = format!("{major}.0.0");

    let zero = Version::new(0, 0, 0);
    for candidate in [full, plain, without_patch, without_patch_and_minor] {
        if let Ok(parsed) = Version::parse(&candidate) {
            if parsed > zero {
                return parsed;
            }
        }
    }
    zero
}

fn component_or_zero(component: Option<&str>) -> &str {
    match component {
        Some(component) if !component.is_empty() => component,
        _ => "0",
    }
}

/// Tag values pass through unchanged; everything else goes through
/// `normalize_version`.
pub fn normalize_version_with_tag_check(version: &str) -> VersionSpec {
    VersionSpec::parse(version)
}

pub fn gt(left: &str, right: &str) -> bool {
    normalize_version(left) > normalize_version(right)
}

pub fn lte(left: &str, right: &str) -> bool {
    normalize_version(left) <= normalize_version(right)
}

/// Canonical semver form of the input, coercing through
/// `normalize_version` when it is not already a clean triple.
pub fn clean_semver(version: &str) -> Version {
    let trimmed = version.trim().trim_start_matches(['=', 'v']);
    match Version::parse(trimmed) {
        Ok(parsed) => parsed,
        Err(_) => normalize_version(version),
    }
}

/// Range satisfaction with pre-release versions included: a pre-release
/// that fails the plain match is re-tested with its pre-release
/// identifiers cleared, so `2.1.0-beta.1` counts as a candidate for
/// `>=2.0.0` the way migration ranges expect.
pub fn satisfies(version: &Version, range: &VersionReq) -> bool {
    if range.matches(version) {
        return true;
    }
    if version.pre.is_empty() {
        return false;
    }

    let mut released = version.clone();
    released.pre = Prerelease::EMPTY;
    released.build = semver::BuildMetadata::EMPTY;
    range.matches(&released)
}

/// Parses a requirement string, tolerating the space-separated comparator
/// lists migration manifests use (`">=13.0.0 <14.0.0"`).
pub fn parse_range(range: &str) -> anyhow::Result<VersionReq> {
    let trimmed = range.trim();
    if let Ok(parsed) = VersionReq::parse(trimmed) {
        return Ok(parsed);
    }

    let comma_joined = trimmed.split_whitespace().collect::<Vec<_>>().join(", ");
    VersionReq::parse(&comma_joined)
        .map_err(|err| anyhow::anyhow!("invalid version range '{range}': {err}"))
}
