use semver::Version;
use upshift_core::version::normalize_version;
use upshift_core::{GroupVersion, PackageGroupMember, VersionSpec};

/// First version published under the canonical package name; below it the
/// legacy workspace package ships without a usable group declaration.
pub(crate) fn package_rename_cutover() -> Version {
    normalize_version("14.0.0-beta.0")
}

/// Frozen backward-compatibility group for `@nrwl/workspace` targets below
/// the rename cutover, whose own migration metadata predates group
/// declarations.
pub(crate) fn legacy_nrwl_package_group() -> Vec<PackageGroupMember> {
    const FOLLOWERS: &[&str] = &[
        "@nrwl/workspace",
        "@nrwl/angular",
        "@nrwl/cypress",
        "@nrwl/cli",
        "@nrwl/devkit",
        "@nrwl/eslint-plugin-nx",
        "@nrwl/express",
        "@nrwl/jest",
        "@nrwl/js",
        "@nrwl/linter",
        "@nrwl/nest",
        "@nrwl/next",
        "@nrwl/node",
        "@nrwl/nx-plugin",
        "@nrwl/react",
        "@nrwl/storybook",
        "@nrwl/web",
        "@nrwl/react-native",
        "@nrwl/detox",
        "@nrwl/expo",
    ];

    let mut members: Vec<PackageGroupMember> = FOLLOWERS
        .iter()
        .map(|package| PackageGroupMember::follow(*package))
        .collect();
    members.push(PackageGroupMember {
        package: "@nrwl/nx-cloud".to_string(),
        version: GroupVersion::Pinned(VersionSpec::Latest),
    });
    members
}

#[cfg(test)]
mod tests {
    use super::{legacy_nrwl_package_group, package_rename_cutover};
    use semver::Version;
    use upshift_core::{GroupVersion, VersionSpec};

    #[test]
    fn cutover_sits_below_the_stable_release() {
        assert!(package_rename_cutover() < Version::new(14, 0, 0));
        assert!(Version::parse("13.10.6").expect("must parse") < package_rename_cutover());
    }

    #[test]
    fn legacy_group_pins_only_the_cloud_package() {
        let members = legacy_nrwl_package_group();
        assert_eq!(members[0].package, "@nrwl/workspace");
        let cloud = members
            .iter()
            .find(|member| member.package == "@nrwl/nx-cloud")
            .expect("cloud member must exist");
        assert_eq!(
            cloud.version,
            GroupVersion::Pinned(VersionSpec::Latest)
        );
        assert!(members
            .iter()
            .filter(|member| member.package != "@nrwl/nx-cloud")
            .all(|member| member.version == GroupVersion::Follow));
    }
}
