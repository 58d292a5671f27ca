pub mod manifest;
pub mod package_json;
pub mod version;

pub use manifest::{
    AddToPackageJson, GroupVersion, Migration, MigrationGenerator, MigrationManifest,
    MigrationsDocument, MigrationsFile, PackageGroupMember, PackageJsonUpdateEntry, PackageUpdate,
    PlannedUpdate, RawPackageGroup,
};
pub use package_json::{
    apply_plan_to_package_json, read_module_package_json, read_package_json, MigrationsConfig,
    PackageJson,
};
pub use version::{
    clean_semver, gt, lte, normalize_version, normalize_version_with_tag_check, parse_range,
    satisfies, VersionSpec,
};
