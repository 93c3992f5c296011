use std::collections::BTreeMap;
use std::path::Path;

use scaffold::args::NormalizedArgs;
use scaffold::installdb::{InstallDb, Status};
use scaffold::model::{CloneSpec, ConfigName, InstalledConfigDescriptor, PackageName};

fn descriptor(pkg: &str, cfg: &str, args: NormalizedArgs) -> InstalledConfigDescriptor {
    InstalledConfigDescriptor {
        package: PackageName::new(pkg).unwrap(),
        config: ConfigName::new(cfg),
        clone: CloneSpec { repo_url: "https://example.invalid/foo.git".into(), revision: "abc1234".into() },
        subdirectory: None,
        final_build_args: args,
        dependency_fingerprints: BTreeMap::new(),
        hijack_modules: Vec::new(),
    }
}

/// quick_check_on_prefix_paths must error when the same package is found
/// installed under more than one prefix path (ambiguous install location).
#[test]
fn ambiguous_prefix_path_hit_is_state_inconsistency() {
    let tmp_a = tempfile::tempdir().unwrap();
    let tmp_b = tempfile::tempdir().unwrap();

    let args = NormalizedArgs::normalize(&["-DFOO=1".to_string()], Path::new("/w")).unwrap();
    let d = descriptor("foo", "Debug", args);
    InstallDb::new(tmp_a.path()).record(&d).unwrap();
    InstallDb::new(tmp_b.path()).record(&d).unwrap();

    let db = InstallDb::new(tmp_a.path());
    let result = db.quick_check_on_prefix_paths(
        &d.package,
        &[tmp_a.path().to_path_buf(), tmp_b.path().to_path_buf()],
    );
    assert!(result.is_err());
}

/// A package absent from every prefix path reports no hit, not an error.
#[test]
fn absent_from_all_prefix_paths_is_not_an_error() {
    let tmp_a = tempfile::tempdir().unwrap();
    let tmp_b = tempfile::tempdir().unwrap();
    let db = InstallDb::new(tmp_a.path());
    let name = PackageName::new("nowhere").unwrap();

    let (hit, configs) = db
        .quick_check_on_prefix_paths(&name, &[tmp_a.path().to_path_buf(), tmp_b.path().to_path_buf()])
        .unwrap();

    assert!(hit.is_none());
    assert!(configs.is_empty());
}

/// A subdirectory mismatch against the recorded descriptor is always a real
/// difference, even with identical build args.
#[test]
fn subdirectory_mismatch_is_different() {
    let tmp = tempfile::tempdir().unwrap();
    let db = InstallDb::new(tmp.path());
    let args = NormalizedArgs::normalize(&["-DFOO=1".to_string()], Path::new("/w")).unwrap();
    let mut d = descriptor("foo", "Debug", args.clone());
    d.subdirectory = Some(std::path::PathBuf::from("sub"));
    db.record(&d).unwrap();

    let mut per_config = BTreeMap::new();
    per_config.insert(ConfigName::new("Debug"), args);
    let ev = db.evaluate(&d.package, None, &per_config, &[]).unwrap();
    assert_eq!(ev[&ConfigName::new("Debug")].status, Status::Different);
}

/// A dependency present in the current request but missing from the
/// recorded descriptor's fingerprint map also counts as a real difference.
#[test]
fn missing_dependency_fingerprint_is_different() {
    let tmp = tempfile::tempdir().unwrap();
    let db = InstallDb::new(tmp.path());
    let args = NormalizedArgs::normalize(&["-DFOO=1".to_string()], Path::new("/w")).unwrap();
    let d = descriptor("foo", "Debug", args.clone());
    db.record(&d).unwrap();

    let mut per_config = BTreeMap::new();
    per_config.insert(ConfigName::new("Debug"), args);
    let dep = PackageName::new("bar").unwrap();
    let ev = db.evaluate(&d.package, None, &per_config, &[dep]).unwrap();
    assert_eq!(ev[&ConfigName::new("Debug")].status, Status::Different);
}

/// Records for unrelated packages never show up in another package's
/// lookup (directory-per-package isolation).
#[test]
fn unrelated_package_is_not_installed() {
    let tmp = tempfile::tempdir().unwrap();
    let db = InstallDb::new(tmp.path());
    let args = NormalizedArgs::normalize(&["-DFOO=1".to_string()], Path::new("/w")).unwrap();
    db.record(&descriptor("foo", "Debug", args.clone())).unwrap();

    let other = PackageName::new("bar").unwrap();
    let mut per_config = BTreeMap::new();
    per_config.insert(ConfigName::new("Debug"), args);
    let ev = db.evaluate(&other, None, &per_config, &[]).unwrap();
    assert_eq!(ev[&ConfigName::new("Debug")].status, Status::NotInstalled);
}
