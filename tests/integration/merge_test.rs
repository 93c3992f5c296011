use std::collections::BTreeSet;
use std::path::Path;

use scaffold::args::NormalizedArgs;
use scaffold::merge::merge;
use scaffold::model::{BuildParams, CloneSpec, ConfigName, PackageName, PackageRequest};

fn request(name: &str, configs: &[&str]) -> PackageRequest {
    let configs = configs.iter().map(|c| ConfigName::new(*c)).collect::<BTreeSet<_>>();
    PackageRequest {
        name: PackageName::new(name).unwrap(),
        clone: CloneSpec { repo_url: "https://example.invalid/foo.git".into(), revision: "v1".into() },
        build: BuildParams { subdirectory: None, build_args: NormalizedArgs::empty(), configs },
        depends: BTreeSet::new(),
        revision_override: false,
        shallow_clone: false,
        name_only: false,
        define_only: false,
        depends_from_script: false,
    }
}

/// Open Question 1's resolution: when the existing request came from a
/// prefix-path hit, the installed config set wins over a differing request,
/// with only a warning — not an error.
#[test]
fn prefix_path_config_divergence_keeps_installed_configs() {
    let installed = request("foo", &["Debug", "Release"]);
    let requested = request("foo", &["Debug"]);

    let merged = merge(&installed, &requested, Path::new("/w"), true).unwrap();

    let mut expected = BTreeSet::new();
    expected.insert(ConfigName::new("Debug"));
    expected.insert(ConfigName::new("Release"));
    assert_eq!(merged.build.configs, expected);
}

/// Outside the prefix-path case, differing config sets are a hard conflict.
#[test]
fn non_prefix_path_config_divergence_is_an_error() {
    let a = request("foo", &["Debug"]);
    let b = request("foo", &["Release"]);
    assert!(merge(&a, &b, Path::new("/w"), false).is_err());
}

/// A dependency script's declared depends list is authoritative over a
/// manually-specified one, regardless of merge order.
#[test]
fn script_declared_depends_wins_over_manual() {
    let mut scripted = request("foo", &["Debug"]);
    scripted.depends_from_script = true;
    scripted.depends.insert(PackageName::new("bar").unwrap());

    let mut manual = request("foo", &["Debug"]);
    manual.depends.insert(PackageName::new("baz").unwrap());

    let merged = merge(&scripted, &manual, Path::new("/w"), false).unwrap();
    assert!(merged.depends.contains(&PackageName::new("bar").unwrap()));
    assert!(!merged.depends.contains(&PackageName::new("baz").unwrap()));
}

/// Two manually-specified, non-script depends lists that actually disagree
/// are a conflict.
#[test]
fn two_manual_depends_lists_that_differ_conflict() {
    let mut a = request("foo", &["Debug"]);
    a.depends.insert(PackageName::new("bar").unwrap());
    let mut b = request("foo", &["Debug"]);
    b.depends.insert(PackageName::new("baz").unwrap());

    assert!(merge(&a, &b, Path::new("/w"), false).is_err());
}

/// Incompatible build args (same key, different value) across two requests
/// for the same package is a workspace conflict.
#[test]
fn incompatible_build_args_conflict() {
    let mut a = request("foo", &["Debug"]);
    a.build.build_args = NormalizedArgs::normalize(&["-DFOO=1".to_string()], Path::new("/w")).unwrap();
    let mut b = request("foo", &["Debug"]);
    b.build.build_args = NormalizedArgs::normalize(&["-DFOO=2".to_string()], Path::new("/w")).unwrap();

    assert!(merge(&a, &b, Path::new("/w"), false).is_err());
}

/// Compatible (disjoint) build args across two requests merge into the
/// union.
#[test]
fn disjoint_build_args_merge_into_union() {
    let mut a = request("foo", &["Debug"]);
    a.build.build_args = NormalizedArgs::normalize(&["-DFOO=1".to_string()], Path::new("/w")).unwrap();
    let mut b = request("foo", &["Debug"]);
    b.build.build_args = NormalizedArgs::normalize(&["-DBAR=2".to_string()], Path::new("/w")).unwrap();

    let merged = merge(&a, &b, Path::new("/w"), false).unwrap();
    assert_eq!(merged.build.build_args.get("FOO").unwrap().value, "1");
    assert_eq!(merged.build.build_args.get("BAR").unwrap().value, "2");
}
