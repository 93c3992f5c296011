#[path = "fakes.rs"]
mod fakes;

use std::collections::BTreeSet;
use std::path::PathBuf;

use fakes::{FakeBuildDriver, FakeCloneDriver};
use scaffold::args::NormalizedArgs;
use scaffold::clone::CloneDriver;
use scaffold::config::{EngineConfig, EngineInvocation};
use scaffold::installdb::InstallDb;
use scaffold::model::{
    BuildParams, CloneSpec, ConfigName, InstalledConfigDescriptor, PackageName, PackageRequest,
    ResolverWorkspace, UpdatePolicy,
};
use scaffold::plan_executor::PlanExecutor;
use scaffold::resolver::Resolver;

fn engine_config(binary_dir: PathBuf) -> EngineConfig {
    let invocation = EngineInvocation {
        source_dir: binary_dir.clone(),
        binary_dir: binary_dir.clone(),
        configs: vec![ConfigName::new("Debug")],
        build_tool_args: Vec::new(),
        dependency_script: None,
        update_policy: UpdatePolicy::Off,
        force_build: false,
        clear_downloaded_includes: false,
        single_build_dir: false,
        deps_dir_override: None,
        deps_build_dir_override: None,
        deps_install_dir_override: None,
        verbose: false,
    };
    EngineConfig::from_invocation(&invocation)
}

fn request(name: &str, revision: &str) -> PackageRequest {
    let mut configs = BTreeSet::new();
    configs.insert(ConfigName::new("Debug"));
    PackageRequest {
        name: PackageName::new(name).unwrap(),
        clone: CloneSpec { repo_url: "https://example.invalid/foo.git".into(), revision: revision.into() },
        build: BuildParams { subdirectory: None, build_args: NormalizedArgs::empty(), configs },
        depends: BTreeSet::new(),
        revision_override: false,
        shallow_clone: false,
        name_only: false,
        define_only: false,
        depends_from_script: false,
    }
}

/// S1 — initial build: empty workspace, one request, expect it queued.
#[test]
fn s1_initial_build_queues_the_package() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;
    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);

    resolver.run(vec![request("foo", "v1")], &mut workspace).unwrap();

    assert_eq!(workspace.build_order.len(), 1);
    assert_eq!(workspace.build_order[0].as_str(), "foo");
}

/// S2 — no-op rerun: after a full resolve+build, resolving again with the
/// same request yields an empty build order.
#[test]
fn s2_rerun_after_successful_build_is_a_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;

    {
        let resolver = Resolver::new(&config, &clone_driver, &build_driver);
        let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);
        resolver.run(vec![request("foo", "v1")], &mut workspace).unwrap();
        assert_eq!(workspace.build_order.len(), 1);
        let executor = PlanExecutor::new(&config, &build_driver);
        executor.execute(&workspace).unwrap();
    }

    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace2 = ResolverWorkspace::new(UpdatePolicy::Off, false, false);
    resolver.run(vec![request("foo", "v1")], &mut workspace2).unwrap();

    assert!(workspace2.build_order.is_empty(), "expected no-op rerun, got {:?}", workspace2.build_order);
}

/// S3 — build-arg change after an install forces a rebuild: adding
/// `-DFOO=BAR` where nothing named FOO was previously applied still counts
/// as a difference (a brand-new cache variable needs reconfiguring too).
#[test]
fn s3_build_arg_change_forces_rebuild() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;

    {
        let resolver = Resolver::new(&config, &clone_driver, &build_driver);
        let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);
        resolver.run(vec![request("foo", "v1")], &mut workspace).unwrap();
        let executor = PlanExecutor::new(&config, &build_driver);
        executor.execute(&workspace).unwrap();
    }

    let mut changed = request("foo", "v1");
    changed.build.build_args = NormalizedArgs::normalize(&["-DFOO=BAR".to_string()], tmp.path()).unwrap();

    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace2 = ResolverWorkspace::new(UpdatePolicy::Off, false, false);
    resolver.run(vec![changed], &mut workspace2).unwrap();

    assert_eq!(workspace2.build_order.len(), 1);
}

/// S4 — dependency propagation: bar depends on foo; when foo needs its
/// initial build, bar is queued too with reason "dependency rebuilt", even
/// though bar itself would otherwise also just be an initial build.
#[test]
fn s4_dependency_rebuild_propagates() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;
    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);

    let foo = request("foo", "v1");
    let mut bar = request("bar", "v1");
    bar.depends.insert(PackageName::new("foo").unwrap());

    resolver.run(vec![foo, bar], &mut workspace).unwrap();

    assert_eq!(workspace.build_order.len(), 2);
    assert_eq!(workspace.build_order[0].as_str(), "foo");
    assert_eq!(workspace.build_order[1].as_str(), "bar");
    let bar_state = &workspace.pkg_map[&PackageName::new("bar").unwrap()];
    let bar_debug = &bar_state.per_config[&ConfigName::new("Debug")];
    assert!(bar_debug.build_reasons.iter().any(|r| r.contains("dependency rebuilt")));
}

/// S5 — revision override conflict: two top-level requests for the same
/// package, both claiming an authoritative revision override with
/// different values, is a fatal conflict rather than a silent pick.
#[test]
fn s5_conflicting_revision_overrides_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;
    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);

    let mut a = request("foo", "A");
    a.revision_override = true;
    let mut b = request("foo", "B");
    b.revision_override = true;

    let result = resolver.run(vec![a, b], &mut workspace);
    assert!(result.is_err());
}

/// S6 — prefix-path takeover: foo is not cloned but is already installed
/// on a prefix path for a superset of the requested configs. The engine
/// accepts the installed state rather than cloning or rebuilding.
#[test]
fn s6_prefix_path_takeover_needs_no_build() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;

    let injected = vec![
        format!("-DCMAKE_INSTALL_PREFIX={}", config.deps_install_dir.display()),
        format!("-DCMAKE_PREFIX_PATH={}", config.deps_install_dir.display()),
        format!(
            "-DCMAKE_MODULE_PATH={}",
            config.deps_install_dir.join("_cmakex").join("hijack").display()
        ),
    ];
    let args = NormalizedArgs::normalize(&injected, &config.cwd).unwrap();
    let install_db = InstallDb::new(&config.deps_install_dir);
    let hijack_modules = vec![config.deps_install_dir.join("_cmakex").join("hijack").join("FindFoo.cmake")];
    for cfg in ["Debug", "Release"] {
        install_db
            .record(&InstalledConfigDescriptor {
                package: PackageName::new("foo").unwrap(),
                config: ConfigName::new(cfg),
                clone: CloneSpec { repo_url: String::new(), revision: "v1".into() },
                subdirectory: None,
                final_build_args: args.clone(),
                dependency_fingerprints: Default::default(),
                hijack_modules: hijack_modules.clone(),
            })
            .unwrap();
    }

    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);
    let mut default_configs = BTreeSet::new();
    default_configs.insert(ConfigName::new("Debug"));
    resolver
        .run(vec![PackageRequest::name_only(PackageName::new("foo").unwrap(), default_configs)], &mut workspace)
        .unwrap();

    assert!(workspace.build_order.is_empty());
    let state = &workspace.pkg_map[&PackageName::new("foo").unwrap()];
    assert_eq!(state.found_on_prefix_path, Some(config.deps_install_dir.clone()));
    let debug_state = &state.per_config[&ConfigName::new("Debug")];
    assert_eq!(debug_state.emitted_hijack_modules, hijack_modules);
}

/// Property 3 / cycle detection: a self-referential dependency chain fails
/// with DependencyCycle rather than looping forever.
#[test]
fn cycle_detection_fails_fast() {
    let tmp = tempfile::tempdir().unwrap();
    let config = engine_config(tmp.path().to_path_buf());
    let clone_driver = FakeCloneDriver::new();
    let build_driver = FakeBuildDriver;
    let resolver = Resolver::new(&config, &clone_driver, &build_driver);
    let mut workspace = ResolverWorkspace::new(UpdatePolicy::Off, false, false);

    let mut a = request("a", "v1");
    a.depends.insert(PackageName::new("b").unwrap());
    a.depends_from_script = true;
    let mut b = request("b", "v1");
    b.depends.insert(PackageName::new("a").unwrap());
    b.depends_from_script = true;

    // Pre-clone both so the resolver tries to walk declared deps instead
    // of erroring for lack of a dependency script.
    clone_driver.clone(&config.deps_dir.join("a"), &a.clone, false).unwrap();
    clone_driver.clone(&config.deps_dir.join("b"), &b.clone, false).unwrap();

    let result = resolver.run(vec![a, b], &mut workspace);
    assert!(result.is_err());
}
