//! The recursive resolver (C7) — the core algorithm. For each package:
//! evaluate install status, decide whether to clone/update, recurse into
//! its declared dependencies, compute the build reason (if any), append to
//! the build plan.

pub mod reasons;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::args::NormalizedArgs;
use crate::build_driver::BuildDriver;
use crate::cache_tracker::CacheTracker;
use crate::clone::{CloneDriver, CloneStatus};
use crate::config::EngineConfig;
use crate::dep_script;
use crate::error::{Result, ScaffoldError};
use crate::installdb::{InstallDb, Status};
use crate::merge;
use crate::model::{
    ConfigName, InstalledConfigDescriptor, PackageName, PackageRequest, PackageState,
    ResolverWorkspace, UpdatePolicy,
};
use reasons::{compute_build_reasons, BuildReason};

/// Result of resolving one package: the set of packages touched, and
/// whether any of them is now marked `building_now`.
pub struct ResolveOutcome {
    pub pkgs_encountered: BTreeSet<PackageName>,
    pub building_some_pkg: bool,
}

pub struct Resolver<'a> {
    pub config: &'a EngineConfig,
    pub install_db: InstallDb,
    pub clone_driver: &'a dyn CloneDriver,
    pub build_driver: &'a dyn BuildDriver,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a EngineConfig, clone_driver: &'a dyn CloneDriver, build_driver: &'a dyn BuildDriver) -> Self {
        Resolver {
            config,
            install_db: InstallDb::new(&config.deps_install_dir),
            clone_driver,
            build_driver,
        }
    }

    fn clone_dir(&self, pkg: &PackageName) -> PathBuf {
        self.config.deps_dir.join(pkg.as_str())
    }

    fn build_dir(&self, pkg: &PackageName, cfg: &ConfigName) -> PathBuf {
        if self.config.single_build_dir {
            self.config.deps_build_dir.join(pkg.as_str())
        } else {
            self.config.deps_build_dir.join(pkg.as_str()).join(cfg.as_dir_name())
        }
    }

    /// Entry point: register every top-level request, then resolve each.
    pub fn run(&self, requests: Vec<PackageRequest>, workspace: &mut ResolverWorkspace) -> Result<()> {
        for req in requests {
            self.define(req, workspace)?;
        }
        let names: Vec<PackageName> = workspace.def_map.keys().cloned().collect();
        for name in names {
            self.resolve(&name, workspace)?;
        }
        Ok(())
    }

    /// Merges a request into `def_map`, per §4.6.
    fn define(&self, req: PackageRequest, workspace: &mut ResolverWorkspace) -> Result<()> {
        match workspace.def_map.get(&req.name).cloned() {
            None => {
                workspace.def_map.insert(req.name.clone(), req);
            }
            Some(existing) => {
                let from_prefix = workspace
                    .pkg_map
                    .get(&req.name)
                    .map(|s| s.found_on_prefix_path.is_some())
                    .unwrap_or(false);
                let merged = merge::merge(&existing, &req, &self.config.cwd, from_prefix)?;
                workspace.def_map.insert(merged.name.clone(), merged);
            }
        }
        Ok(())
    }

    pub fn resolve(&self, pkg: &PackageName, workspace: &mut ResolverWorkspace) -> Result<ResolveOutcome> {
        if workspace.requester_stack.contains(pkg) {
            let mut chain: Vec<String> = workspace.requester_stack.iter().map(|p| p.to_string()).collect();
            chain.push(pkg.to_string());
            return Err(ScaffoldError::DependencyCycle(chain.join(" -> ")));
        }
        workspace.requester_stack.push(pkg.clone());
        let result = self.resolve_inner(pkg, workspace, 0);
        workspace.requester_stack.pop();
        result
    }

    fn resolve_inner(&self, pkg: &PackageName, workspace: &mut ResolverWorkspace, attempt: u32) -> Result<ResolveOutcome> {
        let request = workspace
            .def_map
            .get(pkg)
            .cloned()
            .ok_or_else(|| ScaffoldError::UserInput(format!("package {pkg} was never defined")))?;

        if !workspace.pkg_map.contains_key(pkg) {
            workspace.pkg_map.insert(pkg.clone(), PackageState::new(request.clone()));
        }

        // 1. Prefix-path probe.
        let (hit, installed_configs) = self
            .install_db
            .quick_check_on_prefix_paths(pkg, &self.config.prefix_paths)?;
        let mut effective_configs = request.build.configs.clone();
        if let Some(ref hit_path) = hit {
            let clone_dir = self.clone_dir(pkg);
            if matches!(self.clone_driver.clone_status(&clone_dir)?, CloneStatus::CleanAt(_) | CloneStatus::LocalChangesAt(_)) {
                return Err(ScaffoldError::state_inconsistency(
                    clone_dir,
                    format!("package {pkg} found both on prefix path {} and cloned locally", hit_path.display()),
                ));
            }
            if !request.build.configs.is_subset(&installed_configs.iter().cloned().collect()) {
                warn!("package {pkg} config set differs from its prefix-path install; installed set wins");
                effective_configs = installed_configs.into_iter().collect();
            }
            workspace.pkg_map.get_mut(pkg).unwrap().found_on_prefix_path = Some(hit_path.clone());
        }

        if request.name_only && hit.is_none() {
            return Err(ScaffoldError::UserInput(format!(
                "name-only request for {pkg} was never defined and not found on a prefix path"
            )));
        }

        // 2. Tentative final args per config, via the cache tracker.
        let mut per_config_args: BTreeMap<ConfigName, NormalizedArgs> = BTreeMap::new();
        for cfg in &effective_configs {
            let build_dir = self.build_dir(pkg, cfg);
            let mut tracker = CacheTracker::load(&build_dir)?;
            let mut injected = vec![
                format!("-DCMAKE_INSTALL_PREFIX={}", self.config.deps_install_dir.display()),
                format!("-DCMAKE_PREFIX_PATH={}", self.config.deps_install_dir.display()),
                format!(
                    "-DCMAKE_MODULE_PATH={}",
                    self.config.deps_install_dir.join("_cmakex").join("hijack").display()
                ),
            ];
            let mut all_args: Vec<String> = request
                .build
                .build_args
                .as_slice()
                .iter()
                .map(|a| match &a.type_ {
                    Some(t) => format!("{}{}:{}={}", a.switch, a.name, t, a.value),
                    None => format!("{}{}={}", a.switch, a.name, a.value),
                })
                .collect();
            all_args.append(&mut injected);
            let normalized = NormalizedArgs::normalize(&all_args, &self.config.cwd)?;
            tracker.add_pending(&normalized);
            per_config_args.insert(cfg.clone(), normalized);
        }

        // 3. Update-or-clone policy.
        if hit.is_none() {
            self.ensure_cloned_or_updated(pkg, &request, workspace)?;
        }

        // 4. Evaluate installed status.
        let dependency_names: Vec<PackageName> = request.depends.iter().cloned().collect();
        let evaluations = self.install_db.evaluate(pkg, request.build.subdirectory.as_deref(), &per_config_args, &dependency_names)?;

        // 5. Recurse into dependencies.
        let mut pkgs_encountered: BTreeSet<PackageName> = BTreeSet::from([pkg.clone()]);
        let mut any_dependency_rebuilt = false;
        let deps_to_recurse = self.dependencies_to_recurse(pkg, &request, &hit, &effective_configs)?;
        for dep_req in deps_to_recurse {
            let dep = dep_req.name.clone();
            self.define(dep_req, workspace)?;
            let outcome = self.resolve(&dep, workspace)?;
            pkgs_encountered.extend(outcome.pkgs_encountered);
            any_dependency_rebuilt |= outcome.building_some_pkg;
        }

        // 6. Determine build reasons per config.
        let clone_dir = self.clone_dir(pkg);
        let clone_status = if hit.is_some() {
            CloneStatus::Absent
        } else {
            self.clone_driver.clone_status(&clone_dir)?
        };
        let (cloned_sha, uncommitted) = match &clone_status {
            CloneStatus::CleanAt(sha) => (Some(sha.clone()), false),
            CloneStatus::LocalChangesAt(sha) => (Some(sha.clone()), true),
            CloneStatus::Absent => (None, false),
        };

        let mut building_any = false;
        for cfg in &effective_configs {
            let ev = evaluations.get(cfg).cloned().unwrap_or(crate::installdb::Evaluation {
                status: Status::NotInstalled,
                incompatible_args_local: Vec::new(),
                incompatible_args_any: Vec::new(),
            });
            let installed_desc = self.load_descriptor_for_reasons(pkg, cfg)?;
            let current_fps = self.current_dependency_fingerprints(&dependency_names, &effective_configs)?;
            let is_cloned = !matches!(clone_status, CloneStatus::Absent);
            let reasons = compute_build_reasons(
                &ev,
                any_dependency_rebuilt,
                uncommitted,
                cloned_sha.as_deref(),
                installed_desc.as_ref(),
                &dependency_names,
                &current_fps,
                workspace.force_build,
                is_cloned,
            );

            if !reasons.is_empty() {
                if !is_cloned && hit.is_none() && attempt < 1 {
                    // One retry permitted after cloning (bounded to 2 attempts),
                    // pinning to the previously installed SHA when known.
                    let known_sha = installed_desc.as_ref().map(|d| d.clone.revision.clone());
                    let snapshot = workspace.snapshot();
                    self.clone_for_build(pkg, &request, &known_sha, workspace)?;
                    match self.resolve_inner(pkg, workspace, attempt + 1) {
                        Ok(outcome) => return Ok(outcome),
                        Err(e) => {
                            workspace.restore(snapshot);
                            return Err(e);
                        }
                    }
                }
                building_any = true;
                let state = workspace.pkg_map.get_mut(pkg).unwrap();
                state.building_now = true;
                if let Some(per_cfg) = state.per_config.get_mut(cfg) {
                    per_cfg.tentative_final_args = per_config_args.get(cfg).cloned();
                    per_cfg.build_reasons = reasons.iter().map(|r| r.to_string()).collect();
                }
            } else if let Some(desc) = &installed_desc {
                if !desc.hijack_modules.is_empty() {
                    for module in &desc.hijack_modules {
                        info!("{pkg} [{cfg}]: emitting hijack module {}", module.display());
                    }
                }
                let state = workspace.pkg_map.get_mut(pkg).unwrap();
                if let Some(per_cfg) = state.per_config.get_mut(cfg) {
                    per_cfg.emitted_hijack_modules = desc.hijack_modules.clone();
                }
            }
        }

        if building_any {
            workspace.push_build_order(pkg.clone());
            info!("{pkg} queued for build");
        } else {
            info!("{pkg} satisfied, no build needed");
        }

        Ok(ResolveOutcome { pkgs_encountered, building_some_pkg: building_any })
    }

    fn ensure_cloned_or_updated(&self, pkg: &PackageName, request: &PackageRequest, workspace: &ResolverWorkspace) -> Result<()> {
        let dir = self.clone_dir(pkg);
        let status = self.clone_driver.clone_status(&dir)?;
        let policy = workspace.update_policy.unwrap_or(UpdatePolicy::Off);
        decide_clone_action(self.clone_driver, &dir, request, &status, policy)
    }

    fn clone_for_build(&self, pkg: &PackageName, request: &PackageRequest, known_sha: &Option<String>, workspace: &mut ResolverWorkspace) -> Result<()> {
        let dir = self.clone_dir(pkg);
        let mut spec = request.clone.clone();
        if spec.revision.is_empty() {
            if let Some(sha) = known_sha {
                spec.revision = sha.clone();
            }
        }
        self.clone_driver.clone(&dir, &spec, request.shallow_clone)?;
        if let Some(state) = workspace.pkg_map.get_mut(pkg) {
            state.just_cloned = true;
        }
        Ok(())
    }

    /// Either the cloned source's own dependency script (full requests, its
    /// clone/build parameters honored), `request.depends` (named only, to be
    /// resolved against whatever already defines or installs them), or, for
    /// prefix-only installs, the dependency names recorded on the installed
    /// descriptors.
    fn dependencies_to_recurse(
        &self,
        pkg: &PackageName,
        request: &PackageRequest,
        hit: &Option<PathBuf>,
        effective_configs: &BTreeSet<ConfigName>,
    ) -> Result<Vec<PackageRequest>> {
        let clone_dir = self.clone_dir(pkg);
        if matches!(self.clone_driver.clone_status(&clone_dir)?, CloneStatus::CleanAt(_) | CloneStatus::LocalChangesAt(_)) {
            let script_path = clone_dir.join("scaffold-deps.sh");
            if script_path.exists() {
                let output = std::fs::read_to_string(&script_path)?;
                return dep_script::parse_directives(&output, &self.config.cwd);
            }
            return Ok(request
                .depends
                .iter()
                .cloned()
                .map(|name| PackageRequest::name_only(name, effective_configs.clone()))
                .collect());
        }
        if hit.is_some() {
            let installed = self.install_db.try_get_installed_pkg_all_configs(pkg)?;
            let mut names: BTreeSet<PackageName> = BTreeSet::new();
            for desc in installed.configs.values() {
                names.extend(desc.dependency_fingerprints.keys().cloned());
            }
            return Ok(names
                .into_iter()
                .map(|name| PackageRequest::name_only(name, effective_configs.clone()))
                .collect());
        }
        if request.depends.is_empty() {
            return Ok(Vec::new());
        }
        Err(ScaffoldError::state_inconsistency(
            clone_dir,
            format!("cannot enumerate dependencies of {pkg}: neither cloned nor found on a prefix path"),
        ))
    }

    fn load_descriptor_for_reasons(&self, pkg: &PackageName, cfg: &ConfigName) -> Result<Option<InstalledConfigDescriptor>> {
        let installed = self.install_db.try_get_installed_pkg_all_configs(pkg)?;
        Ok(installed.configs.get(cfg).cloned())
    }

    /// Each dependency's own installed descriptor hash, per config — the same
    /// digest an installed descriptor records under `dependency_fingerprints`
    /// for whoever depends on it.
    fn current_dependency_fingerprints(&self, deps: &[PackageName], configs: &BTreeSet<ConfigName>) -> Result<BTreeMap<PackageName, String>> {
        let mut out = BTreeMap::new();
        for dep in deps {
            let installed = self.install_db.try_get_installed_pkg_all_configs(dep)?;
            for cfg in configs {
                if let Some(desc) = installed.configs.get(cfg) {
                    out.insert(dep.clone(), desc.hash());
                    break;
                }
            }
        }
        Ok(out)
    }
}

/// Implements the update state machine from §4.7.
pub fn decide_clone_action(
    clone_driver: &dyn CloneDriver,
    dir: &Path,
    request: &PackageRequest,
    status: &CloneStatus,
    policy: UpdatePolicy,
) -> Result<()> {
    match status {
        CloneStatus::Absent => {
            clone_driver.clone(dir, &request.clone, request.shallow_clone)?;
            Ok(())
        }
        CloneStatus::CleanAt(sha) => {
            let target_matches = request.clone.revision.is_empty() || *sha == request.clone.revision;
            if target_matches {
                return Ok(());
            }
            if policy.is_all() {
                clone_driver.fetch(dir)?;
                let target = if request.clone.revision.is_empty() { "HEAD".to_string() } else { request.clone.revision.clone() };
                match clone_driver.merge_ff_only(dir, &target) {
                    Ok(()) => Ok(()),
                    Err(_) if policy == UpdatePolicy::Force => {
                        clone_driver.reset_hard(dir, &target)
                    }
                    Err(e) => Err(e),
                }
            } else {
                Err(ScaffoldError::UpdateBlocked(format!(
                    "{} is at {sha}, requested revision differs, but update policy does not allow it",
                    dir.display()
                )))
            }
        }
        CloneStatus::LocalChangesAt(_) => match policy {
            UpdatePolicy::Force => {
                let target = if request.clone.revision.is_empty() { "HEAD".to_string() } else { request.clone.revision.clone() };
                clone_driver.reset_hard(dir, &target)
            }
            UpdatePolicy::IfClean | UpdatePolicy::AllClean => {
                warn!("{} has local changes; skipping update under {:?}", dir.display(), policy);
                if policy == UpdatePolicy::AllClean {
                    Err(ScaffoldError::UpdateBlocked(format!(
                        "{} has local changes and policy {:?} requires a clean tree",
                        dir.display(),
                        policy
                    )))
                } else {
                    Ok(())
                }
            }
            _ => {
                warn!("{} has local changes; skipping update under {:?}", dir.display(), policy);
                Ok(())
            }
        },
    }
}
