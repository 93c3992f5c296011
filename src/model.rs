use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::args::NormalizedArgs;

const PACKAGE_NAME_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9_.-]*$";

/// Opaque non-empty identity key for a package. Construction rejects the
/// empty string so every other component can treat `PackageName` as already
/// validated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageName(String);

impl PackageName {
    pub fn new(name: impl Into<String>) -> crate::error::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(crate::error::ScaffoldError::UserInput(
                "package name must not be empty".into(),
            ));
        }
        let pattern = Regex::new(PACKAGE_NAME_PATTERN).expect("static pattern is valid");
        if !pattern.is_match(&name) {
            return Err(crate::error::ScaffoldError::UserInput(format!(
                "package name {name:?} must start with an alphanumeric and contain only letters, digits, '.', '_', or '-'"
            )));
        }
        Ok(PackageName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PackageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A build-configuration label. The literal token "NoConfig" (any case)
/// normalizes to the empty label, which means "single-config build".
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigName(String);

impl ConfigName {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref();
        if raw.eq_ignore_ascii_case("noconfig") {
            ConfigName(String::new())
        } else {
            ConfigName(raw.to_string())
        }
    }

    pub fn is_no_config(&self) -> bool {
        self.0.is_empty()
    }

    /// Rendering used in log messages.
    pub fn as_label(&self) -> &str {
        &self.0
    }

    /// Rendering used in on-disk directory/file names, where the empty
    /// label would collide with "no subdirectory at all".
    pub fn as_dir_name(&self) -> String {
        if self.0.is_empty() {
            "NoConfig".to_string()
        } else {
            self.0.clone()
        }
    }
}

impl std::fmt::Display for ConfigName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_dir_name())
    }
}

/// `{ repo_url, revision }`. `revision` empty means "don't care"; otherwise
/// a branch, a tag, or a SHA-shaped hex string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneSpec {
    pub repo_url: String,
    pub revision: String,
}

impl CloneSpec {
    pub fn is_sha_shaped(s: &str) -> bool {
        s.len() >= 7 && s.len() <= 40 && s.chars().all(|c| c.is_ascii_hexdigit())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildParams {
    pub subdirectory: Option<PathBuf>,
    pub build_args: NormalizedArgs,
    pub configs: BTreeSet<ConfigName>,
}

impl BuildParams {
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.configs.is_empty() {
            return Err(crate::error::ScaffoldError::UserInput(
                "configs set must be non-empty (invariant 4)".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRequest {
    pub name: PackageName,
    pub clone: CloneSpec,
    pub build: BuildParams,
    pub depends: BTreeSet<PackageName>,
    pub revision_override: bool,
    pub shallow_clone: bool,
    pub name_only: bool,
    pub define_only: bool,
    /// True when `depends` came from an executed dependency script rather
    /// than from a command-line/definition request; authoritative per §4.6.
    pub depends_from_script: bool,
}

impl PackageRequest {
    /// A request naming only a package, with no clone/build constraints.
    /// Valid only if the package is defined elsewhere or discovered on a
    /// prefix path.
    pub fn name_only(name: PackageName, default_configs: BTreeSet<ConfigName>) -> Self {
        PackageRequest {
            name,
            clone: CloneSpec { repo_url: String::new(), revision: String::new() },
            build: BuildParams {
                subdirectory: None,
                build_args: NormalizedArgs::empty(),
                configs: default_configs,
            },
            depends: BTreeSet::new(),
            revision_override: false,
            shallow_clone: false,
            name_only: true,
            define_only: false,
            depends_from_script: false,
        }
    }
}

/// Persisted by the install database, one per (package, config).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledConfigDescriptor {
    pub package: PackageName,
    pub config: ConfigName,
    /// Clone spec with `revision` resolved to a SHA (invariant 5).
    pub clone: CloneSpec,
    pub subdirectory: Option<PathBuf>,
    pub final_build_args: NormalizedArgs,
    pub dependency_fingerprints: BTreeMap<PackageName, BTreeMap<ConfigName, String>>,
    /// Shim/hijack-module files the install step wrote, recorded so a later
    /// satisfied (no-rebuild) resolve can still emit them for find-module
    /// shadowing.
    pub hijack_modules: Vec<PathBuf>,
}

impl InstalledConfigDescriptor {
    /// Stable digest of the whole record, used as the dependency fingerprint
    /// a dependent package's descriptor stores for this one.
    pub fn hash(&self) -> String {
        let canonical = serde_json::to_vec(self).expect("descriptor is always serializable");
        let mut hasher = Sha256::new();
        hasher.update(&canonical);
        format!("{:x}", hasher.finalize())
    }
}

/// All configs installed for one package. The engine requires every config
/// of one package to share clone, subdirectory, and dependency set; any
/// divergence is a warning, not a hard failure (see `InstalledPackage::check_consistency`).
#[derive(Debug, Clone, Default)]
pub struct InstalledPackage {
    pub configs: BTreeMap<ConfigName, InstalledConfigDescriptor>,
}

impl InstalledPackage {
    /// Returns a warning message if configs diverge; `None` if consistent.
    pub fn check_consistency(&self) -> Option<String> {
        let mut iter = self.configs.values();
        let first = iter.next()?;
        for other in iter {
            if other.clone != first.clone || other.subdirectory != first.subdirectory {
                return Some(format!(
                    "package {} has divergent clone/subdirectory across installed configs ({} vs {})",
                    first.package, first.config, other.config
                ));
            }
            let first_deps: BTreeSet<_> = first.dependency_fingerprints.keys().collect();
            let other_deps: BTreeSet<_> = other.dependency_fingerprints.keys().collect();
            if first_deps != other_deps {
                return Some(format!(
                    "package {} has divergent dependency sets across installed configs ({} vs {})",
                    first.package, first.config, other.config
                ));
            }
        }
        None
    }
}

#[derive(Debug, Clone, Default)]
pub struct PerConfigState {
    pub tentative_final_args: Option<NormalizedArgs>,
    pub build_reasons: Vec<String>,
    /// Hijack modules surfaced this resolve, either freshly installed or
    /// read off an installed descriptor that needed no rebuild.
    pub emitted_hijack_modules: Vec<PathBuf>,
}

/// In-memory, per-resolution-pass state for one package.
#[derive(Debug, Clone)]
pub struct PackageState {
    pub request: PackageRequest,
    pub found_on_prefix_path: Option<PathBuf>,
    pub cloned_sha: Option<String>,
    pub just_cloned: bool,
    pub per_config: BTreeMap<ConfigName, PerConfigState>,
    pub dependencies_from_script: bool,
    pub building_now: bool,
    pub resolved_revision: Option<String>,
}

impl PackageState {
    pub fn new(request: PackageRequest) -> Self {
        let per_config = request
            .build
            .configs
            .iter()
            .cloned()
            .map(|c| (c, PerConfigState::default()))
            .collect();
        PackageState {
            request,
            found_on_prefix_path: None,
            cloned_sha: None,
            just_cloned: false,
            per_config,
            dependencies_from_script: false,
            building_now: false,
            resolved_revision: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePolicy {
    Off,
    IfClean,
    IfVeryClean,
    AllClean,
    AllVeryClean,
    Force,
}

impl UpdatePolicy {
    pub fn parse(token: &str) -> crate::error::Result<Self> {
        match token {
            "off" => Ok(UpdatePolicy::Off),
            "if_clean" => Ok(UpdatePolicy::IfClean),
            "if_very_clean" => Ok(UpdatePolicy::IfVeryClean),
            "all_clean" => Ok(UpdatePolicy::AllClean),
            "all_very_clean" => Ok(UpdatePolicy::AllVeryClean),
            "force" => Ok(UpdatePolicy::Force),
            other => Err(crate::error::ScaffoldError::UserInput(format!(
                "unknown update policy: {other}"
            ))),
        }
    }

    pub fn allows_branch_switch(self) -> bool {
        matches!(
            self,
            UpdatePolicy::IfClean | UpdatePolicy::AllClean | UpdatePolicy::Force
        )
    }

    pub fn is_all(self) -> bool {
        matches!(
            self,
            UpdatePolicy::AllClean | UpdatePolicy::AllVeryClean | UpdatePolicy::Force
        )
    }
}

/// `def_map`/`pkg_map`/`pending`/`build_order`/`requester_stack` plus the
/// run-wide flags. Owns the whole resolution pass (invariants 1-2 enforced
/// by the resolver, not by this struct's accessors).
#[derive(Debug, Default)]
pub struct ResolverWorkspace {
    pub def_map: BTreeMap<PackageName, PackageRequest>,
    pub pkg_map: BTreeMap<PackageName, PackageState>,
    pub pending: BTreeSet<PackageName>,
    pub build_order: Vec<PackageName>,
    pub requester_stack: Vec<PackageName>,
    pub update_policy: Option<UpdatePolicy>,
    pub force_build: bool,
    pub clear_downloaded_includes: bool,
}

impl ResolverWorkspace {
    pub fn new(update_policy: UpdatePolicy, force_build: bool, clear_downloaded_includes: bool) -> Self {
        ResolverWorkspace {
            update_policy: Some(update_policy),
            force_build,
            clear_downloaded_includes,
            ..Default::default()
        }
    }

    /// Snapshot used by the bounded two-attempt resolver retry (spec §9):
    /// cheap clone of the maps needed to roll back a failed first attempt.
    pub fn snapshot(&self) -> ResolverSnapshot {
        ResolverSnapshot {
            pkg_map: self.pkg_map.clone(),
            build_order: self.build_order.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: ResolverSnapshot) {
        self.pkg_map = snapshot.pkg_map;
        self.build_order = snapshot.build_order;
    }

    pub fn push_build_order(&mut self, name: PackageName) {
        if !self.build_order.contains(&name) {
            self.build_order.push(name);
        }
    }
}

impl Clone for PackageState {
    fn clone(&self) -> Self {
        PackageState {
            request: self.request.clone(),
            found_on_prefix_path: self.found_on_prefix_path.clone(),
            cloned_sha: self.cloned_sha.clone(),
            just_cloned: self.just_cloned,
            per_config: self.per_config.clone(),
            dependencies_from_script: self.dependencies_from_script,
            building_now: self.building_now,
            resolved_revision: self.resolved_revision.clone(),
        }
    }
}

pub struct ResolverSnapshot {
    pkg_map: BTreeMap<PackageName, PackageState>,
    build_order: Vec<PackageName>,
}
