//! Persists, per installed (package, config), the descriptor used to build
//! it, and answers "is the current request satisfied?".
//!
//! On-disk layout: `<deps-install>/_cmakex/pkg_db/<PackageName>/<ConfigName>.desc`,
//! one JSON-serialized `InstalledConfigDescriptor` per file, written with an
//! atomic rename so a crash mid-write cannot leave a half-written descriptor.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::args::NormalizedArgs;
use crate::error::{Result, ScaffoldError};
use crate::model::{ConfigName, InstalledConfigDescriptor, InstalledPackage, PackageName};

/// Keys the engine itself injects into every configure invocation
/// (`CMAKE_INSTALL_PREFIX`, plus the two search paths used for dependency
/// discovery and hijack-module shadowing). A difference confined to these
/// keys is "cosmetic" — the resolution for Open Question 2 — and downgrades
/// an otherwise-`different` evaluation to `different_but_satisfied`.
const COSMETIC_ARG_NAMES: &[&str] = &[
    "CMAKE_INSTALL_PREFIX",
    "CMAKE_PREFIX_PATH",
    "CMAKE_MODULE_PATH",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotInstalled,
    Satisfied,
    DifferentButSatisfied,
    Different,
}

#[derive(Debug, Clone)]
pub struct Evaluation {
    pub status: Status,
    pub incompatible_args_local: Vec<crate::args::BuildArg>,
    pub incompatible_args_any: Vec<crate::args::BuildArg>,
}

pub struct InstallDb {
    root: PathBuf,
}

impl InstallDb {
    /// `deps_install_dir` is the shared install prefix; the DB lives under
    /// its `_cmakex/pkg_db` subtree.
    pub fn new(deps_install_dir: impl Into<PathBuf>) -> Self {
        InstallDb {
            root: deps_install_dir.into().join("_cmakex").join("pkg_db"),
        }
    }

    fn package_dir(&self, name: &PackageName) -> PathBuf {
        self.root.join(name.as_str())
    }

    fn descriptor_path(&self, name: &PackageName, config: &ConfigName) -> PathBuf {
        self.package_dir(name)
            .join(format!("{}.desc", config.as_dir_name()))
    }

    /// Looks for `name` installed under any of `prefix_paths`. Fails if more
    /// than one prefix path contains it (ambiguous install location).
    pub fn quick_check_on_prefix_paths(
        &self,
        name: &PackageName,
        prefix_paths: &[PathBuf],
    ) -> Result<(Option<PathBuf>, Vec<ConfigName>)> {
        let mut hit: Option<(PathBuf, Vec<ConfigName>)> = None;
        for prefix in prefix_paths {
            let db = InstallDb::new(prefix);
            let pkg = db.try_get_installed_pkg_all_configs(name)?;
            if pkg.configs.is_empty() {
                continue;
            }
            if hit.is_some() {
                return Err(ScaffoldError::state_inconsistency(
                    prefix.clone(),
                    format!("package {name} found on more than one prefix path"),
                ));
            }
            hit = Some((prefix.clone(), pkg.configs.keys().cloned().collect()));
        }
        Ok(match hit {
            Some((p, cfgs)) => (Some(p), cfgs),
            None => (None, Vec::new()),
        })
    }

    pub fn try_get_installed_pkg_all_configs(&self, name: &PackageName) -> Result<InstalledPackage> {
        let dir = self.package_dir(name);
        let mut pkg = InstalledPackage::default();
        if !dir.exists() {
            return Ok(pkg);
        }
        for entry in walkdir::WalkDir::new(&dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| ScaffoldError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?;
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("desc") {
                continue;
            }
            let content = std::fs::read_to_string(path)?;
            let desc: InstalledConfigDescriptor = serde_json::from_str(&content)?;
            pkg.configs.insert(desc.config.clone(), desc);
        }
        if let Some(warning) = pkg.check_consistency() {
            warn!("{}", warning);
        }
        Ok(pkg)
    }

    /// Idempotent, atomic-rename write of one descriptor.
    pub fn record(&self, descriptor: &InstalledConfigDescriptor) -> Result<()> {
        let dir = self.package_dir(&descriptor.package);
        std::fs::create_dir_all(&dir)?;
        let final_path = self.descriptor_path(&descriptor.package, &descriptor.config);
        let tmp_path = dir.join(format!(".{}.desc.tmp", descriptor.config.as_dir_name()));
        let serialized = serde_json::to_vec_pretty(descriptor)?;
        std::fs::write(&tmp_path, &serialized)?;
        std::fs::rename(&tmp_path, &final_path)?;
        info!(
            "recorded descriptor for {} [{}]",
            descriptor.package, descriptor.config
        );
        Ok(())
    }

    fn load_descriptor(&self, name: &PackageName, config: &ConfigName) -> Result<Option<InstalledConfigDescriptor>> {
        let path = self.descriptor_path(name, config);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    /// Evaluates each requested config against its stored descriptor, if any.
    pub fn evaluate(
        &self,
        name: &PackageName,
        subdirectory: Option<&Path>,
        per_config_final_args: &BTreeMap<ConfigName, NormalizedArgs>,
        current_dependency_names: &[PackageName],
    ) -> Result<BTreeMap<ConfigName, Evaluation>> {
        let mut out = BTreeMap::new();
        for (config, final_args) in per_config_final_args {
            let existing = self.load_descriptor(name, config)?;
            let eval = match existing {
                None => Evaluation {
                    status: Status::NotInstalled,
                    incompatible_args_local: Vec::new(),
                    incompatible_args_any: Vec::new(),
                },
                Some(desc) => evaluate_one(&desc, subdirectory, final_args, current_dependency_names),
            };
            out.insert(config.clone(), eval);
        }
        Ok(out)
    }
}

fn evaluate_one(
    desc: &InstalledConfigDescriptor,
    subdirectory: Option<&Path>,
    final_args: &NormalizedArgs,
    current_dependency_names: &[PackageName],
) -> Evaluation {
    let subdir_matches = desc.subdirectory.as_deref() == subdirectory;
    let deps_matches = current_dependency_names
        .iter()
        .all(|d| desc.dependency_fingerprints.contains_key(d));

    let incompatible_any = final_args.new_or_changed_subset(&desc.final_build_args);
    let cosmetic_only = !incompatible_any.is_empty()
        && incompatible_any.iter().all(|a| COSMETIC_ARG_NAMES.contains(&a.name.as_str()));
    let incompatible_local: Vec<_> = incompatible_any
        .iter()
        .filter(|a| !COSMETIC_ARG_NAMES.contains(&a.name.as_str()))
        .cloned()
        .collect();

    let status = if subdir_matches && deps_matches && incompatible_any.is_empty() {
        Status::Satisfied
    } else if subdir_matches && deps_matches && cosmetic_only {
        Status::DifferentButSatisfied
    } else {
        Status::Different
    };

    Evaluation {
        status,
        incompatible_args_local: incompatible_local,
        incompatible_args_any: incompatible_any,
    }
}
