//! Build plan executor (C8): iterates the resolver's linearized build
//! order; for each (package, config), invokes the build driver.

use std::path::PathBuf;

use tracing::{error, info};

use crate::build_driver::BuildDriver;
use crate::cache_tracker::CacheTracker;
use crate::config::EngineConfig;
use crate::error::{Result, ScaffoldError};
use crate::installdb::InstallDb;
use crate::model::{InstalledConfigDescriptor, PackageName, PackageState, ResolverWorkspace};

pub struct PlanExecutor<'a> {
    config: &'a EngineConfig,
    install_db: InstallDb,
    build_driver: &'a dyn BuildDriver,
}

impl<'a> PlanExecutor<'a> {
    pub fn new(config: &'a EngineConfig, build_driver: &'a dyn BuildDriver) -> Self {
        PlanExecutor {
            config,
            install_db: InstallDb::new(&config.deps_install_dir),
            build_driver,
        }
    }

    fn clone_dir(&self, pkg: &PackageName) -> PathBuf {
        self.config.deps_dir.join(pkg.as_str())
    }

    fn build_dir(&self, pkg: &PackageName, cfg: &crate::model::ConfigName) -> PathBuf {
        if self.config.single_build_dir {
            self.config.deps_build_dir.join(pkg.as_str())
        } else {
            self.config.deps_build_dir.join(pkg.as_str()).join(cfg.as_dir_name())
        }
    }

    /// Consumes `build_order` in FIFO order. Aborts the whole run on any
    /// step's failure; prior install-DB state is left untouched.
    pub fn execute(&self, workspace: &ResolverWorkspace) -> Result<()> {
        for pkg in &workspace.build_order {
            let state = workspace
                .pkg_map
                .get(pkg)
                .ok_or_else(|| ScaffoldError::StateInconsistency(format!("{pkg} is in build_order but has no resolved state")))?;
            self.build_one(pkg, state)?;
        }
        Ok(())
    }

    fn build_one(&self, pkg: &PackageName, state: &PackageState) -> Result<()> {
        let source_dir = self.clone_dir(pkg);
        let source_dir = match &state.request.build.subdirectory {
            Some(sub) => source_dir.join(sub),
            None => source_dir,
        };

        for (cfg, per_cfg) in &state.per_config {
            if per_cfg.build_reasons.is_empty() {
                continue;
            }
            let args = per_cfg
                .tentative_final_args
                .clone()
                .ok_or_else(|| ScaffoldError::StateInconsistency(format!("{pkg} [{cfg}] has build reasons but no tentative args")))?;
            let build_dir = self.build_dir(pkg, cfg);
            info!("{pkg} [{cfg}]: {}", per_cfg.build_reasons.join("; "));

            let configure_out = self.build_driver.configure(pkg.as_str(), &source_dir, &build_dir, cfg, &args)?;
            if !configure_out.success {
                error!("{pkg} [{cfg}] configure failed");
                return Err(ScaffoldError::Build(format!("{pkg} [{cfg}] configure step failed")));
            }
            let mut tracker = CacheTracker::load(&build_dir)?;
            tracker.confirm_pending()?;

            let build_out = self.build_driver.build(pkg.as_str(), &build_dir, cfg, &[], &[])?;
            if !build_out.success {
                error!("{pkg} [{cfg}] build failed");
                return Err(ScaffoldError::Build(format!("{pkg} [{cfg}] build step failed")));
            }

            let install_out = self.build_driver.install(pkg.as_str(), &build_dir, cfg)?;
            if !install_out.success {
                error!("{pkg} [{cfg}] install failed");
                return Err(ScaffoldError::Build(format!("{pkg} [{cfg}] install step failed")));
            }

            let mut dependency_fingerprints = std::collections::BTreeMap::new();
            for dep in &state.request.depends {
                let installed_dep = self.install_db.try_get_installed_pkg_all_configs(dep)?;
                if let Some(dep_desc) = installed_dep.configs.get(cfg) {
                    let mut per_cfg_fp = std::collections::BTreeMap::new();
                    per_cfg_fp.insert(cfg.clone(), dep_desc.hash());
                    dependency_fingerprints.insert(dep.clone(), per_cfg_fp);
                }
            }

            let descriptor = InstalledConfigDescriptor {
                package: pkg.clone(),
                config: cfg.clone(),
                clone: crate::model::CloneSpec {
                    repo_url: state.request.clone.repo_url.clone(),
                    revision: state.cloned_sha.clone().unwrap_or_else(|| state.request.clone.revision.clone()),
                },
                subdirectory: state.request.build.subdirectory.clone(),
                final_build_args: args,
                dependency_fingerprints,
                hijack_modules: install_out.installed_hijack_modules.clone(),
            };
            self.install_db.record(&descriptor)?;
        }
        Ok(())
    }
}
