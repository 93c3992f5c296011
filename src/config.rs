//! Engine configuration: the per-invocation surface decoded from the CLI
//! collaborator (§6), and an optional on-disk defaults file using the same
//! layered-TOML-merge pattern as the rest of this codebase's ambient
//! config loading.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;
use crate::model::{ConfigName, UpdatePolicy};

/// The invocation surface consumed from the CLI collaborator (§6):
/// source dir, binary dir, configs, build-tool args, dependency script
/// path, update policy, and the various flags/overrides.
#[derive(Debug, Clone)]
pub struct EngineInvocation {
    pub source_dir: PathBuf,
    pub binary_dir: PathBuf,
    pub configs: Vec<ConfigName>,
    pub build_tool_args: Vec<String>,
    pub dependency_script: Option<PathBuf>,
    pub update_policy: UpdatePolicy,
    pub force_build: bool,
    pub clear_downloaded_includes: bool,
    pub single_build_dir: bool,
    pub deps_dir_override: Option<PathBuf>,
    pub deps_build_dir_override: Option<PathBuf>,
    pub deps_install_dir_override: Option<PathBuf>,
    pub verbose: bool,
}

/// Immutable, shared engine-wide configuration (§9's design note: reify
/// "just a verbose flag" as a value, not process-global state).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cwd: PathBuf,
    pub deps_dir: PathBuf,
    pub deps_build_dir: PathBuf,
    pub deps_install_dir: PathBuf,
    pub prefix_paths: Vec<PathBuf>,
    pub single_build_dir: bool,
    pub force_build: bool,
    pub clear_downloaded_includes: bool,
    pub verbose: bool,
}

impl EngineConfig {
    pub fn from_invocation(inv: &EngineInvocation) -> Self {
        let deps_dir = inv.deps_dir_override.clone().unwrap_or_else(|| inv.binary_dir.join("_deps"));
        let deps_build_dir = inv.deps_build_dir_override.clone().unwrap_or_else(|| inv.binary_dir.join("_deps-build"));
        let deps_install_dir = inv.deps_install_dir_override.clone().unwrap_or_else(|| inv.binary_dir.join("_deps-install"));
        EngineConfig {
            cwd: inv.source_dir.clone(),
            deps_dir,
            deps_build_dir,
            deps_install_dir: deps_install_dir.clone(),
            prefix_paths: vec![deps_install_dir],
            single_build_dir: inv.single_build_dir,
            force_build: inv.force_build,
            clear_downloaded_includes: inv.clear_downloaded_includes,
            verbose: inv.verbose,
        }
    }
}

/// Optional `scaffold.toml` defaults file, layered the way the teacher's
/// package-manager config loads its own settings: system-wide, then
/// per-user XDG, then project-local, each layer only needing to specify
/// the keys it overrides.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct FileDefaults {
    #[serde(default)]
    pub update_policy: Option<String>,
    #[serde(default)]
    pub force_build: Option<bool>,
    #[serde(default)]
    pub single_build_dir: Option<bool>,
    #[serde(default)]
    pub build_tool: Option<String>,
}

fn get_xdg_config_file() -> Option<PathBuf> {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .ok()
        .or_else(|| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")).ok())
        .map(|p| p.join("scaffold/scaffold.toml"))
}

fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    use toml::Value;
    match (base, overlay) {
        (Value::Table(mut base_map), Value::Table(overlay_map)) => {
            for (k, v) in overlay_map {
                let merged = match base_map.remove(&k) {
                    Some(base_v) => merge_toml(base_v, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Table(base_map)
        }
        (_, overlay) => overlay,
    }
}

fn load_toml_file(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

impl FileDefaults {
    /// Loads layered defaults: `/etc/scaffold/scaffold.toml` (lowest),
    /// `$XDG_CONFIG_HOME/scaffold/scaffold.toml`, `./scaffold.toml`
    /// (highest). Any missing layer is silently skipped.
    pub fn load() -> Result<Self> {
        let mut layers: Vec<PathBuf> = vec![PathBuf::from("/etc/scaffold/scaffold.toml")];
        if let Some(xdg) = get_xdg_config_file() {
            layers.push(xdg);
        }
        layers.push(PathBuf::from("./scaffold.toml"));

        let mut merged: Option<toml::Value> = None;
        for layer in &layers {
            if layer.exists() {
                let val = load_toml_file(layer)?;
                merged = Some(match merged {
                    Some(base) => merge_toml(base, val),
                    None => val,
                });
            }
        }
        match merged {
            None => Ok(Self::default()),
            Some(val) => Ok(FileDefaults::deserialize(val)?),
        }
    }
}
