//! Per package build directory: tracks applied vs. pending build-tool cache
//! variables so an interrupted configure step cannot poison the next run's
//! args comparison.
//!
//! Persists as `<pkg-build-dir>/cmakex_cache_tracker.json`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::args::NormalizedArgs;
use crate::error::Result;

const TRACKER_FILE: &str = "cmakex_cache_tracker.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct TrackerState {
    applied: NormalizedArgsOrEmpty,
    pending: NormalizedArgsOrEmpty,
    /// Path to a referenced toolchain file, if any; its content feeds the
    /// fingerprint so a toolchain edit is visible without a cache-var bump.
    toolchain_file: Option<PathBuf>,
}

/// `NormalizedArgs` has no `Default`; this newtype gives the tracker state
/// one without forcing a `cwd` at deserialize time.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NormalizedArgsOrEmpty(NormalizedArgs);

impl Default for NormalizedArgsOrEmpty {
    fn default() -> Self {
        NormalizedArgsOrEmpty(NormalizedArgs::empty())
    }
}

pub struct CacheTracker {
    path: PathBuf,
    state: TrackerState,
}

impl CacheTracker {
    /// Loads the tracker for `pkg_build_dir`. A missing file is treated as
    /// an initial build (local-recovery rule in §7): an empty applied set.
    pub fn load(pkg_build_dir: &Path) -> Result<Self> {
        let path = pkg_build_dir.join(TRACKER_FILE);
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            TrackerState::default()
        };
        Ok(CacheTracker { path, state })
    }

    pub fn applied(&self) -> &NormalizedArgs {
        &self.state.applied.0
    }

    /// Merges `args` into the pending set without touching `applied`.
    pub fn add_pending(&mut self, args: &NormalizedArgs) {
        self.state.pending.0 = self.state.pending.0.concat_and_renormalize(args);
    }

    /// Moves pending into applied and persists. Called only after the
    /// configure step reports success.
    pub fn confirm_pending(&mut self) -> Result<()> {
        self.state.applied.0 = self.state.applied.0.concat_and_renormalize(&self.state.pending.0);
        self.state.pending.0 = NormalizedArgs::empty();
        self.persist()
    }

    pub fn set_toolchain_file(&mut self, path: Option<PathBuf>) {
        self.state.toolchain_file = path;
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_vec_pretty(&self.state)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &serialized)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Stable digest over the applied set plus any referenced toolchain
    /// file's content. Dependency fingerprints recorded in the install
    /// database use `InstalledConfigDescriptor::hash()` instead; this one
    /// only drives this package's own reconfigure-args bookkeeping.
    pub fn fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.state.applied.0)?);
        if let Some(tc) = &self.state.toolchain_file {
            if tc.exists() {
                hasher.update(std::fs::read(tc)?);
            }
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}
