use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use scaffold::build_driver::{BuildDriver, DriverOutput};
use scaffold::clone::{CloneDriver, CloneStatus, RemoteRefs};
use scaffold::error::Result;
use scaffold::model::{CloneSpec, ConfigName};

/// In-memory clone driver: no real git binary involved. Every `clone()`
/// records the directory as clean at the requested revision (or a
/// synthetic SHA when the revision is empty).
pub struct FakeCloneDriver {
    statuses: Mutex<BTreeMap<String, CloneStatus>>,
}

impl FakeCloneDriver {
    pub fn new() -> Self {
        FakeCloneDriver { statuses: Mutex::new(BTreeMap::new()) }
    }

    fn key(dir: &Path) -> String {
        dir.to_string_lossy().to_string()
    }
}

impl CloneDriver for FakeCloneDriver {
    fn clone(&self, dir: &Path, spec: &CloneSpec, _shallow: bool) -> Result<()> {
        let sha = if spec.revision.is_empty() { "sha0000".to_string() } else { spec.revision.clone() };
        self.statuses.lock().unwrap().insert(Self::key(dir), CloneStatus::CleanAt(sha));
        Ok(())
    }

    fn ls_remote(&self, _url: &str) -> Result<RemoteRefs> {
        Ok(RemoteRefs { head_branch_name: "main".into(), branches: BTreeMap::new(), tags: BTreeMap::new() })
    }

    fn current_branch_or_head(&self, _dir: &Path) -> Result<String> {
        Ok("HEAD".into())
    }

    fn is_existing_commit(&self, _dir: &Path, _rev: &str) -> Result<bool> {
        Ok(true)
    }

    fn clone_status(&self, dir: &Path) -> Result<CloneStatus> {
        Ok(self.statuses.lock().unwrap().get(&Self::key(dir)).cloned().unwrap_or(CloneStatus::Absent))
    }

    fn fetch(&self, _dir: &Path) -> Result<()> {
        Ok(())
    }

    fn checkout(&self, _dir: &Path, _target: &str) -> Result<()> {
        Ok(())
    }

    fn merge_ff_only(&self, dir: &Path, target_ref: &str) -> Result<()> {
        self.statuses.lock().unwrap().insert(Self::key(dir), CloneStatus::CleanAt(target_ref.to_string()));
        Ok(())
    }

    fn reset_hard(&self, dir: &Path, target_ref: &str) -> Result<()> {
        self.statuses.lock().unwrap().insert(Self::key(dir), CloneStatus::CleanAt(target_ref.to_string()));
        Ok(())
    }
}

/// In-memory build driver: every step reports success without spawning a
/// process. Exists purely so resolver/executor tests don't need a real
/// native build tool on PATH.
pub struct FakeBuildDriver;

impl BuildDriver for FakeBuildDriver {
    fn configure(
        &self,
        _package: &str,
        _source_dir: &Path,
        _build_dir: &Path,
        _config: &ConfigName,
        _args: &scaffold::args::NormalizedArgs,
    ) -> Result<DriverOutput> {
        Ok(DriverOutput { stdout: String::new(), stderr: String::new(), success: true, installed_hijack_modules: Vec::new() })
    }

    fn build(
        &self,
        _package: &str,
        _build_dir: &Path,
        _config: &ConfigName,
        _targets: &[String],
        _extra_args: &[String],
    ) -> Result<DriverOutput> {
        Ok(DriverOutput { stdout: String::new(), stderr: String::new(), success: true, installed_hijack_modules: Vec::new() })
    }

    fn install(&self, _package: &str, _build_dir: &Path, _config: &ConfigName) -> Result<DriverOutput> {
        Ok(DriverOutput { stdout: String::new(), stderr: String::new(), success: true, installed_hijack_modules: Vec::new() })
    }
}
