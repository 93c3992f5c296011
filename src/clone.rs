//! Clone driver: mirrors a remote source repository into a working
//! directory and answers queries about the working tree state. The only
//! production implementation is backed by `git2`.

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, ScaffoldError};
use crate::model::CloneSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneStatus {
    Absent,
    CleanAt(String),
    LocalChangesAt(String),
}

#[derive(Debug, Clone)]
pub struct RemoteRefs {
    pub head_branch_name: String,
    pub branches: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
}

pub trait CloneDriver {
    fn clone(&self, dir: &Path, spec: &CloneSpec, shallow: bool) -> Result<()>;
    fn ls_remote(&self, url: &str) -> Result<RemoteRefs>;
    fn current_branch_or_head(&self, dir: &Path) -> Result<String>;
    fn is_existing_commit(&self, dir: &Path, rev: &str) -> Result<bool>;
    fn clone_status(&self, dir: &Path) -> Result<CloneStatus>;
    fn fetch(&self, dir: &Path) -> Result<()>;
    fn checkout(&self, dir: &Path, target: &str) -> Result<()>;
    fn merge_ff_only(&self, dir: &Path, target_ref: &str) -> Result<()>;
    fn reset_hard(&self, dir: &Path, target_ref: &str) -> Result<()>;
}

pub struct GitCloneDriver;

impl GitCloneDriver {
    pub fn new() -> Self {
        GitCloneDriver
    }

    fn open(&self, dir: &Path) -> Result<git2::Repository> {
        git2::Repository::open(dir).map_err(ScaffoldError::Git)
    }
}

impl Default for GitCloneDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl CloneDriver for GitCloneDriver {
    fn clone(&self, dir: &Path, spec: &CloneSpec, shallow: bool) -> Result<()> {
        let mut fetch_opts = git2::FetchOptions::new();
        if shallow {
            fetch_opts.depth(1);
        }
        let mut builder = git2::build::RepoBuilder::new();
        builder.fetch_options(fetch_opts);
        if !spec.revision.is_empty() && !CloneSpec::is_sha_shaped(&spec.revision) {
            builder.branch(&spec.revision);
        }
        let repo = builder
            .clone(&spec.repo_url, dir)
            .map_err(|e| ScaffoldError::Clone(format!("clone {} failed: {e}", spec.repo_url)))?;

        if !spec.revision.is_empty() && CloneSpec::is_sha_shaped(&spec.revision) {
            let oid = git2::Oid::from_str(&spec.revision)
                .map_err(|e| ScaffoldError::Clone(format!("bad revision {}: {e}", spec.revision)))?;
            let commit = repo
                .find_commit(oid)
                .map_err(|e| ScaffoldError::Clone(format!("revision {} not found: {e}", spec.revision)))?;
            repo.checkout_tree(commit.as_object(), None)
                .map_err(|e| ScaffoldError::Clone(format!("checkout failed: {e}")))?;
            repo.set_head_detached(oid)
                .map_err(|e| ScaffoldError::Clone(format!("detach head failed: {e}")))?;
        }
        Ok(())
    }

    fn ls_remote(&self, url: &str) -> Result<RemoteRefs> {
        let repo = git2::Repository::init_bare(
            std::env::temp_dir().join(format!("scaffold-lsremote-{}", std::process::id())),
        )?;
        let mut remote = repo.remote_anonymous(url)?;
        remote.connect(git2::Direction::Fetch)?;
        let mut branches = BTreeMap::new();
        let mut tags = BTreeMap::new();
        let mut head_branch_name = "HEAD".to_string();
        for head in remote.list()? {
            let name = head.name();
            if name == "HEAD" {
                continue;
            }
            if let Some(branch) = name.strip_prefix("refs/heads/") {
                branches.insert(branch.to_string(), head.oid().to_string());
            } else if let Some(tag) = name.strip_prefix("refs/tags/") {
                tags.insert(tag.to_string(), head.oid().to_string());
            }
        }
        if let Some((name, _)) = branches.iter().find(|(n, _)| n.as_str() == "main" || n.as_str() == "master") {
            head_branch_name = name.clone();
        }
        remote.disconnect()?;
        Ok(RemoteRefs { head_branch_name, branches, tags })
    }

    fn current_branch_or_head(&self, dir: &Path) -> Result<String> {
        let repo = self.open(dir)?;
        let head = repo.head()?;
        if head.is_branch() {
            Ok(head.shorthand().unwrap_or("HEAD").to_string())
        } else {
            Ok("HEAD".to_string())
        }
    }

    fn is_existing_commit(&self, dir: &Path, rev: &str) -> Result<bool> {
        let repo = self.open(dir)?;
        Ok(repo.revparse_single(rev).is_ok())
    }

    fn clone_status(&self, dir: &Path) -> Result<CloneStatus> {
        if !dir.exists() {
            return Ok(CloneStatus::Absent);
        }
        let repo = match git2::Repository::open(dir) {
            Ok(r) => r,
            Err(_) => return Ok(CloneStatus::Absent),
        };
        let head_sha = repo.head()?.peel_to_commit()?.id().to_string();
        let mut opts = git2::StatusOptions::new();
        opts.include_untracked(true);
        let statuses = repo.statuses(Some(&mut opts))?;
        if statuses.is_empty() {
            Ok(CloneStatus::CleanAt(head_sha))
        } else {
            Ok(CloneStatus::LocalChangesAt(head_sha))
        }
    }

    fn fetch(&self, dir: &Path) -> Result<()> {
        let repo = self.open(dir)?;
        let mut remote = repo.find_remote("origin")?;
        remote.fetch::<&str>(&[], None, None)?;
        Ok(())
    }

    fn checkout(&self, dir: &Path, target: &str) -> Result<()> {
        let repo = self.open(dir)?;
        let obj = repo.revparse_single(target)?;
        repo.checkout_tree(&obj, None)?;
        repo.set_head_detached(obj.id())?;
        Ok(())
    }

    fn merge_ff_only(&self, dir: &Path, target_ref: &str) -> Result<()> {
        let repo = self.open(dir)?;
        let target = repo.revparse_single(target_ref)?.peel_to_commit()?;
        let head = repo.head()?.peel_to_commit()?;
        if !repo.graph_descendant_of(target.id(), head.id())? && target.id() != head.id() {
            return Err(ScaffoldError::UpdateBlocked(format!(
                "{target_ref} is not a fast-forward from current HEAD"
            )));
        }
        repo.checkout_tree(target.as_object(), None)?;
        repo.set_head_detached(target.id())?;
        Ok(())
    }

    fn reset_hard(&self, dir: &Path, target_ref: &str) -> Result<()> {
        let repo = self.open(dir)?;
        let obj = repo.revparse_single(target_ref)?;
        repo.reset(&obj, git2::ResetType::Hard, None)?;
        Ok(())
    }
}
