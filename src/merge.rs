//! Combines multiple requests naming the same package into one coherent
//! request, or rejects incompatible ones.

use std::path::Path;

use tracing::warn;

use crate::error::{Result, ScaffoldError};
use crate::model::PackageRequest;

/// `merge(existing, new) -> merged`, following §4.6's field-by-field rules.
/// `cwd` is needed to renormalize the concatenated build-arg list.
pub fn merge(existing: &PackageRequest, new: &PackageRequest, cwd: &Path, from_prefix_path: bool) -> Result<PackageRequest> {
    if existing.name != new.name {
        return Err(ScaffoldError::WorkspaceConflict {
            name: existing.name.to_string(),
            detail: format!("cannot merge requests for different packages: {} vs {}", existing.name, new.name),
        });
    }

    let shallow_clone = existing.shallow_clone || new.shallow_clone;

    let repo_url = match (existing.clone.repo_url.is_empty(), new.clone.repo_url.is_empty()) {
        (true, _) => new.clone.repo_url.clone(),
        (false, true) => existing.clone.repo_url.clone(),
        (false, false) if existing.clone.repo_url == new.clone.repo_url => existing.clone.repo_url.clone(),
        (false, false) => {
            return Err(ScaffoldError::WorkspaceConflict {
                name: existing.name.to_string(),
                detail: format!(
                    "conflicting repo_url: {} vs {}",
                    existing.clone.repo_url, new.clone.repo_url
                ),
            });
        }
    };

    let revision = merge_revision(existing, new)?;

    let subdirectory = match (&existing.build.subdirectory, &new.build.subdirectory) {
        (None, b) => b.clone(),
        (a, None) => a.clone(),
        (Some(a), Some(b)) if a == b => Some(a.clone()),
        (Some(a), Some(b)) => {
            return Err(ScaffoldError::WorkspaceConflict {
                name: existing.name.to_string(),
                detail: format!("conflicting subdirectory: {} vs {}", a.display(), b.display()),
            });
        }
    };

    let concatenated = existing.build.build_args.concat_and_renormalize(&new.build.build_args);
    let offending = existing.build.build_args.incompatible_subset(&new.build.build_args);
    if !offending.is_empty() {
        return Err(ScaffoldError::WorkspaceConflict {
            name: existing.name.to_string(),
            detail: format!(
                "incompatible build args: {}",
                offending.iter().map(|a| a.name.clone()).collect::<Vec<_>>().join(", ")
            ),
        });
    }
    let build_args = concatenated.renormalize();
    let _ = cwd; // cwd retained for API symmetry with args::normalize; args are already normalized here.

    let configs = if from_prefix_path {
        if existing.build.configs != new.build.configs {
            warn!(
                "package {} config set differs from its prefix-path install; installed set wins",
                existing.name
            );
        }
        existing.build.configs.clone()
    } else if existing.build.configs != new.build.configs {
        return Err(ScaffoldError::WorkspaceConflict {
            name: existing.name.to_string(),
            detail: "conflicting configs sets".to_string(),
        });
    } else {
        existing.build.configs.clone()
    };

    let depends = if existing.depends_from_script || new.depends_from_script {
        if new.depends_from_script {
            new.depends.clone()
        } else {
            existing.depends.clone()
        }
    } else if !existing.depends.is_empty() && !new.depends.is_empty() && existing.depends != new.depends {
        return Err(ScaffoldError::WorkspaceConflict {
            name: existing.name.to_string(),
            detail: "conflicting depends lists".to_string(),
        });
    } else if existing.depends.is_empty() {
        new.depends.clone()
    } else {
        existing.depends.clone()
    };

    Ok(PackageRequest {
        name: existing.name.clone(),
        clone: crate::model::CloneSpec { repo_url, revision },
        build: crate::model::BuildParams { subdirectory, build_args, configs },
        depends,
        revision_override: existing.revision_override || new.revision_override,
        shallow_clone,
        name_only: existing.name_only && new.name_only,
        define_only: existing.define_only && new.define_only,
        depends_from_script: existing.depends_from_script || new.depends_from_script,
    })
}

fn merge_revision(existing: &PackageRequest, new: &PackageRequest) -> Result<String> {
    if existing.clone.revision.is_empty() {
        return Ok(new.clone.revision.clone());
    }
    if new.clone.revision.is_empty() {
        return Ok(existing.clone.revision.clone());
    }
    if existing.clone.revision == new.clone.revision {
        return Ok(existing.clone.revision.clone());
    }
    // Both non-empty and differing.
    if existing.revision_override {
        if new.revision_override {
            return Err(ScaffoldError::WorkspaceConflict {
                name: existing.name.to_string(),
                detail: format!(
                    "conflicting revision overrides: {} vs {}",
                    existing.clone.revision, new.clone.revision
                ),
            });
        }
        // existing overrides, new does not: override wins silently.
        return Ok(existing.clone.revision.clone());
    }
    if new.revision_override {
        return Ok(new.clone.revision.clone());
    }
    warn!(
        "package {} revision changed from {} to {} (neither request overrides)",
        existing.name, existing.clone.revision, new.clone.revision
    );
    Ok(new.clone.revision.clone())
}
