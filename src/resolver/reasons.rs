//! Build-reason derivation (§4.7): per config, the first matched rule wins.

use std::collections::BTreeMap;

use crate::installdb::{Evaluation, Status};
use crate::model::{ConfigName, InstalledConfigDescriptor, PackageName};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildReason {
    DependencyRebuilt,
    InitialBuild,
    BuildOptionsChanged(Vec<String>),
    UncommittedChanges,
    SourceAtNewCommit,
    DependencyFingerprintChanged(PackageName),
    Forced,
}

impl std::fmt::Display for BuildReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildReason::DependencyRebuilt => write!(f, "dependency rebuilt"),
            BuildReason::InitialBuild => write!(f, "initial build"),
            BuildReason::BuildOptionsChanged(names) => {
                write!(f, "build options changed ({})", names.join(", "))
            }
            BuildReason::UncommittedChanges => write!(f, "uncommitted changes"),
            BuildReason::SourceAtNewCommit => write!(f, "source at new commit"),
            BuildReason::DependencyFingerprintChanged(name) => {
                write!(f, "dependency {name} fingerprint changed")
            }
            BuildReason::Forced => write!(f, "forced"),
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn compute_build_reasons(
    evaluation: &Evaluation,
    dependency_being_rebuilt: bool,
    working_tree_has_uncommitted_changes: bool,
    cloned_sha: Option<&str>,
    installed_descriptor: Option<&InstalledConfigDescriptor>,
    currently_declared_dependencies: &[PackageName],
    current_dependency_fingerprints: &BTreeMap<PackageName, String>,
    force_build: bool,
    is_cloned: bool,
) -> Vec<BuildReason> {
    // Rule 1.
    if dependency_being_rebuilt {
        return vec![BuildReason::DependencyRebuilt];
    }
    // Rule 2.
    if evaluation.status == Status::NotInstalled {
        return vec![BuildReason::InitialBuild];
    }
    // Rule 3.
    if evaluation.status == Status::Different {
        let names: Vec<String> = evaluation
            .incompatible_args_local
            .iter()
            .map(|a| a.name.clone())
            .collect();
        return vec![BuildReason::BuildOptionsChanged(names)];
    }
    // From here, status is Satisfied or DifferentButSatisfied.
    // Rule 4.
    if working_tree_has_uncommitted_changes {
        return vec![BuildReason::UncommittedChanges];
    }
    // Rule 5.
    if let (Some(sha), Some(desc)) = (cloned_sha, installed_descriptor) {
        if sha != desc.clone.revision {
            return vec![BuildReason::SourceAtNewCommit];
        }
    }
    // Rule 6.
    if let Some(desc) = installed_descriptor {
        for dep in currently_declared_dependencies {
            let recorded = desc.dependency_fingerprints.get(dep).map(|m| m.values().collect::<Vec<_>>());
            let current = current_dependency_fingerprints.get(dep);
            match (recorded, current) {
                (None, Some(_)) | (Some(_), None) => {
                    return vec![BuildReason::DependencyFingerprintChanged(dep.clone())];
                }
                (Some(recorded_vals), Some(current_fp)) => {
                    if !recorded_vals.iter().any(|v| *v == current_fp) {
                        return vec![BuildReason::DependencyFingerprintChanged(dep.clone())];
                    }
                }
                (None, None) => {}
            }
        }
        let recorded_names: Vec<&PackageName> = desc.dependency_fingerprints.keys().collect();
        for recorded in recorded_names {
            if !currently_declared_dependencies.contains(recorded) {
                return vec![BuildReason::DependencyFingerprintChanged(recorded.clone())];
            }
        }
    }
    // Rule 7.
    if force_build && is_cloned {
        return vec![BuildReason::Forced];
    }
    Vec::new()
}
