//! Decodes the dependency-script directive protocol (§6): each line is
//! tab-separated fields, decoded into a `PackageRequest`. The build driver
//! collaborator is responsible for actually executing the user's script and
//! handing us its stdout; this module only decodes the stream.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::args::NormalizedArgs;
use crate::error::{Result, ScaffoldError};
use crate::model::{BuildParams, CloneSpec, ConfigName, PackageName, PackageRequest};

/// Field order: name, repo_url, revision, subdirectory, comma-joined
/// build args, comma-joined configs, comma-joined depends, then flags for
/// define_only, revision_override, shallow_clone, name_only (each "0"/"1").
pub fn parse_directives(output: &str, cwd: &Path) -> Result<Vec<PackageRequest>> {
    output
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|line| parse_one_directive(line, cwd))
        .collect()
}

fn parse_one_directive(line: &str, cwd: &Path) -> Result<PackageRequest> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != 11 {
        return Err(ScaffoldError::UserInput(format!(
            "malformed dependency-script directive (expected 11 tab-separated fields, got {}): {line}",
            fields.len()
        )));
    }
    let [name, repo_url, revision, subdirectory, build_args, configs, depends, define_only, revision_override, shallow_clone, name_only] =
        <[&str; 11]>::try_from(fields).expect("length checked above");

    let name = PackageName::new(name)?;
    let subdirectory = if subdirectory.is_empty() {
        None
    } else {
        Some(PathBuf::from(subdirectory))
    };
    let raw_args: Vec<String> = split_nonempty(build_args, ',');
    let build_args = NormalizedArgs::normalize(&raw_args, cwd)?;
    let configs: BTreeSet<ConfigName> = split_nonempty(configs, ',').into_iter().map(|c| ConfigName::new(&c)).collect();
    let depends: BTreeSet<PackageName> = split_nonempty(depends, ',')
        .into_iter()
        .map(PackageName::new)
        .collect::<Result<_>>()?;

    Ok(PackageRequest {
        name,
        clone: CloneSpec { repo_url: repo_url.to_string(), revision: revision.to_string() },
        build: BuildParams { subdirectory, build_args, configs },
        depends,
        revision_override: parse_flag(revision_override)?,
        shallow_clone: parse_flag(shallow_clone)?,
        name_only: parse_flag(name_only)?,
        define_only: parse_flag(define_only)?,
        depends_from_script: true,
    })
}

fn split_nonempty(s: &str, sep: char) -> Vec<String> {
    if s.is_empty() {
        Vec::new()
    } else {
        s.split(sep).map(|x| x.to_string()).collect()
    }
}

fn parse_flag(s: &str) -> Result<bool> {
    match s {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ScaffoldError::UserInput(format!("invalid flag value: {other}"))),
    }
}
