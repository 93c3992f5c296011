//! Canonicalizes build-tool arguments so requests can be compared structurally.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One parsed build-tool argument: `-DNAME:TYPE=VALUE`-shaped or a bare
/// switch. `type_` is the cmake-style cache-variable type tag when present.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BuildArg {
    pub switch: String,
    pub name: String,
    pub type_: Option<String>,
    pub value: String,
}

/// A shadowing-reduced, canonically sorted argument set. Construction is
/// the only place normalization happens; everything downstream compares
/// `NormalizedArgs` structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedArgs {
    args: Vec<BuildArg>,
}

impl NormalizedArgs {
    pub fn empty() -> Self {
        NormalizedArgs { args: Vec::new() }
    }

    pub fn as_slice(&self) -> &[BuildArg] {
        &self.args
    }

    pub fn get(&self, name: &str) -> Option<&BuildArg> {
        self.args.iter().find(|a| a.name == name)
    }

    /// Build a `NormalizedArgs` from raw tokens, applying all of §4.1's
    /// normalization rules in order: (a) join adjacent two-token short
    /// forms, (b) absolutize relative path values, (c) shadow-reduce by
    /// `(switch, name)`, (d) emit in canonical sorted order.
    pub fn normalize(raw_tokens: &[String], cwd: &Path) -> crate::error::Result<Self> {
        let joined = join_short_forms(raw_tokens);
        let parsed: Vec<BuildArg> = joined
            .iter()
            .map(|tok| parse_one(tok))
            .collect::<crate::error::Result<_>>()?;

        let mut shadow: BTreeMap<(String, String), BuildArg> = BTreeMap::new();
        for mut arg in parsed {
            absolutize_if_path(&mut arg, cwd);
            shadow.insert((arg.switch.clone(), arg.name.clone()), arg);
        }

        let mut args: Vec<BuildArg> = shadow.into_values().collect();
        args.sort();
        Ok(NormalizedArgs { args })
    }

    /// Re-normalizing an already-normalized set is a no-op (property 9).
    pub fn renormalize(&self) -> Self {
        let mut args = self.args.clone();
        args.sort();
        args.dedup_by(|a, b| a.switch == b.switch && a.name == b.name);
        NormalizedArgs { args }
    }

    /// Concatenate `self` and `other`, later entries shadow earlier ones,
    /// re-emit canonically. Used by the request merger (§4.6).
    pub fn concat_and_renormalize(&self, other: &NormalizedArgs) -> Self {
        let mut shadow: BTreeMap<(String, String), BuildArg> = BTreeMap::new();
        for a in self.args.iter().chain(other.args.iter()) {
            shadow.insert((a.switch.clone(), a.name.clone()), a.clone());
        }
        let mut args: Vec<BuildArg> = shadow.into_values().collect();
        args.sort();
        NormalizedArgs { args }
    }

    pub fn as_map(&self) -> BTreeMap<(String, String), &BuildArg> {
        self.args
            .iter()
            .map(|a| ((a.switch.clone(), a.name.clone()), a))
            .collect()
    }

    /// `self`'s shadowing-reduced map is a subset (by key+value) of `other`'s,
    /// with the exception that an explicit "unset" switch and a "set" switch
    /// for the same name are always incompatible.
    pub fn is_compatible_with(&self, other: &NormalizedArgs) -> bool {
        self.incompatible_subset(other).is_empty()
    }

    /// Returns the subset of `self`'s arguments that are incompatible with
    /// `other` — either present with a different value, or an unset/set
    /// clash on the same name. A key present only in `self` is NOT
    /// incompatible by this definition (used by the request merger, where
    /// `other` is allowed to be the broader, already-accumulated set).
    pub fn incompatible_subset(&self, other: &NormalizedArgs) -> Vec<BuildArg> {
        let other_map = other.as_map();
        let mut offending = Vec::new();
        for a in &self.args {
            let key = (a.switch.clone(), a.name.clone());
            match other_map.get(&key) {
                Some(b) => {
                    if a.value != b.value {
                        offending.push(a.clone());
                    }
                }
                None => {
                    let unset_clash = other.args.iter().any(|b| {
                        b.name == a.name && (is_unset(a) != is_unset(b))
                    });
                    if unset_clash {
                        offending.push(a.clone());
                    }
                }
            }
        }
        offending
    }

    /// Returns the subset of `self`'s arguments that differ from `other` —
    /// a changed value, an unset/set clash, OR a key `self` has that
    /// `other` lacks entirely. Used by the install database, where a
    /// brand-new cache variable is itself a reason to reconfigure.
    pub fn new_or_changed_subset(&self, other: &NormalizedArgs) -> Vec<BuildArg> {
        let other_map = other.as_map();
        self.args
            .iter()
            .filter(|a| {
                let key = (a.switch.clone(), a.name.clone());
                other_map.get(&key).map(|b| b.value != a.value).unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}

fn is_unset(arg: &BuildArg) -> bool {
    arg.switch == "-U"
}

/// Join adjacent two-token short forms: `-D NAME:TYPE=VALUE` (two argv
/// tokens) becomes one logical `-DNAME:TYPE=VALUE` token. Long forms
/// (`-DNAME=VALUE` already joined, or `--var=VALUE`) pass through.
fn join_short_forms(tokens: &[String]) -> Vec<String> {
    let short_switches = ["-D", "-U", "-G", "-T", "-A"];
    let mut out = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        let tok = &tokens[i];
        if short_switches.contains(&tok.as_str()) && i + 1 < tokens.len() {
            out.push(format!("{}{}", tok, tokens[i + 1]));
            i += 2;
        } else {
            out.push(tok.clone());
            i += 1;
        }
    }
    out
}

fn parse_one(tok: &str) -> crate::error::Result<BuildArg> {
    for switch in ["-D", "-U", "-G", "-T", "-A"] {
        if let Some(rest) = tok.strip_prefix(switch) {
            return Ok(parse_switch_body(switch, rest));
        }
    }
    if let Some(rest) = tok.strip_prefix("--") {
        if let Some((name, value)) = rest.split_once('=') {
            return Ok(BuildArg {
                switch: "--".to_string(),
                name: name.to_string(),
                type_: None,
                value: value.to_string(),
            });
        }
        return Ok(BuildArg {
            switch: "--".to_string(),
            name: rest.to_string(),
            type_: None,
            value: String::new(),
        });
    }
    // Bare positional token: keyed by its own value so it survives
    // shadow-reduction without colliding with anything else.
    Ok(BuildArg {
        switch: String::new(),
        name: tok.to_string(),
        type_: None,
        value: String::new(),
    })
}

fn parse_switch_body(switch: &str, body: &str) -> BuildArg {
    if let Some((name_and_type, value)) = body.split_once('=') {
        if let Some((name, type_)) = name_and_type.split_once(':') {
            return BuildArg {
                switch: switch.to_string(),
                name: name.to_string(),
                type_: Some(type_.to_string()),
                value: value.to_string(),
            };
        }
        return BuildArg {
            switch: switch.to_string(),
            name: name_and_type.to_string(),
            type_: None,
            value: value.to_string(),
        };
    }
    BuildArg {
        switch: switch.to_string(),
        name: body.to_string(),
        type_: None,
        value: String::new(),
    }
}

fn absolutize_if_path(arg: &mut BuildArg, cwd: &Path) {
    let looks_like_path = matches!(
        arg.type_.as_deref(),
        Some("PATH") | Some("FILEPATH")
    ) || matches!(arg.name.as_str(), "CMAKE_INSTALL_PREFIX" | "CMAKE_PREFIX_PATH" | "CMAKE_MODULE_PATH");
    if !looks_like_path || arg.value.is_empty() {
        return;
    }
    let joined: Vec<String> = arg
        .value
        .split(';')
        .map(|part| absolutize_one(part, cwd))
        .collect();
    arg.value = joined.join(";");
}

fn absolutize_one(part: &str, cwd: &Path) -> String {
    let p = Path::new(part);
    let abs: PathBuf = if p.is_absolute() {
        p.to_path_buf()
    } else {
        cwd.join(p)
    };
    let s = abs.to_string_lossy().to_string();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s
    }
}
