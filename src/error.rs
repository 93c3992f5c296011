use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ScaffoldError {
    #[error("invalid input: {0}")]
    UserInput(String),

    #[error("workspace conflict for package {name}: {detail}")]
    WorkspaceConflict { name: String, detail: String },

    #[error("circular dependency: {0}")]
    DependencyCycle(String),

    #[error("clone error: {0}")]
    Clone(String),

    #[error("build error: {0}")]
    Build(String),

    #[error("state inconsistency: {0}")]
    StateInconsistency(String),

    #[error("update blocked: {0}")]
    UpdateBlocked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),
}

pub type Result<T> = std::result::Result<T, ScaffoldError>;

impl ScaffoldError {
    pub fn state_inconsistency(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        ScaffoldError::StateInconsistency(format!("{}: {}", path.into().display(), detail))
    }
}

/// Extension trait adding `.context()` to any `Result`, mirroring
/// `anyhow::Context` but folding the failure into a `ScaffoldError::Build`.
pub trait ResultExt<T> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, msg: impl std::fmt::Display) -> Result<T> {
        self.map_err(|e| ScaffoldError::Build(format!("{}: {}", msg, e)))
    }
}
