use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure kind the engine reports. The orchestrator aggregates
/// per-run failures into [`Error::RunsFailed`] after all runs were processed.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("failed connecting to {host}: {reason}")]
    ConnectFailed { host: String, reason: String },

    #[error("path does not exist: {0}")]
    NotFound(String),

    #[error("the folder {0} contains content, use rmtree if you wish to delete it")]
    NonEmpty(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("invalid operation: {0}")]
    Invalid(String),

    #[error("run {id}: input path is not an existing file: {path}")]
    InputMissing { id: u32, path: String },

    #[error("run {id}: variable name {name} not available to replace in {context}")]
    VarMissing {
        id: u32,
        name: String,
        context: String,
    },

    #[error("run {id}: file name {name} not available to replace in {context}")]
    FileMissing {
        id: u32,
        name: String,
        context: String,
    },

    #[error("run {id}: duplicate basename in inputs: {name}")]
    NameCollision { id: u32, name: String },

    #[error("the walltime is not in the correct format: {0}")]
    BadWalltime(String),

    #[error("unsupported glob pattern: {0}")]
    UnsupportedPattern(String),

    #[error("the following line caused error code {code}: {cmnd}")]
    ExecFailed { cmnd: String, code: i32 },

    #[error("command timed out after {timeout}s: {cmnd}")]
    ExecTimeout { cmnd: String, timeout: u64 },

    #[error("command line contains security risk: {0}")]
    SecurityRejected(String),

    #[error("runs failed: {}", format_run_list(.0))]
    RunsFailed(Vec<(u32, String)>),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("ssh: {0}")]
    Ssh(#[from] ssh2::Error),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_run_list(failed: &[(u32, String)]) -> String {
    failed
        .iter()
        .map(|(id, name)| format!("{id}:{name}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Maps an io error to the canonical filesystem failure kinds.
    pub(crate) fn from_io(err: std::io::Error, path: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => Error::Permission(path.to_string()),
            _ => Error::Io(err),
        }
    }
}
