use crate::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a run executes its commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Unix,
    Windows,
    Qsub,
}

/// A scalar variable binding. YAML numbers and bools are kept as-is and
/// stringified only when substituted into a script or command line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(x) => write!(f, "{x}"),
            Scalar::Int(x) => write!(f, "{x}"),
            Scalar::Float(x) => write!(f, "{x}"),
            Scalar::Str(x) => write!(f, "{x}"),
        }
    }
}

/// A single fully-defaulted run record, the unit the orchestrator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Run {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub input: Option<Input>,
    #[serde(default)]
    pub output: Output,
    #[serde(default)]
    pub process: Process,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Input {
    /// Root for all input paths, relative to the base path (or remote home).
    #[serde(default = "default_input_path")]
    pub path: String,
    /// Scripts to template-expand and copy, in order.
    #[serde(default)]
    pub scripts: Vec<String>,
    /// Logical file id -> relative path.
    #[serde(default)]
    pub files: IndexMap<String, String>,
    /// Variable bindings for `@v{...}` tags.
    #[serde(default)]
    pub variables: IndexMap<String, Scalar>,
    #[serde(default)]
    pub remote: Option<Remote>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Output {
    #[serde(default = "default_output_path")]
    pub path: String,
    /// Glob patterns (relative to the run directory) to delete after execution.
    #[serde(default)]
    pub remove: Vec<String>,
    /// Basename substring -> replacement, applied in insertion order.
    #[serde(default)]
    pub rename: IndexMap<String, String>,
    #[serde(default)]
    pub remote: Option<Remote>,
}

impl Default for Output {
    fn default() -> Self {
        Self {
            path: default_output_path(),
            remove: Vec::new(),
            rename: IndexMap::new(),
            remote: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Process {
    #[serde(default)]
    pub unix: Exec,
    #[serde(default)]
    pub windows: Exec,
    #[serde(default)]
    pub qsub: Qsub,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Exec {
    #[serde(default)]
    pub run: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Qsub {
    /// Defaults to `<id>_<name>`; truncated by the scheduler-script generator.
    #[serde(default)]
    pub jobname: Option<String>,
    #[serde(default = "default_nnodes")]
    pub nnodes: u32,
    #[serde(default = "default_cores_per_node")]
    pub cores_per_node: u32,
    #[serde(default = "default_walltime")]
    pub walltime: String,
    #[serde(default)]
    pub queue: Option<String>,
    /// Address for begin/abort/end notifications.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default)]
    pub memory_per_node: Option<String>,
    #[serde(default)]
    pub tmpspace: Option<String>,
    /// Run in `$TMPDIR` and copy results back, instead of in the work dir.
    #[serde(default = "default_true")]
    pub start_in_temp: bool,
    #[serde(default)]
    pub run: Vec<String>,
}

impl Default for Qsub {
    fn default() -> Self {
        Self {
            jobname: None,
            nnodes: default_nnodes(),
            cores_per_node: default_cores_per_node(),
            walltime: default_walltime(),
            queue: None,
            email: None,
            modules: Vec::new(),
            memory_per_node: None,
            tmpspace: None,
            start_in_temp: default_true(),
            run: Vec::new(),
        }
    }
}

/// Connection record for an SSH/SFTP endpoint. A null hostname means
/// "not remote; use the local filesystem rooted at the configured path".
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Remote {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Private-key material (PEM).
    #[serde(default)]
    pub pkey: Option<String>,
    /// Path to a private-key file.
    #[serde(default)]
    pub key_filename: Option<String>,
    /// Blocking timeout in seconds for all transport operations.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl Remote {
    pub fn is_remote(&self) -> bool {
        self.hostname.is_some()
    }

    /// Exactly one of password or key material must authenticate.
    pub fn validate(&self) -> Result<()> {
        if !self.is_remote() {
            return Ok(());
        }
        let has_password = self.password.is_some();
        let has_key = self.pkey.is_some() || self.key_filename.is_some();
        if has_password == has_key {
            return Err(Error::ConfigInvalid(format!(
                "remote {} must authenticate with either a password or a private key",
                self.hostname.as_deref().unwrap_or_default()
            )));
        }
        Ok(())
    }
}

impl Run {
    /// The per-run output directory name under `output.path`.
    pub fn dirname(&self) -> String {
        format!("{}_{}", self.id, self.name)
    }

    /// The raw command lines for the run's environment.
    pub fn command_lines(&self) -> &[String] {
        match self.environment {
            Environment::Unix => &self.process.unix.run,
            Environment::Windows => &self.process.windows.run,
            Environment::Qsub => &self.process.qsub.run,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(Error::ConfigInvalid(format!(
                "run id must be a positive integer: {}",
                self.name
            )));
        }
        if self.name.is_empty() || self.name.contains(['/', '\\']) || self.name.contains(char::is_whitespace) {
            return Err(Error::ConfigInvalid(format!(
                "run {} name is not usable in paths: {:?}",
                self.id, self.name
            )));
        }
        if let Some(input) = &self.input {
            if let Some(remote) = &input.remote {
                remote.validate()?;
            }
        }
        if let Some(remote) = &self.output.remote {
            remote.validate()?;
        }
        Ok(())
    }
}

fn default_input_path() -> String {
    ".".into()
}

fn default_output_path() -> String {
    "output".into()
}

fn default_port() -> u16 {
    22
}

fn default_nnodes() -> u32 {
    1
}

fn default_cores_per_node() -> u32 {
    16
}

fn default_walltime() -> String {
    "24:00:00".into()
}

fn default_true() -> bool {
    true
}
