use crate::types::Run;
use crate::vfs::{self, VirtualDir};
use crate::{Error, Result};
use indexmap::IndexMap;
use log::debug;
use regex::Regex;
use std::path::Path;

static VAR_TAG: &str = r"@v\{([^}]+)\}";
static FILE_TAG: &str = r"@f\{([^}]+)\}";

/// An input file read from the input directory, keyed by its logical id.
pub struct FileMaterial {
    pub basename: String,
    pub content: Vec<u8>,
    pub mode: u32,
}

/// A script with all template tags expanded, keyed by basename.
pub struct ScriptMaterial {
    pub text: String,
    pub mode: u32,
}

/// Everything the orchestrator writes into and executes in the output
/// directory. Scripts and files retain declaration order.
#[derive(Default)]
pub struct ResolvedInputs {
    pub variables: IndexMap<String, String>,
    pub files: IndexMap<String, FileMaterial>,
    pub scripts: IndexMap<String, ScriptMaterial>,
    pub commands: Vec<String>,
}

/// Gathers a run's inputs through its input virtual directory and expands
/// `@v{name}` and `@f{name}` tags. A file's logical id is bound to the file's
/// basename as a variable unless the run already defines it, so command lines
/// can reference the stored name via `@v{id}`.
pub fn resolve_inputs(run: &Run, basepath: &Path) -> Result<ResolvedInputs> {
    let mut resolved = ResolvedInputs::default();

    if let Some(input) = &run.input {
        let mut dir = vfs::open_dir(&input.path, input.remote.as_ref(), basepath)?;

        for (name, value) in &input.variables {
            resolved.variables.insert(name.clone(), value.to_string());
        }

        for (logical_id, path) in &input.files {
            if !dir.is_file(path) {
                return Err(Error::InputMissing {
                    id: run.id,
                    path: path.clone(),
                });
            }
            let mode = dir.stat(path)?.mode;
            let content = dir.read_bytes(path)?;
            let basename = vfs::basename(path).to_string();
            if resolved.files.values().any(|m| m.basename == basename) {
                return Err(Error::NameCollision {
                    id: run.id,
                    name: basename,
                });
            }
            resolved
                .variables
                .entry(logical_id.clone())
                .or_insert_with(|| basename.clone());
            resolved.files.insert(
                logical_id.clone(),
                FileMaterial {
                    basename,
                    content,
                    mode,
                },
            );
        }

        for script_path in &input.scripts {
            if !dir.is_file(script_path) {
                return Err(Error::InputMissing {
                    id: run.id,
                    path: script_path.clone(),
                });
            }
            debug!("reading script: {script_path}");
            let mode = dir.stat(script_path)?.mode;
            let text = dir.read_string(script_path)?;
            let basename = vfs::basename(script_path).to_string();
            if resolved.scripts.contains_key(&basename) {
                return Err(Error::NameCollision {
                    id: run.id,
                    name: basename,
                });
            }
            let text = expand_variables(&text, &resolved.variables, run.id, script_path)?;
            let text = expand_file_tags(&text, &resolved.files, run.id, script_path)?;
            resolved
                .scripts
                .insert(basename, ScriptMaterial { text, mode });
        }
    }

    for line in run.command_lines() {
        resolved
            .commands
            .push(expand_variables(line, &resolved.variables, run.id, line)?);
    }

    Ok(resolved)
}

/// Single-pass `@v{name}` expansion; replacements are not re-scanned.
pub fn expand_variables(
    text: &str,
    variables: &IndexMap<String, String>,
    id: u32,
    context: &str,
) -> Result<String> {
    let re = Regex::new(VAR_TAG).expect("valid tag regex");
    replace_tags(&re, text, |name| variables.get(name).cloned()).map_err(|name| {
        Error::VarMissing {
            id,
            name,
            context: context.to_string(),
        }
    })
}

/// Single-pass `@f{name}` expansion embedding the referenced file's text.
/// Not applied to command lines.
fn expand_file_tags(
    text: &str,
    files: &IndexMap<String, FileMaterial>,
    id: u32,
    context: &str,
) -> Result<String> {
    let re = Regex::new(FILE_TAG).expect("valid tag regex");
    replace_tags(&re, text, |name| {
        files
            .get(name)
            .map(|m| String::from_utf8_lossy(&m.content).into_owned())
    })
    .map_err(|name| Error::FileMissing {
        id,
        name,
        context: context.to_string(),
    })
}

fn replace_tags(
    re: &Regex,
    text: &str,
    mut lookup: impl FnMut(&str) -> Option<String>,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in re.captures_iter(text) {
        let tag = caps.get(0).expect("whole match");
        let name = caps.get(1).expect("tag name").as_str();
        let value = lookup(name).ok_or_else(|| name.to_string())?;
        out.push_str(&text[last..tag.start()]);
        out.push_str(&value);
        last = tag.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}
