use crate::config;
use crate::qsub::render_job_script;
use crate::resolver::{resolve_inputs, ResolvedInputs};
use crate::types::{Environment, Run};
use crate::vfs::{self, join_rel, VirtualDir};
use crate::{Error, Result};
use chrono::Local;
use itertools::Itertools;
use log::{debug, error, info};
use serde::Serialize;
use std::path::Path;

/// Policy for a per-run output directory that already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum IfExists {
    /// Mark the run failed and skip it.
    #[default]
    Abort,
    /// Delete the directory and start fresh.
    Remove,
    /// Reuse the directory, leaving its contents in place.
    Use,
}

#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    pub if_exists: IfExists,
    /// Fail-fast: promote command-exec failures to run failures. When off,
    /// failures are logged and the remaining commands still run.
    pub exec_errors: bool,
    /// Populate output directories but execute nothing.
    pub test_run: bool,
}

/// Deploys every run in configuration order; runs are independent and
/// processed sequentially. All per-run failures are collected and reported
/// as one terminal [`Error::RunsFailed`].
pub fn deploy_runs(runs: &[Run], basepath: &Path, options: &DeployOptions) -> Result<()> {
    let mut failed = Vec::new();
    for run in runs {
        info!("deploying run {}: {}", run.id, run.name);
        if let Err(err) = deploy_run(run, basepath, options) {
            error!("run {} failed: {err}", run.id);
            failed.push((run.id, run.name.clone()));
        }
    }
    if !failed.is_empty() {
        return Err(Error::RunsFailed(failed));
    }
    Ok(())
}

fn deploy_run(run: &Run, basepath: &Path, options: &DeployOptions) -> Result<()> {
    let resolved = resolve_inputs(run, basepath)?;
    check_basename_collisions(run, &resolved)?;

    let mut out = vfs::open_dir(&run.output.path, run.output.remote.as_ref(), basepath)?;
    let dirname = run.dirname();
    if out.exists(&dirname) {
        match options.if_exists {
            IfExists::Abort => {
                return Err(Error::Invalid(format!(
                    "output dir already exists: {dirname}"
                )))
            }
            IfExists::Remove => {
                info!("removing existing output: {dirname}");
                out.rmtree(&dirname)?;
                out.make_dirs(&dirname)?;
            }
            IfExists::Use => {
                info!("reusing existing output: {dirname}");
            }
        }
    } else {
        out.make_dirs(&dirname)?;
    }

    write_config_dump(run, out.as_mut(), &dirname)?;
    write_materials(&resolved, out.as_mut(), &dirname)?;
    execute(run, &resolved, out.as_mut(), &dirname, options)?;
    apply_remove(run, out.as_mut(), &dirname)?;
    apply_rename(run, out.as_mut(), &dirname)?;
    Ok(())
}

fn check_basename_collisions(run: &Run, resolved: &ResolvedInputs) -> Result<()> {
    let duplicate = resolved
        .files
        .values()
        .map(|m| m.basename.as_str())
        .chain(resolved.scripts.keys().map(String::as_str))
        .duplicates()
        .next();
    if let Some(name) = duplicate {
        return Err(Error::NameCollision {
            id: run.id,
            name: name.to_string(),
        });
    }
    Ok(())
}

#[derive(Serialize)]
struct ConfigDump<'a> {
    config_version: &'a str,
    created: String,
    #[serde(flatten)]
    run: &'a Run,
}

/// Writes the resolved run as `config_<id>.yaml`, suffixing `(1)`, `(2)`, …
/// when the name is taken.
fn write_config_dump(run: &Run, out: &mut dyn VirtualDir, dirname: &str) -> Result<()> {
    let dump = ConfigDump {
        config_version: config::CONFIG_VERSION,
        created: Local::now().to_rfc3339(),
        run,
    };
    let mut name = format!("config_{}.yaml", run.id);
    let mut suffix = 0;
    while out.exists(&join_rel(dirname, &name)) {
        suffix += 1;
        name = format!("config_{}({suffix}).yaml", run.id);
    }
    debug!("writing {name}");
    let text = serde_yaml::to_string(&dump)?;
    out.write_bytes(&join_rel(dirname, &name), text.as_bytes())
}

/// Writes every input file and expanded script, re-applying the recorded
/// permission bits so scripts stay executable.
fn write_materials(
    resolved: &ResolvedInputs,
    out: &mut dyn VirtualDir,
    dirname: &str,
) -> Result<()> {
    for material in resolved.files.values() {
        let path = join_rel(dirname, &material.basename);
        debug!("writing {path}");
        out.write_bytes(&path, &material.content)?;
        out.chmod(&path, material.mode)?;
    }
    for (name, script) in &resolved.scripts {
        let path = join_rel(dirname, name);
        debug!("writing {path}");
        out.write_bytes(&path, script.text.as_bytes())?;
        out.chmod(&path, script.mode)?;
    }
    Ok(())
}

fn execute(
    run: &Run,
    resolved: &ResolvedInputs,
    out: &mut dyn VirtualDir,
    dirname: &str,
    options: &DeployOptions,
) -> Result<()> {
    match run.environment {
        Environment::Unix | Environment::Windows => {
            for cmnd in &resolved.commands {
                if options.test_run {
                    info!("test run, skipping command: {cmnd}");
                    continue;
                }
                if let Err(err) = out.exec_cmnd(cmnd, dirname, true, None) {
                    if options.exec_errors {
                        return Err(err);
                    }
                    error!("{err}");
                }
            }
        }
        Environment::Qsub => {
            let workdir = out.get_abs(dirname)?;
            let script = render_job_script(run, &resolved.commands, &workdir)?;
            out.write_bytes(&join_rel(dirname, config::QSUB_FILENAME), script.as_bytes())?;
            if options.test_run {
                info!("test run, skipping job submission");
                return Ok(());
            }
            if let Err(err) = out.exec_cmnd(config::QSUB_SUBMIT_CMND, dirname, true, None) {
                if options.exec_errors {
                    return Err(err);
                }
                error!("{err}");
            }
        }
    }
    Ok(())
}

/// Deletes every match of every remove pattern, directories recursively.
/// Matches that disappeared with an earlier deletion are ignored.
fn apply_remove(run: &Run, out: &mut dyn VirtualDir, dirname: &str) -> Result<()> {
    for pattern in &run.output.remove {
        let matches = out.glob(&join_rel(dirname, pattern))?;
        for path in matches {
            if out.is_dir(&path) {
                debug!("removing {path} from output");
                out.rmtree(&path)?;
            } else if out.is_file(&path) {
                debug!("removing {path} from output");
                out.remove(&path)?;
            }
        }
    }
    Ok(())
}

/// Renames matched files by substring replacement in their basename,
/// following the insertion order of the rename map.
fn apply_rename(run: &Run, out: &mut dyn VirtualDir, dirname: &str) -> Result<()> {
    for (old, new) in &run.output.rename {
        if old.is_empty() {
            continue;
        }
        let pattern = format!("{dirname}/**/*{old}*");
        for path in out.glob(&pattern)? {
            if !out.is_file(&path) {
                continue;
            }
            let newname = vfs::basename(&path).replace(old.as_str(), new);
            debug!("renaming {path} to {newname}");
            out.rename(&path, &newname)?;
        }
    }
    Ok(())
}
