use crate::types::Run;
use crate::vfs::{self, wildcard_match, VirtualDir};
use crate::{Error, IfExists, Result};
use log::{debug, error, info};
use std::path::Path;

#[derive(Debug, Clone)]
pub struct RetrieveOptions {
    /// Policy for an already-retrieved local run directory.
    pub if_exists: IfExists,
    /// Pattern for the files to retrieve, matched at any depth.
    pub path_regex: String,
    /// Basename patterns to skip.
    pub ignore_regex: Vec<String>,
}

impl Default for RetrieveOptions {
    fn default() -> Self {
        Self {
            if_exists: IfExists::Abort,
            path_regex: "*".into(),
            ignore_regex: Vec::new(),
        }
    }
}

/// Copies each run's output directory back to `outpath` on the local host.
/// Failures are collected per run and reported as [`Error::RunsFailed`].
pub fn retrieve_outputs(
    runs: &[Run],
    outpath: &Path,
    basepath: &Path,
    options: &RetrieveOptions,
) -> Result<()> {
    std::fs::create_dir_all(outpath)?;
    let mut failed = Vec::new();
    for run in runs {
        info!("retrieving run {}: {}", run.id, run.name);
        if let Err(err) = retrieve_run(run, outpath, basepath, options) {
            error!("run {} failed: {err}", run.id);
            failed.push((run.id, run.name.clone()));
        }
    }
    if !failed.is_empty() {
        return Err(Error::RunsFailed(failed));
    }
    Ok(())
}

fn retrieve_run(
    run: &Run,
    outpath: &Path,
    basepath: &Path,
    options: &RetrieveOptions,
) -> Result<()> {
    let mut out = vfs::open_dir(&run.output.path, run.output.remote.as_ref(), basepath)?;
    let dirname = run.dirname();
    if !out.is_dir(&dirname) {
        return Err(Error::NotFound(dirname));
    }

    let target = outpath.join(&dirname);
    if target.exists() {
        match options.if_exists {
            IfExists::Abort => {
                return Err(Error::Invalid(format!(
                    "retrieval target already exists: {}",
                    target.display()
                )))
            }
            IfExists::Remove => {
                info!("removing existing retrieval: {}", target.display());
                std::fs::remove_dir_all(&target)?;
            }
            IfExists::Use => {}
        }
    }
    std::fs::create_dir_all(&target)?;

    let pattern = format!("{dirname}/**/{}", options.path_regex);
    for path in out.glob(&pattern)? {
        if !out.is_file(&path) {
            continue;
        }
        let name = vfs::basename(&path);
        if options
            .ignore_regex
            .iter()
            .any(|pattern| wildcard_match(name, pattern))
        {
            debug!("ignoring {path}");
            continue;
        }
        let relative = path
            .strip_prefix(&format!("{dirname}/"))
            .unwrap_or(&path)
            .to_string();
        debug!("retrieving {path}");
        let local = target.join(&relative);
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut reader = out.open_read(&path)?;
        let mut writer = std::fs::File::create(&local)?;
        std::io::copy(&mut reader, &mut writer)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::new_tmp_dir;

    fn seed_output(tmp: &crate::utils::test_utils::TempDir) -> Run {
        tmp.join_and_write_file("output/1_run/config_1.yaml", "id: 1");
        tmp.join_and_write_file("output/1_run/result.out", "data");
        tmp.join_and_write_file("output/1_run/sub/extra.log", "log");
        serde_yaml::from_str("{id: 1, name: run}").unwrap()
    }

    #[test]
    fn retrieves_the_run_directory_tree() {
        let tmp = new_tmp_dir!();
        let local = new_tmp_dir!();
        let run = seed_output(&tmp);
        retrieve_outputs(
            &[run],
            local.dir(),
            tmp.dir(),
            &RetrieveOptions::default(),
        )
        .unwrap();
        assert!(local.join("1_run/config_1.yaml").is_file());
        assert!(local.join("1_run/result.out").is_file());
        assert!(local.join("1_run/sub/extra.log").is_file());
    }

    #[test]
    fn patterns_filter_what_is_retrieved() {
        let tmp = new_tmp_dir!();
        let local = new_tmp_dir!();
        let run = seed_output(&tmp);
        let options = RetrieveOptions {
            ignore_regex: vec!["*.log".into()],
            ..Default::default()
        };
        retrieve_outputs(&[run.clone()], local.dir(), tmp.dir(), &options).unwrap();
        assert!(local.join("1_run/result.out").is_file());
        assert!(local.join("1_run/config_1.yaml").is_file());
        assert!(!local.join("1_run/sub/extra.log").exists());

        let local = new_tmp_dir!();
        let options = RetrieveOptions {
            path_regex: "*.out".into(),
            ..Default::default()
        };
        retrieve_outputs(&[run], local.dir(), tmp.dir(), &options).unwrap();
        assert!(local.join("1_run/result.out").is_file());
        assert!(!local.join("1_run/config_1.yaml").exists());
    }

    #[test]
    fn missing_run_directory_fails_the_run() {
        let tmp = new_tmp_dir!();
        let local = new_tmp_dir!();
        let run: Run = serde_yaml::from_str("{id: 9, name: gone}").unwrap();
        assert!(matches!(
            retrieve_outputs(
                &[run],
                local.dir(),
                tmp.dir(),
                &RetrieveOptions::default()
            ),
            Err(Error::RunsFailed(failed)) if failed == vec![(9, "gone".to_string())]
        ));
    }
}
