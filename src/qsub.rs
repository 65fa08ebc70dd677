use crate::config;
use crate::types::Run;
use crate::{Error, Result};
use std::fmt::Write as _;

/// Ensure a walltime is in `H:MM:SS` form; minutes and seconds are
/// zero-padded, hours are kept as given.
pub fn normalize_walltime(walltime: &str) -> Result<String> {
    let bad = || Error::BadWalltime(walltime.to_string());
    let components: Vec<u64> = walltime
        .split(':')
        .map(|c| c.parse::<u64>().map_err(|_| bad()))
        .collect::<Result<_>>()?;
    match components.as_slice() {
        [h] => Ok(format!("{h}:00:00")),
        [h, m] => Ok(format!("{h}:{m:02}:00")),
        [h, m, s] => Ok(format!("{h}:{m:02}:{s:02}")),
        _ => Err(bad()),
    }
}

/// Deterministically renders the PBS job script for a qsub run. `commands`
/// are the run's already-expanded command lines and `workdir` the absolute
/// path of the run's output directory on the execution host.
pub fn render_job_script(run: &Run, commands: &[String], workdir: &str) -> Result<String> {
    let qsub = &run.process.qsub;
    let jobname: String = qsub
        .jobname
        .clone()
        .unwrap_or_else(|| run.dirname())
        .chars()
        .take(config::QSUB_JOBNAME_LEN)
        .collect();
    let walltime = normalize_walltime(&qsub.walltime)?;
    let nprocesses = qsub.nnodes * qsub.cores_per_node;

    let mut out = String::new();
    out.push_str("#!/bin/bash --login\n");
    let _ = writeln!(out, "#PBS -N {jobname}");
    let _ = writeln!(out, "#PBS -l walltime={walltime}");
    let _ = write!(out, "#PBS -l select={}:ncpus={}", qsub.nnodes, qsub.cores_per_node);
    if let Some(memory) = &qsub.memory_per_node {
        let _ = write!(out, ":mem={memory}");
    }
    if let Some(tmpspace) = &qsub.tmpspace {
        let _ = write!(out, ":tmpspace={tmpspace}");
    }
    out.push('\n');
    out.push_str("#PBS -j oe\n");
    if let Some(queue) = &qsub.queue {
        let _ = writeln!(out, "#PBS -q {queue}");
    }
    if let Some(email) = &qsub.email {
        out.push_str("#PBS -m bae\n");
        let _ = writeln!(out, "#PBS -M {email}");
    }

    out.push_str(
        "\necho \"<qstat -f $PBS_JOBID>\"\n\
         qstat -f $PBS_JOBID\n\
         echo \"</qstat -f $PBS_JOBID>\"\n\n",
    );

    let _ = writeln!(out, "# number of cores per node used\nexport NCORES={}", qsub.cores_per_node);
    let _ = writeln!(out, "# number of processes\nexport NPROCESSES={nprocesses}");
    out.push_str(
        "\n# make sure any symbolic links are resolved to absolute path\n\
         export PBS_O_WORKDIR=$(readlink -f $PBS_O_WORKDIR || echo $PBS_O_WORKDIR)\n\n\
         # set the number of threads to 1\n\
         #   this prevents any system libraries from automatically\n\
         #   using threading\n\
         export OMP_NUM_THREADS=1\n",
    );

    if !qsub.modules.is_empty() {
        let _ = writeln!(
            out,
            "\n# load required modules\nmodule load {}",
            qsub.modules.join(" ")
        );
    }

    if qsub.start_in_temp {
        let _ = write!(
            out,
            "\n# execute in the node's temporary directory\n\
             if [ -z \"$TMPDIR\" ]; then\n    \
                 echo \"TMPDIR is not set\" 1>&2\n    \
                 exit 1\n\
             fi\n\
             cd $TMPDIR\n\
             if [ -n \"$PBS_NODEFILE\" ]; then\n    \
                 for node in $(sort -u $PBS_NODEFILE); do\n        \
                     ssh $node \"cp -pR {workdir}/* \\$TMPDIR/\"\n    \
                 done\n\
             else\n    \
                 cp -pR {workdir}/* $TMPDIR/\n\
             fi\n"
        );
    } else {
        let _ = writeln!(out, "\ncd {workdir}");
    }

    if !commands.is_empty() {
        let _ = writeln!(out, "\n# main commands to run\n{}", commands.join("\n"));
    }

    if !run.output.remove.is_empty() {
        out.push_str("\n# remove output files\n");
        for pattern in &run.output.remove {
            let find_pattern = pattern.replace("**", "*");
            let _ = writeln!(
                out,
                "for path in $(find . -path './{find_pattern}'); do rm -Rf \"$path\"; done"
            );
        }
    }

    if !run.output.rename.is_empty() {
        out.push_str("\n# rename output files\n");
        for (old, new) in &run.output.rename {
            if old.is_empty() {
                continue;
            }
            let _ = writeln!(
                out,
                "find . -depth -name '*{old}*' -execdir bash -c 'mv \"$1\" \"${{1//{old}/{new}}}\"' _ {{}} \\;"
            );
        }
    }

    if qsub.start_in_temp {
        let _ = writeln!(
            out,
            "\n# copy results back to the work directory\ncp -pR $TMPDIR/* {workdir}/"
        );
    }

    Ok(out)
}
