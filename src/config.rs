/// The version stamped into each `config_<id>.yaml` dump.
pub static CONFIG_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Log target for "executing command" lines, one level above plain info.
pub static EXEC_TARGET: &str = "rundeploy::exec";
/// The job script written into a qsub run's output directory.
pub static QSUB_FILENAME: &str = "run.qsub";
/// Fixed submission command invoked in the output directory.
pub static QSUB_SUBMIT_CMND: &str = "bash -l -c \"qsub run.qsub\"";
/// Schedulers truncate job names; keep ours deterministic.
pub static QSUB_JOBNAME_LEN: usize = 14;
