use crate::logging::LogLevel;
use crate::types::Run;
use crate::IfExists;
use clap::{Args, Parser};
use std::io::Write as _;
use std::path::PathBuf;

/// Arguments shared by both front ends.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Yaml config file path
    pub configpath: PathBuf,
    /// Path to use when resolving relative paths in the config file
    #[clap(short, long, default_value = ".")]
    pub basepath: PathBuf,
    /// Subset of run ids, in a delimited list, e.g. -r 1,5-6,7
    #[clap(short, long, value_parser = parse_run_ids)]
    pub runs: Option<RunIds>,
    /// If a run's output directory already exists either abort the run,
    /// remove its contents, or use it without removal
    #[clap(short = 'i', long, alias = "ie", value_enum, default_value_t = IfExists::Abort)]
    pub if_exists: IfExists,
    /// The logging level to output to screen (debug_full allows logging
    /// from external packages)
    #[clap(short = 'l', long, alias = "log", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,
    /// Answer yes to all confirmation prompts
    #[clap(short = 'y', long)]
    pub yes: bool,
}

/// Deploy computational runs from a config.yaml file.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct RunConfigCli {
    #[clap(flatten)]
    pub config: ConfigArgs,
    /// Do not run any executables, only create directories and copy/create files
    #[clap(long)]
    pub test_run: bool,
    /// Stop a run at its first failing command
    #[clap(long)]
    pub exec_errors: bool,
}

/// Retrieve outputs created by runs from a config.yaml file.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct RetrieveConfigCli {
    #[clap(flatten)]
    pub config: ConfigArgs,
    /// Base path to copy run outputs to
    #[clap(short, long, default_value = "outputs")]
    pub outpath: PathBuf,
    /// File pattern to retrieve
    #[clap(short = 'x', long, alias = "rx", default_value = "*")]
    pub path_regex: String,
    /// File patterns to ignore (not copy)
    #[clap(short = 'g', long, alias = "ix", num_args = 1..)]
    pub ignore_regex: Vec<String>,
}

/// A parsed `-r` selection, e.g. `1,5-6,7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunIds(pub Vec<u32>);

fn parse_run_ids(arg: &str) -> Result<RunIds, String> {
    let mut ids = Vec::new();
    for part in arg.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((low, high)) = part.split_once('-') {
            let low: u32 = low
                .trim()
                .parse()
                .map_err(|_| format!("invalid run id range: {part}"))?;
            let high: u32 = high
                .trim()
                .parse()
                .map_err(|_| format!("invalid run id range: {part}"))?;
            if low > high {
                return Err(format!("invalid run id range: {part}"));
            }
            ids.extend(low..=high);
        } else {
            ids.push(
                part.parse()
                    .map_err(|_| format!("invalid run id: {part}"))?,
            );
        }
    }
    if ids.is_empty() {
        return Err("no run ids given".into());
    }
    Ok(RunIds(ids))
}

/// Keeps only the runs whose id is in the selection; no selection keeps all.
pub fn select_runs(runs: Vec<Run>, selection: Option<&RunIds>) -> Vec<Run> {
    match selection {
        Some(RunIds(ids)) => runs
            .into_iter()
            .filter(|run| ids.contains(&run.id))
            .collect(),
        None => runs,
    }
}

/// Interactive yes/no prompt used before destructive `--if-exists` choices.
pub fn confirm(prompt: &str) -> bool {
    print!("{prompt} [y/n]: ");
    std::io::stdout().flush().ok();
    let mut line = String::new();
    if std::io::stdin().read_line(&mut line).is_err() {
        return false;
    }
    matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_lists_support_ranges() {
        assert_eq!(parse_run_ids("1,5-6,7").unwrap(), RunIds(vec![1, 5, 6, 7]));
        assert_eq!(parse_run_ids("3").unwrap(), RunIds(vec![3]));
        assert!(parse_run_ids("6-5").is_err());
        assert!(parse_run_ids("a").is_err());
        assert!(parse_run_ids("").is_err());
    }

    #[test]
    fn select_runs_filters_by_id() {
        let runs: Vec<Run> = serde_yaml::from_str(
            "[{id: 1, name: a}, {id: 2, name: b}, {id: 3, name: c}]",
        )
        .unwrap();
        let selected = select_runs(runs, Some(&RunIds(vec![1, 3])));
        assert_eq!(
            selected.iter().map(|r| r.id).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }

    #[test]
    fn cli_parses_the_documented_flags() {
        use clap::Parser;
        let cli = RunConfigCli::parse_from([
            "run_config",
            "config.yaml",
            "-b",
            "/base",
            "-r",
            "1,5-6",
            "--ie",
            "remove",
            "--log",
            "exec",
            "--test-run",
            "-y",
        ]);
        assert_eq!(cli.config.configpath, PathBuf::from("config.yaml"));
        assert_eq!(cli.config.basepath, PathBuf::from("/base"));
        assert_eq!(cli.config.runs, Some(RunIds(vec![1, 5, 6])));
        assert_eq!(cli.config.if_exists, IfExists::Remove);
        assert_eq!(cli.config.log_level, LogLevel::Exec);
        assert!(cli.test_run);
        assert!(cli.config.yes);
    }

    #[test]
    fn retrieve_cli_defaults() {
        use clap::Parser;
        let cli = RetrieveConfigCli::parse_from(["retrieve_config", "config.yaml"]);
        assert_eq!(cli.outpath, PathBuf::from("outputs"));
        assert_eq!(cli.path_regex, "*");
        assert!(cli.ignore_regex.is_empty());
    }
}
