use anyhow::Result;
use clap::Parser;
use log::error;
use rundeploy::cli::{confirm, select_runs, RunConfigCli};
use rundeploy::{deploy_runs, logging, runs_from_config, DeployOptions, IfExists};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = RunConfigCli::parse();
    logging::init(cli.config.log_level);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: RunConfigCli) -> Result<()> {
    if !cli.config.yes {
        let prompt = match cli.config.if_exists {
            IfExists::Remove => Some("Are you sure you wish to remove existing outputs?"),
            IfExists::Use => Some("Are you sure you wish to overwrite existing outputs?"),
            IfExists::Abort => None,
        };
        if let Some(prompt) = prompt {
            if !confirm(prompt) {
                return Ok(());
            }
        }
    }

    let basepath = cli.config.basepath.canonicalize()?;
    let runs = runs_from_config(&cli.config.configpath)?;
    let runs = select_runs(runs, cli.config.runs.as_ref());
    let options = DeployOptions {
        if_exists: cli.config.if_exists,
        exec_errors: cli.exec_errors,
        test_run: cli.test_run,
    };
    deploy_runs(&runs, &basepath, &options)?;
    Ok(())
}
