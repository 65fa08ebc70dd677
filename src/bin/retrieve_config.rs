use anyhow::Result;
use clap::Parser;
use log::error;
use rundeploy::cli::{confirm, select_runs, RetrieveConfigCli};
use rundeploy::{logging, retrieve_outputs, runs_from_config, IfExists, RetrieveOptions};
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = RetrieveConfigCli::parse();
    logging::init(cli.config.log_level);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: RetrieveConfigCli) -> Result<()> {
    if !cli.config.yes {
        let prompt = match cli.config.if_exists {
            IfExists::Remove => Some("Are you sure you wish to remove existing retrievals?"),
            IfExists::Use => Some("Are you sure you wish to overwrite existing retrievals?"),
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
    let options = RetrieveOptions {
        if_exists: cli.config.if_exists,
        path_regex: cli.path_regex,
        ignore_regex: cli.ignore_regex,
    };
    retrieve_outputs(&runs, &cli.outpath, &basepath, &options)?;
    Ok(())
}
