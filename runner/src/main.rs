mod archive;
mod catalog;
mod config;
mod distributed;
mod executors;
mod pipeline;
mod report;
mod scratch;
mod transform;
mod worker;

#[cfg(test)]
mod test_support;

use clap::Parser;
use config::RunConfig;
use distributed::Communicator;
use pipeline::run;
use report::RunReport;
use std::{path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use transform::{artifacts::ArtifactCheck, exec::ExecTransformer, UnitTransformer};

/// Applies the smearing transformation to every molecule of a directory of archives
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML run configuration
    #[arg(long, default_value = "smear.yaml")]
    config: PathBuf,

    /// directory holding the input archives
    #[arg(long)]
    input: Option<PathBuf>,

    /// directory receiving the rebuilt archives
    #[arg(long)]
    output: Option<PathBuf>,

    /// node-local staging root
    #[arg(long)]
    scratch: Option<PathBuf>,

    /// units processed concurrently per node
    #[arg(long)]
    threads: Option<usize>,

    /// simulate one process per listed host (in-process backend only)
    #[arg(long, value_delimiter = ',')]
    hosts: Vec<String>,
}

fn load_config(cli: &Cli) -> Option<RunConfig> {
    let mut config = match RunConfig::load(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            error!("{error}");
            return None;
        }
    };

    if let Some(input) = &cli.input {
        config.input = input.clone();
    }
    if let Some(output) = &cli.output {
        config.output = output.clone();
    }
    if let Some(scratch) = &cli.scratch {
        config.scratch = Some(scratch.clone());
    }
    if cli.threads.is_some() {
        config.threads = cli.threads;
    }

    if config.preflight_checks() {
        error!("Errors found in configuration, aborting");
        return None;
    }

    Some(config)
}

fn print_report(report: &RunReport) {
    info!(
        total = report.total,
        failed = report.failed,
        skipped = report.skipped,
        "Run finished"
    );
    println!("{report}");
}

#[cfg(not(feature = "mpi"))]
fn execute<T: transform::Transformer>(
    cli: &Cli,
    config: &RunConfig,
    transformer: &UnitTransformer<T>,
) -> ExitCode {
    use distributed::{threads::run_cluster, util::host_identity};
    use pipeline::RunError;

    let hosts = if cli.hosts.is_empty() {
        vec![host_identity(None)]
    } else {
        cli.hosts.clone()
    };

    let results = run_cluster(&hosts, |comm| match run(&comm, config, transformer) {
        Err(RunError::Dispatch(error)) => {
            error!("Rank {} lost the work distribution: {error}", comm.rank());
            comm.abort(1)
        }
        result => result,
    });

    let results = match results {
        Ok(results) => results,
        Err(error) => {
            error!("{error}");
            return ExitCode::FAILURE;
        }
    };

    let mut code = ExitCode::SUCCESS;
    for result in results {
        match result {
            Ok(Some(report)) => print_report(&report),
            Ok(None) => {}
            Err(_) => code = ExitCode::FAILURE,
        }
    }

    code
}

#[cfg(feature = "mpi")]
fn execute<T: transform::Transformer>(
    cli: &Cli,
    config: &RunConfig,
    transformer: &UnitTransformer<T>,
) -> ExitCode {
    use distributed::mpi::MpiCommunicator;
    use tracing::warn;

    if !cli.hosts.is_empty() {
        warn!("--hosts is ignored with the MPI backend");
    }

    let comm = match MpiCommunicator::initialize() {
        Ok(comm) => comm,
        Err(error) => {
            error!("{error}");
            return ExitCode::FAILURE;
        }
    };

    match run(&comm, config, transformer) {
        Ok(Some(report)) => print_report(&report),
        Ok(None) => {}
        Err(error) => {
            error!("Rank {} stopping the job: {error}", comm.rank());
            comm.abort(1)
        }
    }

    ExitCode::SUCCESS
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();

    let Some(config) = load_config(&cli) else {
        return ExitCode::FAILURE;
    };

    let artifacts = match ArtifactCheck::compile(&config.transform.artifacts) {
        Ok(artifacts) => artifacts,
        Err(errors) => {
            for (glob, error) in errors {
                error!("Failed to compile artifact glob {glob}: {error}");
            }
            return ExitCode::FAILURE;
        }
    };

    let transformer = UnitTransformer::new(ExecTransformer::load(&config.transform), artifacts);

    execute(&cli, &config, &transformer)
}
