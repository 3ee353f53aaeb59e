use crate::{
    catalog::{
        done::{DoneLog, DoneRecord},
        ArchiveCatalog, CatalogError, Pending,
    },
    config::{ConfigErrors, RunConfig},
    distributed::{
        dispatch::{dispatch, serve, DispatchError},
        topology::{self, CoordinatorGroup, Topology, TopologyError},
        CommError, Communicator,
    },
    executors::LocalExecutor,
    report::RunReport,
    scratch::{ScratchError, ScratchSpace},
    transform::{Transformer, UnitTransformer},
    worker::ArchiveWorker,
};
use std::{fs, io, path::PathBuf};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Errors that end the run before any archive is handed out
#[derive(Error, Debug)]
pub enum StartupFatal {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigErrors),
    #[error("Scratch space unusable: {0}")]
    ScratchUnwritable(#[from] ScratchError),
    #[error("No archives remaining or none found at {input:?}")]
    EmptyCatalog { input: PathBuf },
    #[error("Failed to list archives: {0}")]
    Catalog(CatalogError),
    #[error("{size} processes share a node, please spawn one process per node")]
    TopologyViolation { size: usize },
    #[error(transparent)]
    Communication(#[from] CommError),
    #[error("Startup failed on rank {0}")]
    Peer(usize),
    #[error("Failed to read done record {path:?}: {source}")]
    DoneRecord { path: PathBuf, source: io::Error },
    #[error("Failed to prepare output location {path:?}: {source}")]
    Output { path: PathBuf, source: io::Error },
}

impl From<CatalogError> for StartupFatal {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Empty { input } => StartupFatal::EmptyCatalog { input },
            error => StartupFatal::Catalog(error),
        }
    }
}

impl From<TopologyError> for StartupFatal {
    fn from(error: TopologyError) -> Self {
        match error {
            TopologyError::Violation { size } => StartupFatal::TopologyViolation { size },
            TopologyError::Communication(error) => StartupFatal::Communication(error),
        }
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Startup(#[from] StartupFatal),
    #[error("Work distribution failed: {0}")]
    Dispatch(#[from] DispatchError),
}

/// What a process does once startup went through
enum Role {
    Lead {
        group: CoordinatorGroup,
        scratch: ScratchSpace,
        pending: Pending,
        done_log: Option<DoneLog>,
    },
    Worker {
        group: CoordinatorGroup,
        scratch: ScratchSpace,
    },
    /// not a node representative, waits for the others
    Idle,
}

fn prepare(topology: &Topology, config: &RunConfig) -> Result<Role, StartupFatal> {
    let Some(group) = topology.coordinator_group.clone() else {
        return Ok(Role::Idle);
    };

    let scratch = ScratchSpace::new(config.scratch_root()?);
    scratch.ensure()?;

    if !group.is_lead() {
        return Ok(Role::Worker { group, scratch });
    }

    let done = DoneRecord::load(&config.done_record).map_err(|source| StartupFatal::DoneRecord {
        path: config.done_record.clone(),
        source,
    })?;
    if done.is_empty() {
        debug!("No archives recorded as done yet");
    } else {
        debug!("{} archives recorded as done", done.len());
    }

    let pending = ArchiveCatalog::load(&config.catalog, &config.input, done)?.list_pending()?;

    fs::create_dir_all(&config.output).map_err(|source| StartupFatal::Output {
        path: config.output.clone(),
        source,
    })?;

    let done_log = if config.record_done {
        Some(
            DoneLog::open(&config.done_record).map_err(|source| StartupFatal::DoneRecord {
                path: config.done_record.clone(),
                source,
            })?,
        )
    } else {
        None
    };

    Ok(Role::Lead {
        group,
        scratch,
        pending,
        done_log,
    })
}

/// Every process reports its startup status, either all continue or all stop
fn agree(comm: &impl Communicator, prepared: Result<Role, StartupFatal>) -> Result<Role, StartupFatal> {
    let status = comm.all_gather(u64::from(prepared.is_err()))?;
    let role = prepared?;

    match status.iter().position(|status| *status != 0) {
        Some(rank) => Err(StartupFatal::Peer(rank)),
        None => Ok(role),
    }
}

/// Run the whole job on this process. Every process of `comm` has to call this.
///
/// Returns the report on the lead process and `None` everywhere else.
pub fn run<C, T>(
    comm: &C,
    config: &RunConfig,
    transformer: &UnitTransformer<T>,
) -> Result<Option<RunReport>, RunError>
where
    C: Communicator,
    T: Transformer,
{
    let topology = topology::build(comm, config.exclusive_nodes).map_err(StartupFatal::from)?;

    let prepared = prepare(&topology, config);
    if let Err(error) = &prepared {
        error!(rank = comm.rank(), "Startup failed: {error}");
    }
    let role = agree(comm, prepared)?;

    let report = match role {
        Role::Lead {
            group,
            scratch,
            pending,
            mut done_log,
        } => {
            info!(
                "Lead process on rank {} with {} node(s)",
                topology.world_rank,
                group.size()
            );

            let worker = ArchiveWorker::new(
                &scratch,
                &config.output,
                &config.output_suffix,
                LocalExecutor::new(transformer, config.fan_out_threads()),
            );

            let mut report = RunReport::new(pending.skipped);
            for item in dispatch(comm, &group, pending.archives, |archive| worker.run(archive)) {
                let (archive, outcome) = item?;
                report.record(outcome);

                if !outcome.is_success() {
                    continue;
                }
                if let Some(log) = done_log.as_mut() {
                    if let Err(error) = log.record(&archive.file_name()) {
                        warn!(archive = %archive, error = ?error, "Failed to record archive as done");
                    }
                }
            }

            Some(report)
        }
        Role::Worker { group, scratch } => {
            let worker = ArchiveWorker::new(
                &scratch,
                &config.output,
                &config.output_suffix,
                LocalExecutor::new(transformer, config.fan_out_threads()),
            );

            let processed = serve(comm, &group, |archive| worker.run(archive))?;
            debug!("Rank {} processed {processed} archives", topology.world_rank);

            None
        }
        Role::Idle => {
            debug!(
                "Rank {} is not a node representative, waiting",
                topology.world_rank
            );
            None
        }
    };

    comm.barrier().map_err(DispatchError::from)?;

    Ok(report)
}
