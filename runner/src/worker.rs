use crate::{
    archive::{pack, publish, units, Archive, ArchiveError},
    executors::LocalExecutor,
    scratch::ScratchSpace,
    transform::Transformer,
};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::{
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{error, info, instrument, warn};

/// Terminal state of one archive
#[derive(Serialize_repr, Deserialize_repr, PartialEq, Eq, Debug, Clone, Copy)]
#[repr(u8)]
pub enum Outcome {
    Succeeded = 0,
    Failed = 1,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Succeeded
    }
}

/// Stages, transforms, repackages and publishes a single archive
#[derive(Debug)]
pub struct ArchiveWorker<'a, T> {
    scratch: &'a ScratchSpace,
    output: &'a Path,
    output_suffix: &'a str,
    executor: LocalExecutor<'a, T>,
}

impl<'a, T: Transformer> ArchiveWorker<'a, T> {
    pub fn new(
        scratch: &'a ScratchSpace,
        output: &'a Path,
        output_suffix: &'a str,
        executor: LocalExecutor<'a, T>,
    ) -> Self {
        Self {
            scratch,
            output,
            output_suffix,
            executor,
        }
    }

    /// process `archive` and fold every error into `Outcome::Failed`
    #[instrument(skip(self), fields(archive = %archive))]
    pub fn run(&self, archive: &Archive) -> Outcome {
        let start = Instant::now();
        info!("Processing {}", archive.path().display());

        match self.process(archive) {
            Ok(published) => {
                info!(
                    output = ?published,
                    "Done processing in {:.2} seconds",
                    start.elapsed().as_secs_f64()
                );

                Outcome::Succeeded
            }
            Err(error) => {
                error!(error = %error, "Failed to process archive");

                Outcome::Failed
            }
        }
    }

    fn process(&self, archive: &Archive) -> Result<PathBuf, ArchiveError> {
        // removed on every return path once dropped
        let scratch = self.scratch.acquire(&archive.job_id())?;

        pack::unpack(archive.path(), &scratch)?;

        let units = units::find_units(&scratch)?;
        info!("Processing {} units", units.len());

        let report = self.executor.execute(units.as_slice())?;

        // failed units stay out of the output, the rest is kept for inspection
        let survivors = units.iter().filter(|unit| !report.is_failed(unit));
        let staged = scratch.join(archive.output_name(self.output_suffix));
        pack::pack(units.root(), survivors, &staged)?;

        let published = publish::publish(&staged, self.output)?;

        if !report.failed.is_empty() {
            warn!(
                output = ?published,
                "Published partial archive without {} failed units",
                report.failed.len()
            );

            return Err(ArchiveError::UnitsFailed {
                failed: report.failed.len(),
                total: report.total,
            });
        }

        Ok(published)
    }
}
