pub mod pack;
pub mod publish;
pub mod units;

use crate::{executors::FanOutError, scratch::ScratchError};
use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    fmt, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

/// Everything that can make a single archive fail.
/// None of these stop the run, they only degrade the outcome of one archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to acquire scratch directory: {0}")]
    ScratchAcquire(#[from] ScratchError),
    #[error("failed to unpack {archive:?}: {source}")]
    Unpack { archive: PathBuf, source: io::Error },
    #[error("failed to scan {path:?} for units: {source}")]
    UnitScan {
        path: PathBuf,
        source: walkdir::Error,
    },
    #[error("no units found in {0:?}")]
    NoUnitsFound(PathBuf),
    #[error("local fan-out failed: {0}")]
    FanOut(#[from] FanOutError),
    #[error("{failed} of {total} units failed")]
    UnitsFailed { failed: usize, total: usize },
    #[error("failed to build {path:?}: {source}")]
    Pack { path: PathBuf, source: io::Error },
    #[error("failed to publish {from:?} to {to:?}: {source}")]
    Publish {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

/// A compressed container of units, identified by its path
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Archive {
    path: PathBuf,
}

impl Archive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> Cow<'_, str> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| self.path.to_string_lossy())
    }

    /// file name up to the first '.', e.g. `batch_07` for `batch_07.tar.gz`
    pub fn job_id(&self) -> String {
        let name = self.file_name();

        match name.split('.').next() {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => name.into_owned(),
        }
    }

    /// file name of the rebuilt archive
    pub fn output_name(&self, suffix: &str) -> String {
        format!("{}{suffix}.tar.gz", self.job_id())
    }
}

impl fmt::Display for Archive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}
