mod local;

pub use local::LocalExecutor;

use crate::archive::units::Unit;
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FanOutError {
    #[error("Failed to build the local pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Per-archive result of a local fan-out
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    pub total: usize,
    // units that failed, ordered by path
    pub failed: BTreeSet<Unit>,
}

impl FanOutReport {
    pub fn succeeded(&self) -> usize {
        self.total - self.failed.len()
    }

    pub fn is_failed(&self, unit: &Unit) -> bool {
        self.failed.contains(unit)
    }
}
