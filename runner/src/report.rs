use crate::worker::Outcome;
use std::fmt;

/// Summary of a run, only tracked by the lead process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub total: usize,
    pub failed: usize,
    /// already done before the run started
    pub skipped: usize,
}

impl RunReport {
    pub fn new(skipped: usize) -> Self {
        Self {
            skipped,
            ..Default::default()
        }
    }

    pub fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        if !outcome.is_success() {
            self.failed += 1;
        }
    }

    pub fn succeeded(&self) -> usize {
        self.total - self.failed
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "All done. {}/{} archive files successfully processed ({} skipped). Exiting.",
            self.succeeded(),
            self.total,
            self.skipped
        )
    }
}
