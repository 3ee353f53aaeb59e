use super::{FanOutError, FanOutReport};
use crate::{
    archive::units::Unit,
    transform::{TransformError, Transformer, UnitTransformer},
};
use rayon::{prelude::*, ThreadPoolBuilder};
use std::{
    collections::BTreeSet,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::atomic::{AtomicUsize, Ordering},
};
use tracing::{debug, info, instrument, warn};

/// Executor that spreads the units of one archive over a local pool.
/// The pool only lives for a single `execute` call.
#[derive(Debug)]
pub struct LocalExecutor<'a, T> {
    transformer: &'a UnitTransformer<T>,
    threads: usize,
}

impl<'a, T: Transformer> LocalExecutor<'a, T> {
    pub fn new(transformer: &'a UnitTransformer<T>, threads: usize) -> Self {
        Self {
            transformer,
            threads: threads.max(1),
        }
    }

    /// transform all units concurrently, a failing unit never cancels the others
    #[instrument(skip_all, level = "info", fields(units = units.len()))]
    pub fn execute(&self, units: &[Unit]) -> Result<FanOutReport, FanOutError> {
        debug!("Starting thread pool with {} threads", self.threads);

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .thread_name(|index| format!("fan-out-{index}"))
            .build()?;

        // general counter to provide progress
        let processed = AtomicUsize::new(0);
        let total = units.len();

        let failed = pool.install(|| {
            units
                .par_iter()
                .filter_map(|unit| {
                    let result = catch_unwind(AssertUnwindSafe(|| self.transformer.transform(unit)))
                        .unwrap_or(Err(TransformError::Panicked));

                    debug!(
                        "Done with {}/{total}",
                        processed.fetch_add(1, Ordering::SeqCst) + 1
                    );

                    match result {
                        Ok(()) => None,
                        Err(error) => {
                            warn!(unit = %unit.path().display(), error = %error, "Unit failed");
                            Some(unit.clone())
                        }
                    }
                })
                .collect::<BTreeSet<_>>()
        });

        let report = FanOutReport { total, failed };
        info!("{} of {total} units succeeded", report.succeeded());

        Ok(report)
    }
}
