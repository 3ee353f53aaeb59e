pub mod artifacts;
pub mod exec;

use crate::archive::units::Unit;
use artifacts::ArtifactCheck;
use std::{io, process::ExitStatus, time::Duration};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("Failed to spawn transformer: {0}")]
    Spawn(#[source] io::Error),
    #[error("Failed to wait for transformer: {0}")]
    Wait(#[source] io::Error),
    #[error("Transformer timed out after {0:?}")]
    Timeout(Duration),
    #[error("Transformer exited with {status}: {stderr}")]
    Status { status: ExitStatus, stderr: String },
    #[error("Transformer panicked")]
    Panicked,
    #[error("Failed to inspect unit directory: {0}")]
    Inspect(#[source] io::Error),
    #[error("Expected artifact {glob} missing (found {found})")]
    MissingArtifact { glob: String, found: usize },
}

/// The external routine applied to every unit.
/// Implementations are shared across the local pool and must not keep per-unit state.
pub trait Transformer: Send + Sync {
    fn apply(&self, unit: &Unit) -> Result<(), TransformError>;
}

/// Runs a `Transformer` and checks that it left the expected files behind.
/// A clean return from the transformer alone does not count as success.
#[derive(Debug)]
pub struct UnitTransformer<T> {
    inner: T,
    artifacts: ArtifactCheck,
}

impl<T: Transformer> UnitTransformer<T> {
    pub fn new(inner: T, artifacts: ArtifactCheck) -> Self {
        Self { inner, artifacts }
    }

    #[instrument(level = "debug", skip_all, fields(unit = %unit.id()))]
    pub fn transform(&self, unit: &Unit) -> Result<(), TransformError> {
        self.inner.apply(unit)?;
        self.artifacts.verify(unit.path())?;

        debug!("Unit transformed");

        Ok(())
    }
}
