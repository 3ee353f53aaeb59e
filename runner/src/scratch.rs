use nix::unistd::{access, AccessFlags};
use std::{
    fs, io,
    ops::Deref,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, error};

#[derive(Error, Debug)]
pub enum ScratchError {
    #[error("scratch root {path:?} is not writable: {source}")]
    Unwritable { path: PathBuf, source: io::Error },
    #[error("scratch directory {0:?} already exists")]
    AlreadyExists(PathBuf),
    #[error("failed to create scratch directory {path:?}: {source}")]
    Create { path: PathBuf, source: io::Error },
}

/// Node-local staging area, only ever used for ephemeral data
#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// create the root if necessary and make sure we may write into it
    pub fn ensure(&self) -> Result<(), ScratchError> {
        let unwritable = |source| ScratchError::Unwritable {
            path: self.root.clone(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(unwritable)?;
        access(self.root.as_path(), AccessFlags::W_OK | AccessFlags::X_OK)
            .map_err(|errno| unwritable(io::Error::from(errno)))?;

        debug!(root = ?self.root, "Scratch space is writable");

        Ok(())
    }

    /// Claim a directory for `id`. Fails if it already exists, so two workers
    /// on one node can never share a directory.
    pub fn acquire(&self, id: &str) -> Result<ScratchDir, ScratchError> {
        let path = self.root.join(id);

        match fs::create_dir(&path) {
            Ok(()) => {
                debug!(path = ?path, "Acquired scratch directory");
                Ok(ScratchDir { path })
            }
            Err(error) if error.kind() == io::ErrorKind::AlreadyExists => {
                Err(ScratchError::AlreadyExists(path))
            }
            Err(source) => Err(ScratchError::Create { path, source }),
        }
    }
}

/// An acquired scratch directory, removed with all its content on drop
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = ?self.path, "Released scratch directory"),
            Err(error) => error!(
                path = ?self.path,
                error = ?error,
                "Couldn't remove scratch directory, continuing"
            ),
        }
    }
}

impl Deref for ScratchDir {
    type Target = Path;

    fn deref(&self) -> &Self::Target {
        &self.path
    }
}
