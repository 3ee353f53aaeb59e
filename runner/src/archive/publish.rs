use super::ArchiveError;
use std::{
    ffi::OsString,
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// prefix of files that are still being copied into the output location
pub const PARTIAL_PREFIX: &str = ".partial_";

/// Move a staged archive into `output_dir`.
///
/// The final name only ever appears fully written: a plain rename when both
/// sides share a filesystem, otherwise a copy to a hidden partial file next to
/// the target followed by a rename.
pub fn publish(staged: &Path, output_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let target = match staged.file_name() {
        Some(name) => output_dir.join(name),
        None => {
            return Err(ArchiveError::Publish {
                from: staged.to_path_buf(),
                to: output_dir.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "staged path has no file name"),
            })
        }
    };

    let result = match fs::rename(staged, &target) {
        Err(error) if error.raw_os_error() == Some(nix::libc::EXDEV) => {
            debug!(staged = ?staged, "Output is on another device, copying");
            copy_then_rename(staged, &target)
        }
        result => result,
    };

    match result {
        Ok(()) => {
            debug!(target = ?target, "Published archive");
            Ok(target)
        }
        Err(source) => Err(ArchiveError::Publish {
            from: staged.to_path_buf(),
            to: target,
            source,
        }),
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut name = OsString::from(PARTIAL_PREFIX);
    name.push(target.file_name().unwrap_or_default());

    target.with_file_name(name)
}

pub(crate) fn copy_then_rename(staged: &Path, target: &Path) -> io::Result<()> {
    let partial = partial_path(target);

    let copied = fs::copy(staged, &partial)
        .and_then(|_| File::open(&partial)?.sync_all())
        .and_then(|_| fs::rename(&partial, target));

    if let Err(error) = copied {
        if let Err(cleanup) = fs::remove_file(&partial) {
            if cleanup.kind() != io::ErrorKind::NotFound {
                warn!(partial = ?partial, error = ?cleanup, "Failed to remove partial copy");
            }
        }

        return Err(error);
    }

    // the staged copy lives in scratch space, which is removed anyway
    if let Err(error) = fs::remove_file(staged) {
        warn!(staged = ?staged, error = ?error, "Failed to remove staged archive");
    }

    Ok(())
}
