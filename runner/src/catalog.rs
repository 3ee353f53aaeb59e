pub mod done;

use crate::{archive::Archive, config::CatalogConfig};
use done::DoneRecord;
use globset::{GlobBuilder, GlobMatcher};
use ignore::{DirEntry, WalkBuilder};
use itertools::Itertools;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Catalog glob is invalid: {0}")]
    InvalidGlob(#[from] globset::Error),
    #[error("Input location {0:?} is not a directory")]
    MissingInput(PathBuf),
    #[error("No archives remaining or none found at {input:?}")]
    Empty { input: PathBuf },
    #[error("Archives {archives:?} share the job id {job_id}, their outputs would overwrite each other")]
    DuplicateJobId {
        job_id: String,
        archives: Vec<PathBuf>,
    },
}

/// Work that is left for this run
#[derive(Debug, Clone, Default)]
pub struct Pending {
    pub archives: Vec<Archive>,
    // present in the input but already recorded as done
    pub skipped: usize,
}

/// Finds input archives and removes those that were already processed
#[derive(Debug)]
pub struct ArchiveCatalog {
    input: PathBuf,
    matcher: GlobMatcher,
    exclude: Vec<String>,
    done: DoneRecord,
}

impl ArchiveCatalog {
    pub fn load(
        config: &CatalogConfig,
        input: &Path,
        done: DoneRecord,
    ) -> Result<Self, CatalogError> {
        let matcher = GlobBuilder::new(&config.glob)
            .literal_separator(true)
            .build()?
            .compile_matcher();

        debug!("Filtering with glob: {matcher:?}");

        Ok(Self {
            input: input.to_path_buf(),
            matcher,
            exclude: config.exclude.clone(),
            done,
        })
    }

    fn accepts(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();

        // follows symlinks, linked archives count like regular ones
        entry.path().is_file()
            && self.matcher.is_match(entry.file_name())
            && !self.exclude.iter().any(|pattern| name.contains(pattern.as_str()))
    }

    /// all archives in the input location that follow the naming convention
    pub fn scan(&self) -> Result<Vec<Archive>, CatalogError> {
        if !self.input.is_dir() {
            return Err(CatalogError::MissingInput(self.input.clone()));
        }

        let mut builder = WalkBuilder::new(&self.input);
        builder.max_depth(Some(1)).standard_filters(false);

        let mut archives = Vec::new();
        for entry in builder.build() {
            match entry {
                Ok(entry) if entry.depth() == 0 => {}
                Ok(entry) => {
                    if self.accepts(&entry) {
                        archives.push(Archive::new(entry.into_path()));
                    }
                }
                Err(error) => warn!("Failed to search for archives: {error}"),
            }
        }

        Ok(archives.into_iter().sorted().collect())
    }

    /// Archives present in the input but not in the done record.
    /// Records for archives that are gone are ignored.
    pub fn list_pending(&self) -> Result<Pending, CatalogError> {
        let present = self.scan()?;
        let total = present.len();

        // a pending archive must not share its scratch directory and output name with any other
        for (job_id, group) in present.iter().into_group_map_by(|archive| archive.job_id()) {
            if group.len() > 1
                && group
                    .iter()
                    .any(|archive| !self.done.contains(&archive.file_name()))
            {
                return Err(CatalogError::DuplicateJobId {
                    job_id,
                    archives: group
                        .into_iter()
                        .map(|archive| archive.path().to_path_buf())
                        .sorted()
                        .collect(),
                });
            }
        }

        let (skipped, archives): (Vec<_>, Vec<_>) = present
            .into_iter()
            .partition(|archive| self.done.contains(&archive.file_name()));

        if archives.is_empty() {
            return Err(CatalogError::Empty {
                input: self.input.clone(),
            });
        }

        info!(
            "Found {} archive files in {} ({} of {total} already done)",
            archives.len(),
            self.input.to_string_lossy(),
            skipped.len(),
        );

        Ok(Pending {
            archives,
            skipped: skipped.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn catalog(input: &Path, done: &[&str]) -> ArchiveCatalog {
        ArchiveCatalog::load(
            &CatalogConfig::default(),
            input,
            done.iter().copied().collect(),
        )
        .unwrap()
    }

    fn names(archives: &[Archive]) -> Vec<String> {
        archives
            .iter()
            .map(|archive| archive.file_name().into_owned())
            .collect()
    }

    #[test]
    fn done_archives_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["A.tar.gz", "B.tar.gz", "C.tar.gz"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let pending = catalog(dir.path(), &["A.tar.gz", "B.tar.gz"])
            .list_pending()
            .unwrap();

        assert_eq!(names(&pending.archives), vec!["C.tar.gz"]);
        assert_eq!(pending.skipped, 2);
    }

    #[test]
    fn done_but_absent_archives_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("C.tar.gz"), "").unwrap();

        let pending = catalog(dir.path(), &["D.tar.gz"]).list_pending().unwrap();

        assert_eq!(names(&pending.archives), vec!["C.tar.gz"]);
        assert_eq!(pending.skipped, 0);
    }

    #[test]
    fn naming_convention_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "b.tar.gz",
            "a.tar.gz",
            "a-unprocessed.tar.gz",
            "notes.txt",
            ".hidden.tar.gz",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }
        fs::create_dir(dir.path().join("dir.tar.gz")).unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested/deep.tar.gz"), "").unwrap();

        let archives = catalog(dir.path(), &[]).scan().unwrap();

        assert_eq!(
            names(&archives),
            vec![".hidden.tar.gz", "a.tar.gz", "b.tar.gz"]
        );
    }

    #[test]
    fn everything_done_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("A.tar.gz"), "").unwrap();

        assert!(matches!(
            catalog(dir.path(), &["A.tar.gz"]).list_pending(),
            Err(CatalogError::Empty { .. })
        ));
    }

    #[test]
    fn symlinked_archives_are_picked_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = tempfile::tempdir().unwrap();
        fs::write(store.path().join("A.tar.gz"), "").unwrap();
        std::os::unix::fs::symlink(store.path().join("A.tar.gz"), dir.path().join("A.tar.gz"))
            .unwrap();
        std::os::unix::fs::symlink(store.path().join("gone.tar.gz"), dir.path().join("B.tar.gz"))
            .unwrap();

        let pending = catalog(dir.path(), &[]).list_pending().unwrap();

        assert_eq!(names(&pending.archives), vec!["A.tar.gz"]);
    }

    #[test]
    fn shared_job_ids_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["gdb9_part.001.tar.gz", "gdb9_part.002.tar.gz", "other.tar.gz"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        match catalog(dir.path(), &[]).list_pending() {
            Err(CatalogError::DuplicateJobId { job_id, archives }) => {
                assert_eq!(job_id, "gdb9_part");
                assert_eq!(
                    archives,
                    vec![
                        dir.path().join("gdb9_part.001.tar.gz"),
                        dir.path().join("gdb9_part.002.tar.gz"),
                    ]
                );
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn shared_job_ids_among_done_archives_are_fine() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["gdb9_part.001.tar.gz", "gdb9_part.002.tar.gz", "other.tar.gz"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let pending = catalog(dir.path(), &["gdb9_part.001.tar.gz", "gdb9_part.002.tar.gz"])
            .list_pending()
            .unwrap();

        assert_eq!(names(&pending.archives), vec!["other.tar.gz"]);
    }

    #[test]
    fn missing_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            catalog(&dir.path().join("gone"), &[]).scan(),
            Err(CatalogError::MissingInput(_))
        ));
    }

    #[test]
    fn empty_input_is_empty() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            catalog(dir.path(), &[]).list_pending(),
            Err(CatalogError::Empty { .. })
        ));
    }
}
