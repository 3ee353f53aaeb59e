use super::ArchiveError;
use std::{
    borrow::Cow,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

/// One independent work item, a directory inside an unpacked archive
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Unit {
    path: PathBuf,
}

impl Unit {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// directory containing the unit
    pub fn base(&self) -> &Path {
        self.path.parent().unwrap_or(Path::new("."))
    }

    /// directory name of the unit
    pub fn id(&self) -> Cow<'_, str> {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_else(|| self.path.to_string_lossy())
    }
}

/// Units found in an unpacked archive together with the directory holding them
#[derive(Debug, Clone)]
pub struct Units {
    root: PathBuf,
    units: Vec<Unit>,
}

impl Units {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn as_slice(&self) -> &[Unit] {
        &self.units
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Unit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }
}

/// sorted direct subdirectories of `path`, symlinks are not followed
fn subdirectories(path: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|source| ArchiveError::UnitScan {
            path: path.to_path_buf(),
            source,
        })?;

        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }

    dirs.sort();

    Ok(dirs)
}

/// Find all units below `root`.
///
/// Some archives wrap all units in a single extra directory. If exactly one
/// subdirectory exists and it has subdirectories of its own, its children are
/// the units. This descends one level only.
pub fn find_units(root: &Path) -> Result<Units, ArchiveError> {
    let mut dirs = subdirectories(root)?;
    let mut units_root = root.to_path_buf();

    if dirs.len() == 1 {
        let nested = subdirectories(&dirs[0])?;

        if !nested.is_empty() {
            units_root = dirs.swap_remove(0);
            dirs = nested;
        }
    }

    if dirs.is_empty() {
        return Err(ArchiveError::NoUnitsFound(root.to_path_buf()));
    }

    Ok(Units {
        root: units_root,
        units: dirs.into_iter().map(Unit::new).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn mkdirs(root: &Path, dirs: &[&str]) {
        for dir in dirs {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
    }

    fn ids(units: &Units) -> Vec<String> {
        units.iter().map(|unit| unit.id().into_owned()).collect()
    }

    #[test]
    fn flat_layout() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), &["mol_2", "mol_1"]);
        fs::write(dir.path().join("README"), "not a unit").unwrap();

        let units = find_units(dir.path()).unwrap();

        assert_eq!(units.root(), dir.path());
        assert_eq!(ids(&units), vec!["mol_1", "mol_2"]);
        assert_eq!(units.as_slice()[0].base(), dir.path());
    }

    #[test]
    fn single_wrapper_is_unwrapped() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), &["GDB-9-Ex/mol_1", "GDB-9-Ex/mol_2"]);

        let units = find_units(dir.path()).unwrap();

        assert_eq!(units.root(), dir.path().join("GDB-9-Ex"));
        assert_eq!(ids(&units), vec!["mol_1", "mol_2"]);
    }

    #[test]
    fn single_unit_without_subdirectories_stays_a_unit() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), &["mol_1"]);
        fs::write(dir.path().join("mol_1/orca.out"), "").unwrap();

        let units = find_units(dir.path()).unwrap();

        assert_eq!(units.root(), dir.path());
        assert_eq!(ids(&units), vec!["mol_1"]);
    }

    #[test]
    fn unwraps_only_one_level() {
        let dir = tempfile::tempdir().unwrap();
        mkdirs(dir.path(), &["outer/inner/mol_1", "outer/inner/mol_2"]);

        let units = find_units(dir.path()).unwrap();

        assert_eq!(units.root(), dir.path().join("outer"));
        assert_eq!(ids(&units), vec!["inner"]);
    }

    #[test]
    fn empty_archive_has_no_units() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("stray.txt"), "").unwrap();

        assert!(matches!(
            find_units(dir.path()),
            Err(ArchiveError::NoUnitsFound(_))
        ));
    }
}
