use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing::debug;

/// Archive file names that earlier runs finished successfully.
/// Read once at startup, appended to by the lead process only.
#[derive(Debug, Clone, Default)]
pub struct DoneRecord {
    entries: BTreeSet<String>,
}

impl DoneRecord {
    /// read the record, a missing file is an empty record
    pub fn load(path: &Path) -> io::Result<Self> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!(path = ?path, "No done record found, starting fresh");
                Ok(Self::default())
            }
            Err(error) => Err(error),
        }
    }

    pub fn parse(content: &str) -> Self {
        Self {
            entries: content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                // older records sometimes carry the full input path
                .map(|line| match Path::new(line).file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => line.to_string(),
                })
                .collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for DoneRecord {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Append-only handle on the done record
#[derive(Debug)]
pub struct DoneLog {
    path: PathBuf,
    file: File,
}

impl DoneLog {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// append one archive file name and flush it to disk
    pub fn record(&mut self, name: &str) -> io::Result<()> {
        writeln!(self.file, "{name}")?;
        self.file.sync_data()?;

        debug!(path = ?self.path, archive = name, "Recorded archive as done");

        Ok(())
    }
}
