use crate::transform::artifacts::ArtifactCheck;
use globset::GlobBuilder;
use serde::{Deserialize, Serialize};
use std::{
    env,
    fs::File,
    io::{BufReader, Error},
    num::NonZeroUsize,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::Duration,
};
use thiserror::Error;
use tracing::{error, warn};

// check if a file is executable
pub fn check_executable(path: &Path) -> Result<bool, ConfigErrors> {
    if !path.is_file() {
        Err(ConfigErrors::FileNotFound)
    } else {
        match File::open(path).map(|file| file.metadata()) {
            Ok(Ok(metadata)) => Ok((metadata.mode() & 0o111) != 0),
            Ok(Err(e)) | Err(e) => Err(ConfigErrors::MetadataNotFound(e)),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Globs were invalid")]
    InvalidGlobs(#[from] globset::Error),
    #[error("File not found")]
    FileNotFound,
    #[error("Metadata not found")]
    MetadataNotFound(#[source] Error),
    #[error("Failed to read config file {path:?}: {source}")]
    ReadConfig { path: PathBuf, source: Error },
    #[error("Failed to parse config: {0}")]
    ParseConfig(#[from] serde_yaml::Error),
    #[error("Unable to determine the current user for the default scratch root")]
    UnknownUser,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    // directory holding the compressed input archives, never written to
    pub input: PathBuf,
    // directory receiving the rebuilt archives
    #[serde(default = "default_output_path")]
    pub output: PathBuf,
    // node-local staging root, defaults to /tmp/<username>
    #[serde(default)]
    pub scratch: Option<PathBuf>,
    // list of archive file names that were already processed by earlier runs
    #[serde(default = "default_done_record", alias = "done")]
    pub done_record: PathBuf,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default = "default_output_suffix")]
    pub output_suffix: String,
    // size of the per-archive pool, falls back to the available parallelism
    #[serde(default)]
    pub threads: Option<usize>,
    #[serde(default = "default_true")]
    pub exclusive_nodes: bool,
    #[serde(default = "default_true")]
    pub record_done: bool,
    pub transform: TransformConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_glob")]
    pub glob: String,
    // archives whose file name contains any of these are never picked up
    #[serde(default = "default_catalog_exclude")]
    pub exclude: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            glob: default_catalog_glob(),
            exclude: default_catalog_exclude(),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct TransformConfig {
    pub exec: PathBuf,
    #[serde(default)]
    pub params: Vec<String>,
    // timeout in seconds for a single unit
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub bounds: SpectrumBounds,
    #[serde(default = "default_artifacts")]
    pub artifacts: Vec<ArtifactRule>,
}

impl TransformConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Optional energy/ wavelength window handed to the transformer
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SpectrumBounds {
    pub min_energy: Option<f64>,
    pub max_energy: Option<f64>,
    pub min_wavelength: Option<f64>,
    pub max_wavelength: Option<f64>,
}

impl Default for SpectrumBounds {
    fn default() -> Self {
        Self {
            min_energy: None,
            max_energy: Some(70.0),
            min_wavelength: None,
            max_wavelength: None,
        }
    }
}

/// A file that has to exist in a unit directory after the transformation
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ArtifactRule {
    pub glob: String,
    // exact number of matches, `None` means at least one
    #[serde(default)]
    pub count: Option<usize>,
}

impl RunConfig {
    /// read and deserialize a config file
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(serde_yaml::from_reader(BufReader::new(file))?)
    }

    /// root of the node-local staging area
    pub fn scratch_root(&self) -> Result<PathBuf, ConfigErrors> {
        match &self.scratch {
            Some(path) => Ok(path.clone()),
            None => current_user()
                .map(|user| PathBuf::from("/tmp").join(user))
                .ok_or(ConfigErrors::UnknownUser),
        }
    }

    /// number of units processed concurrently on one node
    pub fn fan_out_threads(&self) -> usize {
        self.threads.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1)
        })
    }

    pub fn preflight_checks(&mut self) -> bool {
        // attempt to catch all errors instead of piece-by-piece to make debugging easier for users
        let mut contains_error = false;

        if !self.input.is_dir() {
            error!(
                "input ({}) is not a directory",
                self.input.to_string_lossy()
            );
            contains_error = true;
        }

        if let Err(e) = GlobBuilder::new(&self.catalog.glob)
            .literal_separator(true)
            .build()
        {
            error!("catalog.glob ({}) is invalid: {e}", self.catalog.glob);
            contains_error = true;
        }

        let exec = &self.transform.exec;
        match check_executable(exec) {
            Ok(true) => {}
            Ok(false) => {
                error!(
                    "transform.exec target {} is not executable",
                    exec.to_string_lossy()
                );
                contains_error = true;
            }
            Err(ConfigErrors::FileNotFound) => {
                error!(
                    "Failed to find transform.exec. Either not a file or not found at {}",
                    exec.to_string_lossy()
                );
                contains_error = true;
            }
            Err(e) => {
                error!(
                    "Failed to determine if transform.exec ({}) is an executable: {e}",
                    exec.to_string_lossy()
                );
                contains_error = true;
            }
        }

        if self.transform.timeout == 0 {
            error!("transform.timeout cannot be 0, every unit would time out immediately");
            contains_error = true;
        }

        if let Err(compile_errors) = ArtifactCheck::compile(&self.transform.artifacts) {
            for (glob, err) in compile_errors {
                error!("Failed to compile artifact glob {glob}: {err}");
            }
            contains_error = true;
        }

        if self.transform.artifacts.is_empty() {
            warn!("transform.artifacts is empty, every unit will be treated as successful");
        }

        if self.threads == Some(0) {
            error!("threads cannot be 0");
            contains_error = true;
        }

        if self.output_suffix.contains('/') {
            error!("output_suffix ({}) must not contain '/'", self.output_suffix);
            contains_error = true;
        }

        contains_error
    }
}

fn current_user() -> Option<String> {
    match nix::unistd::User::from_uid(nix::unistd::getuid()) {
        Ok(Some(user)) => Some(user.name),
        Ok(None) | Err(_) => env::var("USER").ok().filter(|user| !user.is_empty()),
    }
}

fn default_output_path() -> PathBuf {
    PathBuf::from_str("./dataset_out").unwrap_or_default()
}

fn default_done_record() -> PathBuf {
    PathBuf::from("tar_done.txt")
}

fn default_output_suffix() -> String {
    "-gaussian-smearing".to_string()
}

fn default_catalog_glob() -> String {
    "*.tar.gz".to_string()
}

fn default_catalog_exclude() -> Vec<String> {
    vec!["unprocessed".to_string()]
}

fn default_timeout() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_artifacts() -> Vec<ArtifactRule> {
    vec![
        ArtifactRule {
            glob: "EXC-smooth.DAT".to_string(),
            count: None,
        },
        ArtifactRule {
            glob: "abs_spectrum_*.png".to_string(),
            count: Some(1),
        },
    ]
}
