//! Fixtures shared by the unit and end-to-end tests

use crate::{
    archive::{units::Unit, Archive},
    config::default_artifacts,
    transform::{artifacts::ArtifactCheck, fake::FnTransformer, TransformError, Transformer, UnitTransformer},
};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{fs, fs::File, path::Path};

/// Write `<dir>/<name>` holding one directory per unit, optionally below a wrapper directory
pub fn make_archive(dir: &Path, name: &str, wrapper: Option<&str>, units: &[&str]) -> Archive {
    let staging = tempfile::tempdir().unwrap();
    let base = match wrapper {
        Some(wrapper) => staging.path().join(wrapper),
        None => staging.path().to_path_buf(),
    };

    for unit in units {
        fs::create_dir_all(base.join(unit)).unwrap();
        fs::write(base.join(unit).join("orca.out"), format!("output of {unit}")).unwrap();
    }

    let path = dir.join(name);
    let encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);
    if let Some(wrapper) = wrapper {
        builder.append_dir_all(wrapper, &base).unwrap();
    } else {
        for unit in units {
            builder.append_dir_all(unit, base.join(unit)).unwrap();
        }
    }
    builder.into_inner().unwrap().finish().unwrap();

    Archive::new(path)
}

/// paths of all regular files inside a tar.gz
pub fn archive_entries(path: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));

    archive
        .entries()
        .unwrap()
        .map(Result::unwrap)
        .filter(|entry| entry.header().entry_type().is_file())
        .map(|entry| entry.path().unwrap().to_string_lossy().into_owned())
        .collect()
}

/// Writes the default artifacts into every unit except the `failing` ones,
/// which return cleanly without output.
pub fn smearing_transformer(failing: &[&str]) -> UnitTransformer<impl Transformer> {
    let failing: Vec<String> = failing.iter().map(|name| name.to_string()).collect();

    UnitTransformer::new(
        FnTransformer::new(move |unit: &Unit| {
            if failing.iter().any(|name| unit.id() == name.as_str()) {
                return Ok(());
            }

            fs::write(unit.path().join("EXC-smooth.DAT"), "3.1 0.2")
                .and_then(|_| {
                    fs::write(
                        unit.path().join(format!("abs_spectrum_{}.png", unit.id())),
                        "png",
                    )
                })
                .map_err(TransformError::Inspect)
        }),
        ArtifactCheck::compile(&default_artifacts()).unwrap(),
    )
}
