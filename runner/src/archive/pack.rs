use super::{units::Unit, ArchiveError};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{
    fs::File,
    io::{self, BufReader, BufWriter},
    path::Path,
};
use tracing::debug;

/// Unpack a gzip compressed tar archive into `into`.
/// Entries that would end up outside of `into` are refused by the tar reader.
pub fn unpack(archive: &Path, into: &Path) -> Result<(), ArchiveError> {
    let wrap = |source| ArchiveError::Unpack {
        archive: archive.to_path_buf(),
        source,
    };

    let file = File::open(archive).map_err(wrap)?;
    let mut reader = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    reader.unpack(into).map_err(wrap)?;

    debug!(archive = ?archive, into = ?into, "Unpacked archive");

    Ok(())
}

/// Build a gzip compressed tar archive at `dest` containing `units`.
/// Entries are named relative to `root`, the directory holding the units.
pub fn pack<'a, I>(root: &Path, units: I, dest: &Path) -> Result<usize, ArchiveError>
where
    I: IntoIterator<Item = &'a Unit>,
{
    write_archive(root, units, dest).map_err(|source| ArchiveError::Pack {
        path: dest.to_path_buf(),
        source,
    })
}

fn write_archive<'a, I>(root: &Path, units: I, dest: &Path) -> io::Result<usize>
where
    I: IntoIterator<Item = &'a Unit>,
{
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);

    let mut count = 0;
    for unit in units {
        let name = unit.path().strip_prefix(root).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{:?} is not below {root:?}", unit.path()),
            )
        })?;
        builder.append_dir_all(name, unit.path())?;
        count += 1;
    }

    let writer = builder.into_inner()?.finish()?;
    let file = writer.into_inner().map_err(io::IntoInnerError::into_error)?;
    file.sync_all()?;

    debug!(dest = ?dest, units = count, "Packed archive");

    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::units::find_units;
    use std::fs;

    #[test]
    fn packs_only_selected_units() {
        let source = tempfile::tempdir().unwrap();
        for unit in ["mol_1", "mol_2", "mol_3"] {
            fs::create_dir(source.path().join(unit)).unwrap();
            fs::write(source.path().join(unit).join("orca.out"), unit).unwrap();
        }
        let units = find_units(source.path()).unwrap();
        let kept = units
            .iter()
            .filter(|unit| unit.id() != "mol_2")
            .collect::<Vec<_>>();

        let staged = source.path().join("out.tar.gz");
        assert_eq!(pack(units.root(), kept, &staged).unwrap(), 2);

        let target = tempfile::tempdir().unwrap();
        unpack(&staged, target.path()).unwrap();

        assert!(target.path().join("mol_1/orca.out").is_file());
        assert!(!target.path().join("mol_2").exists());
        assert_eq!(
            fs::read_to_string(target.path().join("mol_3/orca.out")).unwrap(),
            "mol_3"
        );
    }

    #[test]
    fn corrupt_archive_is_an_unpack_error() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let into = dir.path().join("into");
        fs::create_dir(&into).unwrap();

        assert!(matches!(
            unpack(&archive, &into),
            Err(ArchiveError::Unpack { .. })
        ));
    }

    #[test]
    fn entries_escaping_the_target_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("escape.tar.gz");

        let encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        let mut header = tar::Header::new_gnu();
        // set_path refuses `..`, so write the raw name
        let name = b"../evil";
        header.as_old_mut().name[..name.len()].copy_from_slice(name);
        header.set_size(4);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let into = dir.path().join("scratch").join("batch_1");
        fs::create_dir_all(&into).unwrap();

        // refused entries may be skipped or reported, they must never land outside
        let _ = unpack(&archive, &into);

        assert!(!dir.path().join("scratch").join("evil").exists());
        assert!(!dir.path().join("evil").exists());
    }

    #[test]
    fn missing_archive_is_an_unpack_error() {
        let dir = tempfile::tempdir().unwrap();

        assert!(matches!(
            unpack(&dir.path().join("gone.tar.gz"), dir.path()),
            Err(ArchiveError::Unpack { .. })
        ));
    }
}
