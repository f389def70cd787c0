// src/metadata/bundle.rs

//! Metadata export/import bundle
//!
//! A gzip-compressed tar archive with exactly three entries: the manifest,
//! the channel configuration, and the provisioning configuration used to
//! create the installation. Import fails if any entry is missing.

use crate::error::{Error, Result};
use crate::metadata::{CHANNELS_FILE_NAME, MANIFEST_FILE_NAME, PROVISION_FILE_NAME};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::info;

/// Entry names required in every bundle
const BUNDLE_ENTRIES: &[&str] = &[MANIFEST_FILE_NAME, CHANNELS_FILE_NAME, PROVISION_FILE_NAME];

/// Write the three metadata files into a bundle archive at `dest`
pub fn export(
    manifest_file: &Path,
    channels_file: &Path,
    provision_file: &Path,
    dest: &Path,
) -> Result<PathBuf> {
    let file = File::create(dest)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (name, path) in [
        (MANIFEST_FILE_NAME, manifest_file),
        (CHANNELS_FILE_NAME, channels_file),
        (PROVISION_FILE_NAME, provision_file),
    ] {
        let content = std::fs::read(path).map_err(|e| Error::parse(path, e))?;
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_slice())?;
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(Error::Io)?;

    info!("Exported metadata bundle to {}", dest.display());
    Ok(dest.to_path_buf())
}

/// An imported bundle's files, extracted into a temporary directory
pub struct ImportedBundle {
    dir: TempDir,
}

impl ImportedBundle {
    pub fn manifest_file(&self) -> PathBuf {
        self.dir.path().join(MANIFEST_FILE_NAME)
    }

    pub fn channels_file(&self) -> PathBuf {
        self.dir.path().join(CHANNELS_FILE_NAME)
    }

    pub fn provision_file(&self) -> PathBuf {
        self.dir.path().join(PROVISION_FILE_NAME)
    }

    pub fn into_temp_dir(self) -> TempDir {
        self.dir
    }
}

/// Extract a bundle archive, requiring all three named entries
pub fn import(location: &Path) -> Result<ImportedBundle> {
    let file = File::open(location).map_err(|e| Error::parse(location, e))?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    let dir = TempDir::new()?;

    let mut found = [false; 3];
    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.to_string_lossy().into_owned();
        if let Some(index) = BUNDLE_ENTRIES.iter().position(|e| **e == name) {
            let mut content = Vec::new();
            entry.read_to_end(&mut content)?;
            std::fs::write(dir.path().join(&name), content)?;
            found[index] = true;
        }
    }

    for (index, name) in BUNDLE_ENTRIES.iter().enumerate() {
        if !found[index] {
            return Err(Error::IncompleteBundle {
                path: location.to_path_buf(),
                entry: name.to_string(),
            });
        }
    }

    Ok(ImportedBundle { dir })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use tempfile::tempdir;

    fn write_source_files(dir: &Path) -> (PathBuf, PathBuf, PathBuf) {
        let manifest = dir.join(MANIFEST_FILE_NAME);
        let channels = dir.join(CHANNELS_FILE_NAME);
        let provision = dir.join(PROVISION_FILE_NAME);
        std::fs::write(&manifest, r#"{"streams":[]}"#).unwrap();
        std::fs::write(&channels, "[]").unwrap();
        std::fs::write(&provision, r#"{"packages":[]}"#).unwrap();
        (manifest, channels, provision)
    }

    #[test]
    fn test_bundle_round_trip_is_byte_identical() {
        let tmp = tempdir().unwrap();
        let (manifest, channels, provision) = write_source_files(tmp.path());
        let dest = tmp.path().join("bundle.tar.gz");

        export(&manifest, &channels, &provision, &dest).unwrap();
        let imported = import(&dest).unwrap();

        assert_eq!(
            std::fs::read(&manifest).unwrap(),
            std::fs::read(imported.manifest_file()).unwrap()
        );
        assert_eq!(
            std::fs::read(&channels).unwrap(),
            std::fs::read(imported.channels_file()).unwrap()
        );
        assert_eq!(
            std::fs::read(&provision).unwrap(),
            std::fs::read(imported.provision_file()).unwrap()
        );
    }

    #[test]
    fn test_import_missing_entry_fails() {
        let tmp = tempdir().unwrap();
        let dest = tmp.path().join("incomplete.tar.gz");

        // Archive containing only the manifest
        let file = File::create(&dest).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let content = b"{\"streams\":[]}";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, MANIFEST_FILE_NAME, content.as_slice())
            .unwrap();
        builder
            .into_inner()
            .and_then(|encoder| encoder.finish())
            .unwrap();

        let result = import(&dest);
        match result {
            Err(Error::IncompleteBundle { entry, .. }) => {
                assert_eq!(entry, CHANNELS_FILE_NAME);
            }
            other => panic!("Expected IncompleteBundle, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_import_nonexistent_bundle_fails() {
        let tmp = tempdir().unwrap();
        let result = import(&tmp.path().join("missing.tar.gz"));
        assert!(matches!(result, Err(Error::MetadataParse { .. })));
    }
}
