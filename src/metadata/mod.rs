// src/metadata/mod.rs

//! Installation metadata
//!
//! The in-memory representation of one installation: its artifact manifest,
//! channel configuration, and provisioning configuration. All reads and
//! writes of the metadata directory go through this module, which also owns
//! the installation's revision store handle.

pub mod bundle;
pub mod channels;
pub mod manifest;

use crate::changes::{ArtifactChange, ChannelChange, artifact_changes, channel_changes};
use crate::error::{Error, Result};
use crate::history::models::{RevisionType, SavedState};
use crate::history::{HistoryStore, RevertedCheckout};
use channels::{Channel, read_channels, validate_channels, write_channels};
use manifest::Manifest;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// Metadata subdirectory of an installation, also the revision store's
/// tracked root
pub const METADATA_DIR: &str = ".steward";

/// Manifest file name (artifact streams)
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Channel-configuration file name (ordered channel list)
pub const CHANNELS_FILE_NAME: &str = "channels.json";

/// Version-summary file name, consumed only to produce commit summaries
pub const VERSION_FILE_NAME: &str = "current-version.txt";

/// Provisioning configuration file name (opaque to this core)
pub const PROVISION_FILE_NAME: &str = "provision.json";

/// One installation's metadata directory and its revision history
pub struct InstallationMetadata {
    base: PathBuf,
    manifest_file: PathBuf,
    channels_file: PathBuf,
    provision_file: PathBuf,
    manifest: Manifest,
    channels: Vec<Channel>,
    provision_config: serde_json::Value,
    history: Option<HistoryStore>,
    // Keeps imported bundle files alive for metadata constructed from one
    _imported: Option<TempDir>,
}

impl InstallationMetadata {
    /// Open the metadata of an existing installation.
    ///
    /// Parses the manifest, channel, and provisioning files and opens the
    /// revision store, recording the INSTALL revision if the store is empty
    /// (taking over a not-yet-tracked installation).
    pub fn open(base: &Path) -> Result<Self> {
        let metadata_dir = base.join(METADATA_DIR);
        let manifest_file = metadata_dir.join(MANIFEST_FILE_NAME);
        let channels_file = metadata_dir.join(CHANNELS_FILE_NAME);
        let provision_file = metadata_dir.join(PROVISION_FILE_NAME);

        let manifest = Manifest::read(&manifest_file)?;
        let channels = read_channels(&channels_file)?;
        let provision_config = read_provision_config(&provision_file)?;

        let mut history = HistoryStore::open(&metadata_dir)?;
        if !history.is_started()? {
            history.record()?;
        }

        debug!("Opened installation metadata at {}", base.display());
        Ok(Self {
            base: base.to_path_buf(),
            manifest_file,
            channels_file,
            provision_file,
            manifest,
            channels,
            provision_config,
            history: Some(history),
            _imported: None,
        })
    }

    /// Create metadata for a new installation.
    ///
    /// Fails without touching anything if a metadata file already exists or
    /// the metadata directory path is occupied by a file. Writes all three
    /// metadata files and records the INSTALL revision.
    pub fn create(
        base: &Path,
        manifest: Manifest,
        channels: Vec<Channel>,
        provision_config: serde_json::Value,
    ) -> Result<Self> {
        validate_channels(&channels)?;

        let metadata_dir = base.join(METADATA_DIR);
        if metadata_dir.is_file() {
            return Err(Error::Argument(format!(
                "Metadata path {} is occupied by a file",
                metadata_dir.display()
            )));
        }
        for name in [MANIFEST_FILE_NAME, CHANNELS_FILE_NAME] {
            let path = metadata_dir.join(name);
            if path.exists() {
                return Err(Error::Argument(format!(
                    "Metadata file {} already exists",
                    path.display()
                )));
            }
        }

        std::fs::create_dir_all(&metadata_dir)?;
        let mut metadata = Self {
            base: base.to_path_buf(),
            manifest_file: metadata_dir.join(MANIFEST_FILE_NAME),
            channels_file: metadata_dir.join(CHANNELS_FILE_NAME),
            provision_file: metadata_dir.join(PROVISION_FILE_NAME),
            manifest,
            channels,
            provision_config,
            history: None,
            _imported: None,
        };
        metadata.write_files()?;

        let mut history = HistoryStore::open(&metadata_dir)?;
        history.record()?;
        metadata.history = Some(history);

        info!("Created installation metadata at {}", base.display());
        Ok(metadata)
    }

    /// Open metadata files without a revision store.
    ///
    /// Used for candidate trees and imported bundles, where history belongs
    /// to the live installation.
    pub fn without_history(
        manifest_file: &Path,
        channels_file: &Path,
        provision_file: &Path,
    ) -> Result<Self> {
        let manifest = Manifest::read(manifest_file)?;
        let channels = read_channels(channels_file)?;
        let provision_config = read_provision_config(provision_file)?;

        Ok(Self {
            base: manifest_file
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            manifest_file: manifest_file.to_path_buf(),
            channels_file: channels_file.to_path_buf(),
            provision_file: provision_file.to_path_buf(),
            manifest,
            channels,
            provision_config,
            history: None,
            _imported: None,
        })
    }

    /// Open the candidate metadata nested in an installation tree (no store)
    pub fn candidate(base: &Path) -> Result<Self> {
        let metadata_dir = base.join(METADATA_DIR);
        Self::without_history(
            &metadata_dir.join(MANIFEST_FILE_NAME),
            &metadata_dir.join(CHANNELS_FILE_NAME),
            &metadata_dir.join(PROVISION_FILE_NAME),
        )
    }

    /// Reconstruct metadata from an exported bundle
    pub fn from_bundle(location: &Path) -> Result<Self> {
        let imported = bundle::import(location)?;
        let mut metadata = Self::without_history(
            &imported.manifest_file(),
            &imported.channels_file(),
            &imported.provision_file(),
        )?;
        metadata._imported = Some(imported.into_temp_dir());
        Ok(metadata)
    }

    /// Export this installation's metadata bundle to `dest`
    pub fn export_bundle(&self, dest: &Path) -> Result<PathBuf> {
        bundle::export(
            &self.manifest_file,
            &self.channels_file,
            &self.provision_file,
            dest,
        )
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn set_manifest(&mut self, manifest: Manifest) {
        self.manifest = manifest;
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Replace the in-memory channel list without recording a revision
    pub fn set_channels(&mut self, channels: Vec<Channel>) -> Result<()> {
        validate_channels(&channels)?;
        self.channels = channels;
        Ok(())
    }

    pub fn provision_config(&self) -> &serde_json::Value {
        &self.provision_config
    }

    /// Write all metadata files to disk without recording a revision
    pub fn write_files(&self) -> Result<()> {
        self.manifest.write(&self.manifest_file)?;
        write_channels(&self.channels_file, &self.channels)?;
        let raw = serde_json::to_string_pretty(&self.provision_config)
            .map_err(|e| Error::parse(&self.provision_file, e))?;
        std::fs::write(&self.provision_file, raw)?;
        Ok(())
    }

    /// Write the version-summary file consumed for commit summaries
    pub fn write_version_summary(&self, summary: &str) -> Result<()> {
        let path = self.base.join(METADATA_DIR).join(VERSION_FILE_NAME);
        std::fs::write(&path, summary)?;
        Ok(())
    }

    /// Persist the manifest (and, when overriding or missing, the channel
    /// file) and record the resulting revision.
    pub fn record_provision(&mut self, override_config: bool) -> Result<SavedState> {
        self.manifest.write(&self.manifest_file)?;
        if override_config || !self.channels_file.exists() {
            write_channels(&self.channels_file, &self.channels)?;
        }
        self.history_mut()?.record()
    }

    /// Commit the current manifest state under an explicit operation type
    /// (UPDATE or ROLLBACK).
    pub fn record_as(&mut self, operation: RevisionType) -> Result<SavedState> {
        self.manifest.write(&self.manifest_file)?;
        self.history_mut()?.record_as(operation)
    }

    /// Replace the channel configuration and record a CONFIG_CHANGE revision
    pub fn update_channels(&mut self, channels: Vec<Channel>) -> Result<SavedState> {
        validate_channels(&channels)?;
        self.channels = channels;
        write_channels(&self.channels_file, &self.channels)?;
        self.history_mut()?.record_config_change()
    }

    /// The full revision log, newest first
    pub fn revisions(&self) -> Result<Vec<SavedState>> {
        self.history()?.revisions()
    }

    /// Resolve a revision id prefix to its SavedState
    pub fn find_revision(&self, id: &str) -> Result<SavedState> {
        self.history()?.find_revision(id)
    }

    /// Check out the given revision into an isolated temporary tree
    pub fn revert(&self, state: &SavedState) -> Result<RevertedCheckout> {
        self.history()?.revert(state)
    }

    /// Artifact-level changes introduced by the given revision
    pub fn artifact_changes(&self, state: &SavedState) -> Result<Vec<ArtifactChange>> {
        self.history()?
            .changes_between(state, MANIFEST_FILE_NAME, |changed, base| {
                let current = Manifest::read(&changed.join(MANIFEST_FILE_NAME))?;
                let base = match base {
                    Some(dir) => Some(Manifest::read(&dir.join(MANIFEST_FILE_NAME))?),
                    None => None,
                };
                Ok(artifact_changes(&current, base.as_ref()))
            })
    }

    /// Channel-level changes introduced by the given revision
    pub fn channel_changes(&self, state: &SavedState) -> Result<Vec<ChannelChange>> {
        self.history()?
            .changes_between(state, CHANNELS_FILE_NAME, |changed, base| {
                let current = read_channels(&changed.join(CHANNELS_FILE_NAME))?;
                let base = match base {
                    Some(dir) => Some(read_channels(&dir.join(CHANNELS_FILE_NAME))?),
                    None => None,
                };
                Ok(channel_changes(&current, base.as_deref()))
            })
    }

    /// Discard uncommitted edits to the tracked metadata files
    pub fn reset(&self) -> Result<()> {
        self.history()?.reset()
    }

    /// Release the installation, flushing the revision store. Close failures
    /// are logged and ignored: they cannot affect committed state.
    pub fn close(mut self) {
        if let Some(history) = self.history.take() {
            history.close();
        }
    }

    fn history(&self) -> Result<&HistoryStore> {
        self.history.as_ref().ok_or_else(|| {
            Error::Argument("Installation metadata has no revision store".to_string())
        })
    }

    fn history_mut(&mut self) -> Result<&mut HistoryStore> {
        self.history.as_mut().ok_or_else(|| {
            Error::Argument("Installation metadata has no revision store".to_string())
        })
    }
}

fn read_provision_config(path: &Path) -> Result<serde_json::Value> {
    if !path.exists() {
        // Installations created before provisioning wrote its config
        return Ok(serde_json::Value::Null);
    }
    let raw = std::fs::read_to_string(path).map_err(|e| Error::parse(path, e))?;
    serde_json::from_str(&raw).map_err(|e| Error::parse(path, e))
}
