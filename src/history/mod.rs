// src/history/mod.rs

//! Revision store for installation metadata
//!
//! An embedded, SQLite-backed history of metadata snapshots. Each committed
//! revision stores the full content of every tracked file, ordered by commit
//! time, identified by a stable content hash. The store supports
//! point-in-time checkout of any revision and hard reset to head, and every
//! mutating operation either fully commits or leaves the prior committed
//! state untouched.

pub mod models;
pub mod schema;

use crate::error::{Error, Result};
use crate::metadata::{CHANNELS_FILE_NAME, MANIFEST_FILE_NAME, METADATA_DIR, VERSION_FILE_NAME};
use chrono::{DateTime, SecondsFormat, Utc};
use models::{Revision, RevisionFile, RevisionType, SavedState};
use rusqlite::Connection;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Identity recorded as the author of every revision
pub const HISTORY_AUTHOR: &str = "Steward Installer";

/// Database file name inside the metadata directory
const HISTORY_DB_FILE: &str = "history.db";

/// Files tracked by the store, snapshotted into every revision
const TRACKED_FILES: &[&str] = &[MANIFEST_FILE_NAME, CHANNELS_FILE_NAME, VERSION_FILE_NAME];

/// The revision store for one installation's metadata directory
pub struct HistoryStore {
    conn: Connection,
    base: PathBuf,
}

impl HistoryStore {
    /// Open (or create) the store for a metadata directory
    pub fn open(metadata_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(metadata_dir)
            .map_err(|e| Error::storage(metadata_dir, e))?;

        let db_path = metadata_dir.join(HISTORY_DB_FILE);
        let conn = Connection::open(&db_path).map_err(|e| Error::storage(&db_path, e))?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA busy_timeout = 5000;
            ",
        )
        .map_err(|e| Error::storage(&db_path, e))?;

        schema::migrate(&conn)?;
        debug!("Opened history store at {}", db_path.display());

        Ok(Self {
            conn,
            base: metadata_dir.to_path_buf(),
        })
    }

    /// Whether the store holds at least one revision
    pub fn is_started(&self) -> Result<bool> {
        Ok(Revision::head(&self.conn)?.is_some())
    }

    /// Commit the current on-disk metadata files as a new revision.
    ///
    /// The first-ever commit is the INSTALL revision: its author identity is
    /// fixed to the tool identity and its commit time is backdated to the
    /// metadata directory's creation time so that history reflects the
    /// original install time. Subsequent calls record an UPDATE.
    pub fn record(&mut self) -> Result<SavedState> {
        if self.is_started()? {
            self.record_as(RevisionType::Update)
        } else {
            let summary = self.read_summary()?;
            let committed_at = directory_creation_time(&self.base);
            self.commit(RevisionType::Install, TRACKED_FILES, summary, committed_at)
        }
    }

    /// Commit the manifest and version-summary files as the given operation
    /// (UPDATE or ROLLBACK). The channel configuration snapshot is carried
    /// over from the parent revision.
    pub fn record_as(&mut self, operation: RevisionType) -> Result<SavedState> {
        if !self.is_started()? {
            return Err(Error::Argument(
                "This operation cannot be performed on an empty history".to_string(),
            ));
        }

        let summary = self.read_summary()?;
        self.commit(
            operation,
            &[MANIFEST_FILE_NAME, VERSION_FILE_NAME],
            summary,
            Utc::now(),
        )
    }

    /// Commit only the channel-configuration file as a CONFIG_CHANGE
    /// revision; manifest changes on disk are not picked up.
    pub fn record_config_change(&mut self) -> Result<SavedState> {
        if !self.is_started()? {
            return Err(Error::Argument(
                "This operation cannot be performed on an empty history".to_string(),
            ));
        }

        self.commit(
            RevisionType::ConfigChange,
            &[CHANNELS_FILE_NAME],
            None,
            Utc::now(),
        )
    }

    /// Walk the full commit log, newest first
    pub fn revisions(&self) -> Result<Vec<SavedState>> {
        let revisions =
            Revision::list_all(&self.conn).map_err(|e| Error::storage(&self.base, e))?;

        revisions
            .iter()
            .map(|r| r.to_saved_state())
            .collect::<Result<Vec<_>>>()
            .map_err(|e| Error::storage(&self.base, e))
    }

    /// Resolve a revision id (any unique hash prefix) to its SavedState
    pub fn find_revision(&self, id: &str) -> Result<SavedState> {
        Revision::find_by_prefix(&self.conn, id)?.to_saved_state()
    }

    /// Check out the given revision's metadata tree into an isolated
    /// temporary location. The live store is never mutated; callers apply
    /// the reverted tree explicitly. The checkout is removed when the
    /// returned handle is dropped.
    pub fn revert(&self, state: &SavedState) -> Result<RevertedCheckout> {
        let revision = Revision::find_by_prefix(&self.conn, &state.id)?;
        let dir = TempDir::new().map_err(|e| Error::storage(&self.base, e))?;
        let metadata_dir = dir.path().join(METADATA_DIR);
        std::fs::create_dir_all(&metadata_dir)?;

        for file in revision.files(&self.conn)? {
            std::fs::write(metadata_dir.join(&file.file_name), &file.content)?;
        }

        info!(
            "Checked out revision {} into {}",
            revision.short_id(),
            dir.path().display()
        );
        Ok(RevertedCheckout { dir })
    }

    /// Check out a single tracked file at the given revision and, if it has
    /// a parent, at the parent, into throwaway temporary trees, and hand both
    /// to the caller's parser. Base is absent for the first revision. Both
    /// trees are deleted before returning, on all paths including errors.
    pub fn changes_between<T>(
        &self,
        state: &SavedState,
        file_name: &str,
        parser: impl FnOnce(&Path, Option<&Path>) -> Result<Vec<T>>,
    ) -> Result<Vec<T>> {
        let revision = Revision::find_by_prefix(&self.conn, &state.id)?;

        let changed = self.checkout_file(&revision, file_name)?;
        let base = match revision.parent(&self.conn)? {
            Some(parent) => Some(self.checkout_file(&parent, file_name)?),
            None => None,
        };

        parser(changed.path(), base.as_ref().map(|d| d.path()))
    }

    /// Hard-reset the on-disk tracked files to the head snapshot, discarding
    /// uncommitted local edits.
    pub fn reset(&self) -> Result<()> {
        let head = Revision::head(&self.conn)?.ok_or_else(|| {
            Error::storage(&self.base, "cannot reset an empty history")
        })?;

        let snapshot = head.files(&self.conn)?;
        for name in TRACKED_FILES {
            let on_disk = self.base.join(name);
            match snapshot.iter().find(|f| f.file_name == *name) {
                Some(file) => std::fs::write(&on_disk, &file.content)?,
                None => {
                    if on_disk.exists() {
                        std::fs::remove_file(&on_disk)?;
                    }
                }
            }
        }

        info!("Reset metadata files to revision {}", head.short_id());
        Ok(())
    }

    /// Flush and close the store, logging and ignoring failures: they cannot
    /// affect already-committed state.
    pub fn close(self) {
        if let Err((_conn, e)) = self.conn.close() {
            warn!("Failed to close history store at {}: {}", self.base.display(), e);
        }
    }

    fn commit(
        &mut self,
        operation: RevisionType,
        staged: &[&str],
        summary: Option<String>,
        committed_at: DateTime<Utc>,
    ) -> Result<SavedState> {
        let parent = Revision::head(&self.conn)?;

        // Staged files come from disk; everything else carries over from the
        // parent snapshot.
        let mut files: Vec<(String, Vec<u8>)> = Vec::new();
        for name in TRACKED_FILES {
            if staged.contains(name) {
                let path = self.base.join(name);
                if path.exists() {
                    files.push((name.to_string(), std::fs::read(&path)?));
                }
            } else if let Some(parent) = &parent {
                if let Some(file) = parent.file(&self.conn, name)? {
                    files.push((name.to_string(), file.content));
                }
            }
        }

        let message = match summary {
            Some(summary) => format!("{} {}", operation.as_str(), summary),
            None => operation.as_str().to_string(),
        };
        let committed_at = committed_at.to_rfc3339_opts(SecondsFormat::Secs, true);
        let hash = revision_hash(
            parent.as_ref().map(|p| p.hash.as_str()),
            &message,
            &committed_at,
            &files,
        );

        let tx = self.conn.transaction()?;
        let revision = Revision {
            seq: 0,
            hash: hash.clone(),
            message,
            author: HISTORY_AUTHOR.to_string(),
            committed_at,
        };
        revision.insert(&tx)?;
        for (file_name, content) in files {
            let sha256 = format!("{:x}", Sha256::digest(&content));
            RevisionFile {
                revision_hash: hash.clone(),
                file_name,
                content,
                sha256,
            }
            .insert(&tx)?;
        }
        tx.commit()?;

        let state = Revision::find_by_prefix(&self.conn, &hash).and_then(|r| r.to_saved_state())?;
        info!("Recorded {} revision {}", state.kind, state.id);
        Ok(state)
    }

    /// The optional human-readable summary for the next commit, read from
    /// the version-summary file's first line.
    fn read_summary(&self) -> Result<Option<String>> {
        let path = self.base.join(VERSION_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(&path).map_err(|e| Error::parse(&path, e))?;
        let summary = raw.lines().next().unwrap_or("").trim().to_string();
        Ok(if summary.is_empty() { None } else { Some(summary) })
    }

    fn checkout_file(&self, revision: &Revision, file_name: &str) -> Result<TempDir> {
        let dir = TempDir::new().map_err(|e| Error::storage(&self.base, e))?;
        if let Some(file) = revision.file(&self.conn, file_name)? {
            std::fs::write(dir.path().join(file_name), &file.content)?;
        }
        Ok(dir)
    }
}

/// A revision's metadata tree checked out into a temporary location.
/// The tree is removed when this handle is dropped.
pub struct RevertedCheckout {
    dir: TempDir,
}

impl RevertedCheckout {
    /// The installation base of the checkout (metadata dir is nested inside)
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.dir.path().join(METADATA_DIR)
    }
}

fn revision_hash(
    parent: Option<&str>,
    message: &str,
    committed_at: &str,
    files: &[(String, Vec<u8>)],
) -> String {
    let mut hasher = Sha256::new();
    if let Some(parent) = parent {
        hasher.update(parent.as_bytes());
    }
    hasher.update(message.as_bytes());
    hasher.update(committed_at.as_bytes());
    for (name, content) in files {
        hasher.update(name.as_bytes());
        hasher.update(content);
    }
    format!("{:x}", hasher.finalize())
}

/// Creation time of the metadata directory, used to backdate the INSTALL
/// revision. Falls back to mtime, then to now, on filesystems that do not
/// report a birth time.
fn directory_creation_time(path: &Path) -> DateTime<Utc> {
    let metadata = std::fs::metadata(path).ok();
    metadata
        .as_ref()
        .and_then(|m| m.created().ok())
        .or_else(|| metadata.as_ref().and_then(|m| m.modified().ok()))
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_metadata(dir: &Path, manifest: &str, channels: &str) {
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE_NAME), manifest).unwrap();
        std::fs::write(dir.join(CHANNELS_FILE_NAME), channels).unwrap();
    }

    fn sample_manifest(version: &str) -> String {
        format!(
            r#"{{"streams":[{{"group_id":"org.foo","artifact_id":"bar","version":"{}"}}]}}"#,
            version
        )
    }

    #[test]
    fn test_first_record_is_install() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        let state = store.record().unwrap();
        assert_eq!(state.kind, RevisionType::Install);

        let second = store.record().unwrap();
        assert_eq!(second.kind, RevisionType::Update);

        let revisions = store.revisions().unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[1].kind, RevisionType::Install);
    }

    #[test]
    fn test_revisions_newest_first() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        store.record().unwrap();
        std::fs::write(meta.join(MANIFEST_FILE_NAME), sample_manifest("1.0.1")).unwrap();
        store.record().unwrap();
        std::fs::write(meta.join(MANIFEST_FILE_NAME), sample_manifest("1.0.2")).unwrap();
        store.record_as(RevisionType::Rollback).unwrap();

        let revisions = store.revisions().unwrap();
        assert_eq!(revisions.len(), 3);
        assert_eq!(revisions[0].kind, RevisionType::Rollback);
        assert_eq!(revisions[1].kind, RevisionType::Update);
        assert_eq!(revisions[2].kind, RevisionType::Install);
        // Strictly decreasing commit-time order (ties broken by ordinal)
        assert!(revisions[0].timestamp >= revisions[1].timestamp);
        assert!(revisions[1].timestamp >= revisions[2].timestamp);
    }

    #[test]
    fn test_record_as_requires_history() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        assert!(matches!(
            store.record_as(RevisionType::Update),
            Err(Error::Argument(_))
        ));
        assert!(matches!(
            store.record_config_change(),
            Err(Error::Argument(_))
        ));
    }

    #[test]
    fn test_summary_read_from_version_file() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");
        std::fs::write(meta.join(VERSION_FILE_NAME), "base installation\nextra").unwrap();

        let mut store = HistoryStore::open(&meta).unwrap();
        let state = store.record().unwrap();
        assert_eq!(state.summary, "base installation");
    }

    #[test]
    fn test_config_change_keeps_manifest_snapshot() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        store.record().unwrap();

        // Edit both files; only the channel file may be committed
        std::fs::write(meta.join(MANIFEST_FILE_NAME), sample_manifest("9.9.9")).unwrap();
        std::fs::write(meta.join(CHANNELS_FILE_NAME), r#"[{"name":"dev","repositories":[],"strategy":"latest"}]"#).unwrap();
        let state = store.record_config_change().unwrap();
        assert_eq!(state.kind, RevisionType::ConfigChange);

        let checkout = store.revert(&state).unwrap();
        let manifest =
            std::fs::read_to_string(checkout.metadata_dir().join(MANIFEST_FILE_NAME)).unwrap();
        assert!(manifest.contains("1.0.0"), "manifest snapshot must be carried from parent");
        let channels =
            std::fs::read_to_string(checkout.metadata_dir().join(CHANNELS_FILE_NAME)).unwrap();
        assert!(channels.contains("dev"));
    }

    #[test]
    fn test_revert_returns_isolated_checkout() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        let install = store.record().unwrap();
        std::fs::write(meta.join(MANIFEST_FILE_NAME), sample_manifest("2.0.0")).unwrap();
        store.record().unwrap();

        let checkout = store.revert(&install).unwrap();
        let reverted =
            std::fs::read_to_string(checkout.metadata_dir().join(MANIFEST_FILE_NAME)).unwrap();
        assert!(reverted.contains("1.0.0"));

        // Live tree untouched
        let live = std::fs::read_to_string(meta.join(MANIFEST_FILE_NAME)).unwrap();
        assert!(live.contains("2.0.0"));
        assert_eq!(store.revisions().unwrap().len(), 2);

        let checkout_path = checkout.path().to_path_buf();
        drop(checkout);
        assert!(!checkout_path.exists(), "checkout removed on drop");
    }

    #[test]
    fn test_changes_between_cleans_up_temp_trees() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        let install = store.record().unwrap();
        std::fs::write(meta.join(MANIFEST_FILE_NAME), sample_manifest("1.0.1")).unwrap();
        let update = store.record().unwrap();

        let mut seen: Vec<PathBuf> = Vec::new();
        let result: Vec<String> = store
            .changes_between(&update, MANIFEST_FILE_NAME, |changed, base| {
                seen.push(changed.to_path_buf());
                let base = base.expect("update revision has a parent");
                seen.push(base.to_path_buf());

                let changed = std::fs::read_to_string(changed.join(MANIFEST_FILE_NAME))?;
                let base = std::fs::read_to_string(base.join(MANIFEST_FILE_NAME))?;
                Ok(vec![changed, base])
            })
            .unwrap();

        assert!(result[0].contains("1.0.1"));
        assert!(result[1].contains("1.0.0"));
        for path in &seen {
            assert!(!path.exists(), "temp tree {} must be deleted", path.display());
        }

        // First revision has no base
        let result: Vec<String> = store
            .changes_between(&install, MANIFEST_FILE_NAME, |_, base| {
                assert!(base.is_none());
                Ok(vec![])
            })
            .unwrap();
        assert!(result.is_empty());
    }

    #[test]
    fn test_changes_between_cleans_up_on_parser_error() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        let install = store.record().unwrap();

        let mut seen: Vec<PathBuf> = Vec::new();
        let result: Result<Vec<String>> =
            store.changes_between(&install, MANIFEST_FILE_NAME, |changed, _| {
                seen.push(changed.to_path_buf());
                Err(Error::Argument("parser failure".to_string()))
            });
        assert!(result.is_err());
        assert!(!seen[0].exists(), "temp tree deleted on the error path too");
    }

    #[test]
    fn test_reset_discards_uncommitted_edits() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        store.record().unwrap();

        std::fs::write(meta.join(MANIFEST_FILE_NAME), "{ half-written").unwrap();
        store.reset().unwrap();

        let restored = std::fs::read_to_string(meta.join(MANIFEST_FILE_NAME)).unwrap();
        assert!(restored.contains("1.0.0"));
    }

    #[test]
    fn test_install_backdated_to_directory_creation() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        let state = store.record().unwrap();

        // The backdated timestamp cannot be in the future
        assert!(state.timestamp <= Utc::now());
    }

    #[test]
    fn test_find_revision_by_prefix() {
        let tmp = tempdir().unwrap();
        let meta = tmp.path().join(METADATA_DIR);
        write_metadata(&meta, &sample_manifest("1.0.0"), "[]");

        let mut store = HistoryStore::open(&meta).unwrap();
        let state = store.record().unwrap();

        let found = store.find_revision(&state.id[..6]).unwrap();
        assert_eq!(found.id, state.id);
        assert!(matches!(
            store.find_revision("0000000000"),
            Err(Error::RevisionNotFound(_))
        ));
    }
}
