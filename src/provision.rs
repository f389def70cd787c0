// src/provision.rs

//! Provisioning engine boundary
//!
//! The engine materializes a candidate installation tree from resolved
//! artifacts, computes structural file-system diffs between two trees, and
//! merges a candidate tree into a live installation. The trait keeps the
//! engine swappable; `DirProvisioner` is the built-in file-tree engine.

use crate::error::{Error, Result};
use crate::metadata::METADATA_DIR;
use crate::metadata::manifest::ArtifactStream;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A concrete artifact produced by the resolver: its stream coordinates and
/// the local file holding its payload
#[derive(Debug, Clone)]
pub struct ResolvedArtifact {
    pub stream: ArtifactStream,
    pub path: PathBuf,
}

/// Structural file-system diff between two installation trees.
/// Paths are relative, metadata excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FsDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl FsDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

impl std::fmt::Display for FsDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for path in &self.added {
            writeln!(f, "  [+] {}", path)?;
        }
        for path in &self.removed {
            writeln!(f, "  [-] {}", path)?;
        }
        for path in &self.modified {
            writeln!(f, "  [~] {}", path)?;
        }
        Ok(())
    }
}

/// A merge conflict surfaced while applying a candidate tree.
/// Conflicts are informational; the candidate content wins.
#[derive(Debug, Clone)]
pub struct FileConflict {
    pub path: String,
    pub reason: String,
}

impl std::fmt::Display for FileConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Lays out and updates installed file trees
pub trait ProvisioningEngine {
    /// Materialize an installation tree at `target` from resolved artifacts
    fn provision(
        &self,
        config: &serde_json::Value,
        artifacts: &[ResolvedArtifact],
        target: &Path,
    ) -> Result<()>;

    /// Structural diff between two installation trees
    fn diff(&self, live: &Path, candidate: &Path) -> Result<FsDiff>;

    /// Merge the candidate tree into the live tree, returning any conflicts
    fn merge_into(&self, live: &Path, candidate: &Path) -> Result<Vec<FileConflict>>;
}

/// Built-in engine: flat `lib/` layout, content-hash comparison
pub struct DirProvisioner;

impl DirProvisioner {
    pub fn new() -> Self {
        Self
    }
}

impl Default for DirProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningEngine for DirProvisioner {
    fn provision(
        &self,
        _config: &serde_json::Value,
        artifacts: &[ResolvedArtifact],
        target: &Path,
    ) -> Result<()> {
        let lib_dir = target.join("lib");
        std::fs::create_dir_all(&lib_dir)
            .map_err(|e| Error::Provisioning(format!("cannot create {}: {}", lib_dir.display(), e)))?;

        for artifact in artifacts {
            let file_name = artifact
                .path
                .file_name()
                .ok_or_else(|| {
                    Error::Provisioning(format!(
                        "artifact {} has no payload file name",
                        artifact.stream
                    ))
                })?;
            let dest = lib_dir.join(file_name);
            std::fs::copy(&artifact.path, &dest).map_err(|e| {
                Error::Provisioning(format!(
                    "cannot place {} at {}: {}",
                    artifact.stream,
                    dest.display(),
                    e
                ))
            })?;
            debug!("Provisioned {} -> {}", artifact.stream, dest.display());
        }

        Ok(())
    }

    fn diff(&self, live: &Path, candidate: &Path) -> Result<FsDiff> {
        let live_files = collect_files(live)?;
        let candidate_files = collect_files(candidate)?;

        let mut diff = FsDiff::default();
        for (rel, path) in &candidate_files {
            match live_files.get(rel) {
                None => diff.added.push(rel.clone()),
                Some(live_path) => {
                    if hash_file(live_path)? != hash_file(path)? {
                        diff.modified.push(rel.clone());
                    }
                }
            }
        }
        for rel in live_files.keys() {
            if !candidate_files.contains_key(rel) {
                diff.removed.push(rel.clone());
            }
        }

        Ok(diff)
    }

    fn merge_into(&self, live: &Path, candidate: &Path) -> Result<Vec<FileConflict>> {
        let candidate_files = collect_files(candidate)?;
        let live_files = collect_files(live)?;
        let mut conflicts = Vec::new();

        for (rel, source) in &candidate_files {
            let dest = live.join(rel);
            if dest.is_dir() {
                conflicts.push(FileConflict {
                    path: rel.clone(),
                    reason: "directory replaced by file".to_string(),
                });
                std::fs::remove_dir_all(&dest)
                    .map_err(|e| Error::Provisioning(format!("cannot replace {}: {}", rel, e)))?;
            }
            if let Some(parent) = dest.parent() {
                // At most one ancestor can be a blocking file
                let mut ancestor = Some(parent);
                while let Some(dir) = ancestor {
                    if dir == live {
                        break;
                    }
                    if dir.is_file() {
                        conflicts.push(FileConflict {
                            path: rel.clone(),
                            reason: "file replaced by directory".to_string(),
                        });
                        std::fs::remove_file(dir).map_err(|e| {
                            Error::Provisioning(format!("cannot replace {}: {}", dir.display(), e))
                        })?;
                        break;
                    }
                    ancestor = dir.parent();
                }
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Provisioning(format!("cannot create {}: {}", parent.display(), e)))?;
            }
            std::fs::copy(source, &dest)
                .map_err(|e| Error::Provisioning(format!("cannot merge {}: {}", rel, e)))?;
        }

        for (rel, path) in &live_files {
            // A replaced directory may have taken its children with it
            if !candidate_files.contains_key(rel) && path.exists() {
                std::fs::remove_file(path)
                    .map_err(|e| Error::Provisioning(format!("cannot remove {}: {}", rel, e)))?;
            }
        }

        for conflict in &conflicts {
            warn!("Merge conflict (candidate wins): {}", conflict);
        }
        Ok(conflicts)
    }
}

/// All regular files under `root` keyed by relative path, metadata excluded
fn collect_files(root: &Path) -> Result<BTreeMap<String, PathBuf>> {
    let mut files = BTreeMap::new();
    if root.exists() {
        walk(root, root, &mut files)?;
    }
    Ok(files)
}

fn walk(root: &Path, dir: &Path, files: &mut BTreeMap<String, PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name();

        if dir == root && name == METADATA_DIR {
            continue;
        }

        if path.is_dir() {
            walk(root, &path, files)?;
        } else {
            let rel = path
                .strip_prefix(root)
                .map_err(|e| Error::Provisioning(e.to_string()))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.insert(rel, path);
        }
    }
    Ok(())
}

fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}
