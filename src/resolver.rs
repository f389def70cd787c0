// src/resolver.rs

//! Artifact resolution boundary
//!
//! This module provides functionality for:
//! - Resolving artifact coordinates to concrete payloads
//! - Finding the newest available version of a stream
//! - Fetching repository indexes over HTTP with retry support
//! - Verifying payload checksums
//!
//! Resolution failures are terminal for the current workflow invocation;
//! retries happen here, inside the resolver, not in the workflow.

use crate::error::{Error, Result};
use crate::metadata::channels::Channel;
use crate::metadata::manifest::ArtifactStream;
use crate::provision::ResolvedArtifact;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Name of the index file at a remote repository root
const INDEX_FILE: &str = "index.json";

/// Resolves artifact coordinates against a repository
pub trait ArtifactResolver {
    /// Resolve an exact coordinate to a concrete payload
    fn resolve(&self, group_id: &str, artifact_id: &str, version: &str)
    -> Result<ResolvedArtifact>;

    /// The newest available version of a stream, if the repository knows it
    fn latest_version(&self, group_id: &str, artifact_id: &str) -> Result<Option<String>>;
}

/// Remote repository index (simple JSON format)
#[derive(Debug, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub name: String,
    pub artifacts: Vec<IndexEntry>,
}

/// One artifact version listed in a repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub download_url: String,
    pub checksum: Option<String>,
}

/// Local directory repository: `<root>/<group>/<artifact>/<version>/<payload>`
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn version_dir(&self, group_id: &str, artifact_id: &str, version: &str) -> PathBuf {
        self.root.join(group_id).join(artifact_id).join(version)
    }
}

impl ArtifactResolver for LocalRepository {
    fn resolve(
        &self,
        group_id: &str,
        artifact_id: &str,
        version: &str,
    ) -> Result<ResolvedArtifact> {
        let dir = self.version_dir(group_id, artifact_id, version);
        let coordinate = format!("{}:{}:{}", group_id, artifact_id, version);

        let mut entries = std::fs::read_dir(&dir)
            .map_err(|e| Error::ArtifactResolution {
                coordinate: coordinate.clone(),
                reason: format!("no such version in {}: {}", self.root.display(), e),
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect::<Vec<_>>();
        entries.sort();

        let path = entries
            .into_iter()
            .next()
            .ok_or_else(|| Error::ArtifactResolution {
                coordinate: coordinate.clone(),
                reason: format!("version directory {} holds no payload", dir.display()),
            })?;

        debug!("Resolved {} from {}", coordinate, path.display());
        Ok(ResolvedArtifact {
            stream: ArtifactStream::new(group_id, artifact_id, version),
            path,
        })
    }

    fn latest_version(&self, group_id: &str, artifact_id: &str) -> Result<Option<String>> {
        let dir = self.root.join(group_id).join(artifact_id);
        if !dir.is_dir() {
            return Ok(None);
        }

        let mut latest: Option<String> = None;
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let version = entry.file_name().to_string_lossy().into_owned();
            latest = Some(match latest {
                Some(current) if compare_versions(&current, &version) != Ordering::Less => current,
                _ => version,
            });
        }

        Ok(latest)
    }
}

/// Remote repository speaking the JSON index format, with retry support
pub struct RemoteRepository {
    base_url: String,
    cache_dir: PathBuf,
    client: Client,
    max_retries: u32,
    index: RefCell<Option<RepositoryIndex>>,
}

impl RemoteRepository {
    /// Create a client for the repository at `base_url`, caching downloads
    /// under `cache_dir`
    pub fn new(base_url: impl Into<String>, cache_dir: impl Into<PathBuf>) -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::Download(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into(),
            cache_dir: cache_dir.into(),
            client,
            max_retries: MAX_RETRIES,
            index: RefCell::new(None),
        })
    }

    fn index_url(&self) -> String {
        if self.base_url.ends_with('/') {
            format!("{}{}", self.base_url, INDEX_FILE)
        } else {
            format!("{}/{}", self.base_url, INDEX_FILE)
        }
    }

    /// Fetch the repository index with retry support
    fn fetch_index(&self) -> Result<RepositoryIndex> {
        let url = self.index_url();
        info!("Fetching repository index from {}", url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::Download(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    let index: RepositoryIndex = response.json().map_err(|e| {
                        Error::Download(format!("Failed to parse repository index: {}", e))
                    })?;
                    info!("Fetched index for {} artifacts", index.artifacts.len());
                    return Ok(index);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "Failed to fetch index after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Index fetch attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    fn matching_entries(&self, group_id: &str, artifact_id: &str) -> Result<Vec<IndexEntry>> {
        if self.index.borrow().is_none() {
            let fetched = self.fetch_index()?;
            *self.index.borrow_mut() = Some(fetched);
        }

        let borrowed = self.index.borrow();
        let index = borrowed
            .as_ref()
            .ok_or_else(|| Error::Download("repository index unavailable".to_string()))?;
        Ok(index
            .artifacts
            .iter()
            .filter(|e| e.group_id == group_id && e.artifact_id == artifact_id)
            .cloned()
            .collect())
    }

    /// Download a payload to the cache with retry support
    fn download(&self, entry: &IndexEntry, dest_path: &Path) -> Result<()> {
        info!("Downloading {} to {}", entry.download_url, dest_path.display());

        if let Some(parent) = dest_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&entry.download_url).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::Download(format!(
                            "HTTP {} from {}",
                            response.status(),
                            entry.download_url
                        )));
                    }

                    // Write to a temporary file first, then rename into place
                    let temp_path = dest_path.with_extension("tmp");
                    let mut file = File::create(&temp_path)?;
                    io::copy(&mut response, &mut file)?;
                    std::fs::rename(&temp_path, dest_path)?;
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::Download(format!(
                            "Failed to download after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

impl ArtifactResolver for RemoteRepository {
    fn resolve(
        &self,
        group_id: &str,
        artifact_id: &str,
        version: &str,
    ) -> Result<ResolvedArtifact> {
        let coordinate = format!("{}:{}:{}", group_id, artifact_id, version);
        let entry = self
            .matching_entries(group_id, artifact_id)?
            .into_iter()
            .find(|e| e.version == version)
            .ok_or_else(|| Error::ArtifactResolution {
                coordinate: coordinate.clone(),
                reason: format!("not listed in index of {}", self.base_url),
            })?;

        let default_name = format!("{}-{}.pkg", artifact_id, version);
        let file_name = entry
            .download_url
            .split('/')
            .next_back()
            .filter(|name| !name.is_empty())
            .unwrap_or(&default_name);
        let dest_path = self.cache_dir.join(file_name);

        self.download(&entry, &dest_path)?;
        if let Some(checksum) = &entry.checksum {
            verify_checksum(&dest_path, checksum)?;
        }

        Ok(ResolvedArtifact {
            stream: ArtifactStream::new(group_id, artifact_id, version),
            path: dest_path,
        })
    }

    fn latest_version(&self, group_id: &str, artifact_id: &str) -> Result<Option<String>> {
        let mut latest: Option<String> = None;
        for entry in self.matching_entries(group_id, artifact_id)? {
            latest = Some(match latest {
                Some(current) if compare_versions(&current, &entry.version) != Ordering::Less => {
                    current
                }
                _ => entry.version,
            });
        }
        Ok(latest)
    }
}

/// Resolver over a channel list: tries each channel repository in order
pub struct ChannelResolver {
    repositories: Vec<Box<dyn ArtifactResolver>>,
}

impl ChannelResolver {
    /// Build a resolver from the repositories of the given channels.
    /// HTTP(S) urls become remote repositories; everything else is treated
    /// as a local directory path.
    pub fn for_channels(channels: &[Channel], cache_dir: &Path) -> Result<Self> {
        let mut repositories: Vec<Box<dyn ArtifactResolver>> = Vec::new();
        for channel in channels {
            for repository in &channel.repositories {
                if repository.url.starts_with("http://") || repository.url.starts_with("https://")
                {
                    repositories.push(Box::new(RemoteRepository::new(
                        repository.url.clone(),
                        cache_dir.join(&repository.id),
                    )?));
                } else {
                    repositories.push(Box::new(LocalRepository::new(&repository.url)));
                }
            }
        }

        Ok(Self { repositories })
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

impl ArtifactResolver for ChannelResolver {
    fn resolve(
        &self,
        group_id: &str,
        artifact_id: &str,
        version: &str,
    ) -> Result<ResolvedArtifact> {
        let coordinate = format!("{}:{}:{}", group_id, artifact_id, version);
        let mut last_error = Error::ArtifactResolution {
            coordinate: coordinate.clone(),
            reason: "no repositories configured".to_string(),
        };

        for repository in &self.repositories {
            match repository.resolve(group_id, artifact_id, version) {
                Ok(artifact) => return Ok(artifact),
                Err(e) => last_error = e,
            }
        }
        Err(last_error)
    }

    fn latest_version(&self, group_id: &str, artifact_id: &str) -> Result<Option<String>> {
        let mut latest: Option<String> = None;
        for repository in &self.repositories {
            if let Some(version) = repository.latest_version(group_id, artifact_id)? {
                latest = Some(match latest {
                    Some(current) if compare_versions(&current, &version) != Ordering::Less => {
                        current
                    }
                    _ => version,
                });
            }
        }
        Ok(latest)
    }
}

/// Compare two version strings: semver when both parse, lexicographic
/// fallback otherwise
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (semver::Version::parse(a), semver::Version::parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/// Verify file checksum matches expected value
fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    use sha2::{Digest, Sha256};

    debug!("Verifying checksum for {}", path.display());

    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;

    let actual = format!("{:x}", hasher.finalize());
    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    Ok(())
}
