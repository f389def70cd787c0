// src/metadata/manifest.rs

//! Artifact manifest model
//!
//! The manifest is the ordered set of artifact streams composing an
//! installation, keyed by group id + artifact id.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One resolved artifact stream (group, artifact, version)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStream {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
}

impl ArtifactStream {
    pub fn new(group_id: impl Into<String>, artifact_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
        }
    }

    /// Key used for manifest uniqueness and diffing: "group:artifact"
    pub fn key(&self) -> String {
        format!("{}:{}", self.group_id, self.artifact_id)
    }
}

impl std::fmt::Display for ArtifactStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.group_id, self.artifact_id, self.version)
    }
}

/// The artifact manifest of one installation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub streams: Vec<ArtifactStream>,
}

impl Manifest {
    /// Create a manifest, enforcing stream uniqueness per group+artifact key
    pub fn new(name: Option<String>, streams: Vec<ArtifactStream>) -> Result<Self> {
        let manifest = Self { name, streams };
        manifest.validate()?;
        Ok(manifest)
    }

    /// Parse a manifest from its JSON file
    pub fn read(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::parse(path, e))?;
        let manifest: Manifest = serde_json::from_str(&raw).map_err(|e| Error::parse(path, e))?;
        manifest.validate().map_err(|e| Error::parse(path, e))?;
        Ok(manifest)
    }

    /// Write this manifest to its JSON file
    pub fn write(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| Error::parse(path, e))?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Find a stream by group id and artifact id
    pub fn find(&self, group_id: &str, artifact_id: &str) -> Option<&ArtifactStream> {
        self.streams
            .iter()
            .find(|s| s.group_id == group_id && s.artifact_id == artifact_id)
    }

    /// Replace or insert a stream, keyed by group+artifact
    pub fn update_stream(&mut self, stream: ArtifactStream) {
        match self.streams.iter_mut().find(|s| s.key() == stream.key()) {
            Some(existing) => *existing = stream,
            None => self.streams.push(stream),
        }
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for stream in &self.streams {
            if !seen.insert(stream.key()) {
                return Err(Error::Argument(format!(
                    "Duplicate manifest entry for '{}'",
                    stream.key()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_manifest_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let manifest = Manifest::new(
            Some("test".to_string()),
            vec![ArtifactStream::new("org.foo", "bar", "1.0.0")],
        )
        .unwrap();
        manifest.write(&path).unwrap();

        let read = Manifest::read(&path).unwrap();
        assert_eq!(read.name.as_deref(), Some("test"));
        assert_eq!(read.streams.len(), 1);
        assert_eq!(read.streams[0].key(), "org.foo:bar");
    }

    #[test]
    fn test_duplicate_streams_rejected() {
        let result = Manifest::new(
            None,
            vec![
                ArtifactStream::new("org.foo", "bar", "1.0.0"),
                ArtifactStream::new("org.foo", "bar", "2.0.0"),
            ],
        );
        assert!(matches!(result, Err(Error::Argument(_))));
    }

    #[test]
    fn test_update_stream_replaces_by_key() {
        let mut manifest = Manifest::new(
            None,
            vec![ArtifactStream::new("org.foo", "bar", "1.0.0")],
        )
        .unwrap();

        manifest.update_stream(ArtifactStream::new("org.foo", "bar", "1.0.1"));
        assert_eq!(manifest.streams.len(), 1);
        assert_eq!(manifest.streams[0].version, "1.0.1");

        manifest.update_stream(ArtifactStream::new("org.foo", "baz", "3.0.0"));
        assert_eq!(manifest.streams.len(), 2);
    }

    #[test]
    fn test_read_malformed_manifest() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, "{ not json").unwrap();

        let result = Manifest::read(&path);
        assert!(matches!(result, Err(Error::MetadataParse { .. })));
    }
}
