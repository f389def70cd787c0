// src/metadata/channels.rs

//! Channel configuration model
//!
//! A channel names a source of resolvable artifact versions: its
//! repositories, an optional manifest coordinate, and a resolver strategy.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

/// A remote or local artifact repository referenced by a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub url: String,
}

impl Repository {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// How a channel picks artifact versions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStrategy {
    /// Always resolve the newest available version
    Latest,
    /// Keep the versions recorded in the manifest
    Pinned,
}

impl ResolveStrategy {
    pub fn as_str(&self) -> &str {
        match self {
            ResolveStrategy::Latest => "latest",
            ResolveStrategy::Pinned => "pinned",
        }
    }
}

impl FromStr for ResolveStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "latest" => Ok(ResolveStrategy::Latest),
            "pinned" => Ok(ResolveStrategy::Pinned),
            _ => Err(format!("Invalid resolve strategy: {}", s)),
        }
    }
}

/// A named source of resolvable artifact versions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub name: String,
    pub repositories: Vec<Repository>,
    /// Optional "group:artifact" coordinate of the channel's own manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    pub strategy: ResolveStrategy,
}

impl Channel {
    pub fn new(name: impl Into<String>, repositories: Vec<Repository>) -> Self {
        Self {
            name: name.into(),
            repositories,
            manifest: None,
            strategy: ResolveStrategy::Latest,
        }
    }
}

/// Parse the ordered channel list from its JSON file
pub fn read_channels(path: &Path) -> Result<Vec<Channel>> {
    let raw = std::fs::read_to_string(path).map_err(|e| Error::parse(path, e))?;
    let channels: Vec<Channel> = serde_json::from_str(&raw).map_err(|e| Error::parse(path, e))?;
    validate_channels(&channels).map_err(|e| Error::parse(path, e))?;
    Ok(channels)
}

/// Write the ordered channel list to its JSON file
pub fn write_channels(path: &Path, channels: &[Channel]) -> Result<()> {
    let raw = serde_json::to_string_pretty(channels).map_err(|e| Error::parse(path, e))?;
    std::fs::write(path, raw)?;
    Ok(())
}

/// Channel names must be unique and non-empty
pub fn validate_channels(channels: &[Channel]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for channel in channels {
        if channel.name.trim().is_empty() {
            return Err(Error::Argument("Channel name cannot be empty".to_string()));
        }
        if !seen.insert(channel.name.as_str()) {
            return Err(Error::Argument(format!(
                "Duplicate channel name '{}'",
                channel.name
            )));
        }
    }
    Ok(())
}
