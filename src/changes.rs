// src/changes.rs

//! Change computation between two metadata snapshots
//!
//! Pure functions over a "current" and an optional "base" snapshot. The base
//! is absent for the first revision of an installation. Every entry in either
//! snapshot lands in exactly one change bucket or is silently equal.

use crate::metadata::channels::Channel;
use crate::metadata::manifest::{ArtifactStream, Manifest};
use std::collections::HashMap;

/// One artifact-level difference between two manifests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactChange {
    Added(ArtifactStream),
    Removed(ArtifactStream),
    Updated {
        old: ArtifactStream,
        new: ArtifactStream,
    },
}

impl std::fmt::Display for ArtifactChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactChange::Added(a) => write!(f, "[+] {}", a),
            ArtifactChange::Removed(a) => write!(f, "[-] {}", a),
            ArtifactChange::Updated { old, new } => {
                write!(f, "[~] {} {} -> {}", old.key(), old.version, new.version)
            }
        }
    }
}

/// A single differing field between two versions of a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: String,
    pub old: Option<String>,
    pub new: Option<String>,
}

/// One channel-level difference between two channel lists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelChange {
    Added(Channel),
    Removed(Channel),
    Modified {
        old: Channel,
        new: Channel,
        fields: Vec<FieldDiff>,
    },
}

impl std::fmt::Display for ChannelChange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelChange::Added(c) => write!(f, "[+] channel {}", c.name),
            ChannelChange::Removed(c) => write!(f, "[-] channel {}", c.name),
            ChannelChange::Modified { new, fields, .. } => {
                write!(f, "[~] channel {} (", new.name)?;
                for (i, diff) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", diff.field)?;
                }
                write!(f, ")")
            }
        }
    }
}

/// Compute artifact-level changes between two manifests
///
/// `base` is `None` for the first revision, in which case every current
/// stream is reported as Added.
pub fn artifact_changes(current: &Manifest, base: Option<&Manifest>) -> Vec<ArtifactChange> {
    let current_map = to_map(current);
    let base_map = base.map(to_map).unwrap_or_default();

    let mut changes = Vec::new();
    for (key, stream) in &current_map {
        match base_map.get(key) {
            None => changes.push(ArtifactChange::Added((*stream).clone())),
            Some(old) if old.version != stream.version => changes.push(ArtifactChange::Updated {
                old: (*old).clone(),
                new: (*stream).clone(),
            }),
            Some(_) => {}
        }
    }
    for (key, stream) in &base_map {
        if !current_map.contains_key(key) {
            changes.push(ArtifactChange::Removed((*stream).clone()));
        }
    }

    changes
}

/// Compute channel-level changes between two channel lists
///
/// Channels are matched by name. A matched pair with no differing fields is
/// suppressed from the result.
pub fn channel_changes(current: &[Channel], base: Option<&[Channel]>) -> Vec<ChannelChange> {
    let base = base.unwrap_or(&[]);

    let mut changes = Vec::new();
    for channel in current {
        match base.iter().find(|old| old.name == channel.name) {
            None => changes.push(ChannelChange::Added(channel.clone())),
            Some(old) => {
                let fields = channel_field_diffs(old, channel);
                if !fields.is_empty() {
                    changes.push(ChannelChange::Modified {
                        old: old.clone(),
                        new: channel.clone(),
                        fields,
                    });
                }
            }
        }
    }
    for old in base {
        if !current.iter().any(|c| c.name == old.name) {
            changes.push(ChannelChange::Removed(old.clone()));
        }
    }

    changes
}

fn channel_field_diffs(old: &Channel, new: &Channel) -> Vec<FieldDiff> {
    let mut fields = Vec::new();

    if old.repositories != new.repositories {
        fields.push(FieldDiff {
            field: "repositories".to_string(),
            old: Some(format_repositories(old)),
            new: Some(format_repositories(new)),
        });
    }
    if old.manifest != new.manifest {
        fields.push(FieldDiff {
            field: "manifest".to_string(),
            old: old.manifest.clone(),
            new: new.manifest.clone(),
        });
    }
    if old.strategy != new.strategy {
        fields.push(FieldDiff {
            field: "strategy".to_string(),
            old: Some(old.strategy.as_str().to_string()),
            new: Some(new.strategy.as_str().to_string()),
        });
    }

    fields
}

fn format_repositories(channel: &Channel) -> String {
    channel
        .repositories
        .iter()
        .map(|r| format!("{}::{}", r.id, r.url))
        .collect::<Vec<_>>()
        .join(", ")
}

fn to_map(manifest: &Manifest) -> HashMap<String, &ArtifactStream> {
    manifest.streams.iter().map(|s| (s.key(), s)).collect()
}
