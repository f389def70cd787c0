// src/workflow.rs

//! Candidate-based update and rollback workflow
//!
//! The workflow builds a full candidate installation tree in an isolated
//! temporary location, computes its prospective effect against the live
//! installation, gates the transition behind confirmation, and merges the
//! candidate atomically from the caller's point of view: the live revision
//! store only records the new state after a successful merge.
//!
//! States: NEW -> BUILT -> { ABORTED | APPLIED }. A failure at any stage
//! aborts the remaining stages and leaves the live installation at its last
//! committed revision. The candidate directory is removed on every exit
//! path.

use crate::changes::{ArtifactChange, ChannelChange, artifact_changes, channel_changes};
use crate::error::{Error, Result};
use crate::history::models::{RevisionType, SavedState};
use crate::metadata::channels::{ResolveStrategy, write_channels};
use crate::metadata::manifest::ArtifactStream;
use crate::metadata::{
    CHANNELS_FILE_NAME, InstallationMetadata, MANIFEST_FILE_NAME, METADATA_DIR,
    PROVISION_FILE_NAME, VERSION_FILE_NAME,
};
use crate::provision::{FileConflict, FsDiff, ProvisioningEngine, ResolvedArtifact};
use crate::resolver::{ArtifactResolver, compare_versions};
use std::cmp::Ordering;
use std::path::Path;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Coordinate of the tool's own package, the only content allowed in an
/// installation targeted by self-update
pub const SELF_PACKAGE: &str = "dev.steward:steward-core";

/// The resolved artifact changes of a pending update; empty means no-op
#[derive(Debug, Clone, Default)]
pub struct UpdateSet {
    pub changes: Vec<ArtifactChange>,
}

impl UpdateSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Prospective effect of applying the candidate to the live installation
#[derive(Debug, Clone)]
pub struct CombinedChanges {
    pub fs_diff: FsDiff,
    pub artifact_changes: Vec<ArtifactChange>,
    pub channel_changes: Vec<ChannelChange>,
}

impl CombinedChanges {
    pub fn is_empty(&self) -> bool {
        self.fs_diff.is_empty()
            && self.artifact_changes.is_empty()
            && self.channel_changes.is_empty()
    }
}

impl std::fmt::Display for CombinedChanges {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for change in &self.artifact_changes {
            writeln!(f, "  {}", change)?;
        }
        for change in &self.channel_changes {
            writeln!(f, "  {}", change)?;
        }
        write!(f, "{}", self.fs_diff)
    }
}

/// Result of the gated apply step
#[derive(Debug)]
pub enum ApplyOutcome {
    Applied {
        revision: SavedState,
        conflicts: Vec<FileConflict>,
    },
    /// Confirmation was declined; the live installation is untouched
    Declined,
    /// The combined diff is empty; nothing was applied or recorded
    NothingToDo,
}

/// Workflow lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowState {
    New,
    Built,
    Aborted,
    Applied,
}

/// Builds, gates, and applies one update or rollback candidate
pub struct CandidateWorkflow<'a> {
    live: &'a mut InstallationMetadata,
    engine: &'a dyn ProvisioningEngine,
    resolver: &'a dyn ArtifactResolver,
    candidate_dir: TempDir,
    operation: RevisionType,
    rollback_target: Option<SavedState>,
    state: WorkflowState,
}

impl<'a> CandidateWorkflow<'a> {
    /// Start an update workflow against the live installation
    pub fn for_update(
        live: &'a mut InstallationMetadata,
        engine: &'a dyn ProvisioningEngine,
        resolver: &'a dyn ArtifactResolver,
    ) -> Result<Self> {
        Ok(Self {
            live,
            engine,
            resolver,
            candidate_dir: TempDir::new()?,
            operation: RevisionType::Update,
            rollback_target: None,
            state: WorkflowState::New,
        })
    }

    /// Start a rollback workflow targeting a recorded revision
    pub fn for_rollback(
        live: &'a mut InstallationMetadata,
        engine: &'a dyn ProvisioningEngine,
        resolver: &'a dyn ArtifactResolver,
        target: SavedState,
    ) -> Result<Self> {
        Ok(Self {
            live,
            engine,
            resolver,
            candidate_dir: TempDir::new()?,
            operation: RevisionType::Rollback,
            rollback_target: Some(target),
            state: WorkflowState::New,
        })
    }

    pub fn state(&self) -> WorkflowState {
        self.state
    }

    /// Resolve the pending update set for the live manifest.
    ///
    /// Channels with a pinned strategy contribute no updates. Resolution
    /// failures are terminal for this workflow invocation.
    pub fn find_updates(&self) -> Result<UpdateSet> {
        let mut changes = Vec::new();
        let latest_enabled = self
            .live
            .channels()
            .iter()
            .any(|c| c.strategy == ResolveStrategy::Latest);
        if !latest_enabled {
            return Ok(UpdateSet { changes });
        }

        for stream in &self.live.manifest().streams {
            if let Some(latest) = self
                .resolver
                .latest_version(&stream.group_id, &stream.artifact_id)?
            {
                if compare_versions(&latest, &stream.version) == Ordering::Greater {
                    changes.push(ArtifactChange::Updated {
                        old: stream.clone(),
                        new: ArtifactStream::new(
                            stream.group_id.clone(),
                            stream.artifact_id.clone(),
                            latest,
                        ),
                    });
                }
            }
        }

        debug!("Found {} pending update(s)", changes.len());
        Ok(UpdateSet { changes })
    }

    /// NEW -> BUILT: materialize the update candidate tree and its metadata
    pub fn build_update(&mut self, updates: &UpdateSet) -> Result<()> {
        self.require_state(WorkflowState::New)?;

        let mut manifest = self.live.manifest().clone();
        for change in &updates.changes {
            match change {
                ArtifactChange::Added(stream) | ArtifactChange::Updated { new: stream, .. } => {
                    manifest.update_stream(stream.clone());
                }
                ArtifactChange::Removed(stream) => {
                    manifest.streams.retain(|s| s.key() != stream.key());
                }
            }
        }

        let artifacts = self.resolve_all(&manifest.streams)?;
        self.engine.provision(
            self.live.provision_config(),
            &artifacts,
            self.candidate_dir.path(),
        )?;

        let summary = format!("{} artifact change(s)", updates.changes.len());
        self.write_candidate_metadata(&manifest, &summary)?;

        self.state = WorkflowState::Built;
        info!(
            "Built update candidate at {}",
            self.candidate_dir.path().display()
        );
        Ok(())
    }

    /// NEW -> BUILT: materialize the rollback candidate from a reverted
    /// metadata checkout
    pub fn build_rollback(&mut self) -> Result<()> {
        self.require_state(WorkflowState::New)?;
        let target = self
            .rollback_target
            .clone()
            .ok_or_else(|| Error::Argument("Workflow has no rollback target".to_string()))?;

        let checkout = self.live.revert(&target)?;
        let candidate = InstallationMetadata::candidate(checkout.path())?;
        let manifest = candidate.manifest().clone();
        let channels = candidate.channels().to_vec();

        let artifacts = self.resolve_all(&manifest.streams)?;
        self.engine.provision(
            self.live.provision_config(),
            &artifacts,
            self.candidate_dir.path(),
        )?;

        let metadata_dir = self.candidate_dir.path().join(METADATA_DIR);
        std::fs::create_dir_all(&metadata_dir)?;
        manifest.write(&metadata_dir.join(MANIFEST_FILE_NAME))?;
        write_channels(&metadata_dir.join(CHANNELS_FILE_NAME), &channels)?;
        self.write_candidate_provision(&metadata_dir)?;
        std::fs::write(
            metadata_dir.join(VERSION_FILE_NAME),
            format!("rollback to {}", target.id),
        )?;

        self.state = WorkflowState::Built;
        info!(
            "Built rollback candidate for revision {} at {}",
            target.id,
            self.candidate_dir.path().display()
        );
        Ok(())
    }

    /// Combined prospective effect: structural file-system diff plus the
    /// artifact and channel diffs between live and candidate metadata
    pub fn find_changes(&self) -> Result<CombinedChanges> {
        self.require_state(WorkflowState::Built)?;

        let fs_diff = self
            .engine
            .diff(self.live.base(), self.candidate_dir.path())?;
        let candidate = InstallationMetadata::candidate(self.candidate_dir.path())?;

        Ok(CombinedChanges {
            fs_diff,
            artifact_changes: artifact_changes(candidate.manifest(), Some(self.live.manifest())),
            channel_changes: channel_changes(candidate.channels(), Some(self.live.channels())),
        })
    }

    /// BUILT -> APPLIED (or ABORTED on a declined confirmation).
    ///
    /// The caller-supplied decision sees the combined diff; pass a constant
    /// `|_| true` to bypass the gate. Merge conflicts are surfaced but do
    /// not block the commit.
    pub fn apply(
        mut self,
        confirm: impl FnOnce(&CombinedChanges) -> bool,
    ) -> Result<ApplyOutcome> {
        let changes = self.find_changes()?;
        if changes.is_empty() {
            info!("Candidate introduces no changes; nothing to do");
            return Ok(ApplyOutcome::NothingToDo);
        }

        if !confirm(&changes) {
            self.state = WorkflowState::Aborted;
            info!("Apply declined; live installation untouched");
            return Ok(ApplyOutcome::Declined);
        }

        let conflicts = self
            .engine
            .merge_into(self.live.base(), self.candidate_dir.path())?;
        if !conflicts.is_empty() {
            warn!("{} merge conflict(s) reported", conflicts.len());
        }

        let candidate = InstallationMetadata::candidate(self.candidate_dir.path())?;
        self.live.set_manifest(candidate.manifest().clone());
        self.live.set_channels(candidate.channels().to_vec())?;
        self.live.write_files()?;
        if let Some(summary) = read_candidate_summary(self.candidate_dir.path())? {
            self.live.write_version_summary(&summary)?;
        }

        let revision = self.live.record_as(self.operation)?;
        self.state = WorkflowState::Applied;
        info!("Applied candidate as revision {}", revision.id);

        Ok(ApplyOutcome::Applied {
            revision,
            conflicts,
        })
    }

    fn resolve_all(&self, streams: &[ArtifactStream]) -> Result<Vec<ResolvedArtifact>> {
        streams
            .iter()
            .map(|s| {
                self.resolver
                    .resolve(&s.group_id, &s.artifact_id, &s.version)
            })
            .collect()
    }

    fn write_candidate_metadata(
        &self,
        manifest: &crate::metadata::manifest::Manifest,
        summary: &str,
    ) -> Result<()> {
        let metadata_dir = self.candidate_dir.path().join(METADATA_DIR);
        std::fs::create_dir_all(&metadata_dir)?;
        manifest.write(&metadata_dir.join(MANIFEST_FILE_NAME))?;
        write_channels(&metadata_dir.join(CHANNELS_FILE_NAME), self.live.channels())?;
        self.write_candidate_provision(&metadata_dir)?;
        std::fs::write(metadata_dir.join(VERSION_FILE_NAME), summary)?;
        Ok(())
    }

    fn write_candidate_provision(&self, metadata_dir: &Path) -> Result<()> {
        let path = metadata_dir.join(PROVISION_FILE_NAME);
        let raw = serde_json::to_string_pretty(self.live.provision_config())
            .map_err(|e| Error::parse(&path, e))?;
        std::fs::write(&path, raw)?;
        Ok(())
    }

    fn require_state(&self, expected: WorkflowState) -> Result<()> {
        if self.state != expected {
            return Err(Error::Argument(format!(
                "Workflow is {:?}, expected {:?}",
                self.state, expected
            )));
        }
        Ok(())
    }
}

/// Self-update guard: the installation must contain exactly the tool's own
/// package, nothing else. Runs before any provisioning call.
pub fn verify_self_contained(metadata: &InstallationMetadata) -> Result<()> {
    let streams = &metadata.manifest().streams;
    if streams.len() != 1 || streams[0].key() != SELF_PACKAGE {
        return Err(Error::Argument(format!(
            "Installation at {} contains packages other than {}; self-update is not supported",
            metadata.base().display(),
            SELF_PACKAGE
        )));
    }
    Ok(())
}

fn read_candidate_summary(candidate: &Path) -> Result<Option<String>> {
    let path = candidate.join(METADATA_DIR).join(VERSION_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }
    Ok(Some(std::fs::read_to_string(&path)?))
}

/// Provision a fresh installation at `target` and record its INSTALL
/// revision. The target must be empty or absent.
pub fn provision_installation(
    target: &Path,
    manifest: crate::metadata::manifest::Manifest,
    channels: Vec<crate::metadata::channels::Channel>,
    provision_config: serde_json::Value,
    engine: &dyn ProvisioningEngine,
    resolver: &dyn ArtifactResolver,
) -> Result<InstallationMetadata> {
    if target.exists() && target.read_dir()?.next().is_some() {
        return Err(Error::Argument(format!(
            "Installation directory {} is not empty",
            target.display()
        )));
    }

    let artifacts = manifest
        .streams
        .iter()
        .map(|s| resolver.resolve(&s.group_id, &s.artifact_id, &s.version))
        .collect::<Result<Vec<_>>>()?;

    std::fs::create_dir_all(target)?;
    engine.provision(&provision_config, &artifacts, target)?;

    // Seed the version summary so the INSTALL commit picks it up
    let metadata_dir = target.join(METADATA_DIR);
    std::fs::create_dir_all(&metadata_dir)?;
    std::fs::write(
        metadata_dir.join(VERSION_FILE_NAME),
        format!("provisioned {} artifact(s)", manifest.streams.len()),
    )?;

    InstallationMetadata::create(target, manifest, channels, provision_config)
}

/// Re-create an installation from an imported metadata bundle.
/// Fails if the target directory already exists.
pub fn restore(
    bundle: &InstallationMetadata,
    target: &Path,
    engine: &dyn ProvisioningEngine,
    resolver: &dyn ArtifactResolver,
) -> Result<InstallationMetadata> {
    if target.exists() {
        return Err(Error::Argument(format!(
            "Installation directory {} already exists",
            target.display()
        )));
    }

    provision_installation(
        target,
        bundle.manifest().clone(),
        bundle.channels().to_vec(),
        bundle.provision_config().clone(),
        engine,
        resolver,
    )
}
