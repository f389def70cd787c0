// tests/integration_test.rs

//! Integration tests for Steward
//!
//! These tests verify end-to-end functionality across modules: provisioning
//! an installation, updating it through the candidate workflow, inspecting
//! history, rolling back, and restoring from an exported bundle.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use steward::history::models::RevisionType;
use steward::metadata::channels::{Channel, Repository};
use steward::metadata::manifest::{ArtifactStream, Manifest};
use steward::metadata::{InstallationMetadata, METADATA_DIR};
use steward::provision::{
    DirProvisioner, FileConflict, FsDiff, ProvisioningEngine, ResolvedArtifact,
};
use steward::resolver::{ArtifactResolver, ChannelResolver, LocalRepository};
use steward::workflow::{
    ApplyOutcome, CandidateWorkflow, provision_installation, restore, verify_self_contained,
};

fn seed_repo(root: &Path, artifact: &str, versions: &[&str]) {
    for version in versions {
        let dir = root.join("org.foo").join(artifact).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join(format!("{}-{}.pkg", artifact, version)),
            format!("{} payload {}", artifact, version),
        )
        .unwrap();
    }
}

fn channels_for(repo: &Path) -> Vec<Channel> {
    vec![Channel::new(
        "stable",
        vec![Repository::new("local", repo.to_string_lossy())],
    )]
}

/// Provision a fresh installation of org.foo:bar at the given version
fn provision_bar(root: &Path, version: &str, available: &[&str]) -> (PathBuf, PathBuf) {
    let repo = root.join("repo");
    seed_repo(&repo, "bar", available);

    let base = root.join("installation");
    let manifest =
        Manifest::new(None, vec![ArtifactStream::new("org.foo", "bar", version)]).unwrap();
    let engine = DirProvisioner::new();
    let resolver = LocalRepository::new(&repo);

    provision_installation(
        &base,
        manifest,
        channels_for(&repo),
        serde_json::json!({"packages": ["org.foo:bar"]}),
        &engine,
        &resolver,
    )
    .unwrap()
    .close();

    (base, repo)
}

#[test]
fn test_install_lifecycle() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, _repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0"]);

    // The provisioned tree and metadata exist
    assert!(base.join("lib/bar-1.0.0.pkg").exists());
    assert!(base.join(METADATA_DIR).join("manifest.json").exists());
    assert!(base.join(METADATA_DIR).join("channels.json").exists());

    // The first-ever revision has type INSTALL and carries the seeded summary
    let metadata = InstallationMetadata::open(&base).unwrap();
    let revisions = metadata.revisions().unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].kind, RevisionType::Install);
    assert_eq!(revisions[0].summary, "provisioned 1 artifact(s)");
}

#[test]
fn test_provision_into_nonempty_directory_fails() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    seed_repo(&repo, "bar", &["1.0.0"]);

    let base = tmp.path().join("occupied");
    std::fs::create_dir_all(&base).unwrap();
    std::fs::write(base.join("something.txt"), "x").unwrap();

    let manifest =
        Manifest::new(None, vec![ArtifactStream::new("org.foo", "bar", "1.0.0")]).unwrap();
    let result = provision_installation(
        &base,
        manifest,
        channels_for(&repo),
        serde_json::Value::Null,
        &DirProvisioner::new(),
        &LocalRepository::new(&repo),
    );
    assert!(matches!(result, Err(steward::Error::Argument(_))));
    // The occupant is untouched
    assert!(base.join("something.txt").exists());
}

#[test]
fn test_update_scenario() {
    // Manifest has org.foo:bar:1.0.0; the repository offers 1.0.1
    let tmp = tempfile::tempdir().unwrap();
    let (base, repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0", "1.0.1"]);

    let mut live = InstallationMetadata::open(&base).unwrap();
    let engine = DirProvisioner::new();
    let resolver = LocalRepository::new(&repo);
    let mut workflow = CandidateWorkflow::for_update(&mut live, &engine, &resolver).unwrap();

    // findChanges yields exactly one Updated(1.0.0 -> 1.0.1)
    let updates = workflow.find_updates().unwrap();
    assert_eq!(updates.changes.len(), 1);
    assert!(matches!(
        &updates.changes[0],
        steward::changes::ArtifactChange::Updated { old, new }
            if old.version == "1.0.0" && new.version == "1.0.1"
    ));

    workflow.build_update(&updates).unwrap();
    let outcome = workflow.apply(|_| true).unwrap();
    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));

    // revisions()[0].Type == UPDATE and the manifest now lists 1.0.1
    let revisions = live.revisions().unwrap();
    assert_eq!(revisions[0].kind, RevisionType::Update);
    assert_eq!(live.manifest().streams[0].version, "1.0.1");
}

#[test]
fn test_confirmation_gating_keeps_revision_count() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0", "1.0.1"]);

    let mut live = InstallationMetadata::open(&base).unwrap();
    let revision_count = live.revisions().unwrap().len();
    let engine = DirProvisioner::new();
    let resolver = LocalRepository::new(&repo);

    let mut workflow = CandidateWorkflow::for_update(&mut live, &engine, &resolver).unwrap();
    let updates = workflow.find_updates().unwrap();
    assert!(!updates.is_empty());
    workflow.build_update(&updates).unwrap();

    let outcome = workflow.apply(|_| false).unwrap();
    assert!(matches!(outcome, ApplyOutcome::Declined));
    assert_eq!(live.revisions().unwrap().len(), revision_count);
    assert_eq!(live.manifest().streams[0].version, "1.0.0");
}

#[test]
fn test_revert_reproduces_history() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0", "1.0.1"]);

    // Update to 1.0.1
    let mut live = InstallationMetadata::open(&base).unwrap();
    let engine = DirProvisioner::new();
    let resolver = LocalRepository::new(&repo);
    let mut workflow = CandidateWorkflow::for_update(&mut live, &engine, &resolver).unwrap();
    let updates = workflow.find_updates().unwrap();
    workflow.build_update(&updates).unwrap();
    workflow.apply(|_| true).unwrap();

    let manifest_as_installed =
        Manifest::new(None, vec![ArtifactStream::new("org.foo", "bar", "1.0.0")]).unwrap();

    // Roll back to the INSTALL revision; the manifest must equal the
    // manifest as of that revision
    let install = live.revisions().unwrap().last().unwrap().clone();
    let mut workflow =
        CandidateWorkflow::for_rollback(&mut live, &engine, &resolver, install).unwrap();
    workflow.build_rollback().unwrap();
    let outcome = workflow.apply(|_| true).unwrap();
    assert!(matches!(outcome, ApplyOutcome::Applied { .. }));

    assert_eq!(live.manifest().streams, manifest_as_installed.streams);
    let revisions = live.revisions().unwrap();
    assert_eq!(revisions[0].kind, RevisionType::Rollback);
}

#[test]
fn test_history_shows_operations() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0", "1.0.1"]);

    let mut live = InstallationMetadata::open(&base).unwrap();
    let engine = DirProvisioner::new();
    let resolver = LocalRepository::new(&repo);

    // Update, then change channel configuration
    let mut workflow = CandidateWorkflow::for_update(&mut live, &engine, &resolver).unwrap();
    let updates = workflow.find_updates().unwrap();
    workflow.build_update(&updates).unwrap();
    workflow.apply(|_| true).unwrap();

    let mut channels = live.channels().to_vec();
    channels.push(Channel::new("experimental", vec![]));
    live.update_channels(channels).unwrap();

    let revisions = live.revisions().unwrap();
    assert_eq!(revisions.len(), 3);
    assert_eq!(revisions[0].kind, RevisionType::ConfigChange);
    assert_eq!(revisions[1].kind, RevisionType::Update);
    assert_eq!(revisions[2].kind, RevisionType::Install);

    // The update revision reports its artifact change
    let changes = live.artifact_changes(&revisions[1]).unwrap();
    assert_eq!(changes.len(), 1);

    // The config-change revision reports its channel change and no
    // artifact changes
    let changes = live.channel_changes(&revisions[0]).unwrap();
    assert_eq!(changes.len(), 1);
    assert!(live.artifact_changes(&revisions[0]).unwrap().is_empty());
}

#[test]
fn test_export_restore_round_trip() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, _repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0"]);

    let metadata = InstallationMetadata::open(&base).unwrap();
    let bundle_path = tmp.path().join("metadata.tar.gz");
    metadata.export_bundle(&bundle_path).unwrap();

    // Manifest and channel content survive the round trip byte-identically
    let bundle = InstallationMetadata::from_bundle(&bundle_path).unwrap();
    assert_eq!(bundle.manifest().streams, metadata.manifest().streams);
    assert_eq!(bundle.channels(), metadata.channels());

    // Restore into a fresh directory re-provisions the tree and records a
    // new INSTALL revision
    let restored_base = tmp.path().join("restored");
    let cache = tempfile::tempdir().unwrap();
    let resolver = ChannelResolver::for_channels(bundle.channels(), cache.path()).unwrap();
    let restored = restore(&bundle, &restored_base, &DirProvisioner::new(), &resolver).unwrap();

    assert!(restored_base.join("lib/bar-1.0.0.pkg").exists());
    let revisions = restored.revisions().unwrap();
    assert_eq!(revisions.len(), 1);
    assert_eq!(revisions[0].kind, RevisionType::Install);

    // Restoring over an existing directory is rejected
    let result = restore(&bundle, &restored_base, &DirProvisioner::new(), &resolver);
    assert!(matches!(result, Err(steward::Error::Argument(_))));
}

#[test]
fn test_update_with_added_artifact_stream() {
    let tmp = tempfile::tempdir().unwrap();
    let (base, repo) = provision_bar(tmp.path(), "1.0.0", &["1.0.0"]);
    seed_repo(&repo, "baz", &["2.0.0"]);

    // A second stream appears in the manifest (e.g. via a channel manifest);
    // the workflow resolves and provisions it alongside the existing one
    let mut live = InstallationMetadata::open(&base).unwrap();
    let engine = DirProvisioner::new();
    let resolver = LocalRepository::new(&repo);
    let mut workflow = CandidateWorkflow::for_update(&mut live, &engine, &resolver).unwrap();

    let updates = steward::workflow::UpdateSet {
        changes: vec![steward::changes::ArtifactChange::Added(ArtifactStream::new(
            "org.foo", "baz", "2.0.0",
        ))],
    };
    workflow.build_update(&updates).unwrap();
    let changes = workflow.find_changes().unwrap();
    assert_eq!(changes.artifact_changes.len(), 1);

    workflow.apply(|_| true).unwrap();
    assert!(base.join("lib/baz-2.0.0.pkg").exists());
    assert_eq!(live.manifest().streams.len(), 2);
}

/// Engine double that records every call without touching the file system
#[derive(Default)]
struct RecordingEngine {
    calls: RefCell<Vec<String>>,
}

impl ProvisioningEngine for RecordingEngine {
    fn provision(
        &self,
        _config: &serde_json::Value,
        _artifacts: &[ResolvedArtifact],
        _target: &Path,
    ) -> steward::Result<()> {
        self.calls.borrow_mut().push("provision".to_string());
        Ok(())
    }

    fn diff(&self, _live: &Path, _candidate: &Path) -> steward::Result<FsDiff> {
        self.calls.borrow_mut().push("diff".to_string());
        Ok(FsDiff::default())
    }

    fn merge_into(
        &self,
        _live: &Path,
        _candidate: &Path,
    ) -> steward::Result<Vec<FileConflict>> {
        self.calls.borrow_mut().push("merge_into".to_string());
        Ok(Vec::new())
    }
}

/// The self-update entry point: guard first, then the regular update flow
fn self_update(
    live: &mut InstallationMetadata,
    engine: &dyn ProvisioningEngine,
    resolver: &dyn ArtifactResolver,
) -> steward::Result<ApplyOutcome> {
    verify_self_contained(live)?;
    let mut workflow = CandidateWorkflow::for_update(live, engine, resolver)?;
    let updates = workflow.find_updates()?;
    workflow.build_update(&updates)?;
    workflow.apply(|_| true)
}

#[test]
fn test_self_update_guard_blocks_before_provisioning() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = tmp.path().join("repo");
    seed_repo(&repo, "bar", &["1.0.0"]);

    // An installation holding two distinct packages
    let base = tmp.path().join("mixed");
    std::fs::create_dir_all(&base).unwrap();
    let manifest = Manifest::new(
        None,
        vec![
            ArtifactStream::new("dev.steward", "steward-core", "0.1.0"),
            ArtifactStream::new("org.foo", "bar", "1.0.0"),
        ],
    )
    .unwrap();
    InstallationMetadata::create(&base, manifest, channels_for(&repo), serde_json::Value::Null)
        .unwrap()
        .close();

    let mut live = InstallationMetadata::open(&base).unwrap();
    let engine = RecordingEngine::default();
    let resolver = LocalRepository::new(&repo);

    let result = self_update(&mut live, &engine, &resolver);
    assert!(matches!(result, Err(steward::Error::Argument(_))));
    // The guard fired before the engine was ever asked to do anything
    assert!(engine.calls.borrow().is_empty());
}

#[test]
fn test_latest_version_resolution_across_channels() {
    let tmp = tempfile::tempdir().unwrap();
    let first = tmp.path().join("first");
    let second = tmp.path().join("second");
    seed_repo(&first, "bar", &["1.0.0"]);
    seed_repo(&second, "bar", &["1.2.0"]);

    let channels = vec![
        Channel::new("a", vec![Repository::new("first", first.to_string_lossy())]),
        Channel::new("b", vec![Repository::new("second", second.to_string_lossy())]),
    ];
    let cache = tempfile::tempdir().unwrap();
    let resolver = ChannelResolver::for_channels(&channels, cache.path()).unwrap();

    let latest = resolver.latest_version("org.foo", "bar").unwrap();
    assert_eq!(latest.as_deref(), Some("1.2.0"));
}
