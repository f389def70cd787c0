// src/main.rs

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use steward::metadata::channels::{Channel, Repository, ResolveStrategy, read_channels};
use steward::metadata::manifest::{ArtifactStream, Manifest};
use steward::metadata::{InstallationMetadata, METADATA_DIR};
use steward::provision::DirProvisioner;
use steward::resolver::{ArtifactResolver, ChannelResolver};
use steward::workflow::{
    ApplyOutcome, CandidateWorkflow, CombinedChanges, provision_installation, restore,
    verify_self_contained,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "steward")]
#[command(author, version, about = "Installation manager with versioned history, updates, and rollback", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision a new installation from a channel configuration
    Install {
        /// Target installation directory (must be empty or absent)
        #[arg(short, long)]
        dir: PathBuf,
        /// Channel configuration file (JSON channel list)
        #[arg(long)]
        channels: PathBuf,
        /// Provisioning configuration file
        #[arg(long)]
        provision: PathBuf,
    },
    /// Update an installation to the newest channel versions
    Update {
        /// Installation directory (auto-detected for --self)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Show the pending changes without applying them
        #[arg(long)]
        dry_run: bool,
        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,
        /// Update the tool's own installation
        #[arg(long = "self")]
        self_update: bool,
        /// Temporary repository URLs overriding the channel repositories
        #[arg(short, long)]
        repository: Vec<String>,
    },
    /// Roll an installation back to a recorded revision
    Revert {
        /// Installation directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Target revision id (any unique prefix)
        #[arg(short, long)]
        revision: String,
        /// Show the pending changes without applying them
        #[arg(long)]
        dry_run: bool,
        /// Apply without asking for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Show the revision history, or the changes of one revision
    History {
        /// Installation directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Revision id to inspect
        #[arg(short, long)]
        revision: Option<String>,
    },
    /// Manage the installation's channels
    Channel {
        #[command(subcommand)]
        command: ChannelCommands,
    },
    /// Export the installation's metadata bundle
    Export {
        /// Installation directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Output bundle path
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Re-create an installation from an exported metadata bundle
    Restore {
        /// Metadata bundle to import
        #[arg(short, long)]
        bundle: PathBuf,
        /// Target installation directory (must not exist)
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum ChannelCommands {
    /// List the installation's channels
    List {
        /// Installation directory
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// Add a channel
    Add {
        /// Installation directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Channel name
        name: String,
        /// Repository, as "id::url" or a bare url
        #[arg(short, long)]
        repository: Vec<String>,
        /// Resolve strategy (latest or pinned)
        #[arg(long, default_value = "latest")]
        strategy: String,
    },
    /// Remove a channel
    Remove {
        /// Installation directory
        #[arg(short, long)]
        dir: PathBuf,
        /// Channel name
        name: String,
    },
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Install {
            dir,
            channels,
            provision,
        }) => cmd_install(&dir, &channels, &provision),
        Some(Commands::Update {
            dir,
            dry_run,
            yes,
            self_update,
            repository,
        }) => cmd_update(dir, dry_run, yes, self_update, &repository),
        Some(Commands::Revert {
            dir,
            revision,
            dry_run,
            yes,
        }) => cmd_revert(&dir, &revision, dry_run, yes),
        Some(Commands::History { dir, revision }) => cmd_history(&dir, revision.as_deref()),
        Some(Commands::Channel { command }) => cmd_channel(command),
        Some(Commands::Export { dir, out }) => {
            let metadata = InstallationMetadata::open(&dir)?;
            let bundle = metadata.export_bundle(&out)?;
            metadata.close();
            println!("Exported metadata bundle to {}", bundle.display());
            Ok(())
        }
        Some(Commands::Restore { bundle, dir }) => cmd_restore(&bundle, &dir),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(
                shell,
                &mut Cli::command(),
                "steward",
                &mut std::io::stdout(),
            );
            Ok(())
        }
        None => {
            // No command provided, show help
            println!("Steward Installation Manager v{}", env!("CARGO_PKG_VERSION"));
            println!("Run 'steward --help' for usage information");
            Ok(())
        }
    }
}

fn cmd_install(dir: &Path, channels_file: &Path, provision_file: &Path) -> Result<()> {
    info!("Provisioning new installation at {}", dir.display());

    let channels = read_channels(channels_file)?;
    let provision_config: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(provision_file)?)?;
    let packages = packages_from_config(&provision_config)?;

    let cache = tempfile::tempdir()?;
    let resolver = ChannelResolver::for_channels(&channels, cache.path())?;

    // Resolve the newest version of every requested package
    let mut streams = Vec::new();
    for (group_id, artifact_id) in packages {
        let version = resolver
            .latest_version(&group_id, &artifact_id)?
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "No version of {}:{} available in the configured channels",
                    group_id,
                    artifact_id
                )
            })?;
        streams.push(ArtifactStream::new(group_id, artifact_id, version));
    }

    let manifest = Manifest::new(None, streams)?;
    let engine = DirProvisioner::new();
    let metadata =
        provision_installation(dir, manifest, channels, provision_config, &engine, &resolver)?;

    println!("Installed to {}", dir.display());
    for stream in &metadata.manifest().streams {
        println!("  {}", stream);
    }
    metadata.close();
    Ok(())
}

fn cmd_update(
    dir: Option<PathBuf>,
    dry_run: bool,
    yes: bool,
    self_update: bool,
    repositories: &[String],
) -> Result<()> {
    let dir = match dir {
        Some(dir) => dir,
        None if self_update => detect_self_installation()?,
        None => return Err(anyhow::anyhow!("--dir is required unless --self is given")),
    };
    info!("Updating installation at {}", dir.display());

    let mut live = InstallationMetadata::open(&dir)?;
    if self_update {
        verify_self_contained(&live)?;
    }

    let cache = tempfile::tempdir()?;
    let resolver = if repositories.is_empty() {
        ChannelResolver::for_channels(live.channels(), cache.path())?
    } else {
        let temporary = Channel::new("temporary", parse_repositories(repositories));
        ChannelResolver::for_channels(&[temporary], cache.path())?
    };

    let engine = DirProvisioner::new();
    let mut workflow = CandidateWorkflow::for_update(&mut live, &engine, &resolver)?;

    let updates = workflow.find_updates()?;
    if updates.is_empty() {
        println!("Installation is up to date.");
        return Ok(());
    }
    println!("Updates found:");
    for change in &updates.changes {
        println!("  {}", change);
    }

    if dry_run {
        workflow.build_update(&updates)?;
        let changes = workflow.find_changes()?;
        println!("\nProspective changes (dry run):");
        print!("{}", changes);
        return Ok(());
    }

    workflow.build_update(&updates)?;
    let outcome = workflow.apply(|changes| yes || confirm(changes, "Continue with update?"))?;
    report_outcome(outcome);

    live.close();
    Ok(())
}

fn cmd_revert(dir: &Path, revision: &str, dry_run: bool, yes: bool) -> Result<()> {
    info!("Reverting installation at {} to {}", dir.display(), revision);

    let mut live = InstallationMetadata::open(dir)?;
    let target = live.find_revision(revision)?;
    println!("Rolling back to {}", target);

    let cache = tempfile::tempdir()?;
    let resolver = ChannelResolver::for_channels(live.channels(), cache.path())?;
    let engine = DirProvisioner::new();

    let mut workflow = CandidateWorkflow::for_rollback(&mut live, &engine, &resolver, target)?;
    workflow.build_rollback()?;

    if dry_run {
        let changes = workflow.find_changes()?;
        println!("\nProspective changes (dry run):");
        print!("{}", changes);
        return Ok(());
    }

    let outcome = workflow.apply(|changes| yes || confirm(changes, "Continue with rollback?"))?;
    report_outcome(outcome);

    live.close();
    Ok(())
}

fn cmd_history(dir: &Path, revision: Option<&str>) -> Result<()> {
    let metadata = InstallationMetadata::open(dir)?;

    match revision {
        None => {
            let revisions = metadata.revisions()?;
            if revisions.is_empty() {
                println!("No revision history.");
            } else {
                println!("Revision history:");
                for state in &revisions {
                    println!("  {}", state);
                }
                println!("\nTotal: {} revision(s)", revisions.len());
            }
        }
        Some(id) => {
            let state = metadata.find_revision(id)?;
            println!("Changes in {}", state);
            for change in print_revision_changes(&metadata, &state)? {
                println!("  {}", change);
            }
        }
    }

    metadata.close();
    Ok(())
}

fn print_revision_changes(
    metadata: &InstallationMetadata,
    state: &steward::history::models::SavedState,
) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    for change in metadata.artifact_changes(state)? {
        lines.push(change.to_string());
    }
    for change in metadata.channel_changes(state)? {
        lines.push(change.to_string());
    }
    if lines.is_empty() {
        lines.push("(no metadata changes)".to_string());
    }
    Ok(lines)
}

fn cmd_channel(command: ChannelCommands) -> Result<()> {
    match command {
        ChannelCommands::List { dir } => {
            let metadata = InstallationMetadata::open(&dir)?;
            if metadata.channels().is_empty() {
                println!("No channels configured.");
            } else {
                println!("Channels:");
                for channel in metadata.channels() {
                    println!("  {} ({})", channel.name, channel.strategy.as_str());
                    for repository in &channel.repositories {
                        println!("    {} {}", repository.id, repository.url);
                    }
                }
            }
            metadata.close();
            Ok(())
        }
        ChannelCommands::Add {
            dir,
            name,
            repository,
            strategy,
        } => {
            let mut metadata = InstallationMetadata::open(&dir)?;
            let mut channel = Channel::new(name.clone(), parse_repositories(&repository));
            channel.strategy = strategy
                .parse::<ResolveStrategy>()
                .map_err(|e| anyhow::anyhow!(e))?;

            let mut channels = metadata.channels().to_vec();
            channels.push(channel);
            let state = metadata.update_channels(channels)?;
            println!("Added channel '{}' (revision {})", name, state.id);
            metadata.close();
            Ok(())
        }
        ChannelCommands::Remove { dir, name } => {
            let mut metadata = InstallationMetadata::open(&dir)?;
            let mut channels = metadata.channels().to_vec();
            let before = channels.len();
            channels.retain(|c| c.name != name);
            if channels.len() == before {
                return Err(anyhow::anyhow!("Channel '{}' is not configured", name));
            }

            let state = metadata.update_channels(channels)?;
            println!("Removed channel '{}' (revision {})", name, state.id);
            metadata.close();
            Ok(())
        }
    }
}

fn cmd_restore(bundle_path: &Path, dir: &Path) -> Result<()> {
    info!(
        "Restoring installation at {} from {}",
        dir.display(),
        bundle_path.display()
    );

    let bundle = InstallationMetadata::from_bundle(bundle_path)?;
    let cache = tempfile::tempdir()?;
    let resolver = ChannelResolver::for_channels(bundle.channels(), cache.path())?;
    let engine = DirProvisioner::new();

    let metadata = restore(&bundle, dir, &engine, &resolver)?;
    println!("Restored installation to {}", dir.display());
    for stream in &metadata.manifest().streams {
        println!("  {}", stream);
    }
    metadata.close();
    Ok(())
}

fn report_outcome(outcome: ApplyOutcome) {
    match outcome {
        ApplyOutcome::Applied {
            revision,
            conflicts,
        } => {
            println!("Applied as revision {}", revision.id);
            if !conflicts.is_empty() {
                println!("Conflicts (candidate content kept):");
                for conflict in &conflicts {
                    println!("  {}", conflict);
                }
            }
        }
        ApplyOutcome::Declined => println!("Aborted; installation unchanged."),
        ApplyOutcome::NothingToDo => println!("No changes to apply."),
    }
}

/// Ask a yes/no question on the terminal, defaulting to no
fn confirm(changes: &CombinedChanges, question: &str) -> bool {
    print!("{}", changes);
    print!("{} [y/N] ", question);
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    if std::io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    is_affirmative(&answer)
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Locate the tool's own installation from the running executable: the
/// executable's directory, or its parent for a bin/ layout
fn detect_self_installation() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    let mut dir = exe
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Unable to locate the steward installation"))?;

    if !dir.join(METADATA_DIR).is_dir() {
        dir = dir
            .parent()
            .filter(|parent| parent.join(METADATA_DIR).is_dir())
            .ok_or_else(|| anyhow::anyhow!("Unable to locate the steward installation"))?;
    }
    Ok(dir.to_path_buf())
}

/// Parse "id::url" repository definitions; a bare url gets a generated id
fn parse_repositories(definitions: &[String]) -> Vec<Repository> {
    definitions
        .iter()
        .enumerate()
        .map(|(index, definition)| match definition.split_once("::") {
            Some((id, url)) => Repository::new(id, url),
            None => Repository::new(format!("repo-{}", index), definition.clone()),
        })
        .collect()
}

/// The "packages" list of a provisioning configuration, as
/// (group, artifact) pairs
fn packages_from_config(config: &serde_json::Value) -> Result<Vec<(String, String)>> {
    let entries = config
        .get("packages")
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            anyhow::anyhow!("Provisioning configuration has no \"packages\" list")
        })?;

    let mut packages = Vec::new();
    for entry in entries {
        let coordinate = entry
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Package entries must be \"group:artifact\" strings"))?;
        packages.push(parse_coordinate(coordinate)?);
    }
    Ok(packages)
}

fn parse_coordinate(coordinate: &str) -> Result<(String, String)> {
    match coordinate.split_once(':') {
        Some((group, artifact)) if !group.is_empty() && !artifact.is_empty() => {
            Ok((group.to_string(), artifact.to_string()))
        }
        _ => Err(anyhow::anyhow!(
            "Invalid package coordinate '{}', expected group:artifact",
            coordinate
        )),
    }
}
