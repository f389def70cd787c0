// build.rs

use clap::{Arg, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn dir_arg() -> Arg {
    Arg::new("dir")
        .short('d')
        .long("dir")
        .value_name("PATH")
        .help("Installation directory")
}

fn build_cli() -> Command {
    Command::new("steward")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Steward Contributors")
        .about("Installation manager with versioned history, updates, and rollback")
        .subcommand_required(false)
        .subcommand(
            Command::new("install")
                .about("Provision a new installation from a channel configuration")
                .arg(dir_arg())
                .arg(
                    Arg::new("channels")
                        .long("channels")
                        .value_name("FILE")
                        .help("Channel configuration file"),
                )
                .arg(
                    Arg::new("provision")
                        .long("provision")
                        .value_name("FILE")
                        .help("Provisioning configuration file"),
                ),
        )
        .subcommand(
            Command::new("update")
                .about("Update an installation to the newest channel versions")
                .arg(dir_arg())
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Show the pending changes without applying them"),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(clap::ArgAction::SetTrue)
                        .help("Apply without asking for confirmation"),
                )
                .arg(
                    Arg::new("self")
                        .long("self")
                        .action(clap::ArgAction::SetTrue)
                        .help("Update the tool's own installation"),
                )
                .arg(
                    Arg::new("repository")
                        .short('r')
                        .long("repository")
                        .value_name("URL")
                        .action(clap::ArgAction::Append)
                        .help("Temporary repository overriding the channel repositories"),
                ),
        )
        .subcommand(
            Command::new("revert")
                .about("Roll an installation back to a recorded revision")
                .arg(dir_arg())
                .arg(
                    Arg::new("revision")
                        .short('r')
                        .long("revision")
                        .value_name("ID")
                        .help("Target revision id"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(clap::ArgAction::SetTrue)
                        .help("Show the pending changes without applying them"),
                )
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(clap::ArgAction::SetTrue)
                        .help("Apply without asking for confirmation"),
                ),
        )
        .subcommand(
            Command::new("history")
                .about("Show the revision history, or the changes of one revision")
                .arg(dir_arg())
                .arg(
                    Arg::new("revision")
                        .short('r')
                        .long("revision")
                        .value_name("ID")
                        .help("Revision id to inspect"),
                ),
        )
        .subcommand(
            Command::new("channel")
                .about("Manage the installation's channels")
                .subcommand(Command::new("list").about("List channels").arg(dir_arg()))
                .subcommand(
                    Command::new("add")
                        .about("Add a channel")
                        .arg(dir_arg())
                        .arg(Arg::new("name").required(true).help("Channel name"))
                        .arg(
                            Arg::new("repository")
                                .short('r')
                                .long("repository")
                                .value_name("ID::URL")
                                .action(clap::ArgAction::Append)
                                .help("Channel repository"),
                        )
                        .arg(
                            Arg::new("strategy")
                                .long("strategy")
                                .default_value("latest")
                                .help("Resolve strategy (latest or pinned)"),
                        ),
                )
                .subcommand(
                    Command::new("remove")
                        .about("Remove a channel")
                        .arg(dir_arg())
                        .arg(Arg::new("name").required(true).help("Channel name")),
                ),
        )
        .subcommand(
            Command::new("export")
                .about("Export the installation's metadata bundle")
                .arg(dir_arg())
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .value_name("FILE")
                        .help("Output bundle path"),
                ),
        )
        .subcommand(
            Command::new("restore")
                .about("Re-create an installation from an exported metadata bundle")
                .arg(
                    Arg::new("bundle")
                        .short('b')
                        .long("bundle")
                        .value_name("FILE")
                        .help("Metadata bundle to import"),
                )
                .arg(dir_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("steward.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
