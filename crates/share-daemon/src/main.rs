//! share-daemon: command-line front end for the encrypted file share.
//!
//! Uses the same share-core engine as a desktop shell would, with the
//! native directory backend, watcher, detector and launcher.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use share_core::config::{expand_tilde, Configuration, EncryptionKey};
use share_core::events::{Severity, ShareEvent};
use share_core::store::{EntryKind, FileIdentity};
use share_core::ShareService;
use share_daemon::{native_collaborators, DirectoryBackend};

const DEFAULT_CONFIG: &str = "~/.config/cipher-share/config.json";

#[derive(Parser, Debug)]
#[command(name = "share-daemon")]
#[command(about = "Edit files kept encrypted on a remote share")]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: String,

    /// Encryption passphrase (overrides the configuration file)
    #[arg(long, env = "SHARE_ENCRYPTION_KEY", hide_env_values = true)]
    key: Option<String>,

    /// Start in offline mode: edits are rejected instead of uploaded
    #[arg(long)]
    offline: bool,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List one remote directory level
    List {
        #[arg(default_value = "")]
        dir: String,
    },
    /// Show the directory tree expanded along a path
    Tree {
        #[arg(default_value = "")]
        path: String,
    },
    /// Open a remote file and sync edits until it is closed
    Open { remote_path: String },
    /// Encrypt and upload a local file
    Upload {
        local_path: PathBuf,
        /// Target remote directory
        #[arg(short, long, default_value = "")]
        to: String,
    },
    /// Delete a remote file
    Rm { remote_path: String },
    /// Create a remote directory
    Mkdir {
        parent: String,
        name: String,
    },
    /// Delete an empty remote directory
    Rmdir { path: String },
}

fn load_config(args: &Args) -> Result<Configuration> {
    let path = expand_tilde(&args.config);
    let mut config = Configuration::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(key) = &args.key {
        config.encryption_key = EncryptionKey::new(key.clone());
        config.validate()?;
    }
    Ok(config)
}

fn log_event(event: ShareEvent) {
    match event {
        ShareEvent::Message { severity, text, .. } => match severity {
            Severity::Info | Severity::Success => info!("{}", text),
            Severity::Warning => warn!("{}", text),
            Severity::Error => error!("{}", text),
        },
        ShareEvent::Loading { active } => debug!("Loading: {}", active),
        ShareEvent::RefreshListing { directory } => debug!("Listing changed: /{}", directory),
        ShareEvent::SessionState { identity, state } => debug!("{} -> {:?}", identity, state),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging - respects RUST_LOG env var, defaults to info (or debug with --verbose)
    let default_filter = if args.verbose {
        "debug,share_daemon=debug,share_core=debug"
    } else {
        "info,share_daemon=info,share_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    let backend = DirectoryBackend::from_config(&config);
    debug!("Share root: {}", backend.root().display());

    let service = ShareService::new(&config, backend, native_collaborators(&config));
    service.connectivity().set_online(!args.offline);
    let _subscription = service.events().subscribe(log_event);

    match args.command {
        Command::List { dir } => {
            for entry in service.list_remote_directory(&dir).await? {
                match entry.kind {
                    EntryKind::Directory => println!("{}/", entry.name),
                    EntryKind::File => println!(
                        "{}\t{}\t{}",
                        entry.name,
                        entry.size.unwrap_or(0),
                        entry
                            .last_modified
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_default()
                    ),
                }
            }
        }
        Command::Tree { path } => {
            let tree = service.remote_directory_tree(&path).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Command::Open { remote_path } => {
            let handle = service.open_remote_file(FileIdentity::parse(&remote_path))?;
            info!("Waiting for the file to be closed. Press Ctrl+C to abort.");

            tokio::select! {
                result = handle.wait() => {
                    let report = result?;
                    info!(
                        "Session finished: {} upload(s), {} offline edit(s) rejected",
                        report.uploads, report.offline_rejections
                    );
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted; the staged copy may remain under {}", service.staging().root().display());
                }
            }
        }
        Command::Upload { local_path, to } => {
            let stored = service.upload_local_file(&local_path, &to).await?;
            println!("{}", FileIdentity::new(&to, stored));
        }
        Command::Rm { remote_path } => {
            service
                .delete_remote_file(&FileIdentity::parse(&remote_path))
                .await?;
        }
        Command::Mkdir { parent, name } => {
            let created = service.create_remote_directory(&parent, &name).await?;
            println!("{}", created);
        }
        Command::Rmdir { path } => {
            service.delete_remote_directory(&path).await?;
        }
    }

    Ok(())
}
