//! etcdutil - disaster-recovery utilities for etcd.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use etcd_recovery::client::EtcdConnector;
use etcd_recovery::config::{split_list, Config};
use etcd_recovery::daemon::ShutdownWatcher;
use etcd_recovery::lifecycle::Systemctl;
use etcd_recovery::snapshot::EtcdutlRestorer;
use etcd_recovery::{utils, Recovery};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "etcdutil", author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Recovery workspace directory (overrides config)
    #[arg(long, value_name = "DIR", global = true)]
    asset_dir: Option<PathBuf>,

    /// Dial timeout in seconds (overrides config)
    #[arg(long, global = true)]
    dial_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Adds a member into the cluster
    #[command(name = "addmember")]
    AddMember {
        /// IP of a healthy member to talk to
        recovery_server_ip: String,
        /// Name of the new member
        member_name: String,
        /// Comma-separated peer URLs for the new member
        #[arg(long = "peer-urls", value_name = "URLS")]
        peer_urls: String,
    },

    /// Deletes a member from the cluster
    #[command(name = "delmember")]
    DelMember {
        member_name: String,
        /// Comma-separated endpoint URLs
        #[arg(long)]
        endpoints: Option<String>,
    },

    /// Saves a snapshot from a single member to a file
    #[command(name = "savesnapshot")]
    SaveSnapshot {
        filename: PathBuf,
        /// Exactly one endpoint URL
        #[arg(long)]
        endpoints: Option<String>,
    },

    /// Restores this member's data directory from a snapshot file
    Restore {
        filename: PathBuf,
        /// Comma-separated peer URLs of the restored member
        #[arg(long = "peer-urls", value_name = "URLS")]
        peer_urls: String,
        /// Member name (overrides config)
        #[arg(long)]
        name: Option<String>,
        /// Initial cluster descriptor, name=peerURL,... (overrides config)
        #[arg(long)]
        initial_cluster: Option<String>,
    },

    /// Regenerates the etcd certificates with the recovery agent
    #[command(name = "recover-certs")]
    RecoverCerts,

    /// Moves every static pod manifest aside and stops the kubelet
    #[command(name = "stop-pods")]
    StopPods,

    /// Starts the kubelet and restores every parked static pod manifest
    #[command(name = "start-pods")]
    StartPods,
}

/// Endpoints from the flag when given, otherwise from the config file.
fn endpoints(flag: Option<&str>, config: &Config) -> Vec<String> {
    match flag {
        Some(value) => split_list(value),
        None => config.client.endpoints.clone(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(dir) = args.asset_dir {
        config.paths.asset_dir = dir;
    }
    if let Some(secs) = args.dial_timeout {
        config.client.dial_timeout_secs = secs;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!("etcdutil v{}", env!("CARGO_PKG_VERSION"));

    let connector = EtcdConnector;
    let supervisor = Systemctl::new(config.supervisor.program.clone());
    let restorer = EtcdutlRestorer::new(config.restore.program.clone());

    match args.command {
        Command::AddMember {
            recovery_server_ip,
            member_name,
            peer_urls,
        } => {
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            let member = recovery
                .add_member(&recovery_server_ip, &member_name, &split_list(&peer_urls))
                .await
                .with_context(|| format!("adding member {}", member_name))?;
            println!("{}", serde_json::to_string_pretty(&member)?);
        }
        Command::DelMember {
            member_name,
            endpoints: flag,
        } => {
            let endpoints = endpoints(flag.as_deref(), &config);
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            let id = recovery
                .remove_member(&member_name, endpoints)
                .await
                .with_context(|| format!("removing member {}", member_name))?;
            println!("Removed member {} ({:x})", member_name, id);
        }
        Command::SaveSnapshot {
            filename,
            endpoints: flag,
        } => {
            let endpoints = endpoints(flag.as_deref(), &config);
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            let saved = recovery
                .save_snapshot(&filename, endpoints)
                .await
                .with_context(|| format!("saving snapshot to {}", filename.display()))?;
            println!("Snapshot saved at {} ({} bytes)", saved.path.display(), saved.bytes);
        }
        Command::Restore {
            filename,
            peer_urls,
            name,
            initial_cluster,
        } => {
            if let Some(name) = name {
                config.restore.name = name;
            }
            if let Some(initial_cluster) = initial_cluster {
                config.restore.initial_cluster = initial_cluster;
            }
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            recovery
                .restore(&filename, split_list(&peer_urls))
                .await
                .with_context(|| format!("restoring from {}", filename.display()))?;
            println!("Restored {}", filename.display());
        }
        Command::RecoverCerts => {
            let watcher = ShutdownWatcher::spawn(config.certs.wait_timeout());
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            let count = recovery
                .recover_certs(&watcher.token())
                .await
                .context("recovering etcd certificates")?;
            println!("{} certificate resources generated", count);
        }
        Command::StopPods => {
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            let report = recovery.stop_static_pods().context("stopping static pods")?;
            for (path, e) in &report.failed {
                eprintln!("failed to move {}: {}", path.display(), e);
            }
            println!("Stopped {} static pods", report.done.len());
        }
        Command::StartPods => {
            let recovery = Recovery::new(config, connector, supervisor, restorer);
            let report = recovery.start_static_pods().context("starting static pods")?;
            for (path, e) in &report.failed {
                eprintln!("failed to move {}: {}", path.display(), e);
            }
            println!("Started {} static pods", report.done.len());
        }
    }

    Ok(())
}
