//! mergerfs - mount a union of directory trees as a single FUSE filesystem.
//!
//! Usage: mergerfs --branches /a=RW:/b=RO:/c=NC --mount /mnt/union

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use mergerfs_fuse::config::{MountConfig, TomlConfig};
use mergerfs_fuse::Dispatcher;

#[derive(Parser)]
#[command(name = "mergerfs")]
#[command(about = "Mount a union of directory trees as a single FUSE filesystem")]
#[command(version)]
struct Cli {
    /// Mountpoint for the union filesystem
    mount: PathBuf,

    /// Branch list, e.g. `/srv/a=RW:/srv/b=RO:/srv/c=NC`. Overrides the
    /// `branches` key in `--config` when both are given.
    #[arg(short, long)]
    branches: Option<String>,

    /// Path to a TOML config file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run in foreground (don't daemonize).
    #[arg(short, long)]
    foreground: bool,

    /// Enable debug logging and the verbose per-request trace log.
    #[arg(short, long)]
    debug: bool,

    /// Comma-separated mergerfs `-o` style options, e.g. `category.create=mfs`.
    #[arg(short = 'o', long = "option", value_delimiter = ',')]
    options: Vec<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    mergerfs_fuse::logging::init(cli.debug);

    if !cli.mount.exists() {
        anyhow::bail!("mountpoint does not exist: {}", cli.mount.display());
    }

    let toml = match &cli.config {
        Some(path) => TomlConfig::from_file(path)?,
        None => TomlConfig::default(),
    };

    let mount_config = MountConfig::from_toml_and_cli(cli.mount.clone(), toml, cli.branches, cli.foreground, cli.debug)
        .context("resolving mount configuration")?;

    let runtime_config = Arc::new(mount_config.to_runtime_config().context("building runtime config")?);
    apply_option_overrides(&runtime_config, &cli.options)?;

    info!(
        mount = %mount_config.mountpoint.display(),
        branches = %mount_config.toml.branches,
        read_threads = mount_config.read_threads,
        process_threads = mount_config.process_threads,
        "starting mergerfs"
    );

    let dispatcher = Dispatcher::new(
        Arc::new(mergerfs_core::branch_io::StdIo),
        runtime_config,
        mount_config.remember_nodes(),
        mount_config.remembered_ttl(),
        mount_config.mountpoint.clone(),
    );
    let node_table = dispatcher.node_table();

    let stop = Arc::new(AtomicBool::new(false));
    let maintenance = mergerfs_fuse::maintenance::spawn(node_table, Duration::from_secs(30), stop.clone());

    let mut mount_options = vec![
        fuser::MountOption::FSName("mergerfs".to_string()),
        fuser::MountOption::Subtype("mergerfs-rs".to_string()),
        fuser::MountOption::DefaultPermissions,
    ];
    if !cli.foreground {
        mount_options.push(fuser::MountOption::AutoUnmount);
    }

    info!("mounting filesystem (press Ctrl+C to unmount)");
    let result = fuser::mount2(dispatcher, &mount_config.mountpoint, &mount_options);

    stop.store(true, std::sync::atomic::Ordering::Release);
    let _ = maintenance.join();

    if let Err(e) = result {
        error!(error = %e, "mount failed");
        anyhow::bail!("failed to mount filesystem: {e}");
    }

    info!("filesystem unmounted");
    Ok(())
}

/// Applies `-o key=value` overrides on top of whatever the TOML file
/// already set, by routing each pair through the same control-file setter
/// the `/.mergerfs` xattr interface uses — CLI `-o` options and the control
/// file share one key namespace.
fn apply_option_overrides(rc: &mergerfs_core::control_file::RuntimeConfig, options: &[String]) -> Result<()> {
    for opt in options {
        let opt = opt.trim();
        if opt.is_empty() {
            continue;
        }
        let Some((key, value)) = opt.split_once('=') else {
            anyhow::bail!("malformed -o option {opt:?}: expected key=value");
        };
        let full_key = if key.starts_with("user.mergerfs.") {
            key.to_string()
        } else {
            format!("user.mergerfs.{key}")
        };
        rc.set(&full_key, value).map_err(|e| anyhow::anyhow!("invalid -o option {opt:?}: {e}"))?;
    }
    Ok(())
}
