//! Startup configuration: the TOML file and CLI flags that seed a
//! [`mergerfs_core::control_file::RuntimeConfig`] before the first request
//! ever arrives.
//!
//! Grounded on `oxcrypt-fuse/src/config.rs`'s `MountConfig` builder pattern
//! (a plain `Default`-backed struct with `#[must_use]` setter methods)
//! generalized from a handful of cache-TTL knobs to mount point, branch
//! list, policies, thread counts, timeouts, uid/gid/umask overrides,
//! remember-nodes TTL, debug flag, and log destination, layered with
//! `serde`+`toml` loading the way `oxcrypt-mount`'s config handling does
//! (the same `serde(default)` idiom).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use mergerfs_core::control_file::{LinkExdev, RenameExdev, RuntimeConfig, XattrMode};
use mergerfs_core::statfs::StatfsIgnore;
use mergerfs_core::Branches;

/// Minimum number of read-pool (FUSE channel) threads regardless of CPU
/// count, mirroring `oxcrypt-fuse/src/config.rs::MIN_IO_WORKERS`'s floor.
pub const MIN_READ_THREADS: usize = 4;

/// Default read-pool size: one per CPU, floored at [`MIN_READ_THREADS`].
///
/// Grounded on `oxcrypt-fuse/src/config.rs::default_io_workers`, adapted
/// from its "waiting on slow network storage" 2x-multiplier rationale to
/// this crate's "draining the FUSE channel is itself the bottleneck" case.
pub fn default_read_threads() -> usize {
 num_cpus::get().max(MIN_READ_THREADS)
}

/// Default process-pool size: four workers per read-pool thread, so a
/// handler blocked on branch I/O doesn't stall channel draining.
pub fn default_process_threads() -> usize {
 default_read_threads() * 4
}

fn default_minfreespace() -> u64 {
 4 * 1024 * 1024 * 1024
}

fn default_fuse_msg_size() -> u64 {
 128 * 1024
}

fn default_symlinkify_timeout() -> u64 {
 3600
}

/// The on-disk TOML shape. Every field has a default so a near-empty file
/// (just `branches = "..."`) is valid.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
 pub branches: String,
 pub category_search: String,
 pub category_action: String,
 pub category_create: String,
 pub func_overrides: Vec<(String, String)>,
 pub moveonenospc: bool,
 pub moveonenospc_policy: Option<String>,
 pub minfreespace: u64,
 pub dropcacheonclose: bool,
 pub symlinkify: bool,
 pub symlinkify_timeout: u64,
 pub nullrw: bool,
 pub ignorepponrename: bool,
 pub security_capability: bool,
 pub xattr: String,
 pub link_cow: bool,
 pub link_exdev: String,
 pub rename_exdev: String,
 pub statfs_ignore: String,
 pub direct_io: bool,
 pub kernel_cache: bool,
 pub auto_cache: bool,
 pub fuse_msg_size: u64,
 pub posix_acl: bool,
 pub async_read: bool,
 pub threads_read: Option<usize>,
 pub threads_process: Option<usize>,
 pub remember_nodes: bool,
 pub remembered_ttl_secs: u64,
}

impl Default for TomlConfig {
 fn default() -> Self {
 Self {
 branches: String::new(),
 category_search: "ff".to_string(),
 category_action: "all".to_string(),
 category_create: "epmfs".to_string(),
 func_overrides: Vec::new(),
 moveonenospc: false,
 moveonenospc_policy: None,
 minfreespace: default_minfreespace(),
 dropcacheonclose: false,
 symlinkify: false,
 symlinkify_timeout: default_symlinkify_timeout(),
 nullrw: false,
 ignorepponrename: false,
 security_capability: true,
 xattr: "passthrough".to_string(),
 link_cow: false,
 link_exdev: "passthrough".to_string(),
 rename_exdev: "passthrough".to_string(),
 statfs_ignore: "none".to_string(),
 direct_io: false,
 kernel_cache: false,
 auto_cache: false,
 fuse_msg_size: default_fuse_msg_size(),
 posix_acl: false,
 async_read: true,
 threads_read: None,
 threads_process: None,
 remember_nodes: false,
 remembered_ttl_secs: 20,
 }
 }
}

impl TomlConfig {
 pub fn from_file(path: &Path) -> anyhow::Result<Self> {
 let text = std::fs::read_to_string(path)
 .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
 let cfg: Self = toml::from_str(&text)
 .map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?;
 Ok(cfg)
 }
}

/// Fully resolved mount configuration: a parsed [`TomlConfig`] plus whatever
/// the CLI overrode, split into the pieces the binary needs at startup
/// (branch snapshot, thread-pool sizes, node-table parameters) and the
/// pieces that become the live [`RuntimeConfig`].
#[derive(Debug, Clone)]
pub struct MountConfig {
 pub mountpoint: PathBuf,
 pub toml: TomlConfig,
 pub read_threads: usize,
 pub process_threads: usize,
 pub foreground: bool,
 pub debug: bool,
}

impl MountConfig {
 pub fn from_toml_and_cli(
 mountpoint: PathBuf,
 toml: TomlConfig,
 cli_branches: Option<String>,
 foreground: bool,
 debug: bool,
 ) -> anyhow::Result<Self> {
 let mut toml = toml;
 if let Some(branches) = cli_branches {
 toml.branches = branches;
 }
 if toml.branches.trim().is_empty() {
 anyhow::bail!("no branches configured: pass --branches or set `branches` in the config file");
 }
 let read_threads = toml.threads_read.unwrap_or_else(default_read_threads);
 let process_threads = toml.threads_process.unwrap_or_else(default_process_threads);
 Ok(Self {
 mountpoint,
 toml,
 read_threads,
 process_threads,
 foreground,
 debug,
 })
 }

 /// Parses the branch list into a [`Branches`] snapshot.
 pub fn branches(&self) -> anyhow::Result<Branches> {
 Branches::parse(&self.toml.branches).map_err(|e| anyhow::anyhow!("invalid branches spec: {e}"))
 }

 /// Builds the live, mutable [`RuntimeConfig`] the dispatcher shares
 /// across every request handler.
 pub fn to_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
 let branches = std::sync::Arc::new(self.branches()?);
 let rc = RuntimeConfig::new(branches);

 rc.policies.write().set_category(mergerfs_core::Category::Search, &self.toml.category_search)
 .map_err(|e| anyhow::anyhow!("invalid category.search policy: {e}"))?;
 rc.policies.write().set_category(mergerfs_core::Category::Action, &self.toml.category_action)
 .map_err(|e| anyhow::anyhow!("invalid category.action policy: {e}"))?;
 rc.policies.write().set_category(mergerfs_core::Category::Create, &self.toml.category_create)
 .map_err(|e| anyhow::anyhow!("invalid category.create policy: {e}"))?;
 for (func, policy) in &self.toml.func_overrides {
 let key = format!("user.mergerfs.func.{func}.policy");
 rc.set(&key, policy).map_err(|e| anyhow::anyhow!("invalid func override {func}={policy}: {e}"))?;
 }

 rc.moveonenospc.store(self.toml.moveonenospc, std::sync::atomic::Ordering::Release);
 if let Some(p) = &self.toml.moveonenospc_policy {
 *rc.moveonenospc_policy.write() = p.clone();
 }
 rc.minfreespace.store(self.toml.minfreespace, std::sync::atomic::Ordering::Release);
 rc.dropcacheonclose.store(self.toml.dropcacheonclose, std::sync::atomic::Ordering::Release);
 rc.symlinkify.store(self.toml.symlinkify, std::sync::atomic::Ordering::Release);
 rc.symlinkify_timeout.store(self.toml.symlinkify_timeout, std::sync::atomic::Ordering::Release);
 rc.nullrw.store(self.toml.nullrw, std::sync::atomic::Ordering::Release);
 rc.ignorepponrename.store(self.toml.ignorepponrename, std::sync::atomic::Ordering::Release);
 rc.security_capability.store(self.toml.security_capability, std::sync::atomic::Ordering::Release);
 *rc.xattr.write() = self.toml.xattr.parse::<XattrMode>()
 .map_err(|e| anyhow::anyhow!("invalid xattr mode {:?}: {e}", self.toml.xattr))?;
 rc.link_cow.store(self.toml.link_cow, std::sync::atomic::Ordering::Release);
 *rc.link_exdev.write() = self.toml.link_exdev.parse::<LinkExdev>()
 .map_err(|e| anyhow::anyhow!("invalid link_exdev {:?}: {e}", self.toml.link_exdev))?;
 *rc.rename_exdev.write() = self.toml.rename_exdev.parse::<RenameExdev>()
 .map_err(|e| anyhow::anyhow!("invalid rename_exdev {:?}: {e}", self.toml.rename_exdev))?;
 *rc.statfs_ignore.write() = match self.toml.statfs_ignore.as_str() {
 "none" => StatfsIgnore::None,
 "ro" => StatfsIgnore::ReadOnly,
 "nc" => StatfsIgnore::NoCreate,
 other => anyhow::bail!("invalid statfs_ignore {other:?}"),
 };
 rc.direct_io.store(self.toml.direct_io, std::sync::atomic::Ordering::Release);
 rc.kernel_cache.store(self.toml.kernel_cache, std::sync::atomic::Ordering::Release);
 rc.auto_cache.store(self.toml.auto_cache, std::sync::atomic::Ordering::Release);
 rc.fuse_msg_size.store(self.toml.fuse_msg_size, std::sync::atomic::Ordering::Release);
 rc.posix_acl.store(self.toml.posix_acl, std::sync::atomic::Ordering::Release);
 rc.async_read.store(self.toml.async_read, std::sync::atomic::Ordering::Release);

 Ok(rc)
 }

 pub fn remember_nodes(&self) -> bool {
 self.toml.remember_nodes
 }

 pub fn remembered_ttl(&self) -> Duration {
 Duration::from_secs(self.toml.remembered_ttl_secs)
 }
}
