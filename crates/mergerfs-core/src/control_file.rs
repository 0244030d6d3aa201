//! The `/.mergerfs` control file: a virtual path (and root xattr namespace)
//! used to read and mutate runtime configuration without remounting.
//!
//! Grounded on `original_source/src/config.hpp` (`Config::get`/`Config::set`,
//! the flat `Str2TFStrMap` key table, `Config::is_ctrl_file`/`is_cmd_xattr`)
//! and `original_source/src/category.hpp`'s `ToFromString` pattern for
//! per-key string (de)serialization — reimplemented here as small
//! `FromStr`/`Display` pairs on plain Rust enums rather than copied as a
//! polymorphic base class, and as one flat `match` over key strings rather
//! than a runtime string-to-pointer map, since Rust's exhaustiveness
//! checking gives the same safety without the indirection.
//!
//! `RuntimeConfig` is the mutable state a key either reads or replaces. It
//! is held by the FUSE-facing dispatcher as an `Arc<RuntimeConfig>` shared
//! across every request handler; every field is either an atomic or a
//! `parking_lot::RwLock`-guarded value so a SET never has to pause
//! in-flight requests.

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::branch::Branches;
use crate::error::{ErrorKind, Result};
use crate::policy::{self, Category, Policy};

/// The virtual control-file path, relative to the mount root.
pub const CONTROL_FILE_NAME: &str = ".mergerfs";

/// Reserved xattr namespace prefix every control key lives under.
pub const KEY_PREFIX: &str = "user.mergerfs.";

/// Reserved namespace for side-effecting commands (`user.mergerfs.cmd.*`).
pub const CMD_PREFIX: &str = "user.mergerfs.cmd.";

/// Whether `relpath` (relative to the mount root) is the control file.
pub fn is_control_path(relpath: &Path) -> bool {
 relpath == Path::new(CONTROL_FILE_NAME)
}

/// Whether `name` is a key this module understands (a `user.mergerfs.*`
/// xattr on *any* file, not just the control file — mergerfs exposes the
/// same namespace as a root xattr ).
pub fn is_mergerfs_key(name: &str) -> bool {
 name.starts_with(KEY_PREFIX)
}

/// One of the operations `category.{action,create,search}` and
/// `func.<op>.policy` address.
///
/// Grounded on `original_source/src/config.hpp`'s per-function policy
/// fields (`access`, `chmod`, `getattr`, `rmdir`, `unlink`, `utimens`, ...)
/// plus the Create-category functions named in #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncName {
 Create,
 Mkdir,
 Mknod,
 Symlink,
 Tmpfile,
 Link,
 Chmod,
 Chown,
 Rename,
 Rmdir,
 Unlink,
 Truncate,
 Utimens,
 Setxattr,
 Removexattr,
 Fallocate,
 Getattr,
 Readlink,
 Open,
 Getxattr,
 Listxattr,
 Access,
}

impl FuncName {
 pub fn category(self) -> Category {
 use FuncName::*;
 match self {
 Create | Mkdir | Mknod | Symlink | Tmpfile | Link => Category::Create,
 Chmod | Chown | Rename | Rmdir | Unlink | Truncate | Utimens | Setxattr | Removexattr
 | Fallocate => Category::Action,
 Getattr | Readlink | Open | Getxattr | Listxattr | Access => Category::Search,
 }
 }

 const ALL: &'static [FuncName] = &[
 FuncName::Create,
 FuncName::Mkdir,
 FuncName::Mknod,
 FuncName::Symlink,
 FuncName::Tmpfile,
 FuncName::Link,
 FuncName::Chmod,
 FuncName::Chown,
 FuncName::Rename,
 FuncName::Rmdir,
 FuncName::Unlink,
 FuncName::Truncate,
 FuncName::Utimens,
 FuncName::Setxattr,
 FuncName::Removexattr,
 FuncName::Fallocate,
 FuncName::Getattr,
 FuncName::Readlink,
 FuncName::Open,
 FuncName::Getxattr,
 FuncName::Listxattr,
 FuncName::Access,
 ];

 fn in_category(category: Category) -> impl Iterator<Item = FuncName> {
 Self::ALL.iter().copied().filter(move |f| f.category() == category)
 }
}

impl fmt::Display for FuncName {
 fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
 let s = match self {
 FuncName::Create => "create",
 FuncName::Mkdir => "mkdir",
 FuncName::Mknod => "mknod",
 FuncName::Symlink => "symlink",
 FuncName::Tmpfile => "tmpfile",
 FuncName::Link => "link",
 FuncName::Chmod => "chmod",
 FuncName::Chown => "chown",
 FuncName::Rename => "rename",
 FuncName::Rmdir => "rmdir",
 FuncName::Unlink => "unlink",
 FuncName::Truncate => "truncate",
 FuncName::Utimens => "utimens",
 FuncName::Setxattr => "setxattr",
 FuncName::Removexattr => "removexattr",
 FuncName::Fallocate => "fallocate",
 FuncName::Getattr => "getattr",
 FuncName::Readlink => "readlink",
 FuncName::Open => "open",
 FuncName::Getxattr => "getxattr",
 FuncName::Listxattr => "listxattr",
 FuncName::Access => "access",
 };
 f.write_str(s)
 }
}

impl FromStr for FuncName {
 type Err = ErrorKind;

 fn from_str(s: &str) -> Result<Self> {
 Self::ALL
 .iter()
 .copied()
 .find(|f| f.to_string() == s)
 .ok_or(ErrorKind::NotAttr)
 }
}

/// The policy assigned to every function, grouped by category for the
/// bulk `category.*` keys and individually addressable via `func.<op>`.
pub struct PolicyTable {
 policies: std::collections::HashMap<FuncName, Arc<dyn Policy>>,
}

impl PolicyTable {
 /// Builds the table with mergerfs' conventional defaults: `ff` for
 /// Search (cheapest: first branch wins), `all` for Action (stay
 /// consistent across every copy), `epmfs` for Create (existing-path
 /// most-free-space — keeps new files colocated with a tree that
 /// already has room).
 pub fn with_defaults() -> Self {
 let mut policies = std::collections::HashMap::new();
 for func in FuncName::in_category(Category::Search) {
 policies.insert(func, policy::by_name(Category::Search, "ff").unwrap());
 }
 for func in FuncName::in_category(Category::Action) {
 policies.insert(func, policy::by_name(Category::Action, "all").unwrap());
 }
 for func in FuncName::in_category(Category::Create) {
 policies.insert(func, policy::by_name(Category::Create, "epmfs").unwrap());
 }
 Self { policies }
 }

 pub fn get(&self, func: FuncName) -> Arc<dyn Policy> {
 self.policies
 .get(&func)
 .cloned()
 .unwrap_or_else(|| policy::by_name(func.category(), "ff").expect("ff always registered"))
 }

 pub fn set_func(&mut self, func: FuncName, name: &str) -> Result<()> {
 let p = policy::by_name(func.category(), name).ok_or(ErrorKind::NotAttr)?;
 self.policies.insert(func, p);
 Ok(())
 }

 pub fn set_category(&mut self, category: Category, name: &str) -> Result<()> {
 let p = policy::by_name(category, name).ok_or(ErrorKind::NotAttr)?;
 for func in FuncName::in_category(category) {
 self.policies.insert(func, p.clone());
 }
 Ok(())
 }

 /// Renders a category's policy name, only if every function in it
 /// currently shares the same policy (mirrors `original_source`'s
 /// `Categories::to_string` which reports the common name or nothing).
 pub fn category_name(&self, category: Category) -> Option<&'static str> {
 let mut names = FuncName::in_category(category).map(|f| self.get(f).name());
 let first = names.next()?;
 if names.all(|n| n == first) {
 Some(first)
 } else {
 None
 }
 }
}

/// `user.mergerfs.link_exdev`: what to do when a hard link would have to
/// cross branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkExdev {
 /// Just return EXDEV to the caller (the POSIX-faithful default).
 Passthrough,
 /// Materialize as a symlink using a path relative to the new link.
 RelSymlink,
 /// Materialize as a symlink using the absolute path within the branch.
 AbsSymlinkBranch,
 /// Materialize as a symlink using the absolute path within the mount.
 AbsSymlinkMount,
}

impl fmt::Display for LinkExdev {
 fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
 let s = match self {
 LinkExdev::Passthrough => "passthrough",
 LinkExdev::RelSymlink => "rel-symlink",
 LinkExdev::AbsSymlinkBranch => "abs-branch-symlink",
 LinkExdev::AbsSymlinkMount => "abs-mount-symlink",
 };
 f.write_str(s)
 }
}

impl FromStr for LinkExdev {
 type Err = ErrorKind;
 fn from_str(s: &str) -> Result<Self> {
 match s {
 "passthrough" => Ok(LinkExdev::Passthrough),
 "rel-symlink" => Ok(LinkExdev::RelSymlink),
 "abs-branch-symlink" => Ok(LinkExdev::AbsSymlinkBranch),
 "abs-mount-symlink" => Ok(LinkExdev::AbsSymlinkMount),
 _ => Err(ErrorKind::NotAttr),
 }
 }
}

/// `user.mergerfs.rename_exdev`: the analogous fallback for RENAME.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameExdev {
 /// Return EXDEV.
 Passthrough,
 /// Fall back to copy + unlink-source across branches.
 CopyAndUnlink,
}

impl fmt::Display for RenameExdev {
 fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
 f.write_str(match self {
 RenameExdev::Passthrough => "passthrough",
 RenameExdev::CopyAndUnlink => "copy-and-unlink",
 })
 }
}

impl FromStr for RenameExdev {
 type Err = ErrorKind;
 fn from_str(s: &str) -> Result<Self> {
 match s {
 "passthrough" => Ok(RenameExdev::Passthrough),
 "copy-and-unlink" => Ok(RenameExdev::CopyAndUnlink),
 _ => Err(ErrorKind::NotAttr),
 }
 }
}

/// `user.mergerfs.xattr`: whether xattr calls are passed through, silently
/// dropped (`noattr`), or rejected outright (`nosys`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XattrMode {
 Passthrough,
 Noattr,
 Nosys,
}

impl fmt::Display for XattrMode {
 fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
 f.write_str(match self {
 XattrMode::Passthrough => "passthrough",
 XattrMode::Noattr => "noattr",
 XattrMode::Nosys => "nosys",
 })
 }
}

impl FromStr for XattrMode {
 type Err = ErrorKind;
 fn from_str(s: &str) -> Result<Self> {
 match s {
 "passthrough" => Ok(XattrMode::Passthrough),
 "noattr" => Ok(XattrMode::Noattr),
 "nosys" => Ok(XattrMode::Nosys),
 _ => Err(ErrorKind::NotAttr),
 }
 }
}

/// A side-effecting `user.mergerfs.cmd.*` trigger. `RuntimeConfig::set`
/// returns one of these for the caller (the FUSE dispatcher) to execute —
/// the actions themselves touch collaborators (`NodeTable`, the kernel
/// notifier, the uid/gid cache) this module deliberately has no handle to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
 /// Full garbage-collect: prune the remembered set and idle slab pages.
 Gc,
 /// Single-pass GC (remembered-set prune only).
 Gc1,
 InvalidateAllNodes,
 InvalidateGidCache,
 ClearGidCache,
}

/// The runtime-mutable configuration the control file reads and writes.
///
/// Every field a request handler might consult concurrently with a SET is
/// either an atomic or an `RwLock`-guarded value — config mutations are
/// atomic replacements of shared pointers, so a SET never blocks an
/// in-flight read for longer than copying one small value.
pub struct RuntimeConfig {
 pub branches: RwLock<Arc<Branches>>,
 pub policies: RwLock<PolicyTable>,

 pub moveonenospc: AtomicBool,
 pub moveonenospc_policy: RwLock<String>,
 pub dropcacheonclose: AtomicBool,
 pub symlinkify: AtomicBool,
 pub symlinkify_timeout: AtomicU64,
 pub nullrw: AtomicBool,
 pub ignorepponrename: AtomicBool,
 pub security_capability: AtomicBool,
 pub xattr: RwLock<XattrMode>,
 pub link_cow: AtomicBool,
 pub link_exdev: RwLock<LinkExdev>,
 pub rename_exdev: RwLock<RenameExdev>,
 pub statfs_ignore: RwLock<crate::statfs::StatfsIgnore>,
 pub direct_io: AtomicBool,
 pub kernel_cache: AtomicBool,
 pub auto_cache: AtomicBool,
 pub fuse_msg_size: AtomicU64,
 pub posix_acl: AtomicBool,
 pub async_read: AtomicBool,
 pub minfreespace: AtomicU64,
 pid: u32,
}

impl RuntimeConfig {
 pub fn new(branches: Arc<Branches>) -> Self {
 Self {
 branches: RwLock::new(branches),
 policies: RwLock::new(PolicyTable::with_defaults()),
 moveonenospc: AtomicBool::new(false),
 moveonenospc_policy: RwLock::new("mfs".to_string()),
 dropcacheonclose: AtomicBool::new(false),
 symlinkify: AtomicBool::new(false),
 symlinkify_timeout: AtomicU64::new(3600),
 nullrw: AtomicBool::new(false),
 ignorepponrename: AtomicBool::new(false),
 security_capability: AtomicBool::new(true),
 xattr: RwLock::new(XattrMode::Passthrough),
 link_cow: AtomicBool::new(false),
 link_exdev: RwLock::new(LinkExdev::Passthrough),
 rename_exdev: RwLock::new(RenameExdev::Passthrough),
 statfs_ignore: RwLock::new(crate::statfs::StatfsIgnore::None),
 direct_io: AtomicBool::new(false),
 kernel_cache: AtomicBool::new(false),
 auto_cache: AtomicBool::new(false),
 fuse_msg_size: AtomicU64::new(128 * 1024),
 posix_acl: AtomicBool::new(false),
 async_read: AtomicBool::new(true),
 minfreespace: AtomicU64::new(4 * 1024 * 1024 * 1024),
 pid: std::process::id(),
 }
 }

 /// GET: renders `key`'s current value as a string.
 pub fn get(&self, key: &str) -> Result<String> {
 let key = key.strip_prefix(KEY_PREFIX).ok_or(ErrorKind::NotAttr)?;
 if let Some(func) = key.strip_prefix("func.").and_then(|k| k.strip_suffix(".policy")) {
 let func: FuncName = func.parse()?;
 return Ok(self.policies.read().get(func).name().to_string());
 }
 if let Some(cat) = key.strip_prefix("category.") {
 let category = parse_category(cat)?;
 return self
 .policies
 .read()
 .category_name(category)
 .map(str::to_string)
 .ok_or(ErrorKind::NotAttr);
 }
 match key {
 "branches" => Ok(self.branches.read().to_spec_string()),
 "pid" => Ok(self.pid.to_string()),
 "version" => Ok(env!("CARGO_PKG_VERSION").to_string()),
 "moveonenospc" => Ok(if self.moveonenospc.load(Ordering::Acquire) {
 self.moveonenospc_policy.read().clone()
 } else {
 "false".to_string()
 }),
 "minfreespace" => Ok(self.minfreespace.load(Ordering::Acquire).to_string()),
 "dropcacheonclose" => Ok(bool_str(self.dropcacheonclose.load(Ordering::Acquire))),
 "symlinkify" => Ok(bool_str(self.symlinkify.load(Ordering::Acquire))),
 "symlinkify_timeout" => Ok(self.symlinkify_timeout.load(Ordering::Acquire).to_string()),
 "nullrw" => Ok(bool_str(self.nullrw.load(Ordering::Acquire))),
 "ignorepponrename" => Ok(bool_str(self.ignorepponrename.load(Ordering::Acquire))),
 "security_capability" => Ok(bool_str(self.security_capability.load(Ordering::Acquire))),
 "xattr" => Ok(self.xattr.read().to_string()),
 "link_cow" => Ok(bool_str(self.link_cow.load(Ordering::Acquire))),
 "link_exdev" => Ok(self.link_exdev.read().to_string()),
 "rename_exdev" => Ok(self.rename_exdev.read().to_string()),
 "statfs" => Ok("base".to_string()),
 "statfs_ignore" => Ok(format!("{:?}", *self.statfs_ignore.read()).to_lowercase()),
 "direct_io" => Ok(bool_str(self.direct_io.load(Ordering::Acquire))),
 "kernel_cache" => Ok(bool_str(self.kernel_cache.load(Ordering::Acquire))),
 "auto_cache" => Ok(bool_str(self.auto_cache.load(Ordering::Acquire))),
 "fuse_msg_size" => Ok(self.fuse_msg_size.load(Ordering::Acquire).to_string()),
 "posix_acl" => Ok(bool_str(self.posix_acl.load(Ordering::Acquire))),
 "async_read" => Ok(bool_str(self.async_read.load(Ordering::Acquire))),
 _ => Err(ErrorKind::NotAttr),
 }
 }

 /// SET: parses `value` according to `key`'s type and installs it.
 /// Returns a [`ControlCommand`] when `key` is a `cmd.*` trigger; the
 /// caller is responsible for actually executing it.
 pub fn set(&self, key: &str, value: &str) -> Result<Option<ControlCommand>> {
 if let Some(cmd) = key.strip_prefix(CMD_PREFIX) {
 return match cmd {
 "gc" => Ok(Some(ControlCommand::Gc)),
 "gc1" => Ok(Some(ControlCommand::Gc1)),
 "invalidate-all-nodes" => Ok(Some(ControlCommand::InvalidateAllNodes)),
 "invalidate-gid-cache" => Ok(Some(ControlCommand::InvalidateGidCache)),
 "clear-gid-cache" => Ok(Some(ControlCommand::ClearGidCache)),
 _ => Err(ErrorKind::NotAttr),
 };
 }

 let key = key.strip_prefix(KEY_PREFIX).ok_or(ErrorKind::NotAttr)?;

 if let Some(func) = key.strip_prefix("func.").and_then(|k| k.strip_suffix(".policy")) {
 let func: FuncName = func.parse()?;
 self.policies.write().set_func(func, value)?;
 return Ok(None);
 }
 if let Some(cat) = key.strip_prefix("category.") {
 let category = parse_category(cat)?;
 self.policies.write().set_category(category, value)?;
 return Ok(None);
 }

 match key {
 "branches" => {
 *self.branches.write() = Arc::new(Branches::parse(value)?);
 }
 "moveonenospc" => match value.parse::<bool>() {
 Ok(enabled) => {
 self.moveonenospc.store(enabled, Ordering::Release);
 if enabled {
 *self.moveonenospc_policy.write() = "mfs".to_string();
 }
 }
 Err(_) => {
 // A bare policy name (e.g. "pfrd") both enables the
 // feature and selects its create policy, matching
 // `original_source/src/config_moveonenospc.cpp`.
 let p = policy::by_name(Category::Create, value).ok_or(ErrorKind::NotAttr)?;
 self.moveonenospc.store(true, Ordering::Release);
 *self.moveonenospc_policy.write() = p.name().to_string();
 }
 },
 "minfreespace" => self.minfreespace.store(parse_u64(value)?, Ordering::Release),
 "dropcacheonclose" => self.dropcacheonclose.store(parse_bool(value)?, Ordering::Release),
 "symlinkify" => self.symlinkify.store(parse_bool(value)?, Ordering::Release),
 "symlinkify_timeout" => self.symlinkify_timeout.store(parse_u64(value)?, Ordering::Release),
 "nullrw" => self.nullrw.store(parse_bool(value)?, Ordering::Release),
 "ignorepponrename" => self.ignorepponrename.store(parse_bool(value)?, Ordering::Release),
 "security_capability" => self.security_capability.store(parse_bool(value)?, Ordering::Release),
 "xattr" => *self.xattr.write() = value.parse()?,
 "link_cow" => self.link_cow.store(parse_bool(value)?, Ordering::Release),
 "link_exdev" => *self.link_exdev.write() = value.parse()?,
 "rename_exdev" => *self.rename_exdev.write() = value.parse()?,
 "statfs_ignore" => {
 *self.statfs_ignore.write() = match value {
 "none" => crate::statfs::StatfsIgnore::None,
 "ro" => crate::statfs::StatfsIgnore::ReadOnly,
 "nc" => crate::statfs::StatfsIgnore::NoCreate,
 _ => return Err(ErrorKind::NotAttr),
 };
 }
 "direct_io" => self.direct_io.store(parse_bool(value)?, Ordering::Release),
 "kernel_cache" => self.kernel_cache.store(parse_bool(value)?, Ordering::Release),
 "auto_cache" => self.auto_cache.store(parse_bool(value)?, Ordering::Release),
 "fuse_msg_size" => self.fuse_msg_size.store(parse_u64(value)?, Ordering::Release),
 "posix_acl" => self.posix_acl.store(parse_bool(value)?, Ordering::Release),
 "async_read" => self.async_read.store(parse_bool(value)?, Ordering::Release),
 // Read-only keys: reported but never settable.
 "pid" | "version" => return Err(ErrorKind::NotAttr),
 _ => return Err(ErrorKind::NotAttr),
 }
 Ok(None)
 }
}

fn parse_category(s: &str) -> Result<Category> {
 match s {
 "search" => Ok(Category::Search),
 "action" => Ok(Category::Action),
 "create" => Ok(Category::Create),
 _ => Err(ErrorKind::NotAttr),
 }
}

fn parse_bool(s: &str) -> Result<bool> {
 s.parse().map_err(|_| ErrorKind::NotAttr)
}

fn parse_u64(s: &str) -> Result<u64> {
 s.parse().map_err(|_| ErrorKind::NotAttr)
}

fn bool_str(b: bool) -> String {
 if b { "true" } else { "false" }.to_string()
}
