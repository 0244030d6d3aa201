//! Branch data model: the underlying directory trees unioned into the mount.
//!
//! A [`Branch`] is one such directory plus its mode and space threshold.
//! Branches are grouped into [`BranchGroup`]s, and the full ordered list of
//! groups is held as an immutable, reference-counted [`Branches`] snapshot:
//! reconfiguration (via the `/.mergerfs` control file) installs a brand new
//! snapshot rather than mutating one in place, so in-flight requests that
//! already hold a clone of the old `Arc` keep operating against a
//! consistent view.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{ErrorKind, Result};

/// How a branch participates in branch-selection policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchMode {
 /// Fully read-write: eligible for Search, Action, and Create policies.
 Rw,
 /// Read-only: excluded from Action and Create policies.
 Ro,
 /// "No create": eligible for Search/Action but never as a Create target.
 Nc,
}

impl BranchMode {
 /// Whether a branch in this mode may be chosen by a Create policy.
 pub fn allows_create(self) -> bool {
 matches!(self, BranchMode::Rw)
 }

 /// Whether a branch in this mode may be chosen by an Action (modify
 /// existing path) policy.
 pub fn allows_action(self) -> bool {
 !matches!(self, BranchMode::Ro)
 }
}

impl fmt::Display for BranchMode {
 fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
 let s = match self {
 BranchMode::Rw => "RW",
 BranchMode::Ro => "RO",
 BranchMode::Nc => "NC",
 };
 f.write_str(s)
 }
}

impl FromStr for BranchMode {
 type Err = ErrorKind;

 fn from_str(s: &str) -> Result<Self> {
 match s.to_ascii_uppercase().as_str() {
 "RW" => Ok(BranchMode::Rw),
 "RO" => Ok(BranchMode::Ro),
 "NC" => Ok(BranchMode::Nc),
 _ => Err(ErrorKind::NotAttr),
 }
 }
}

/// Space usage reported by a branch's filesystem (from `statvfs`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceInfo {
 /// Fundamental filesystem block size.
 pub bsize: u64,
 /// Fragment size (`f_frsize`).
 pub frsize: u64,
 /// Total blocks.
 pub blocks: u64,
 /// Free blocks.
 pub bfree: u64,
 /// Free blocks available to unprivileged users.
 pub bavail: u64,
 /// Total inodes.
 pub files: u64,
 /// Free inodes.
 pub ffree: u64,
 /// Free inodes available to unprivileged users.
 pub favail: u64,
 /// Maximum filename length.
 pub namemax: u64,
}

impl SpaceInfo {
 /// Bytes available to unprivileged users (`bavail * frsize`).
 pub fn available_bytes(&self) -> u64 {
 self.bavail.saturating_mul(self.frsize)
 }
}

/// One underlying directory tree unioned into the mount.
#[derive(Debug)]
pub struct Branch {
 path: PathBuf,
 mode: BranchMode,
 min_free_space: u64,
 /// Cached "the backing filesystem itself reports read-only" flag,
 /// refreshed opportunistically by the router on EROFS (see
 /// CREATE/MKNOD branch-demotion retry).
 read_only_cached: AtomicBool,
}

impl Branch {
 /// Creates a new branch.
 pub fn new(path: impl Into<PathBuf>, mode: BranchMode, min_free_space: u64) -> Self {
 Self {
 path: path.into(),
 mode,
 min_free_space,
 read_only_cached: AtomicBool::new(false),
 }
 }

 /// The branch's mount-point directory.
 pub fn path(&self) -> &Path {
 &self.path
 }

 /// The configured mode.
 pub fn mode(&self) -> BranchMode {
 self.mode
 }

 /// The configured minimum free space threshold, in bytes.
 pub fn min_free_space(&self) -> u64 {
 self.min_free_space
 }

 /// Whether the backing filesystem has been observed to be read-only
 /// (distinct from the configured `mode`).
 pub fn is_read_only_fs(&self) -> bool {
 self.read_only_cached.load(Ordering::Acquire)
 }

 /// Marks this branch read-only after an EROFS observed from the
 /// backend (see the CREATE/MKNOD branch-demotion retry in the
 /// operation router).
 pub fn mark_read_only(&self) {
 self.read_only_cached.store(true, Ordering::Release);
 }

 /// Whether this branch is eligible as a Create-policy target: writable
 /// mode, not reported read-only, and above its free-space floor.
 pub fn eligible_for_create(&self) -> bool {
 self.mode.allows_create() && !self.is_read_only_fs() && self.has_min_free_space()
 }

 /// Whether this branch is eligible as an Action-policy target.
 pub fn eligible_for_action(&self) -> bool {
 self.mode.allows_action() && !self.is_read_only_fs()
 }

 /// Whether the branch's free space is at or above `min_free_space`.
 ///
 /// A branch whose `statvfs` probe fails is treated as ineligible rather
 /// than panicking — the caller's policy loop simply skips it, matching
 /// "errors encountered while probing propagate as the aggregate error
 /// only if no branch succeeds".
 pub fn has_min_free_space(&self) -> bool {
 match self.space_info() {
 Ok(info) => info.available_bytes() >= self.min_free_space,
 Err(_) => false,
 }
 }

 /// Probes the branch's filesystem via `statvfs(2)`.
 pub fn space_info(&self) -> Result<SpaceInfo> {
 let vfs = nix::sys::statvfs::statvfs(&self.path)
 .map_err(|e| ErrorKind::from_errno(e as i32))?;
 Ok(SpaceInfo {
 bsize: vfs.block_size(),
 frsize: vfs.fragment_size(),
 blocks: vfs.blocks(),
 bfree: vfs.blocks_free(),
 bavail: vfs.blocks_available(),
 files: vfs.files(),
 ffree: vfs.files_free(),
 favail: vfs.files_available(),
 namemax: vfs.name_max(),
 })
 }

 /// The device id backing this branch, used by STATFS aggregation to
 /// avoid double-counting two branches that are bind mounts of the same
 /// underlying filesystem.
 pub fn device_id(&self) -> Result<u64> {
 use std::os::unix::fs::MetadataExt;
 std::fs::metadata(&self.path)
 .map(|m| m.dev())
 .map_err(|e| ErrorKind::from_io(&e))
 }

 /// The modification time of `relpath` within this branch, if it exists.
 pub fn mtime_of(&self, relpath: &Path) -> Option<SystemTime> {
 std::fs::metadata(self.path.join(relpath))
 .and_then(|m| m.modified())
 .ok()
 }

 /// Whether `relpath` exists within this branch.
 pub fn contains(&self, relpath: &Path) -> bool {
 self.path.join(relpath).symlink_metadata().is_ok()
 }

 /// Whether `relpath`'s *parent* directory exists within this branch
 /// (used by path-preserving Create policies).
 pub fn contains_parent_of(&self, relpath: &Path) -> bool {
 match relpath.parent() {
 Some(parent) if !parent.as_os_str().is_empty() => {
 self.path.join(parent).is_dir()
 }
 _ => true, // root-level create: the branch root always "contains" it
 }
 }
}

/// A named, ordered sequence of branches, iterated as a unit by the policy
/// engine (e.g. branches that live on the same physical volume).
#[derive(Debug)]
pub struct BranchGroup {
 branches: Vec<Arc<Branch>>,
}

impl BranchGroup {
 /// Creates a new group from a list of branches.
 pub fn new(branches: Vec<Arc<Branch>>) -> Self {
 Self { branches }
 }

 /// Iterates the branches in this group, in order.
 pub fn iter(&self) -> impl Iterator<Item = &Arc<Branch>> {
 self.branches.iter()
 }

 /// Number of branches in this group.
 pub fn len(&self) -> usize {
 self.branches.len()
 }

 /// Whether this group has no branches.
 pub fn is_empty(&self) -> bool {
 self.branches.is_empty()
 }
}

/// The full, ordered branch-set snapshot.
///
/// Shared immutably among request handlers via `Arc<Branches>`;
/// reconfiguration through the control file builds a new `Branches` and
/// atomically swaps the pointer a caller holds (see `control_file.rs`).
#[derive(Debug, Default)]
pub struct Branches {
 groups: Vec<BranchGroup>,
}

impl Branches {
 /// Creates a branch-set from an ordered list of groups.
 pub fn new(groups: Vec<BranchGroup>) -> Self {
 Self { groups }
 }

 /// Creates a branch-set where every branch is its own singleton group
 /// (the common case for a flat `path=MODE,path=MODE,...` list).
 pub fn flat(branches: Vec<Branch>) -> Self {
 let groups = branches
 .into_iter()
 .map(|b| BranchGroup::new(vec![Arc::new(b)]))
 .collect();
 Self { groups }
 }

 /// Iterates every branch across every group, group-by-group then
 /// branch-by-branch ("branches are visited in `Branches` iteration order").
 pub fn iter(&self) -> impl Iterator<Item = &Arc<Branch>> {
 self.groups.iter().flat_map(|g| g.iter())
 }

 /// Number of branches across all groups.
 pub fn len(&self) -> usize {
 self.groups.iter().map(BranchGroup::len).sum()
 }

 /// Whether there are no branches at all.
 pub fn is_empty(&self) -> bool {
 self.groups.iter().all(BranchGroup::is_empty)
 }

 /// Parses the `path=MODE,min_free_space` flat list form used by the
 /// `user.mergerfs.branches` control-file key and the startup TOML
 /// `branches` array.
 ///
 /// Entries are comma-separated; each entry is `path[=MODE][:min_free]`.
 /// `MODE` defaults to `RW`; `min_free` defaults to 0 (disabled).
 pub fn parse(spec: &str) -> Result<Self> {
 let mut branches = Vec::new();
 for entry in spec.split(',').map(str::trim).filter(|s| !s.is_empty()) {
 let mut parts = entry.split(':');
 let path_and_mode = parts.next().unwrap_or_default();
 let min_free_space = parts
 .next()
 .map(|s| s.parse::<u64>().unwrap_or(0))
 .unwrap_or(0);

 let (path, mode) = match path_and_mode.split_once('=') {
 Some((p, m)) => (p, BranchMode::from_str(m)?),
 None => (path_and_mode, BranchMode::Rw),
 };
 if path.is_empty() {
 return Err(ErrorKind::NotAttr);
 }
 branches.push(Branch::new(path, mode, min_free_space));
 }
 Ok(Branches::flat(branches))
 }

 /// Renders back to the flat `path=MODE:min_free` form (for `GET` on the
 /// `user.mergerfs.branches` control-file key).
 pub fn to_spec_string(&self) -> String {
 self.iter()
 .map(|b| format!("{}={}:{}", b.path().display(), b.mode(), b.min_free_space()))
 .collect::<Vec<_>>()
 .join(",")
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn mode_eligibility() {
 assert!(BranchMode::Rw.allows_create());
 assert!(BranchMode::Rw.allows_action());
 assert!(!BranchMode::Ro.allows_create());
 assert!(!BranchMode::Ro.allows_action());
 assert!(!BranchMode::Nc.allows_create());
 assert!(BranchMode::Nc.allows_action());
 }

 #[test]
 fn mode_from_str_case_insensitive() {
 assert_eq!(BranchMode::from_str("rw").unwrap(), BranchMode::Rw);
 assert_eq!(BranchMode::from_str("RO").unwrap(), BranchMode::Ro);
 assert!(BranchMode::from_str("bogus").is_err());
 }

 #[test]
 fn parse_flat_branch_spec() {
 let branches = Branches::parse("/mnt/a=RW:1000,/mnt/b=RO,/mnt/c").unwrap();
 assert_eq!(branches.len(), 3);
 let paths: Vec<_> = branches.iter().map(|b| b.path().to_path_buf()).collect();
 assert_eq!(paths[0], PathBuf::from("/mnt/a"));
 assert_eq!(branches.iter().nth(0).unwrap().min_free_space(), 1000);
 assert_eq!(branches.iter().nth(1).unwrap().mode(), BranchMode::Ro);
 assert_eq!(branches.iter().nth(2).unwrap().mode(), BranchMode::Rw);
 }

 #[test]
 fn parse_rejects_empty_path() {
 assert!(Branches::parse("=RW").is_err());
 }

 #[test]
 fn iteration_order_is_group_then_branch() {
 let a = Arc::new(Branch::new("/a", BranchMode::Rw, 0));
 let b = Arc::new(Branch::new("/b", BranchMode::Rw, 0));
 let c = Arc::new(Branch::new("/c", BranchMode::Rw, 0));
 let branches = Branches::new(vec![
 BranchGroup::new(vec![a.clone(), b.clone()]),
 BranchGroup::new(vec![c.clone()]),
 ]);
 let paths: Vec<_> = branches.iter().map(|b| b.path().to_path_buf()).collect();
 assert_eq!(
 paths,
 vec![PathBuf::from("/a"), PathBuf::from("/b"), PathBuf::from("/c")]
 );
 }

 #[test]
 fn mark_read_only_affects_eligibility() {
 let branch = Branch::new("/tmp", BranchMode::Rw, 0);
 assert!(branch.eligible_for_action());
 branch.mark_read_only();
 assert!(!branch.eligible_for_action());
 assert!(!branch.eligible_for_create());
 }

 #[test]
 fn contains_parent_of_root_level_is_always_true() {
 let branch = Branch::new(std::env::temp_dir(), BranchMode::Rw, 0);
 assert!(branch.contains_parent_of(Path::new("toplevel.txt")));
 }
}
