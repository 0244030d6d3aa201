//! STATFS aggregation: combines every branch's `statvfs` into one view of
//! the union.
//!
//! Grounded on the STATFS handler's aggregation rules and the
//! `user.mergerfs.statfs`/`statfs_ignore` control-file keys: block and
//! inode totals are summed across branches, deduplicated by device id so
//! two branches that are bind mounts of the same underlying
//! filesystem aren't double-counted, and block/fragment/name-length limits
//! are normalized down to the most restrictive value so a client never sees
//! a size guarantee only some branches can honor.

use std::collections::HashSet;

use crate::branch::{BranchMode, SpaceInfo};
use crate::error::{ErrorKind, Result};
use crate::Branches;

/// Whether read-only/no-create branches still contribute their free space
/// to the aggregate, or are treated as fully consumed (the
/// `user.mergerfs.statfs_ignore` control-file key).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatfsIgnore {
 /// Count every branch's free space (the default).
 None,
 /// Read-only branches contribute 0 to available blocks/inodes.
 ReadOnly,
 /// Read-only *and* no-create branches contribute 0.
 NoCreate,
}

impl StatfsIgnore {
 fn excludes(self, mode: BranchMode) -> bool {
 match self {
 StatfsIgnore::None => false,
 StatfsIgnore::ReadOnly => mode == BranchMode::Ro,
 StatfsIgnore::NoCreate => matches!(mode, BranchMode::Ro | BranchMode::Nc),
 }
 }
}

/// Aggregates every reachable branch's space info into one [`SpaceInfo`].
///
/// A branch whose `statvfs`/device-id probe fails is skipped rather than
/// failing the whole call; only if *no* branch could be probed is
/// [`ErrorKind::NotFound`] returned (mirrors the "best effort" policy used
/// elsewhere for aggregate operations).
pub fn aggregate(branches: &Branches, ignore: StatfsIgnore) -> Result<SpaceInfo> {
 let mut seen_devices = HashSet::new();
 let mut bsize = u64::MAX;
 let mut frsize = u64::MAX;
 let mut namemax = u64::MAX;
 let mut blocks = 0u64;
 let mut bfree = 0u64;
 let mut bavail = 0u64;
 let mut files = 0u64;
 let mut ffree = 0u64;
 let mut favail = 0u64;
 let mut probed_any = false;

 for branch in branches.iter() {
 let Ok(device) = branch.device_id() else { continue };
 if !seen_devices.insert(device) {
 continue; // bind mount of an already-counted filesystem
 }
 let Ok(info) = branch.space_info() else { continue };

 probed_any = true;
 bsize = bsize.min(info.bsize);
 frsize = frsize.min(info.frsize);
 namemax = namemax.min(info.namemax);
 blocks = blocks.saturating_add(info.blocks);
 bfree = bfree.saturating_add(info.bfree);
 files = files.saturating_add(info.files);
 ffree = ffree.saturating_add(info.ffree);

 if !ignore.excludes(branch.mode()) {
 bavail = bavail.saturating_add(info.bavail);
 favail = favail.saturating_add(info.favail);
 }
 }

 if !probed_any {
 return Err(ErrorKind::NotFound);
 }

 Ok(SpaceInfo {
 bsize,
 frsize,
 blocks,
 bfree,
 bavail,
 files,
 ffree,
 favail,
 namemax,
 })
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::branch::Branch;
 use tempfile::tempdir;

 #[test]
 fn sums_distinct_branches() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 Branch::new(a.path(), BranchMode::Rw, 0),
 Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let agg = aggregate(&branches, StatfsIgnore::None).unwrap();
 let single = Branch::new(a.path(), BranchMode::Rw, 0).space_info().unwrap();
 // Two distinct tmpfs/filesystem entries means totals are at least
 // as large as one branch alone (exact doubling depends on whether
 // a and b share a device, which varies by test environment).
 assert!(agg.blocks >= single.blocks);
 }

 #[test]
 fn readonly_ignore_zeroes_available_not_total() {
 let a = tempdir().unwrap();
 let branches = Branches::flat(vec![Branch::new(a.path(), BranchMode::Ro, 0)]);
 let agg = aggregate(&branches, StatfsIgnore::ReadOnly).unwrap();
 assert_eq!(agg.bavail, 0);
 assert!(agg.blocks > 0);
 }

 #[test]
 fn no_branches_probed_is_not_found() {
 let branches = Branches::flat(vec![Branch::new("/nonexistent/path/xyz", BranchMode::Rw, 0)]);
 assert_eq!(aggregate(&branches, StatfsIgnore::None).unwrap_err(), ErrorKind::NotFound);
 }
}
