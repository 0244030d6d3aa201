//! The `moveonenospc` recovery path: when a write to an open file fails
//! with `ENOSPC`/`EDQUOT`, migrate the file to a branch with more room and
//! let the caller retry the write there instead of failing it outright.
//!
//! Grounded on `original_source/src/config_moveonenospc.cpp`'s five-step
//! migration sequence and the control-file key `user.mergerfs.moveonenospc`
//! that enables it — this module implements the migration itself; the
//! router decides *when*
//! to invoke it (a write handler catching `ErrorKind::NoSpace`) and is
//! responsible for redirecting the open file handle to the new branch
//! afterward.

use std::fs::File;
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::branch::Branch;
use crate::clonepath::{clonepath, copy_metadata};
use crate::error::{ErrorKind, Result};
use crate::policy::Policy;
use crate::Branches;

/// Picks a migration target: runs the configured create policy (step 1,
/// "select a branch with more free space using the [configured] create
/// policy"), then excludes `current` and any branch that can't hold
/// `needed_bytes` (`current_size + pending_bytes`, the file being migrated
/// plus the write that triggered the migration).
pub fn select_target(
 branches: &Branches,
 current: &Branch,
 relpath: &Path,
 create_policy: &Arc<dyn Policy>,
 needed_bytes: u64,
) -> Result<Arc<Branch>> {
 let picked = create_policy.select(branches, relpath)?;
 picked
 .into_iter()
 .find(|b| {
 b.path() != current.path()
 && b.space_info().map(|info| info.available_bytes() >= needed_bytes).unwrap_or(false)
 })
 .ok_or(ErrorKind::NoSpace)
}

/// Performs the five-step `moveonenospc` migration:
///
/// 1. select a target branch with more free space (see [`select_target`])
/// 2. clone `relpath`'s ancestor directories onto the target
/// 3. copy the file's bytes onto the target
/// 4. copy the file's mode, owner, and timestamps onto the target copy
/// 5. remove the original from `current`
///
/// Returns the target branch on success; the caller re-resolves the open
/// file handle against `target.path().join(relpath)` and retries the write
/// that triggered the migration.
pub fn migrate(current: &Branch, target: &Branch, relpath: &Path) -> Result<()> {
 clonepath(current, target, relpath)?;

 let source_path = current.path().join(relpath);
 let dest_path = target.path().join(relpath);

 let metadata = std::fs::symlink_metadata(&source_path).map_err(|e| ErrorKind::from_io(&e))?;
 copy_file_contents(&source_path, &dest_path)?;
 copy_metadata(&source_path, &dest_path, &metadata)?;

 std::fs::remove_file(&source_path).map_err(|e| ErrorKind::from_io(&e))?;
 Ok(())
}

fn copy_file_contents(source_path: &Path, dest_path: &Path) -> Result<()> {
 let mut src = File::open(source_path).map_err(|e| ErrorKind::from_io(&e))?;
 let mut dst = File::create(dest_path).map_err(|e| ErrorKind::from_io(&e))?;
 io::copy(&mut src, &mut dst).map_err(|e| ErrorKind::from_io(&e))?;
 dst.sync_all().map_err(|e| ErrorKind::from_io(&e))?;
 Ok(())
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::branch::BranchMode;
 use crate::policy::Category;
 use std::fs;
 use tempfile::tempdir;

 #[test]
 fn migrate_moves_bytes_and_removes_source() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 fs::write(a.path().join("f.txt"), b"payload").unwrap();

 let branch_a = Branch::new(a.path(), BranchMode::Rw, 0);
 let branch_b = Branch::new(b.path(), BranchMode::Rw, 0);

 migrate(&branch_a, &branch_b, Path::new("f.txt")).unwrap();

 assert!(!a.path().join("f.txt").exists());
 assert_eq!(fs::read(b.path().join("f.txt")).unwrap(), b"payload");
 }

 #[test]
 fn migrate_clones_ancestor_directories() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 fs::create_dir(a.path().join("sub")).unwrap();
 fs::write(a.path().join("sub/f.txt"), b"x").unwrap();

 let branch_a = Branch::new(a.path(), BranchMode::Rw, 0);
 let branch_b = Branch::new(b.path(), BranchMode::Rw, 0);

 migrate(&branch_a, &branch_b, Path::new("sub/f.txt")).unwrap();

 assert!(b.path().join("sub").is_dir());
 assert!(b.path().join("sub/f.txt").exists());
 }

 #[test]
 fn select_target_excludes_current_branch() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 Branch::new(a.path(), BranchMode::Rw, 0),
 Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let current = Branch::new(a.path(), BranchMode::Rw, 0);
 let policy = crate::policy::by_name(Category::Create, "mfs").unwrap();
 let target = select_target(&branches, &current, Path::new("f.txt"), &policy, 0).unwrap();
 assert_eq!(target.path(), b.path());
 }

 #[test]
 fn select_target_rejects_branch_without_enough_space() {
 let a = tempdir().unwrap();
 let b = tempdir().unwrap();
 let branches = Branches::flat(vec![
 Branch::new(a.path(), BranchMode::Rw, 0),
 Branch::new(b.path(), BranchMode::Rw, 0),
 ]);
 let current = Branch::new(a.path(), BranchMode::Rw, 0);
 let policy = crate::policy::by_name(Category::Create, "mfs").unwrap();
 let err = select_target(&branches, &current, Path::new("f.txt"), &policy, u64::MAX).unwrap_err();
 assert_eq!(err, ErrorKind::NoSpace);
 }
}
