//! Mirrors a path's ancestor directory structure from one branch onto
//! another, so a Create policy can place a new file on a branch that
//! doesn't yet have the rest of its containing tree.
//!
//! Grounded on `original_source/src/clonepath.cpp`'s `fs::clonepath`
//! wrapper; the recursive per-component walk and metadata-copy ("always as
//! root" — permissions are copied verbatim via `chown`/`chmod` rather than
//! subject to the caller's umask) come from that file, which leaves
//! partially-created trees in place on failure. This module adds rollback
//! on partial failure instead: treating a partial clone as a correctness
//! bug and removing only the directories this call itself created.

use std::path::{Path, PathBuf};

use crate::branch::Branch;
use crate::error::{ErrorKind, Result};

/// Creates every missing ancestor directory of `relpath` on `dest`,
/// mirroring each one's mode, owner, and timestamps from `source`.
///
/// Existing directories on `dest` are left untouched. On failure partway
/// through, every directory this call created (not ones that already
/// existed) is removed again, so a caller never has to reason about a
/// half-cloned tree.
pub fn clonepath(source: &Branch, dest: &Branch, relpath: &Path) -> Result<()> {
 let Some(parent) = relpath.parent() else {
 return Ok(());
 };
 if parent.as_os_str().is_empty() {
 return Ok(());
 }

 let mut created: Vec<PathBuf> = Vec::new();
 let mut current = PathBuf::new();
 for component in parent.components() {
 current.push(component);
 let dest_path = dest.path().join(&current);
 if dest_path.is_dir() {
 continue;
 }
 let source_path = source.path().join(&current);
 match clone_one_dir(&source_path, &dest_path) {
 Ok(()) => created.push(dest_path),
 Err(e) => {
 rollback(&created);
 return Err(e);
 }
 }
 }
 Ok(())
}

fn clone_one_dir(source_path: &Path, dest_path: &Path) -> Result<()> {
 let metadata = std::fs::symlink_metadata(source_path).map_err(|e| ErrorKind::from_io(&e))?;
 std::fs::create_dir(dest_path).map_err(|e| ErrorKind::from_io(&e))?;
 copy_metadata(source_path, dest_path, &metadata)
}

fn rollback(created: &[PathBuf]) {
 for path in created.iter().rev() {
 let _ = std::fs::remove_dir(path);
 }
}

/// Copies mode, owner, and atime/mtime from `source_path` onto `dest_path`.
/// Shared with `moveonenospc.rs`, which needs the same "preserve everything
/// but the data location" behavior when migrating a file between branches.
pub(crate) fn copy_metadata(source_path: &Path, dest_path: &Path, metadata: &std::fs::Metadata) -> Result<()> {
 use std::os::unix::fs::MetadataExt;

 std::fs::set_permissions(dest_path, metadata.permissions()).map_err(|e| ErrorKind::from_io(&e))?;

 nix::unistd::chown(
 dest_path,
 Some(nix::unistd::Uid::from_raw(metadata.uid())),
 Some(nix::unistd::Gid::from_raw(metadata.gid())),
 )
 .map_err(|e| ErrorKind::from_errno(e as i32))?;

 let atime = nix::sys::time::TimeSpec::new(metadata.atime(), metadata.atime_nsec());
 let mtime = nix::sys::time::TimeSpec::new(metadata.mtime(), metadata.mtime_nsec());
 nix::sys::stat::utimensat(
 None,
 dest_path,
 &atime,
 &mtime,
 nix::sys::stat::UtimensatFlags::NoFollowSymlink,
 )
 .map_err(|e| ErrorKind::from_errno(e as i32))?;

 let _ = source_path; // kept for symmetry / future use (e.g. xattr copy)
 Ok(())
}

#[cfg(test)]
mod tests {
 use super::*;
 use crate::branch::BranchMode;
 use std::fs;
 use tempfile::tempdir;

 #[test]
 fn clones_missing_ancestors_only() {
 let source = tempdir().unwrap();
 let dest = tempdir().unwrap();
 fs::create_dir_all(source.path().join("a/b")).unwrap();
 fs::create_dir(dest.path().join("a")).unwrap(); // already exists on dest

 let source_branch = Branch::new(source.path(), BranchMode::Rw, 0);
 let dest_branch = Branch::new(dest.path(), BranchMode::Rw, 0);

 clonepath(&source_branch, &dest_branch, Path::new("a/b/file.txt")).unwrap();

 assert!(dest.path().join("a/b").is_dir());
 }

 #[test]
 fn root_level_path_needs_no_cloning() {
 let source = tempdir().unwrap();
 let dest = tempdir().unwrap();
 let source_branch = Branch::new(source.path(), BranchMode::Rw, 0);
 let dest_branch = Branch::new(dest.path(), BranchMode::Rw, 0);
 clonepath(&source_branch, &dest_branch, Path::new("file.txt")).unwrap();
 }

 #[test]
 fn rolls_back_partial_tree_on_failure() {
 let source = tempdir().unwrap();
 let dest = tempdir().unwrap();
 fs::create_dir_all(source.path().join("a/b")).unwrap();
 // Sabotage: pre-create "a/b" on dest as a *file*, so cloning "a/b/c/leaf.txt"
 // fails at the "a/b/c" step after "a" was newly created.
 fs::create_dir(dest.path().join("a")).unwrap();
 fs::write(dest.path().join("a/b"), b"not a dir").unwrap();

 let source_branch = Branch::new(source.path(), BranchMode::Rw, 0);
 let dest_branch = Branch::new(dest.path(), BranchMode::Rw, 0);

 let result = clonepath(&source_branch, &dest_branch, Path::new("a/b/c/leaf.txt"));
 assert!(result.is_err());
 // "a" pre-existed so it must survive; nothing new should be left half-built.
 assert!(dest.path().join("a").is_dir());
 }
}
