//! Open-handle state: what the dispatcher remembers between an OPEN/OPENDIR
//! and the matching RELEASE/RELEASEDIR.
//!
//! Grounded on the directory-handle and file-info field lists, and on the
//! handle-table pattern in `oxcrypt-mount/src/handle_table.rs` (opaque
//! kernel-facing `u64` handles
//! mapped to backend state via a concurrent map), adapted here to two
//! distinct handle kinds rather than one, since a union filesystem's
//! directory handle has to remember which branch each already-yielded name
//! came from while a file handle is pinned to exactly one.

use std::fs::File;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

/// One entry accumulated into a merged directory listing.
#[derive(Debug, Clone)]
pub struct DirEntry {
 pub name: String,
 pub nodeid: Option<u64>,
 pub kind: std::fs::FileType,
}

/// State kept for an open directory between OPENDIR and RELEASEDIR.
///
/// Readdir on a union directory merges every branch's listing once, at
/// OPENDIR time, de-duplicating by name (first branch in policy order
/// wins) so that a `seekdir`/`telldir` sequence from the kernel always
/// walks a stable snapshot.
pub struct DirHandle {
 entries: Mutex<Vec<DirEntry>>,
}

impl DirHandle {
 /// Builds a handle from branches' listings, already merged and ordered
 /// by the caller (first-seen name wins on duplicates).
 pub fn new(entries: Vec<DirEntry>) -> Self {
 Self {
 entries: Mutex::new(entries),
 }
 }

 /// Returns entries starting at `offset` (the FUSE readdir cursor).
 pub fn entries_from(&self, offset: i64) -> Vec<DirEntry> {
 let entries = self.entries.lock();
 let offset = offset.max(0) as usize;
 entries.iter().skip(offset).cloned().collect()
 }

 pub fn len(&self) -> usize {
 self.entries.lock().len()
 }

 pub fn is_empty(&self) -> bool {
 self.entries.lock().is_empty()
 }
}

/// State kept for an open file between OPEN/CREATE and RELEASE.
///
/// `backend` is the live branch-backed file descriptor; `branch_path`
/// records which branch it lives on so a write handler can invoke
/// `moveonenospc::migrate` and redirect this handle without re-resolving
/// the path through the policy engine.
pub struct FileInfo {
 backend: Mutex<File>,
 branch_path: Mutex<PathBuf>,
 pub flags: i32,
 pub direct_io: bool,
 pub keep_cache: bool,
 /// Set once a write has gone through, so FLUSH can skip an fsync on a
 /// close that never wrote.
 pub writepage: std::sync::atomic::AtomicBool,
 pub lock_owner: u64,
 /// Whether this handle should serve READDIR from its own cache rather
 /// than re-merging branches (only meaningful on a [`DirHandle`]-backed
 /// open; kept here too since some callers share one flags struct).
 pub cache_readdir: bool,
}

impl FileInfo {
 pub fn new(backend: File, branch_path: PathBuf, flags: i32) -> Self {
 Self {
 backend: Mutex::new(backend),
 branch_path: Mutex::new(branch_path),
 flags,
 direct_io: false,
 keep_cache: false,
 writepage: std::sync::atomic::AtomicBool::new(false),
 lock_owner: 0,
 cache_readdir: false,
 }
 }

 /// Runs `f` with exclusive access to the backend file descriptor.
 pub fn with_backend<R>(&self, f: impl FnOnce(&mut File) -> R) -> R {
 let mut guard = self.backend.lock();
 f(&mut guard)
 }

 /// The branch path this handle currently lives on.
 pub fn branch_path(&self) -> PathBuf {
 self.branch_path.lock().clone()
 }

 /// Swaps in a new backend file (used after a `moveonenospc` migration
 /// redirects this handle to a different branch). Returns the old path.
 pub fn replace_backend(&self, new_backend: File, new_branch_path: PathBuf) -> PathBuf {
 *self.backend.lock() = new_backend;
 std::mem::replace(&mut *self.branch_path.lock(), new_branch_path)
 }

 pub fn mark_written(&self) {
 self.writepage.store(true, Ordering::Release);
 }

 pub fn was_written(&self) -> bool {
 self.writepage.load(Ordering::Acquire)
 }
}

/// Allocates the opaque `u64` handles the kernel passes back on every
/// subsequent call for a given open file or directory.
#[derive(Default)]
pub struct HandleAllocator {
 next: AtomicU64,
}

impl HandleAllocator {
 pub fn new() -> Self {
 Self { next: AtomicU64::new(1) }
 }

 pub fn allocate(&self) -> u64 {
 self.next.fetch_add(1, Ordering::Relaxed)
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn handle_allocator_never_repeats() {
 let alloc = HandleAllocator::new();
 let a = alloc.allocate();
 let b = alloc.allocate();
 assert_ne!(a, b);
 }

 #[test]
 fn dir_handle_respects_offset() {
 let entries = vec![
 DirEntry { name: "a".into(), nodeid: Some(2), kind: std::fs::metadata(".").unwrap().file_type() },
 DirEntry { name: "b".into(), nodeid: Some(3), kind: std::fs::metadata(".").unwrap().file_type() },
 ];
 let handle = DirHandle::new(entries);
 assert_eq!(handle.entries_from(0).len(), 2);
 assert_eq!(handle.entries_from(1).len(), 1);
 assert_eq!(handle.entries_from(5).len(), 0);
 }
}
