//! The node: the dispatcher's core addressable entity.
//!
//! A [`Node`] pairs a kernel-visible identity (`nodeid`, `generation`) with
//! the bookkeeping the dispatcher needs to know when it is safe to free:
//! `nlookup` (kernel reference count, only FORGET decreases it), `refctr`
//! (internal structural references — children, the remembered set,
//! in-flight operations), `open_count` (live file handles), and `tree_lock`
//! (the path-lock scheduler's per-node signed counter, see `pathlock.rs`).

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// The root node's fixed id (FUSE convention).
pub const ROOT_NODEID: u64 = 1;

/// `tree_lock` sentinel meaning "a writer holds exclusive rights here".
pub const TREELOCK_WRITE: i64 = i64::MIN / 2;

/// Offset added to a positive `tree_lock` to mark "a writer is waiting".
///
/// Readers may still decrement the counter while this offset is applied;
/// the node is only considered quiescent once it returns to exactly this
/// offset (i.e. all readers drained but the waiter hasn't yet been handed
/// the lock).
pub const TREELOCK_WAIT_OFFSET: i64 = i64::MIN / 4;

/// A 64-bit kernel identifier plus its per-mount generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
 pub nodeid: u64,
 pub generation: u64,
}

impl NodeId {
 /// The well-known root node id, generation 0.
 pub const ROOT: NodeId = NodeId {
 nodeid: ROOT_NODEID,
 generation: 0,
 };
}

/// One byte-range POSIX lock record, attached to a node's open handles.
///
/// These are local-only: the dispatcher does not propagate locks across
/// branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockRecord {
 pub lock_type: i32,
 pub start: u64,
 pub end: u64,
 pub pid: u32,
 pub owner: u64,
}

/// The core entity the node table manages.
///
/// Parent links are by `nodeid`, not by owning reference, to avoid cycles;
/// the table itself resolves a `parent` field back to a live node.
#[derive(Debug)]
pub struct Node {
 pub nodeid: u64,
 pub generation: u64,
 /// Leaf component; `None` only for the root and for remembered,
 /// currently-unhashed nodes.
 pub name: Option<String>,
 /// Parent's nodeid; the root is its own parent (sentinel).
 pub parent: u64,

 nlookup: AtomicU64,
 refctr: AtomicU64,
 open_count: AtomicU64,
 /// Signed tree-lock counter; see module docs and `pathlock.rs`.
 tree_lock: AtomicI64,

 /// CRC32b fingerprint of the last observed `(ino, size, mtime)`, used to
 /// decide whether to invalidate the kernel page cache.
 stat_crc32b: AtomicU64,
 stat_cache_valid: std::sync::atomic::AtomicBool,

 pub locks: parking_lot::Mutex<Vec<LockRecord>>,
}

impl Node {
 /// Creates the well-known root node.
 pub fn root() -> Self {
 Self {
 nodeid: ROOT_NODEID,
 generation: 0,
 name: None,
 parent: ROOT_NODEID,
 nlookup: AtomicU64::new(1),
 refctr: AtomicU64::new(1),
 open_count: AtomicU64::new(0),
 tree_lock: AtomicI64::new(0),
 stat_crc32b: AtomicU64::new(0),
 stat_cache_valid: std::sync::atomic::AtomicBool::new(false),
 locks: parking_lot::Mutex::new(Vec::new()),
 }
 }

 /// Creates a fresh non-root node with `nlookup == initial_nlookup`.
 pub fn new(nodeid: u64, generation: u64, parent: u64, name: String, initial_nlookup: u64) -> Self {
 Self {
 nodeid,
 generation,
 name: Some(name),
 parent,
 nlookup: AtomicU64::new(initial_nlookup),
 refctr: AtomicU64::new(1),
 open_count: AtomicU64::new(0),
 tree_lock: AtomicI64::new(0),
 stat_crc32b: AtomicU64::new(0),
 stat_cache_valid: std::sync::atomic::AtomicBool::new(false),
 locks: parking_lot::Mutex::new(Vec::new()),
 }
 }

 pub fn id(&self) -> NodeId {
 NodeId {
 nodeid: self.nodeid,
 generation: self.generation,
 }
 }

 pub fn nlookup(&self) -> u64 {
 self.nlookup.load(Ordering::Acquire)
 }

 pub fn inc_nlookup(&self) -> u64 {
 self.nlookup.fetch_add(1, Ordering::AcqRel) + 1
 }

 /// Subtracts `n` from `nlookup`, saturating at 0 (a kernel FORGET racing
 /// an already-evicted count should never panic the mount).
 pub fn dec_nlookup(&self, n: u64) -> u64 {
 loop {
 let current = self.nlookup.load(Ordering::Acquire);
 let next = current.saturating_sub(n);
 if self
 .nlookup
 .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
 .is_ok()
 {
 return next;
 }
 }
 }

 pub fn refctr(&self) -> u64 {
 self.refctr.load(Ordering::Acquire)
 }

 pub fn inc_refctr(&self) -> u64 {
 self.refctr.fetch_add(1, Ordering::AcqRel) + 1
 }

 /// Decrements `refctr`; returns the new value.
 pub fn dec_refctr(&self) -> u64 {
 self.refctr.fetch_sub(1, Ordering::AcqRel) - 1
 }

 pub fn open_count(&self) -> u64 {
 self.open_count.load(Ordering::Acquire)
 }

 pub fn inc_open_count(&self) -> u64 {
 self.open_count.fetch_add(1, Ordering::AcqRel) + 1
 }

 pub fn dec_open_count(&self) -> u64 {
 self.open_count.fetch_sub(1, Ordering::AcqRel) - 1
 }

 pub fn tree_lock(&self) -> i64 {
 self.tree_lock.load(Ordering::Acquire)
 }

 pub fn set_tree_lock(&self, value: i64) {
 self.tree_lock.store(value, Ordering::Release);
 }

 /// Compare-and-swap on the tree lock; used by `pathlock.rs` to
 /// atomically claim/release under the node table's single mutex `L`
 /// (the CAS itself is redundant under that mutex but documents the
 /// intended contract: all counter updates are already guarded).
 pub fn cas_tree_lock(&self, current: i64, new: i64) -> bool {
 self.tree_lock
 .compare_exchange(current, new, Ordering::AcqRel, Ordering::Acquire)
 .is_ok()
 }

 pub fn fetch_add_tree_lock(&self, delta: i64) -> i64 {
 self.tree_lock.fetch_add(delta, Ordering::AcqRel)
 }

 /// Compares a new `(ino, size, mtime)` fingerprint against the stored
 /// one, returning whether the page cache should be invalidated (the
 /// fingerprint differs from a previously-valid one). Always stores the
 /// new fingerprint and marks it valid before returning.
 pub fn update_stat_fingerprint(&self, ino: u64, size: u64, mtime_secs: i64) -> bool {
 let mut hasher = crc32fast::Hasher::new();
 hasher.update(&ino.to_le_bytes());
 hasher.update(&size.to_le_bytes());
 hasher.update(&mtime_secs.to_le_bytes());
 let new_crc = u64::from(hasher.finalize());

 let was_valid = self.stat_cache_valid.load(Ordering::Acquire);
 let old_crc = self.stat_crc32b.swap(new_crc, Ordering::AcqRel);
 self.stat_cache_valid.store(true, Ordering::Release);

 was_valid && old_crc != new_crc
 }
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn root_has_self_parent_and_nlookup_one() {
 let root = Node::root();
 assert_eq!(root.parent, ROOT_NODEID);
 assert_eq!(root.nlookup(), 1);
 assert!(root.name.is_none());
 }

 #[test]
 fn nlookup_inc_dec() {
 let node = Node::new(2, 0, ROOT_NODEID, "a".into(), 1);
 assert_eq!(node.inc_nlookup(), 2);
 assert_eq!(node.dec_nlookup(1), 1);
 assert_eq!(node.dec_nlookup(5), 0); // saturates, never underflows
 }

 #[test]
 fn open_count_tracks_open_release_pairs() {
 let node = Node::new(2, 0, ROOT_NODEID, "a".into(), 1);
 assert_eq!(node.inc_open_count(), 1);
 assert_eq!(node.inc_open_count(), 2);
 assert_eq!(node.dec_open_count(), 1);
 assert_eq!(node.dec_open_count(), 0);
 }

 #[test]
 fn stat_fingerprint_first_observation_never_invalidates() {
 let node = Node::new(2, 0, ROOT_NODEID, "a".into(), 1);
 assert!(!node.update_stat_fingerprint(2, 100, 1000));
 }

 #[test]
 fn stat_fingerprint_change_invalidates() {
 let node = Node::new(2, 0, ROOT_NODEID, "a".into(), 1);
 node.update_stat_fingerprint(2, 100, 1000);
 assert!(node.update_stat_fingerprint(2, 200, 1000));
 // Same fingerprint again: no invalidation.
 assert!(!node.update_stat_fingerprint(2, 200, 1000));
 }

 #[test]
 fn tree_lock_cas_contract() {
 let node = Node::new(2, 0, ROOT_NODEID, "a".into(), 1);
 assert!(node.cas_tree_lock(0, TREELOCK_WRITE));
 assert!(!node.cas_tree_lock(0, TREELOCK_WRITE)); // already held
 assert!(node.cas_tree_lock(TREELOCK_WRITE, 0));
 }
}
