//! The maintenance thread: periodic, request-independent upkeep.
//!
//! The remembered-node set must be pruned on its own schedule rather than
//! inline in a request handler — walking every remembered entry is allowed
//! to take a moment, which would be an unacceptable stall if it ran on a
//! FUSE request thread. `oxcrypt-mount`'s background cache-eviction sweep is
//! the closest analog in the corpus; this is the same "a background thread
//! owns the clock, request handlers only mutate state" shape generalized to
//! the node table's remembered-node pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mergerfs_core::NodeTable;
use tracing::debug;

/// Runs [`NodeTable::prune_remembered`] every `interval` until `stop` is
/// set. Spawned once at startup and joined on unmount.
pub fn spawn(table: Arc<NodeTable>, interval: Duration, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
 std::thread::Builder::new()
 .name("mergerfs-maintenance".to_string())
 .spawn(move || {
 while !stop.load(Ordering::Acquire) {
 std::thread::sleep(interval);
 if stop.load(Ordering::Acquire) {
 break;
 }
 let pruned = table.prune_remembered(Instant::now());
 if pruned > 0 {
 debug!(pruned, "maintenance: pruned remembered nodes");
 }
 }
 })
 .expect("failed to spawn maintenance thread")
}

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn spawn_and_stop_cleanly() {
 let table = Arc::new(NodeTable::new(true, Duration::from_millis(0)));
 let stop = Arc::new(AtomicBool::new(false));
 let handle = spawn(table, Duration::from_millis(5), stop.clone());
 std::thread::sleep(Duration::from_millis(20));
 stop.store(true, Ordering::Release);
 handle.join().unwrap();
 }
}
