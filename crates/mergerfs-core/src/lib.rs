//! Backend-agnostic core of a userspace union filesystem.
//!
//! This crate implements the request dispatcher that sits between a FUSE
//! wire codec and a set of underlying directory trees ("branches"): a node
//! table (inode identity and kernel-visible lifetime), a path-lock
//! scheduler (per-node tree-locks serializing overlapping mutations), a
//! policy engine (branch selection per operation), and the supporting
//! pieces the operation router needs (clonepath, moveonenospc, the
//! `/.mergerfs` control file, stat-based STATFS aggregation).
//!
//! The actual FUSE wire protocol, and the raw POSIX calls against branches,
//! are kept out of this crate: callers provide a [`branch_io::BranchIo`]
//! implementation and drive the router-level entry points from their own
//! `fuser::Filesystem` impl.

pub mod branch;
pub mod branch_io;
pub mod clonepath;
pub mod control_file;
pub mod error;
pub mod handle;
pub mod moveonenospc;
pub mod node;
pub mod node_table;
pub mod pathlock;
pub mod policy;
pub mod statfs;

pub use branch::{Branch, BranchGroup, BranchMode, Branches};
pub use error::{ErrorKind, Result};
pub use node::{Node, NodeId, ROOT_NODEID};
pub use node_table::NodeTable;
pub use pathlock::{PathGuard, PathLockScheduler};
pub use policy::{Category, Policy};
