//! Error taxonomy for the dispatcher core.
//!
//! Every handler in the operation router returns either a successful reply
//! or an [`ErrorKind`]. [`ErrorKind::to_errno`] projects it down to the flat
//! `i32` errno surface the kernel understands; the richer enum is kept
//! internally so callers can log and reason about *why* an operation failed
//! (e.g. to pick the right branch-demotion or fallback behavior) without
//! re-parsing an errno.

use thiserror::Error;

/// The error kinds the dispatcher core distinguishes.
///
/// Propagation policy: per-branch errors are suppressed for Action
/// operations as long as one branch succeeds; Create/Search errors surface
/// as-is; a total Action failure reports the error the Search policy would
/// have produced for the same path.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
 /// No eligible branch has the path.
 #[error("no such file or directory")]
 NotFound,

 /// Every eligible branch is read-only.
 #[error("read-only filesystem")]
 ReadOnlyFs,

 /// Every eligible branch is below `min_free_space`, or the backend
 /// returned ENOSPC/EDQUOT.
 #[error("no space left on device")]
 NoSpace,

 /// A link/rename would have to cross branches in a path-preserving
 /// configuration.
 #[error("invalid cross-device link")]
 CrossDevice,

 /// Create target already exists.
 #[error("file exists")]
 Exists,

 /// A tree-lock could not be acquired; only ever surfaced to a caller
 /// via the scheduler's own retry loop, never returned from a handler.
 #[error("resource busy, retry")]
 Busy,

 /// Lookup of `..` at the root, or ESTALE on a missing nodeid.
 #[error("stale file handle")]
 PathEscape,

 /// Errno passed straight through from a branch backend call.
 #[error("backend I/O error: {0}")]
 BackendIo(i32),

 /// Opcode intentionally left unimplemented: `lseek`/`rename2` (the
 /// reference behavior for these is ambiguous upstream), plus BMAP, IOCTL,
 /// POLL.
 #[error("operation not supported")]
 Unsupported,

 /// xattr namespace disabled, or unknown control-file key.
 #[error("attribute not available")]
 NotAttr,
}

impl ErrorKind {
 /// Projects this error down to a raw errno for the FUSE reply.
 pub fn to_errno(&self) -> i32 {
 match self {
 ErrorKind::NotFound => libc::ENOENT,
 ErrorKind::ReadOnlyFs => libc::EROFS,
 ErrorKind::NoSpace => libc::ENOSPC,
 ErrorKind::CrossDevice => libc::EXDEV,
 ErrorKind::Exists => libc::EEXIST,
 ErrorKind::Busy => libc::EAGAIN,
 ErrorKind::PathEscape => libc::ESTALE,
 ErrorKind::BackendIo(errno) => *errno,
 ErrorKind::Unsupported => libc::ENOSYS,
 ErrorKind::NotAttr => libc::ENOATTR,
 }
 }

 /// Builds a [`ErrorKind::BackendIo`] from the current `errno` value.
 pub fn from_errno(errno: i32) -> Self {
 match errno {
 libc::ENOENT => ErrorKind::NotFound,
 libc::EROFS => ErrorKind::ReadOnlyFs,
 libc::ENOSPC | libc::EDQUOT => ErrorKind::NoSpace,
 libc::EXDEV => ErrorKind::CrossDevice,
 libc::EEXIST => ErrorKind::Exists,
 libc::ESTALE => ErrorKind::PathEscape,
 libc::ENOSYS | libc::ENOTSUP => ErrorKind::Unsupported,
 other => ErrorKind::BackendIo(other),
 }
 }

 /// Wraps a [`std::io::Error`] from a branch-backend call.
 pub fn from_io(err: &std::io::Error) -> Self {
 match err.raw_os_error() {
 Some(errno) => Self::from_errno(errno),
 None => ErrorKind::BackendIo(libc::EIO),
 }
 }
}

/// Result type used throughout the dispatcher core.
pub type Result<T> = std::result::Result<T, ErrorKind>;

#[cfg(test)]
mod tests {
 use super::*;

 #[test]
 fn errno_roundtrip_for_distinguishable_kinds() {
 let cases = [
 (ErrorKind::NotFound, libc::ENOENT),
 (ErrorKind::ReadOnlyFs, libc::EROFS),
 (ErrorKind::NoSpace, libc::ENOSPC),
 (ErrorKind::CrossDevice, libc::EXDEV),
 (ErrorKind::Exists, libc::EEXIST),
 (ErrorKind::Busy, libc::EAGAIN),
 (ErrorKind::PathEscape, libc::ESTALE),
 (ErrorKind::Unsupported, libc::ENOSYS),
 (ErrorKind::NotAttr, libc::ENOATTR),
 ];
 for (kind, errno) in cases {
 assert_eq!(kind.to_errno(), errno);
 }
 }

 #[test]
 fn backend_io_passes_errno_through() {
 let kind = ErrorKind::BackendIo(libc::EACCES);
 assert_eq!(kind.to_errno(), libc::EACCES);
 }

 #[test]
 fn from_io_maps_known_errno() {
 let io_err = std::io::Error::from_raw_os_error(libc::ENOSPC);
 assert_eq!(ErrorKind::from_io(&io_err), ErrorKind::NoSpace);
 }

 #[test]
 fn from_io_without_os_error_is_backend_eio() {
 let io_err = std::io::Error::other("boom");
 assert_eq!(ErrorKind::from_io(&io_err), ErrorKind::BackendIo(libc::EIO));
 }
}
