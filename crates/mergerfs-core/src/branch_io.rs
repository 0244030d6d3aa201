//! The branch I/O boundary: the narrow interface the dispatcher calls
//! through to actually touch a branch's backing filesystem.
//!
//! Raw POSIX I/O on branches is scoped out of the dispatcher core's
//! concerns — the node table, path-lock scheduler, and policy engine only
//! need to know *which* branch(es) an
//! operation touches, not how the bytes get there. [`BranchIo`] is that
//! interface; [`StdIo`] is the default, real implementation, built directly
//! on `std::fs` plus the handful of calls `std::fs` doesn't cover (xattrs,
//! `mknod`), which go through `libc` the same way `branch.rs`'s `statvfs`
//! call goes through `nix`. A test double can implement the trait without
//! touching a real filesystem.

use std::ffi::CString;
use std::fs::File;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::{ErrorKind, Result};

/// One merged directory entry as read off a branch.
#[derive(Debug, Clone)]
pub struct RawDirEntry {
 pub name: String,
 pub file_type: std::fs::FileType,
}

/// POSIX operations the dispatcher needs performed against a concrete path
/// on a concrete branch.
///
/// Every method takes an absolute path (branch root already joined with the
/// relative path by the caller) — `BranchIo` itself has no notion of
/// branches or policy, only "do this syscall at this path".
pub trait BranchIo: Send + Sync {
 fn open(&self, path: &Path, flags: i32) -> Result<File>;
 fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<File>;
 fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;
 fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()>;
 fn unlink(&self, path: &Path) -> Result<()>;
 fn rmdir(&self, path: &Path) -> Result<()>;
 fn rename(&self, from: &Path, to: &Path) -> Result<()>;
 fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
 fn readlink(&self, path: &Path) -> Result<PathBuf>;
 fn link(&self, from: &Path, to: &Path) -> Result<()>;
 fn metadata(&self, path: &Path) -> Result<std::fs::Metadata>;
 fn symlink_metadata(&self, path: &Path) -> Result<std::fs::Metadata>;
 fn set_permissions(&self, path: &Path, mode: u32) -> Result<()>;
 fn readdir(&self, path: &Path) -> Result<Vec<RawDirEntry>>;

 fn getxattr(&self, path: &Path, name: &str) -> Result<Vec<u8>>;
 fn setxattr(&self, path: &Path, name: &str, value: &[u8], flags: i32) -> Result<()>;
 fn listxattr(&self, path: &Path) -> Result<Vec<u8>>;
 fn removexattr(&self, path: &Path, name: &str) -> Result<()>;
}

fn to_cstring(path: &Path) -> Result<CString> {
 CString::new(path.as_os_str().as_bytes()).map_err(|_| ErrorKind::PathEscape)
}

fn io_err(e: std::io::Error) -> ErrorKind {
 ErrorKind::from_io(&e)
}

fn errno_err() -> ErrorKind {
 ErrorKind::from_errno(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO))
}

/// The real, `std::fs`/`libc`-backed implementation used by every mounted
/// dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdIo;

impl BranchIo for StdIo {
 fn open(&self, path: &Path, flags: i32) -> Result<File> {
 use std::os::unix::fs::OpenOptionsExt;
 std::fs::OpenOptions::new()
 .read(true)
 .write(flags & libc::O_WRONLY != 0 || flags & libc::O_RDWR != 0)
 .custom_flags(flags & !(libc::O_CREAT | libc::O_EXCL))
 .open(path)
 .map_err(io_err)
 }

 fn create(&self, path: &Path, mode: u32, flags: i32) -> Result<File> {
 use std::os::unix::fs::OpenOptionsExt;
 std::fs::OpenOptions::new()
 .read(true)
 .write(true)
 .create(true)
 .truncate(flags & libc::O_TRUNC != 0)
 .custom_flags(flags & !libc::O_CREAT)
 .mode(mode)
 .open(path)
 .map_err(io_err)
 }

 fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
 std::fs::create_dir(path).map_err(io_err)?;
 self.set_permissions(path, mode)
 }

 fn mknod(&self, path: &Path, mode: u32, rdev: u64) -> Result<()> {
 let c_path = to_cstring(path)?;
 let rc = unsafe { libc::mknod(c_path.as_ptr(), mode, rdev as libc::dev_t) };
 if rc == 0 {
 Ok(())
 } else {
 Err(errno_err())
 }
 }

 fn unlink(&self, path: &Path) -> Result<()> {
 std::fs::remove_file(path).map_err(io_err)
 }

 fn rmdir(&self, path: &Path) -> Result<()> {
 std::fs::remove_dir(path).map_err(io_err)
 }

 fn rename(&self, from: &Path, to: &Path) -> Result<()> {
 std::fs::rename(from, to).map_err(io_err)
 }

 fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
 std::os::unix::fs::symlink(target, link).map_err(io_err)
 }

 fn readlink(&self, path: &Path) -> Result<PathBuf> {
 std::fs::read_link(path).map_err(io_err)
 }

 fn link(&self, from: &Path, to: &Path) -> Result<()> {
 std::fs::hard_link(from, to).map_err(io_err)
 }

 fn metadata(&self, path: &Path) -> Result<std::fs::Metadata> {
 std::fs::metadata(path).map_err(io_err)
 }

 fn symlink_metadata(&self, path: &Path) -> Result<std::fs::Metadata> {
 std::fs::symlink_metadata(path).map_err(io_err)
 }

 fn set_permissions(&self, path: &Path, mode: u32) -> Result<()> {
 use std::os::unix::fs::PermissionsExt;
 std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(io_err)
 }

 fn readdir(&self, path: &Path) -> Result<Vec<RawDirEntry>> {
 let mut out = Vec::new();
 for entry in std::fs::read_dir(path).map_err(io_err)? {
 let entry = entry.map_err(io_err)?;
 let file_type = entry.file_type().map_err(io_err)?;
 out.push(RawDirEntry {
 name: entry.file_name().to_string_lossy().into_owned(),
 file_type,
 });
 }
 Ok(out)
 }

 fn getxattr(&self, path: &Path, name: &str) -> Result<Vec<u8>> {
 let c_path = to_cstring(path)?;
 let c_name = CString::new(name).map_err(|_| ErrorKind::NotAttr)?;
 let needed = unsafe { libc::getxattr(c_path.as_ptr(), c_name.as_ptr(), std::ptr::null_mut(), 0) };
 if needed < 0 {
 return Err(map_xattr_errno());
 }
 let mut buf = vec![0u8; needed as usize];
 let written = unsafe {
 libc::getxattr(c_path.as_ptr(), c_name.as_ptr(), buf.as_mut_ptr().cast(), buf.len())
 };
 if written < 0 {
 return Err(map_xattr_errno());
 }
 buf.truncate(written as usize);
 Ok(buf)
 }

 fn setxattr(&self, path: &Path, name: &str, value: &[u8], flags: i32) -> Result<()> {
 let c_path = to_cstring(path)?;
 let c_name = CString::new(name).map_err(|_| ErrorKind::NotAttr)?;
 let rc = unsafe {
 libc::setxattr(
 c_path.as_ptr(),
 c_name.as_ptr(),
 value.as_ptr().cast(),
 value.len(),
 flags,
 )
 };
 if rc == 0 {
 Ok(())
 } else {
 Err(map_xattr_errno())
 }
 }

 fn listxattr(&self, path: &Path) -> Result<Vec<u8>> {
 let c_path = to_cstring(path)?;
 let needed = unsafe { libc::listxattr(c_path.as_ptr(), std::ptr::null_mut(), 0) };
 if needed < 0 {
 return Err(map_xattr_errno());
 }
 let mut buf = vec![0u8; needed as usize];
 let written = unsafe { libc::listxattr(c_path.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
 if written < 0 {
 return Err(map_xattr_errno());
 }
 buf.truncate(written as usize);
 Ok(buf)
 }

 fn removexattr(&self, path: &Path, name: &str) -> Result<()> {
 let c_path = to_cstring(path)?;
 let c_name = CString::new(name).map_err(|_| ErrorKind::NotAttr)?;
 let rc = unsafe { libc::removexattr(c_path.as_ptr(), c_name.as_ptr()) };
 if rc == 0 {
 Ok(())
 } else {
 Err(map_xattr_errno())
 }
 }
}

fn map_xattr_errno() -> ErrorKind {
 let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO);
 if errno == libc::ENOATTR || errno == libc::ENODATA {
 ErrorKind::NotAttr
 } else {
 ErrorKind::from_errno(errno)
 }
}
