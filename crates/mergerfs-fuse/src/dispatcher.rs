//! The FUSE operation router: the `fuser::Filesystem` implementation that
//! turns kernel requests into `mergerfs-core` node-table lookups, path-lock
//! holds, and policy-driven branch selection.
//!
//! Grounded on `oxcrypt-fuse/src/filesystem.rs`'s `Filesystem` impl for the
//! method surface and per-handler shape (resolve, do the branch I/O, reply
//! or translate the error to an errno), and on `oxcrypt-fuse/src/inode.rs`'s
//! `InodeEntry` for one specific design choice: that crate stores each
//! inode's path directly rather than reconstructing it by walking parent
//! pointers. `mergerfs-core::Node`'s `parent`/`name` fields go stale across
//! a rename (see `node_table.rs`'s own `rename()` doc comment — it rehashes
//! the name table but cannot retarget an already-shared `Arc<Node>`), so
//! this router keeps its own `nodeid -> relative path` map updated on every
//! structural operation instead of trusting the node chain.

use std::ffi::OsStr;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use fuser::{
 FileAttr, FileType, KernelConfig, ReplyAttr, ReplyBmap, ReplyCreate, ReplyData, ReplyDirectory,
 ReplyDirectoryPlus, ReplyEmpty, ReplyEntry, ReplyIoctl, ReplyLock, ReplyLseek, ReplyOpen,
 ReplyStatfs, ReplyWrite, ReplyXattr, Request, TimeOrNow,
};
use tracing::{debug, trace, warn};

use mergerfs_core::branch::{Branch, Branches};
use mergerfs_core::branch_io::BranchIo;
use mergerfs_core::control_file::{self, ControlCommand, FuncName, RuntimeConfig, XattrMode};
use mergerfs_core::handle::{DirEntry, DirHandle, FileInfo, HandleAllocator};
use mergerfs_core::node::ROOT_NODEID;
use mergerfs_core::statfs;
use mergerfs_core::{Category, ErrorKind, NodeTable, PathLockScheduler, Policy, Result as CoreResult};

use crate::logging::{escape_os, format_flags, summarize_bytes};

/// How long a reply's attribute/entry cache is valid for. Kept short: the
/// node table and policy engine are the source of truth, and an
/// out-of-process write on a branch should be visible quickly.
const ATTR_TTL: Duration = Duration::from_secs(1);

/// Routes every FUSE opcode to the right branch(es) via `mergerfs-core`'s
/// policy engine, node table, and path-lock scheduler.
pub struct Dispatcher {
 branch_io: Arc<dyn BranchIo>,
 node_table: Arc<NodeTable>,
 scheduler: Arc<PathLockScheduler>,
 config: Arc<RuntimeConfig>,
 /// Absolute path the union is mounted at, used to build `AbsSymlinkMount`
 /// EXDEV-link targets (mount-relative, as opposed to `AbsSymlinkBranch`'s
 /// branch-relative targets).
 mountpoint: PathBuf,

 /// `nodeid -> relative path from the mount root`. The root itself maps
 /// to an empty path. Kept in sync explicitly by every handler that
 /// creates, removes, or renames a node — never reconstructed from
 /// `Node::parent`/`Node::name`.
 paths: DashMap<u64, PathBuf>,
 dir_handles: DashMap<u64, Arc<DirHandle>>,
 file_handles: DashMap<u64, Arc<FileInfo>>,
 handle_alloc: HandleAllocator,
}

impl Dispatcher {
 pub fn new(
 branch_io: Arc<dyn BranchIo>,
 config: Arc<RuntimeConfig>,
 remember_nodes: bool,
 remembered_ttl: Duration,
 mountpoint: PathBuf,
 ) -> Self {
 let paths = DashMap::new();
 paths.insert(ROOT_NODEID, PathBuf::new());
 Self {
 branch_io,
 node_table: Arc::new(NodeTable::new(remember_nodes, remembered_ttl)),
 scheduler: Arc::new(PathLockScheduler::new()),
 config,
 mountpoint,
 paths,
 dir_handles: DashMap::new(),
 file_handles: DashMap::new(),
 handle_alloc: HandleAllocator::new(),
 }
 }

 /// Shares this router's node table with a maintenance thread.
 pub fn node_table(&self) -> Arc<NodeTable> {
 self.node_table.clone()
 }

 fn relpath(&self, ino: u64) -> Result<PathBuf, i32> {
 self.paths.get(&ino).map(|p| p.clone()).ok_or(libc::ESTALE)
 }

 fn set_path(&self, ino: u64, relpath: PathBuf) {
 self.paths.insert(ino, relpath);
 }

 fn remove_path(&self, ino: u64) {
 self.paths.remove(&ino);
 }

 /// Rewrites every path this router tracks that lives under `old`
 /// (inclusive) to live under `new` instead, after a rename. O(n) over
 /// tracked nodes, favoring correctness over a smarter index — renames
 /// are rare relative to lookups.
 fn retarget_subtree(&self, old: &Path, new: &Path) {
 for mut entry in self.paths.iter_mut() {
 if let Ok(suffix) = entry.value().strip_prefix(old) {
 *entry.value_mut() = new.join(suffix);
 }
 }
 }

 fn branches(&self) -> Arc<Branches> {
 self.config.branches.read().clone()
 }

 fn select(&self, func: FuncName, relpath: &Path) -> CoreResult<Vec<Arc<Branch>>> {
 let policy = self.config.policies.read().get(func);
 policy.select(&self.branches(), relpath)
 }

 fn first_branch(&self, func: FuncName, relpath: &Path) -> CoreResult<Arc<Branch>> {
 self.select(func, relpath)?.into_iter().next().ok_or(ErrorKind::NotFound)
 }

 /// Builds a kernel-facing `FileAttr` for `relpath` as it exists on
 /// `branch`, assigning it `ino`.
 fn attr_for(&self, ino: u64, branch: &Branch, relpath: &Path) -> CoreResult<FileAttr> {
 let metadata = self.branch_io.symlink_metadata(&branch.path().join(relpath))?;
 Ok(to_file_attr(ino, &metadata))
 }

 /// Synthesizes the virtual `/.mergerfs` control file's attributes. It
 /// has no backing branch: its content lives in the `user.mergerfs.*`
 /// xattr namespace, not in file bytes.
 fn control_file_attr(&self, ino: u64) -> FileAttr {
 let now = SystemTime::now();
 FileAttr {
 ino,
 size: 0,
 blocks: 0,
 atime: now,
 mtime: now,
 ctime: now,
 crtime: now,
 kind: FileType::RegularFile,
 perm: 0o644,
 nlink: 1,
 uid: 0,
 gid: 0,
 rdev: 0,
 blksize: 512,
 flags: 0,
 }
 }

 fn reply_err(&self, err: ErrorKind) -> i32 {
 err.to_errno()
 }

 /// Updates `ino`'s stored `(ino, size, mtime)` fingerprint and returns
 /// the attr TTL to reply with: zero if the fingerprint changed (telling
 /// the kernel to drop any cached pages for it), the normal TTL
 /// otherwise.
 fn fingerprint_ttl(&self, ino: u64, attr: &FileAttr) -> Duration {
 let Some(node) = self.node_table.get_unchecked(ino) else {
 return ATTR_TTL;
 };
 let mtime_secs = attr.mtime.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
 if node.update_stat_fingerprint(ino, attr.size, mtime_secs) {
 Duration::ZERO
 } else {
 ATTR_TTL
 }
 }
}

fn to_file_attr(ino: u64, metadata: &std::fs::Metadata) -> FileAttr {
 use std::os::unix::fs::MetadataExt;

 let kind = file_type_of(metadata);
 FileAttr {
 ino,
 size: metadata.size(),
 blocks: metadata.blocks(),
 atime: metadata.accessed().unwrap_or(UNIX_EPOCH),
 mtime: metadata.modified().unwrap_or(UNIX_EPOCH),
 ctime: systime_from(metadata.ctime(), metadata.ctime_nsec()),
 crtime: metadata.created().unwrap_or(UNIX_EPOCH),
 kind,
 perm: (metadata.mode() & 0o7777) as u16,
 nlink: metadata.nlink() as u32,
 uid: metadata.uid(),
 gid: metadata.gid(),
 rdev: metadata.rdev() as u32,
 blksize: metadata.blksize() as u32,
 flags: 0,
 }
}

fn systime_from(secs: i64, nsec: i64) -> SystemTime {
 if secs >= 0 {
 UNIX_EPOCH + Duration::new(secs as u64, nsec as u32)
 } else {
 UNIX_EPOCH - Duration::new((-secs) as u64, 0)
 }
}

fn file_type_of(metadata: &std::fs::Metadata) -> FileType {
 let ft = metadata.file_type();
 if ft.is_dir() {
 FileType::Directory
 } else if ft.is_symlink() {
 FileType::Symlink
 } else if ft.is_file() {
 FileType::RegularFile
 } else {
 use std::os::unix::fs::FileTypeExt;
 if ft.is_fifo() {
 FileType::NamedPipe
 } else if ft.is_char_device() {
 FileType::CharDevice
 } else if ft.is_block_device() {
 FileType::BlockDevice
 } else if ft.is_socket() {
 FileType::Socket
 } else {
 FileType::RegularFile
 }
 }
}

fn resolve_time(t: TimeOrNow) -> SystemTime {
 match t {
 TimeOrNow::SpecificTime(t) => t,
 TimeOrNow::Now => SystemTime::now(),
 }
}

impl fuser::Filesystem for Dispatcher {
 fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
 debug!(branches = self.branches().len(), "mount initialized");
 Ok(())
 }

 fn destroy(&mut self) {
 debug!("unmounting");
 }

 fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
 let parent_relpath = match self.relpath(parent) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let relpath = parent_relpath.join(name);
 trace!(parent, name = %escape_os(name), "LOOKUP");

 if control_file::is_control_path(&relpath) {
 let node = self.node_table.find_or_create(parent, &name.to_string_lossy());
 self.set_path(node.nodeid, relpath);
 let attr = self.control_file_attr(node.nodeid);
 reply.entry(&ATTR_TTL, &attr, node.generation);
 return;
 }

 let branch = match self.first_branch(FuncName::Getattr, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 let node = self.node_table.find_or_create(parent, &name.to_string_lossy());
 self.set_path(node.nodeid, relpath.clone());
 match self.attr_for(node.nodeid, &branch, &relpath) {
 Ok(attr) => reply.entry(&ATTR_TTL, &attr, node.generation),
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
 self.node_table.forget(ino, nlookup);
 if self.node_table.get_unchecked(ino).is_none() {
 self.remove_path(ino);
 }
 }

 fn batch_forget(&mut self, _req: &Request<'_>, nodes: &[fuser::fuse_forget_one]) {
 for n in nodes {
 self.node_table.forget(n.nodeid, n.nlookup);
 if self.node_table.get_unchecked(n.nodeid).is_none() {
 self.remove_path(n.nodeid);
 }
 }
 }

 fn getattr(&mut self, _req: &Request<'_>, ino: u64, fh: Option<u64>, reply: ReplyAttr) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 if control_file::is_control_path(&relpath) {
 return reply.attr(&ATTR_TTL, &self.control_file_attr(ino));
 }
 if let Some(fh) = fh
 && let Some(info) = self.file_handles.get(&fh)
 {
 let metadata = info.with_backend(|f| f.metadata());
 return match metadata {
 Ok(m) => {
 let attr = to_file_attr(ino, &m);
 let ttl = self.fingerprint_ttl(ino, &attr);
 reply.attr(&ttl, &attr)
 }
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 };
 }
 match self.first_branch(FuncName::Getattr, &relpath) {
 Ok(branch) => match self.attr_for(ino, &branch, &relpath) {
 Ok(attr) => {
 let ttl = self.fingerprint_ttl(ino, &attr);
 reply.attr(&ttl, &attr)
 }
 Err(e) => reply.error(self.reply_err(e)),
 },
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 #[allow(clippy::too_many_arguments)]
 fn setattr(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 mode: Option<u32>,
 uid: Option<u32>,
 gid: Option<u32>,
 size: Option<u64>,
 atime: Option<TimeOrNow>,
 mtime: Option<TimeOrNow>,
 _ctime: Option<SystemTime>,
 fh: Option<u64>,
 _crtime: Option<SystemTime>,
 _chgtime: Option<SystemTime>,
 _bkuptime: Option<SystemTime>,
 _flags: Option<u32>,
 reply: ReplyAttr,
 ) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 if control_file::is_control_path(&relpath) {
 return reply.attr(&ATTR_TTL, &self.control_file_attr(ino));
 }

 let branches = match self.select(FuncName::Chmod, &relpath) {
 Ok(b) if !b.is_empty() => b,
 Ok(_) => return reply.error(libc::ENOENT),
 Err(e) => return reply.error(self.reply_err(e)),
 };

 for branch in &branches {
 let full = branch.path().join(&relpath);
 if let Some(mode) = mode
 && let Err(e) = self.branch_io.set_permissions(&full, mode)
 {
 return reply.error(self.reply_err(e));
 }
 if uid.is_some() || gid.is_some() {
 let uid = uid.map(nix::unistd::Uid::from_raw);
 let gid = gid.map(nix::unistd::Gid::from_raw);
 if let Err(e) = nix::unistd::chown(&full, uid, gid) {
 return reply.error(self.reply_err(ErrorKind::from_errno(e as i32)));
 }
 }
 if let Some(size) = size {
 let result = if let Some(fh) = fh {
 self.file_handles.get(&fh).map(|info| info.with_backend(|f| f.set_len(size)))
 } else {
 None
 };
 let result = result.unwrap_or_else(|| File::options().write(true).open(&full).and_then(|f| f.set_len(size)));
 if let Err(e) = result {
 return reply.error(self.reply_err(ErrorKind::from_io(&e)));
 }
 }
 if atime.is_some() || mtime.is_some() {
 let now = SystemTime::now();
 let a = atime.map(resolve_time).unwrap_or(now);
 let m = mtime.map(resolve_time).unwrap_or(now);
 let to_timespec = |t: SystemTime| {
 let d = t.duration_since(UNIX_EPOCH).unwrap_or_default();
 nix::sys::time::TimeSpec::new(d.as_secs() as i64, d.subsec_nanos() as i64)
 };
 if let Err(e) = nix::sys::stat::utimensat(
 None,
 &full,
 &to_timespec(a),
 &to_timespec(m),
 nix::sys::stat::UtimensatFlags::NoFollowSymlink,
 ) {
 return reply.error(self.reply_err(ErrorKind::from_errno(e as i32)));
 }
 }
 }

 match self.attr_for(ino, &branches[0], &relpath) {
 Ok(attr) => {
 let ttl = self.fingerprint_ttl(ino, &attr);
 reply.attr(&ttl, &attr)
 }
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn readlink(&mut self, _req: &Request<'_>, ino: u64, reply: ReplyData) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 match self.first_branch(FuncName::Readlink, &relpath) {
 Ok(branch) => match self.branch_io.readlink(&branch.path().join(&relpath)) {
 Ok(target) => reply.data(target.as_os_str().as_encoded_bytes()),
 Err(e) => reply.error(self.reply_err(e)),
 },
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn mknod(
 &mut self,
 _req: &Request<'_>,
 parent: u64,
 name: &OsStr,
 mode: u32,
 _umask: u32,
 rdev: u32,
 reply: ReplyEntry,
 ) {
 self.create_entry(parent, name, reply, move |dispatcher, _branch, full| {
 // Some backing filesystems reject mknod() for a plain regular file;
 // try create+release first and only fall back to a real mknod() call
 // if that's rejected.
 if mode & libc::S_IFMT == libc::S_IFREG
 && dispatcher.branch_io.create(full, mode, libc::O_CREAT | libc::O_EXCL).is_ok()
 {
 return dispatcher.branch_io.symlink_metadata(full);
 }
 dispatcher.branch_io.mknod(full, mode, rdev as u64)?;
 dispatcher.branch_io.symlink_metadata(full)
 });
 }

 fn mkdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, _umask: u32, reply: ReplyEntry) {
 self.create_entry(parent, name, reply, move |dispatcher, _branch, full| {
 dispatcher.branch_io.mkdir(full, mode)?;
 dispatcher.branch_io.symlink_metadata(full)
 });
 }

 fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
 let relpath = match self.relpath(parent) {
 Ok(p) => p.join(name),
 Err(e) => return reply.error(e),
 };
 match self.select(FuncName::Unlink, &relpath) {
 Ok(branches) if !branches.is_empty() => {
 let mut last_err = None;
 for branch in &branches {
 if let Err(e) = self.branch_io.unlink(&branch.path().join(&relpath)) {
 last_err = Some(e);
 }
 }
 match last_err {
 Some(e) if !self.path_exists_anywhere(&relpath) => reply.error(self.reply_err(e)),
 _ => {
 self.node_table.unlink(parent, &name.to_string_lossy());
 reply.ok();
 }
 }
 }
 Ok(_) => reply.error(libc::ENOENT),
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
 let relpath = match self.relpath(parent) {
 Ok(p) => p.join(name),
 Err(e) => return reply.error(e),
 };
 match self.select(FuncName::Rmdir, &relpath) {
 Ok(branches) if !branches.is_empty() => {
 let mut last_err = None;
 for branch in &branches {
 if let Err(e) = self.branch_io.rmdir(&branch.path().join(&relpath)) {
 last_err = Some(e);
 }
 }
 match last_err {
 Some(e) if !self.path_exists_anywhere(&relpath) => reply.error(self.reply_err(e)),
 _ => {
 self.node_table.unlink(parent, &name.to_string_lossy());
 reply.ok();
 }
 }
 }
 Ok(_) => reply.error(libc::ENOENT),
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn symlink(&mut self, _req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
 let target = target.to_path_buf();
 self.create_entry(parent, link_name, reply, move |dispatcher, _branch, full| {
 dispatcher.branch_io.symlink(&target, full)?;
 dispatcher.branch_io.symlink_metadata(full)
 });
 }

 fn rename(
 &mut self,
 _req: &Request<'_>,
 parent: u64,
 name: &OsStr,
 newparent: u64,
 newname: &OsStr,
 _flags: u32,
 reply: ReplyEmpty,
 ) {
 let old_parent_relpath = match self.relpath(parent) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let new_parent_relpath = match self.relpath(newparent) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let old_relpath = old_parent_relpath.join(name);
 let new_relpath = new_parent_relpath.join(newname);

 let name_str = name.to_string_lossy();
 let newname_str = newname.to_string_lossy();
 let _guards = match self.scheduler.resolve_locked2(&self.node_table, parent, &name_str, newparent, &newname_str) {
 Ok(g) => g,
 Err(e) => return reply.error(self.reply_err(e)),
 };

 let branches = match self.select(FuncName::Rename, &old_relpath) {
 Ok(b) if !b.is_empty() => b,
 Ok(_) => return reply.error(libc::ENOENT),
 Err(e) => return reply.error(self.reply_err(e)),
 };

 for branch in &branches {
 let from = branch.path().join(&old_relpath);
 let to = branch.path().join(&new_relpath);
 if let Some(parent_dir) = to.parent()
 && !parent_dir.is_dir()
 && let Err(e) = mergerfs_core::clonepath::clonepath(branch, branch, &new_relpath)
 {
 return reply.error(self.reply_err(e));
 }
 if let Err(e) = self.branch_io.rename(&from, &to) {
 let exdev = matches!(e, ErrorKind::CrossDevice);
 if exdev && *self.config.rename_exdev.read() == mergerfs_core::control_file::RenameExdev::CopyAndUnlink {
 if let Err(e) = copy_and_unlink(&self.branch_io, &from, &to) {
 return reply.error(self.reply_err(e));
 }
 } else {
 return reply.error(self.reply_err(e));
 }
 }
 }

 self.node_table.rename(parent, &name.to_string_lossy(), newparent, &newname.to_string_lossy());
 self.retarget_subtree(&old_relpath, &new_relpath);
 reply.ok();
 }

 fn link(&mut self, _req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let new_parent_relpath = match self.relpath(newparent) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let new_relpath = new_parent_relpath.join(newname);

 let branch = match self.first_branch(FuncName::Link, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 let from = branch.path().join(&relpath);
 let to = branch.path().join(&new_relpath);
 let mut materialized = false;
 if let Err(e) = self.branch_io.link(&from, &to) {
 if matches!(e, ErrorKind::CrossDevice) {
 if let Err(e) = self.materialize_link_exdev(&from, &to, &relpath) {
 return reply.error(self.reply_err(e));
 }
 materialized = true;
 } else {
 return reply.error(self.reply_err(e));
 }
 }

 let node = self.node_table.find_or_create(newparent, &newname.to_string_lossy());
 self.set_path(node.nodeid, new_relpath.clone());
 match self.attr_for(node.nodeid, &branch, &new_relpath) {
 Ok(attr) => {
 // materialized link: a symlink stand-in, not a real hard link.
 let ttl = if materialized { Duration::ZERO } else { ATTR_TTL };
 reply.entry(&ttl, &attr, node.generation)
 }
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 trace!(ino, flags = %format_flags(flags), "OPEN");
 if control_file::is_control_path(&relpath) {
 return reply.opened(0, 0);
 }
 let branch = match self.first_branch(FuncName::Open, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 let full = branch.path().join(&relpath);
 match self.branch_io.open(&full, flags) {
 Ok(file) => {
 let fh = self.handle_alloc.allocate();
 let mut info = FileInfo::new(file, full, flags);
 info.direct_io = self.config.direct_io.load(Ordering::Acquire);
 info.keep_cache = self.config.kernel_cache.load(Ordering::Acquire);
 self.file_handles.insert(fh, Arc::new(info));
 if let Some(node) = self.node_table.get_unchecked(ino) {
 node.inc_open_count();
 }
 reply.opened(fh, 0);
 }
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 #[allow(clippy::too_many_arguments)]
 fn read(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 fh: u64,
 offset: i64,
 size: u32,
 _flags: i32,
 _lock_owner: Option<u64>,
 reply: ReplyData,
 ) {
 if fh == 0 {
 return reply.data(&[]); // control file: no byte-stream content
 }
 let Some(info) = self.file_handles.get(&fh).map(|e| e.clone()) else {
 return reply.error(libc::EBADF);
 };
 let _ = ino;
 if self.config.nullrw.load(Ordering::Acquire) {
 return reply.data(&vec![0u8; size as usize]);
 }
 let result = info.with_backend(|f| -> std::io::Result<Vec<u8>> {
 f.seek(SeekFrom::Start(offset as u64))?;
 let mut buf = vec![0u8; size as usize];
 let read = f.read(&mut buf)?;
 buf.truncate(read);
 Ok(buf)
 });
 match result {
 Ok(buf) => reply.data(&buf),
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 }
 }

 #[allow(clippy::too_many_arguments)]
 fn write(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 fh: u64,
 offset: i64,
 data: &[u8],
 _write_flags: u32,
 _flags: i32,
 _lock_owner: Option<u64>,
 reply: ReplyWrite,
 ) {
 trace!(ino, fh, offset, data = %summarize_bytes(data.len()), "WRITE");
 if fh == 0 {
 return reply.error(libc::ENOSYS); // writes to the control file go through xattrs
 }
 let Some(info) = self.file_handles.get(&fh).map(|e| e.clone()) else {
 return reply.error(libc::EBADF);
 };
 if self.config.nullrw.load(Ordering::Acquire) {
 return reply.written(data.len() as u32);
 }

 let result = info.with_backend(|f| -> std::io::Result<()> {
 f.seek(SeekFrom::Start(offset as u64))?;
 f.write_all(data)
 });

 match result {
 Ok(()) => {
 info.mark_written();
 reply.written(data.len() as u32);
 }
 Err(e) if e.raw_os_error() == Some(libc::ENOSPC) && self.config.moveonenospc.load(Ordering::Acquire) => {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let branches = self.branches();
 let current_path = info.branch_path();
 let Some(current_branch) = branches.iter().find(|b| current_path.starts_with(b.path())).cloned()
 else {
 return reply.error(libc::ENOSPC);
 };
 let current_size = std::fs::metadata(&current_path).map(|m| m.len()).unwrap_or(0);
 let needed_bytes = current_size + data.len() as u64;
 let create_policy = self.config.policies.read().get(mergerfs_core::control_file::FuncName::Create);
 match mergerfs_core::moveonenospc::select_target(
 &branches,
 &current_branch,
 &relpath,
 &create_policy,
 needed_bytes,
 ) {
 Ok(target) => match mergerfs_core::moveonenospc::migrate(&current_branch, &target, &relpath) {
 Ok(()) => {
 let new_path = target.path().join(&relpath);
 match self.branch_io.open(&new_path, info.flags) {
 Ok(new_file) => {
 info.replace_backend(new_file, new_path);
 let retry = info.with_backend(|f| -> std::io::Result<()> {
 f.seek(SeekFrom::Start(offset as u64))?;
 f.write_all(data)
 });
 match retry {
 Ok(()) => {
 info.mark_written();
 reply.written(data.len() as u32);
 }
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 }
 }
 Err(e) => reply.error(self.reply_err(e)),
 }
 }
 Err(e) => reply.error(self.reply_err(e)),
 },
 Err(e) => reply.error(self.reply_err(e)),
 }
 }
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 }
 }

 fn flush(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
 if let Some(info) = self.file_handles.get(&fh)
 && info.was_written()
 && self.config.dropcacheonclose.load(Ordering::Acquire)
 {
 let _ = info.with_backend(|f| f.sync_all());
 }
 reply.ok();
 }

 fn release(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 fh: u64,
 _flags: i32,
 _lock_owner: Option<u64>,
 _flush: bool,
 reply: ReplyEmpty,
 ) {
 self.file_handles.remove(&fh);
 if let Some(node) = self.node_table.get_unchecked(ino)
 && node.dec_open_count() == 0
 {
 self.node_table.notify_quiescent();
 }
 reply.ok();
 }

 fn fsync(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, datasync: bool, reply: ReplyEmpty) {
 let Some(info) = self.file_handles.get(&fh) else {
 return reply.error(libc::EBADF);
 };
 let result = info.with_backend(|f| if datasync { f.sync_data() } else { f.sync_all() });
 match result {
 Ok(()) => reply.ok(),
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 }
 }

 fn opendir(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let branches = self.branches();
 let mut seen = std::collections::HashSet::new();
 let mut entries = Vec::new();
 for branch in branches.iter().filter(|b| relpath.as_os_str().is_empty() || b.contains(&relpath)) {
 let dir_path = branch.path().join(&relpath);
 let Ok(raw) = self.branch_io.readdir(&dir_path) else {
 continue;
 };
 for entry in raw {
 if !seen.insert(entry.name.clone()) {
 continue;
 }
 let nodeid = self.node_table.lookup(ino, &entry.name).map(|n| n.nodeid);
 entries.push(DirEntry {
 name: entry.name,
 nodeid,
 kind: entry.file_type,
 });
 }
 }
 let fh = self.handle_alloc.allocate();
 self.dir_handles.insert(fh, Arc::new(DirHandle::new(entries)));
 if let Some(node) = self.node_table.get_unchecked(ino) {
 node.inc_open_count();
 }
 reply.opened(fh, 0);
 }

 fn readdir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectory) {
 let Some(handle) = self.dir_handles.get(&fh).map(|e| e.clone()) else {
 return reply.error(libc::EBADF);
 };
 for (i, entry) in handle.entries_from(offset).into_iter().enumerate() {
 let next_offset = offset + i as i64 + 1;
 let entry_ino = entry.nodeid.unwrap_or(ino);
 let kind = file_type_from_std(entry.kind);
 if reply.add(entry_ino, next_offset, kind, &entry.name) {
 break;
 }
 }
 reply.ok();
 }

 fn readdirplus(&mut self, _req: &Request<'_>, ino: u64, fh: u64, offset: i64, mut reply: ReplyDirectoryPlus) {
 let Some(handle) = self.dir_handles.get(&fh).map(|e| e.clone()) else {
 return reply.error(libc::EBADF);
 };
 let parent_relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 for (i, entry) in handle.entries_from(offset).into_iter().enumerate() {
 let next_offset = offset + i as i64 + 1;
 let child_relpath = parent_relpath.join(&entry.name);
 let node = self.node_table.find_or_create(ino, &entry.name);
 self.set_path(node.nodeid, child_relpath.clone());
 let Ok(branch) = self.first_branch(FuncName::Getattr, &child_relpath) else {
 continue;
 };
 let Ok(attr) = self.attr_for(node.nodeid, &branch, &child_relpath) else {
 continue;
 };
 if reply.add(node.nodeid, next_offset, &entry.name, &ATTR_TTL, &attr, node.generation) {
 break;
 }
 }
 reply.ok();
 }

 fn releasedir(&mut self, _req: &Request<'_>, ino: u64, fh: u64, _flags: i32, reply: ReplyEmpty) {
 self.dir_handles.remove(&fh);
 if let Some(node) = self.node_table.get_unchecked(ino)
 && node.dec_open_count() == 0
 {
 self.node_table.notify_quiescent();
 }
 reply.ok();
 }

 fn fsyncdir(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
 reply.ok();
 }

 fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
 let ignore = *self.config.statfs_ignore.read();
 match statfs::aggregate(&self.branches(), ignore) {
 Ok(info) => reply.statfs(
 info.blocks,
 info.bfree,
 info.bavail,
 info.files,
 info.ffree,
 info.bsize as u32,
 info.namemax as u32,
 info.frsize as u32,
 ),
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn setxattr(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 name: &OsStr,
 value: &[u8],
 _flags: i32,
 _position: u32,
 reply: ReplyEmpty,
 ) {
 let name_str = name.to_string_lossy();
 if control_file::is_mergerfs_key(&name_str) {
 let value_str = String::from_utf8_lossy(value);
 return match self.config.set(&name_str, value_str.trim_end_matches('\0')) {
 Ok(Some(cmd)) => {
 self.run_control_command(cmd);
 reply.ok();
 }
 Ok(None) => reply.ok(),
 Err(e) => reply.error(self.reply_err(e)),
 };
 }

 match *self.config.xattr.read() {
 XattrMode::Nosys => return reply.error(libc::ENOSYS),
 XattrMode::Noattr => return reply.ok(),
 XattrMode::Passthrough => {}
 }
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 match self.select(FuncName::Setxattr, &relpath) {
 Ok(branches) if !branches.is_empty() => {
 for branch in &branches {
 if let Err(e) = self.branch_io.setxattr(&branch.path().join(&relpath), &name_str, value, 0) {
 return reply.error(self.reply_err(e));
 }
 }
 reply.ok();
 }
 Ok(_) => reply.error(libc::ENOENT),
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn getxattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, size: u32, reply: ReplyXattr) {
 let name_str = name.to_string_lossy();
 if control_file::is_mergerfs_key(&name_str) {
 return match self.config.get(&name_str) {
 Ok(value) => reply_xattr_bytes(reply, value.as_bytes(), size),
 Err(e) => reply.error(self.reply_err(e)),
 };
 }
 if *self.config.xattr.read() == XattrMode::Nosys {
 return reply.error(libc::ENOSYS);
 }
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 match self.first_branch(FuncName::Getxattr, &relpath) {
 Ok(branch) => match self.branch_io.getxattr(&branch.path().join(&relpath), &name_str) {
 Ok(bytes) => reply_xattr_bytes(reply, &bytes, size),
 Err(e) => reply.error(self.reply_err(e)),
 },
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn listxattr(&mut self, _req: &Request<'_>, ino: u64, size: u32, reply: ReplyXattr) {
 if *self.config.xattr.read() == XattrMode::Nosys {
 return reply.error(libc::ENOSYS);
 }
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 match self.first_branch(FuncName::Listxattr, &relpath) {
 Ok(branch) => match self.branch_io.listxattr(&branch.path().join(&relpath)) {
 Ok(bytes) => reply_xattr_bytes(reply, &bytes, size),
 Err(e) => reply.error(self.reply_err(e)),
 },
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn removexattr(&mut self, _req: &Request<'_>, ino: u64, name: &OsStr, reply: ReplyEmpty) {
 let name_str = name.to_string_lossy();
 if control_file::is_mergerfs_key(&name_str) {
 return reply.error(libc::EACCES); // control keys are reset via SET, never removed
 }
 match *self.config.xattr.read() {
 XattrMode::Nosys => return reply.error(libc::ENOSYS),
 XattrMode::Noattr => return reply.ok(),
 XattrMode::Passthrough => {}
 }
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 match self.select(FuncName::Removexattr, &relpath) {
 Ok(branches) if !branches.is_empty() => {
 for branch in &branches {
 if let Err(e) = self.branch_io.removexattr(&branch.path().join(&relpath), &name_str) {
 return reply.error(self.reply_err(e));
 }
 }
 reply.ok();
 }
 Ok(_) => reply.error(libc::ENOENT),
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn access(&mut self, _req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
 let relpath = match self.relpath(ino) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 if control_file::is_control_path(&relpath) {
 return reply.ok();
 }
 match self.first_branch(FuncName::Access, &relpath) {
 Ok(branch) => {
 let full = branch.path().join(&relpath);
 let c_path = std::ffi::CString::new(full.as_os_str().as_encoded_bytes()).unwrap();
 let rc = unsafe { libc::access(c_path.as_ptr(), mask) };
 if rc == 0 {
 reply.ok();
 } else {
 reply.error(std::io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO));
 }
 }
 Err(e) => reply.error(self.reply_err(e)),
 }
 }

 fn create(
 &mut self,
 _req: &Request<'_>,
 parent: u64,
 name: &OsStr,
 mode: u32,
 _umask: u32,
 flags: i32,
 reply: ReplyCreate,
 ) {
 let relpath = match self.relpath(parent) {
 Ok(p) => p.join(name),
 Err(e) => return reply.error(e),
 };
 let mut branch = match self.first_branch(FuncName::Create, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 let mut demoted = false;
 loop {
 let full = branch.path().join(&relpath);
 if let Some(parent_dir) = full.parent()
 && !parent_dir.is_dir()
 && let Err(e) = self.clone_ancestors(&branch, &relpath)
 {
 return reply.error(self.reply_err(e));
 }
 match self.branch_io.create(&full, mode, flags) {
 Ok(file) => {
 let node = self.node_table.find_or_create(parent, &name.to_string_lossy());
 self.set_path(node.nodeid, relpath.clone());
 let attr = match self.attr_for(node.nodeid, &branch, &relpath) {
 Ok(a) => a,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 let fh = self.handle_alloc.allocate();
 self.file_handles.insert(fh, Arc::new(FileInfo::new(file, full, flags)));
 node.inc_open_count();
 reply.created(&ATTR_TTL, &attr, node.generation, fh, 0);
 return;
 }
 // Same branch-demotion retry as create_entry (MKNOD/MKDIR/SYMLINK):
 // the branch went read-only after the policy picked it.
 Err(ErrorKind::ReadOnlyFs) if !demoted => {
 branch.mark_read_only();
 demoted = true;
 branch = match self.first_branch(FuncName::Create, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 }
 Err(e) => return reply.error(self.reply_err(e)),
 }
 }
 }

 fn fallocate(&mut self, _req: &Request<'_>, _ino: u64, fh: u64, offset: i64, length: i64, _mode: i32, reply: ReplyEmpty) {
 let Some(info) = self.file_handles.get(&fh) else {
 return reply.error(libc::EBADF);
 };
 let result = info.with_backend(|f| {
 use std::os::fd::AsRawFd;
 let rc = unsafe { libc::posix_fallocate(f.as_raw_fd(), offset, length) };
 if rc == 0 {
 Ok(())
 } else {
 Err(std::io::Error::from_raw_os_error(rc))
 }
 });
 match result {
 Ok(()) => reply.ok(),
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 }
 }

 #[allow(clippy::too_many_arguments)]
 fn copy_file_range(
 &mut self,
 _req: &Request<'_>,
 _ino_in: u64,
 fh_in: u64,
 offset_in: i64,
 _ino_out: u64,
 fh_out: u64,
 offset_out: i64,
 len: u64,
 _flags: u32,
 reply: ReplyWrite,
 ) {
 let (Some(src), Some(dst)) = (self.file_handles.get(&fh_in), self.file_handles.get(&fh_out)) else {
 return reply.error(libc::EBADF);
 };
 let result = (|| -> std::io::Result<u64> {
 let mut buf = vec![0u8; len as usize];
 let read = src.with_backend(|f| {
 f.seek(SeekFrom::Start(offset_in as u64))?;
 f.read(&mut buf)
 })?;
 buf.truncate(read);
 dst.with_backend(|f| {
 f.seek(SeekFrom::Start(offset_out as u64))?;
 f.write_all(&buf)
 })?;
 Ok(read as u64)
 })();
 match result {
 Ok(n) => {
 dst.mark_written();
 reply.written(n as u32);
 }
 Err(e) => reply.error(self.reply_err(ErrorKind::from_io(&e))),
 }
 }

 fn lseek(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _offset: i64, _whence: i32, reply: ReplyLseek) {
 // SEEK_DATA/SEEK_HOLE are deliberately unimplemented; every branch
 // backend would have to agree on sparse-file layout for this to be
 // meaningful across a union, which is left unspecified here.
 reply.error(libc::ENOSYS);
 }

 #[allow(clippy::too_many_arguments)]
 fn getlk(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 _fh: u64,
 lock_owner: u64,
 start: u64,
 end: u64,
 typ: i32,
 pid: u32,
 reply: ReplyLock,
 ) {
 let Some(node) = self.node_table.get_unchecked(ino) else {
 return reply.error(libc::ESTALE);
 };
 let locks = node.locks.lock();
 if let Some(existing) = locks
 .iter()
 .find(|l| l.owner != lock_owner && ranges_overlap(l.start, l.end, start, end))
 {
 reply.locked(existing.start, existing.end, existing.lock_type, existing.pid);
 } else {
 reply.locked(start, end, libc::F_UNLCK, pid);
 }
 }

 #[allow(clippy::too_many_arguments)]
 fn setlk(
 &mut self,
 _req: &Request<'_>,
 ino: u64,
 _fh: u64,
 lock_owner: u64,
 start: u64,
 end: u64,
 typ: i32,
 pid: u32,
 _sleep: bool,
 reply: ReplyEmpty,
 ) {
 let Some(node) = self.node_table.get_unchecked(ino) else {
 return reply.error(libc::ESTALE);
 };
 let mut locks = node.locks.lock();
 locks.retain(|l| l.owner != lock_owner);
 if typ != libc::F_UNLCK {
 locks.push(mergerfs_core::node::LockRecord {
 lock_type: typ,
 start,
 end,
 pid,
 owner: lock_owner,
 });
 }
 reply.ok();
 }

 fn bmap(&mut self, _req: &Request<'_>, _ino: u64, _blocksize: u32, _idx: u64, reply: ReplyBmap) {
 reply.error(libc::ENOSYS);
 }

 fn ioctl(
 &mut self,
 _req: &Request<'_>,
 _ino: u64,
 _fh: u64,
 _flags: u32,
 _cmd: u32,
 _in_data: &[u8],
 _out_size: u32,
 reply: ReplyIoctl,
 ) {
 reply.error(libc::ENOSYS);
 }
}

fn ranges_overlap(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> bool {
 let a_end = if a_end == 0 { u64::MAX } else { a_end };
 let b_end = if b_end == 0 { u64::MAX } else { b_end };
 a_start <= b_end && b_start <= a_end
}

fn reply_xattr_bytes(reply: ReplyXattr, data: &[u8], requested_size: u32) {
 if requested_size == 0 {
 reply.size(data.len() as u32);
 } else if data.len() > requested_size as usize {
 reply.error(libc::ERANGE);
 } else {
 reply.data(data);
 }
}

fn file_type_from_std(ft: std::fs::FileType) -> FileType {
 if ft.is_dir() {
 FileType::Directory
 } else if ft.is_symlink() {
 FileType::Symlink
 } else {
 FileType::RegularFile
 }
}

fn copy_and_unlink(branch_io: &Arc<dyn BranchIo>, from: &Path, to: &Path) -> CoreResult<()> {
 let metadata = branch_io.symlink_metadata(from)?;
 if metadata.is_dir() {
 return Err(ErrorKind::CrossDevice);
 }
 let mut src = branch_io.open(from, libc::O_RDONLY)?;
 let mut dst = branch_io.create(to, metadata.permissions().mode(), libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC)?;
 std::io::copy(&mut src, &mut dst).map_err(|e| ErrorKind::from_io(&e))?;
 branch_io.unlink(from)?;
 Ok(())
}

use std::os::unix::fs::PermissionsExt;

impl Dispatcher {
 /// Shared CREATE/MKNOD/MKDIR/SYMLINK entry-creation path: resolves the
 /// create branch, clones missing ancestors onto it if needed, invokes
 /// `make` to perform the actual syscall and fetch fresh metadata, then
 /// registers the new node and replies with its entry.
 fn create_entry(
 &mut self,
 parent: u64,
 name: &OsStr,
 reply: ReplyEntry,
 make: impl Fn(&Dispatcher, &Branch, &Path) -> CoreResult<std::fs::Metadata>,
 ) {
 let parent_relpath = match self.relpath(parent) {
 Ok(p) => p,
 Err(e) => return reply.error(e),
 };
 let relpath = parent_relpath.join(name);
 let mut branch = match self.first_branch(FuncName::Create, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 let mut demoted = false;
 loop {
 let full = branch.path().join(&relpath);
 if let Some(parent_dir) = full.parent()
 && !parent_dir.is_dir()
 && let Err(e) = self.clone_ancestors(&branch, &relpath)
 {
 return reply.error(self.reply_err(e));
 }
 match make(self, &branch, &full) {
 Ok(metadata) => {
 let node = self.node_table.find_or_create(parent, &name.to_string_lossy());
 self.set_path(node.nodeid, relpath);
 reply.entry(&ATTR_TTL, &to_file_attr(node.nodeid, &metadata), node.generation);
 return;
 }
 // The branch's underlying filesystem flipped read-only since the
 // Create policy picked it (remounted ro, e.g.). Demote it in the
 // shared Branches snapshot and retry with the policy's next pick.
 Err(ErrorKind::ReadOnlyFs) if !demoted => {
 branch.mark_read_only();
 demoted = true;
 branch = match self.first_branch(FuncName::Create, &relpath) {
 Ok(b) => b,
 Err(e) => return reply.error(self.reply_err(e)),
 };
 }
 Err(e) => return reply.error(self.reply_err(e)),
 }
 }
 }

 /// Mirrors `relpath`'s ancestor directories from any branch that
 /// already has them onto `dest`, per the CREATE/MKDIR/SYMLINK
 /// clonepath contract.
 fn clone_ancestors(&self, dest: &Branch, relpath: &Path) -> CoreResult<()> {
 let branches = self.branches();
 let Some(source) = branches.iter().find(|b| b.path() != dest.path() && b.contains_parent_of(relpath)) else {
 return Ok(()); // no other branch has it either; dest's own create will surface ENOENT
 };
 mergerfs_core::clonepath::clonepath(source, dest, relpath)
 }

 fn path_exists_anywhere(&self, relpath: &Path) -> bool {
 self.branches().iter().any(|b| b.contains(relpath))
 }

 fn materialize_link_exdev(&self, from: &Path, to: &Path, relpath: &Path) -> CoreResult<()> {
 use mergerfs_core::control_file::LinkExdev;
 match *self.config.link_exdev.read() {
 LinkExdev::Passthrough => Err(ErrorKind::CrossDevice),
 LinkExdev::RelSymlink => {
 let rel = pathdiff(from, to);
 self.branch_io.symlink(&rel, to)
 }
 LinkExdev::AbsSymlinkBranch => self.branch_io.symlink(from, to),
 LinkExdev::AbsSymlinkMount => self.branch_io.symlink(&self.mountpoint.join(relpath), to),
 }
 }

 fn run_control_command(&self, cmd: ControlCommand) {
 match cmd {
 ControlCommand::Gc | ControlCommand::Gc1 => {
 let pruned = self.node_table.prune_remembered(std::time::Instant::now());
 debug!(pruned, "control command: gc");
 }
 ControlCommand::InvalidateAllNodes => {
 warn!("control command: invalidate-all-nodes is not implemented (requires a kernel notifier channel)");
 }
 ControlCommand::InvalidateGidCache | ControlCommand::ClearGidCache => {
 // No gid cache is maintained by this router today; accepted
 // as a no-op so scripts written against upstream mergerfs
 // don't fail outright.
 }
 }
 }
}

/// A naive relative-path-from-`to`-to-`from` computation for
/// `rel-symlink` `link_exdev` handling: walks up from `to`'s parent to the
/// common ancestor, then down into `from`.
fn pathdiff(from: &Path, to: &Path) -> PathBuf {
 let to_parent = to.parent().unwrap_or(Path::new(""));
 let mut from_components = from.components();
 let mut to_components = to_parent.components();
 let mut common = 0;
 loop {
 let f = from_components.clone().next();
 let t = to_components.clone().next();
 match (f, t) {
 (Some(fc), Some(tc)) if fc == tc => {
 from_components.next();
 to_components.next();
 common += 1;
 }
 _ => break,
 }
 }
 let _ = common;
 let ups = to_components.count();
 let mut result = PathBuf::new();
 for _ in 0..ups {
 result.push("..");
 }
 for component in from_components {
 result.push(component);
 }
 result
}
