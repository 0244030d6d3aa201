//! Test mount harness for multi-branch FUSE integration tests.
//!
//! Grounded on `oxcrypt-fuse/tests/common/harness.rs`'s `TestMount` (real
//! `fuser::spawn_mount2` session, device-id polling for mount readiness,
//! `skip_if_no_fuse!`/`require_mount!` macros so the suite degrades
//! gracefully in a container without `/dev/fuse`), generalized from "one
//! vault directory" to "N branch directories plus a configurable policy".

#![allow(dead_code)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fuser::{BackgroundSession, MountOption};
use tempfile::TempDir;

use mergerfs_core::branch::{Branch, BranchMode, Branches};
use mergerfs_core::branch_io::StdIo;
use mergerfs_core::control_file::RuntimeConfig;
use mergerfs_fuse::Dispatcher;

const MOUNT_READY_TIMEOUT: Duration = Duration::from_secs(5);
const MOUNT_CHECK_INTERVAL: Duration = Duration::from_millis(50);

/// A union mount over a set of temporary branch directories, torn down on
/// drop.
pub struct TestMount {
    _session: BackgroundSession,
    pub mount_path: PathBuf,
    _temp_mount: TempDir,
    /// The branch directories backing this mount, in `Branches` order.
    pub branch_dirs: Vec<TempDir>,
    pub config: Arc<RuntimeConfig>,
}

impl TestMount {
    /// Mounts `n` fresh RW branches with the given create policy.
    pub fn with_branches(n: usize, create_policy: &str) -> Result<Self, String> {
        let branch_dirs: Vec<TempDir> = (0..n)
            .map(|_| TempDir::new().map_err(|e| format!("failed to create branch dir: {e}")))
            .collect::<Result<_, _>>()?;
        Self::with_branch_modes(branch_dirs, vec![BranchMode::Rw; n], create_policy)
    }

    /// Mounts branches with explicit per-branch modes (for RO/NC scenarios).
    pub fn with_branch_modes(branch_dirs: Vec<TempDir>, modes: Vec<BranchMode>, create_policy: &str) -> Result<Self, String> {
        assert_eq!(branch_dirs.len(), modes.len());
        let branches: Vec<Branch> = branch_dirs
            .iter()
            .zip(modes)
            .map(|(d, mode)| Branch::new(d.path(), mode, 0))
            .collect();
        let branches = Branches::flat(branches);
        let config = Arc::new(RuntimeConfig::new(Arc::new(branches)));
        config
            .policies
            .write()
            .set_category(mergerfs_core::Category::Create, create_policy)
            .map_err(|e| format!("invalid create policy {create_policy:?}: {e}"))?;

        let temp_mount = TempDir::new().map_err(|e| format!("failed to create mount dir: {e}"))?;
        let mount_path = temp_mount.path().join("mnt");
        fs::create_dir(&mount_path).map_err(|e| format!("failed to create mountpoint: {e}"))?;

        let dispatcher = Dispatcher::new(Arc::new(StdIo), config.clone(), false, Duration::from_secs(20), mount_path.clone());

        let options = vec![
            MountOption::FSName("mergerfs-test".to_string()),
            MountOption::AutoUnmount,
        ];
        let session = fuser::spawn_mount2(dispatcher, &mount_path, &options).map_err(|e| format!("failed to mount: {e}"))?;

        Self::wait_for_mount(&mount_path)?;
        thread::sleep(Duration::from_millis(50));

        Ok(Self {
            _session: session,
            mount_path,
            _temp_mount: temp_mount,
            branch_dirs,
            config,
        })
    }

    fn wait_for_mount(mount_path: &Path) -> Result<(), String> {
        use std::os::unix::fs::MetadataExt;

        let parent_dev = fs::metadata(mount_path.parent().ok_or("mount_path has no parent")?)
            .map_err(|e| format!("failed to stat parent: {e}"))?
            .dev();

        let deadline = Instant::now() + MOUNT_READY_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(meta) = fs::metadata(mount_path)
                && meta.dev() != parent_dev
            {
                return Ok(());
            }
            thread::sleep(MOUNT_CHECK_INTERVAL);
        }
        Err("mount did not become ready in time".to_string())
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.mount_path.join(relative.trim_start_matches('/'))
    }

    pub fn write(&self, path: &str, content: &[u8]) -> io::Result<()> {
        let mut f = fs::File::create(self.path(path))?;
        f.write_all(content)?;
        f.sync_all()
    }

    pub fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        fs::File::open(self.path(path))?.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Whether `relative` exists directly on branch `i`'s backing directory
    /// (bypassing the mount — used to assert which branch a policy chose).
    pub fn exists_on_branch(&self, i: usize, relative: &str) -> bool {
        self.branch_dirs[i].path().join(relative.trim_start_matches('/')).exists()
    }
}

/// Check if FUSE is available on this system.
pub fn fuse_available() -> bool {
    #[cfg(target_os = "linux")]
    {
        Path::new("/dev/fuse").exists()
    }
    #[cfg(target_os = "macos")]
    {
        Path::new("/Library/Filesystems/macfuse.fs").exists() || Path::new("/Library/Filesystems/osxfuse.fs").exists()
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        false
    }
}

/// Skip test if FUSE is not available in this environment.
#[macro_export]
macro_rules! skip_if_no_fuse {
    () => {
        if !$crate::common::fuse_available() {
            eprintln!("skipping test: FUSE not available on this system");
            return;
        }
    };
}

/// Skip test if mounting fails (common in restricted CI sandboxes).
#[macro_export]
macro_rules! require_mount {
    ($mount_result:expr) => {
        match $mount_result {
            Ok(m) => m,
            Err(e) => {
                eprintln!("skipping test: {e}");
                return;
            }
        }
    };
}
