//! Host mount table access.
//!
//! [`Mounter`] is the seam between the CSI services and the operating
//! system.  [`HostMounter`] shells out to `mount(8)` (which knows how to
//! resolve NFS servers) and unmounts with `umount(2)`; [`FakeMounter`] keeps
//! an in-memory mount table for tests.
//!
//! All functions here block.  Async callers run them on
//! [`tokio::task::spawn_blocking`].

use std::collections::HashMap;
use std::fs;
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;
use std::time::Duration;

use nix::errno::Errno;
use thiserror::Error;
use tracing::{debug, info};

use crate::error::CsiError;

/// Failure of a mount or unmount call, classified the way callers need to
/// report it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MountError {
    /// The host rejected the call for lack of privilege.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Bad options, filesystem type, or target.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Anything else.
    #[error("mount failed: {0}")]
    Failed(String),
}

impl MountError {
    /// Classify the stderr of a failed `mount`/`umount` invocation.
    pub fn from_output(output: &str) -> Self {
        let lower = output.to_lowercase();
        if lower.contains("permission denied")
            || lower.contains("access denied")
            || lower.contains("operation not permitted")
        {
            Self::PermissionDenied(output.trim().to_owned())
        } else if lower.contains("invalid argument") {
            Self::InvalidArgument(output.trim().to_owned())
        } else {
            Self::Failed(output.trim().to_owned())
        }
    }

    fn from_errno(errno: Errno, context: String) -> Self {
        match errno {
            Errno::EPERM | Errno::EACCES => Self::PermissionDenied(format!("{context}: {errno}")),
            Errno::EINVAL => Self::InvalidArgument(format!("{context}: {errno}")),
            _ => Self::Failed(format!("{context}: {errno}")),
        }
    }

    fn from_io(err: &io::Error, context: String) -> Self {
        match err.kind() {
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(format!("{context}: {err}")),
            io::ErrorKind::InvalidInput => Self::InvalidArgument(format!("{context}: {err}")),
            _ => Self::Failed(format!("{context}: {err}")),
        }
    }
}

impl From<MountError> for CsiError {
    fn from(err: MountError) -> Self {
        match err {
            MountError::PermissionDenied(msg) => CsiError::PermissionDenied(msg),
            MountError::InvalidArgument(msg) => CsiError::InvalidArgument(msg),
            MountError::Failed(msg) => CsiError::Internal(msg),
        }
    }
}

/// Access to the host mount table.
pub trait Mounter: Send + Sync {
    /// Mount `source` on `target`.
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError>;

    /// Unmount whatever is mounted on `target`.
    fn unmount(&self, target: &Path) -> Result<(), MountError>;

    /// Whether `target` is a mount point.  A missing `target` is reported as
    /// an [`io::ErrorKind::NotFound`] error, not as `false`, and a symlinked
    /// `target` as [`io::ErrorKind::InvalidInput`].
    fn is_mount_point(&self, target: &Path) -> io::Result<bool>;
}

// ---------------------------------------------------------------------------
// Host implementation
// ---------------------------------------------------------------------------

/// [`Mounter`] backed by the running kernel.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMounter;

impl Mounter for HostMounter {
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        let mut cmd = Command::new("mount");
        cmd.arg("-t").arg(fs_type);
        if !options.is_empty() {
            cmd.arg("-o").arg(options.join(","));
        }
        cmd.arg(source).arg(target);
        debug!(?cmd, "running mount");

        let output = cmd
            .output()
            .map_err(|e| MountError::from_io(&e, format!("spawn mount for {source}")))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MountError::from_output(&format!(
                "mount -t {fs_type} {source} {}: exit {:?}: {stderr}",
                target.display(),
                output.status.code(),
            )));
        }

        info!(source, target = %target.display(), fs_type, "mounted");
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        nix::mount::umount(target)
            .map_err(|e| MountError::from_errno(e, format!("umount {}", target.display())))?;
        info!(target = %target.display(), "unmounted");
        Ok(())
    }

    fn is_mount_point(&self, target: &Path) -> io::Result<bool> {
        let meta = fs::symlink_metadata(target)?;
        reject_symlink(target, &meta)?;

        // A different device than the parent is a mount point; bind mounts
        // of the same device only show up in the mount table.
        if let Some(parent) = target.parent() {
            let parent_meta = fs::symlink_metadata(parent)?;
            if parent_meta.dev() != meta.dev() {
                return Ok(true);
            }
        }
        listed_in_mount_table(target)
    }
}

/// Mount targets must be real directories; a mount through a symlink lands
/// wherever the link points.
fn reject_symlink(target: &Path, meta: &fs::Metadata) -> io::Result<()> {
    if meta.file_type().is_symlink() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("mount target {} is a symlink", target.display()),
        ));
    }
    Ok(())
}

/// Return `true` if `path` is listed as a mount point in
/// `/proc/self/mounts`.
///
/// Note: `/proc/self/mounts` uses octal escapes (`\040` for space, etc.).
/// Target paths handed to this plugin must not contain whitespace, so direct
/// string comparison is safe here.
fn listed_in_mount_table(path: &Path) -> io::Result<bool> {
    let contents = match fs::read_to_string("/proc/self/mounts") {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    let path = path.to_string_lossy();
    // Format: <device> <mountpoint> <fstype> <options> <dump> <pass>
    Ok(contents
        .lines()
        .any(|line| line.split_whitespace().nth(1) == Some(path.as_ref())))
}

// ---------------------------------------------------------------------------
// Directory helpers
// ---------------------------------------------------------------------------

/// Create `path` and any missing parents with permission bits `mode`.
///
/// An existing directory is left untouched.  The process umask still
/// applies to newly created directories.
pub fn ensure_directory(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().recursive(true).mode(mode).create(path)
}

/// Make the permission bits of `path` equal `mode`, changing them only if
/// they differ.
pub fn enforce_permission(path: &Path, mode: u32) -> io::Result<()> {
    let meta = fs::symlink_metadata(path)?;
    let current = meta.permissions().mode() & 0o7777;
    if current == mode & 0o7777 {
        debug!(path = %path.display(), mode = format_args!("{mode:o}"), "mode matches");
        return Ok(());
    }
    debug!(
        path = %path.display(),
        from = format_args!("{current:o}"),
        to = format_args!("{mode:o}"),
        "mode mismatch, changing",
    );
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

/// Unmount `target` if it is a mount point, then remove the directory.
///
/// A `target` that does not exist, or exists but is not mounted, is not an
/// error.  This is what allows unpublish and the controller's cleanup step
/// to run after a partial failure.
pub fn cleanup_mount_point(mounter: &dyn Mounter, target: &Path) -> Result<(), MountError> {
    match mounter.is_mount_point(target) {
        Ok(true) => mounter.unmount(target)?,
        Ok(false) => debug!(target = %target.display(), "not a mount point, skipping unmount"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(target = %target.display(), "target does not exist, nothing to clean up");
            return Ok(());
        }
        Err(e) => {
            return Err(MountError::from_io(
                &e,
                format!("check mount point {}", target.display()),
            ));
        }
    }

    match fs::remove_dir(target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(MountError::from_io(
            &e,
            format!("remove {}", target.display()),
        )),
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

/// One entry of a [`FakeMounter`]'s mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountRecord {
    pub source: String,
    pub fs_type: String,
    pub options: Vec<String>,
}

/// A call observed by a [`FakeMounter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MountAction {
    Mount { source: String, target: PathBuf },
    Unmount { target: PathBuf },
}

#[derive(Debug, Default)]
struct FakeState {
    mounts: HashMap<PathBuf, MountRecord>,
    actions: Vec<MountAction>,
}

/// [`Mounter`] that records mounts in memory instead of touching the host.
///
/// Targets must still exist on disk for [`Mounter::is_mount_point`] to
/// report on them, so directory handling behaves as it does for real.
#[derive(Debug, Default)]
pub struct FakeMounter {
    state: Mutex<FakeState>,
    mount_error: Option<MountError>,
    unmount_error: Option<MountError>,
    delay: Option<Duration>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `mount` fail with `err`.
    pub fn with_mount_error(mut self, err: MountError) -> Self {
        self.mount_error = Some(err);
        self
    }

    /// Make every subsequent `unmount` fail with `err`.
    pub fn with_unmount_error(mut self, err: MountError) -> Self {
        self.unmount_error = Some(err);
        self
    }

    /// Sleep for `delay` inside every `mount` call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Pretend `target` is already mounted.
    pub fn add_mount(&self, target: impl Into<PathBuf>, record: MountRecord) {
        self.lock().mounts.insert(target.into(), record);
    }

    /// Current mount record for `target`, if any.
    pub fn mounted_at(&self, target: &Path) -> Option<MountRecord> {
        self.lock().mounts.get(target).cloned()
    }

    /// Number of active mounts.
    pub fn mount_count(&self) -> usize {
        self.lock().mounts.len()
    }

    /// Every call made so far, oldest first.
    pub fn actions(&self) -> Vec<MountAction> {
        self.lock().actions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Mounter for FakeMounter {
    fn mount(
        &self,
        source: &str,
        target: &Path,
        fs_type: &str,
        options: &[String],
    ) -> Result<(), MountError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        let mut state = self.lock();
        state.actions.push(MountAction::Mount {
            source: source.to_owned(),
            target: target.to_path_buf(),
        });
        if let Some(err) = &self.mount_error {
            return Err(err.clone());
        }
        state.mounts.insert(
            target.to_path_buf(),
            MountRecord {
                source: source.to_owned(),
                fs_type: fs_type.to_owned(),
                options: options.to_vec(),
            },
        );
        Ok(())
    }

    fn unmount(&self, target: &Path) -> Result<(), MountError> {
        let mut state = self.lock();
        state.actions.push(MountAction::Unmount {
            target: target.to_path_buf(),
        });
        if let Some(err) = &self.unmount_error {
            return Err(err.clone());
        }
        match state.mounts.remove(target) {
            Some(_) => Ok(()),
            None => Err(MountError::InvalidArgument(format!(
                "{} is not mounted",
                target.display()
            ))),
        }
    }

    fn is_mount_point(&self, target: &Path) -> io::Result<bool> {
        let meta = fs::symlink_metadata(target)?;
        reject_symlink(target, &meta)?;
        Ok(self.lock().mounts.contains_key(target))
    }
}
