//! Volume id encoding and the paths derived from it.
//!
//! A volume id is `<server>#<basedir>#<subdir>`, each component stripped of
//! leading and trailing `/`.  It is the only durable handle to a volume:
//! `DeleteVolume` recovers everything it needs from it.

use std::path::{Component, Path, PathBuf};

use crate::error::CsiError;
use crate::types::VolumeId;

/// Separator between the components of a volume id.
pub const SEPARATOR: char = '#';

/// The remote location a volume id points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLocation {
    pub server: String,
    pub basedir: String,
    pub subdir: String,
}

fn trim_slashes(s: &str) -> &str {
    s.trim_matches('/')
}

/// Build the volume id for `server`, `basedir` and `subdir`.
pub fn encode(server: &str, basedir: &str, subdir: &str) -> VolumeId {
    VolumeId(format!(
        "{}{SEPARATOR}{}{SEPARATOR}{}",
        trim_slashes(server),
        trim_slashes(basedir),
        trim_slashes(subdir),
    ))
}

/// Split a volume id back into its location.
///
/// Every component must be non-empty, and the subdirectory must pass
/// [`validate_subdir`], so a decoded id never resolves to the working root.
pub fn decode(volume_id: &VolumeId) -> Result<VolumeLocation, CsiError> {
    let invalid = || {
        CsiError::InvalidArgument(format!(
            "invalid volume ID {volume_id:?} which cannot be parsed"
        ))
    };
    let parts: Vec<&str> = volume_id.as_str().split(SEPARATOR).collect();
    let [server, basedir, subdir] = parts.as_slice() else {
        return Err(invalid());
    };
    if parts.iter().any(|part| trim_slashes(part).is_empty()) {
        return Err(invalid());
    }
    validate_subdir(subdir)?;
    Ok(VolumeLocation {
        server: (*server).to_owned(),
        basedir: (*basedir).to_owned(),
        subdir: (*subdir).to_owned(),
    })
}

/// Reject a volume subdirectory that would not name a directory strictly
/// below the working root, or that could not round-trip through a volume id.
pub fn validate_subdir(subdir: &str) -> Result<(), CsiError> {
    let invalid = |why: &str| {
        CsiError::InvalidArgument(format!("invalid volume subdirectory {subdir:?}: {why}"))
    };
    if subdir.contains(SEPARATOR) {
        return Err(invalid("contains '#'"));
    }
    let mut normal = false;
    for component in Path::new(subdir).components() {
        match component {
            Component::Normal(_) => normal = true,
            Component::ParentDir => return Err(invalid("contains '..'")),
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    if !normal {
        return Err(invalid("names no directory"));
    }
    Ok(())
}

/// Append `rel` to `base` lexically, treating `rel` as relative even if it
/// starts with `/` and never letting `..` climb above `base`.
fn join_under(base: &Path, rel: &str) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(rel).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    let mut path = base.to_path_buf();
    path.extend(parts);
    path
}

/// Where the share root is mounted while a volume directory is created or
/// removed: `<working_root>/<subdir>`.
pub fn target_parent_path(working_root: &Path, subdir: &str) -> PathBuf {
    join_under(working_root, subdir)
}

/// The volume directory inside the mounted share root:
/// `<target_parent_path>/<subdir>`.
pub fn volume_mount_path(target_parent_path: &Path, subdir: &str) -> PathBuf {
    join_under(target_parent_path, subdir)
}
