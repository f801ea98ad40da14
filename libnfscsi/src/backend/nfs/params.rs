//! Storage-class parameter validation.
//!
//! `CreateVolume` parameters arrive as a loose string map.  They are checked
//! here before anything touches the filesystem and parsed once into
//! [`NfsVolumeParams`], so nothing downstream re-reads raw strings.

use std::collections::{BTreeMap, HashMap};

use super::volume_id::SEPARATOR;
use crate::error::CsiError;

pub const SERVER_KEY: &str = "server";
pub const BASEDIR_KEY: &str = "basedir";
pub const SUBDIR_KEY: &str = "subdir";
pub const MOUNT_PERMISSION_KEY: &str = "mountPermission";

/// Characters that must never reach a mount command line.
const FORBIDDEN_CHARS: &[char] = &['&', '|', ';', '$', '\'', '`', '(', ')'];

/// Validated `CreateVolume` parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfsVolumeParams {
    /// Remote host or address.
    pub server: String,
    /// Exported path on the server.
    pub basedir: String,
    /// Volume directory under `basedir`, if the caller picked one.
    pub subdir: Option<String>,
    /// Permission bits for the volume directory.
    pub mount_permission: u32,
    /// Every unrecognized key, forwarded to the mount step untouched.
    pub extra: BTreeMap<String, String>,
}

impl NfsVolumeParams {
    /// Validate `params` and parse them.
    pub fn from_parameters(params: &HashMap<String, String>) -> Result<Self, CsiError> {
        validate_parameters(params)?;

        // Presence was checked by `validate_parameters`.
        let server = params.get(SERVER_KEY).cloned().unwrap_or_default();
        let basedir = params.get(BASEDIR_KEY).cloned().unwrap_or_default();
        let mount_permission = parse_mount_permission(
            params.get(MOUNT_PERMISSION_KEY).map(String::as_str).unwrap_or(""),
        )?;

        let extra = params
            .iter()
            .filter(|(k, _)| {
                ![SERVER_KEY, BASEDIR_KEY, SUBDIR_KEY, MOUNT_PERMISSION_KEY].contains(&k.as_str())
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self {
            server,
            basedir,
            subdir: params.get(SUBDIR_KEY).cloned(),
            mount_permission,
            extra,
        })
    }

    /// The volume directory name, falling back to `default` when no
    /// non-empty `subdir` was supplied.
    pub fn subdir_or<'a>(&'a self, default: &'a str) -> &'a str {
        match self.subdir.as_deref() {
            Some(subdir) if !subdir.is_empty() => subdir,
            _ => default,
        }
    }

    /// Volume context for mounting the share root itself: `server:/basedir`
    /// without any subdirectory.
    pub fn share_root_context(&self) -> HashMap<String, String> {
        let mut context: HashMap<String, String> = self
            .extra
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case(SUBDIR_KEY))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        context.insert(SERVER_KEY.to_owned(), self.server.trim_matches('/').to_owned());
        context.insert(
            BASEDIR_KEY.to_owned(),
            format!("/{}", self.basedir.trim_matches('/')),
        );
        context.insert(
            MOUNT_PERMISSION_KEY.to_owned(),
            format!("{:04o}", self.mount_permission),
        );
        context
    }
}

/// Reject an empty volume display name.
pub fn validate_volume_name(name: &str) -> Result<(), CsiError> {
    if name.is_empty() {
        return Err(CsiError::InvalidArgument(
            "volume name cannot be empty".to_owned(),
        ));
    }
    Ok(())
}

/// Check `params` in order: forbidden characters (all offenders reported
/// together), `mountPermission`, `server`, `basedir`, then the volume id
/// separator in the id components.  `subdir` is optional.
pub fn validate_parameters(params: &HashMap<String, String>) -> Result<(), CsiError> {
    let mut keys: Vec<&String> = params.keys().collect();
    keys.sort();
    let offenders: Vec<String> = keys
        .into_iter()
        .filter(|k| params[*k].contains(FORBIDDEN_CHARS))
        .map(|k| format!("parameter {k} has illegal value {:?}", params[k]))
        .collect();
    if !offenders.is_empty() {
        return Err(CsiError::InvalidArgument(offenders.join("; ")));
    }

    parse_mount_permission(
        params
            .get(MOUNT_PERMISSION_KEY)
            .map(String::as_str)
            .unwrap_or(""),
    )?;

    if !has_path_value(params, SERVER_KEY) {
        return Err(CsiError::InvalidArgument(
            "nfs server is required".to_owned(),
        ));
    }
    if !has_path_value(params, BASEDIR_KEY) {
        return Err(CsiError::InvalidArgument(
            "nfs basedir is required".to_owned(),
        ));
    }

    // These three become volume id components.
    for key in [SERVER_KEY, BASEDIR_KEY, SUBDIR_KEY] {
        if let Some(value) = params.get(key).filter(|v| v.contains(SEPARATOR)) {
            return Err(CsiError::InvalidArgument(format!(
                "parameter {key} must not contain {SEPARATOR:?}, got {value:?}"
            )));
        }
    }
    Ok(())
}

/// Whether `key` is present with something other than slashes.
fn has_path_value(params: &HashMap<String, String>, key: &str) -> bool {
    params
        .get(key)
        .is_some_and(|v| !v.trim_matches('/').is_empty())
}

/// Parse an octal permission string such as `"0755"`.
pub fn parse_mount_permission(value: &str) -> Result<u32, CsiError> {
    let invalid = || CsiError::InvalidArgument(format!("invalid mount permissions: {value:?}"));
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    u32::from_str_radix(value, 8).map_err(|_| invalid())
}
