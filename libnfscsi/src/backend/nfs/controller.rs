//! [`CsiController`] for [`NfsBackend`]: provisioning volume directories.
//!
//! Both `CreateVolume` and `DeleteVolume` work the same way: mount the
//! export root under the working directory, create or remove the volume
//! directory inside it, then unmount.  The unmount runs whatever happened in
//! between.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::NfsBackend;
use super::params::{NfsVolumeParams, SUBDIR_KEY, validate_volume_name};
use super::volume_id::{self, VolumeLocation};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::mount;
use crate::node::CsiNode;
use crate::types::*;

impl NfsBackend {
    /// Mount the share root described by `params` at `target_parent`, run
    /// `op`, then unmount.  The cleanup runs even when the mount or `op`
    /// fails, so a half-created mount point does not linger.
    async fn with_share_root<F, Fut>(
        &self,
        volume_id: &VolumeId,
        params: &NfsVolumeParams,
        target_parent: &Path,
        op: F,
    ) -> Result<(), CsiError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), CsiError>>,
    {
        let target_str = target_parent.display().to_string();
        let premount = NodePublishVolumeRequest {
            volume_id: volume_id.clone(),
            target_path: target_str.clone(),
            volume_capability: Some(VolumeCapability::mount()),
            read_only: false,
            volume_context: params.share_root_context(),
        };
        let result = match self.publish_volume(premount).await {
            Ok(()) => {
                debug!(target = %target_str, "share root mounted");
                op().await
            }
            Err(e) => Err(CsiError::Internal(format!(
                "failed to mount nfs server {}: {e}",
                params.server
            ))),
        };

        if let Err(e) = self.unpublish_volume(volume_id, &target_str).await {
            warn!(target = %target_str, error = %e, "failed to unmount share root");
        }
        result
    }
}

#[async_trait]
impl CsiController for NfsBackend {
    #[instrument(skip(self, req), fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        validate_volume_name(&req.name)?;
        check_capabilities(&req.volume_capabilities)?;
        let params = NfsVolumeParams::from_parameters(&req.parameters)?;
        let subdir = params.subdir_or(&req.name).to_owned();
        volume_id::validate_subdir(&subdir)?;

        let Some(_token) = self.processing.try_begin(&req.name) else {
            return Err(CsiError::Aborted(format!(
                "volume {} is being handled",
                req.name
            )));
        };

        let volume_id = volume_id::encode(&params.server, &params.basedir, &subdir);
        let target_parent = volume_id::target_parent_path(&self.working_dir, &subdir);
        let volume_path = volume_id::volume_mount_path(&target_parent, &subdir);
        let mode = params.mount_permission;

        self.with_share_root(&volume_id, &params, &target_parent, move || {
            create_volume_dir(volume_path, mode)
        })
        .await?;

        let mut volume_context: HashMap<String, String> = req.parameters.clone();
        volume_context.insert(SUBDIR_KEY.to_owned(), subdir);

        info!(volume_id = %volume_id, "volume created");
        Ok(Volume {
            volume_id,
            capacity_bytes: 0,
            volume_context,
        })
    }

    #[instrument(skip(self))]
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID is required".into()));
        }

        let Some(_token) = self.processing.try_begin(volume_id.as_str()) else {
            return Err(CsiError::FailedPrecondition(format!(
                "volume {volume_id} is being handled"
            )));
        };

        let VolumeLocation {
            server,
            basedir,
            subdir,
        } = volume_id::decode(volume_id)?;

        // Mode 0 leaves the share root's permissions as the server has them.
        let params = NfsVolumeParams {
            server,
            basedir,
            subdir: Some(subdir.clone()),
            mount_permission: 0,
            extra: BTreeMap::new(),
        };
        let target_parent = volume_id::target_parent_path(&self.working_dir, &subdir);
        let volume_path = volume_id::volume_mount_path(&target_parent, &subdir);

        self.with_share_root(volume_id, &params, &target_parent, || {
            remove_volume_dir(volume_path)
        })
        .await?;

        info!("volume deleted");
        Ok(())
    }

    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID is required".into()));
        }
        check_capabilities(capabilities)?;
        Ok(true)
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(vec![
            ControllerCapability::CreateDeleteVolume,
            ControllerCapability::PublishUnpublishVolume,
            ControllerCapability::SingleNodeMultiWriter,
        ])
    }

    async fn controller_publish_volume(
        &self,
        _volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("ControllerPublishVolume"))
    }

    async fn controller_unpublish_volume(
        &self,
        _volume_id: &VolumeId,
        _node_id: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("ControllerUnpublishVolume"))
    }

    async fn controller_expand_volume(
        &self,
        _volume_id: &VolumeId,
        _capacity_bytes: u64,
    ) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("ControllerExpandVolume"))
    }

    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError> {
        Err(CsiError::unimplemented("ListVolumes"))
    }

    async fn get_capacity(&self) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("GetCapacity"))
    }

    async fn create_snapshot(
        &self,
        _source_volume_id: &VolumeId,
        _name: &str,
    ) -> Result<String, CsiError> {
        Err(CsiError::unimplemented("CreateSnapshot"))
    }

    async fn delete_snapshot(&self, _snapshot_id: &str) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("DeleteSnapshot"))
    }
}

/// Only filesystem access is supported, and at least one capability must be
/// requested.
fn check_capabilities(capabilities: &[VolumeCapability]) -> Result<(), CsiError> {
    if capabilities.is_empty() {
        return Err(CsiError::InvalidArgument(
            "volume capabilities are required".into(),
        ));
    }
    if capabilities.iter().any(VolumeCapability::is_block) {
        return Err(CsiError::InvalidArgument(
            "block volume is not supported".into(),
        ));
    }
    Ok(())
}

/// Create `path` with permission bits `mode`.
async fn create_volume_dir(path: PathBuf, mode: u32) -> Result<(), CsiError> {
    let dir = path.clone();
    tokio::task::spawn_blocking(move || mount::ensure_directory(&dir, mode))
        .await
        .map_err(CsiError::internal)?
        .map_err(|e| {
            CsiError::Internal(format!(
                "failed to create volume directory {}: {e}",
                path.display()
            ))
        })
}

/// Recursively remove `path`.  A path that is already gone counts as removed.
async fn remove_volume_dir(path: PathBuf) -> Result<(), CsiError> {
    match tokio::fs::remove_dir_all(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "volume directory already absent");
            Ok(())
        }
        Err(e) => Err(CsiError::Internal(format!(
            "failed to delete volume directory {}: {e}",
            path.display()
        ))),
    }
}
