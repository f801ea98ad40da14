//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local mount
//! operations that make a volume visible to workloads:
//!
//! 1. **Publish**: mount the remote share at the target path.
//! 2. **Unpublish**: unmount it again and clean up the target directory.
//!
//! Staging is not used by network filesystems and is reported as
//! unimplemented.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{NodeCapability, NodeInfo, NodePublishVolumeRequest, VolumeId, VolumeUsage};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at a global path.
    async fn stage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Unstage a volume from a global path.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume: mount the share at `req.target_path`.
    ///
    /// This is idempotent: publishing onto a path that is already a mount
    /// point succeeds without touching it.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount and remove the target path.
    ///
    /// This is idempotent: a target that is not mounted, or does not exist,
    /// is already unpublished.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Report byte and inode usage of the filesystem at `volume_path`.
    async fn get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
    ) -> Result<Vec<VolumeUsage>, CsiError>;

    /// Grow the filesystem of a published volume.
    async fn expand_volume(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
    ) -> Result<u64, CsiError>;

    /// Advertise the Node RPCs this plugin supports.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
