//! CSI Controller service trait.
//!
//! The Controller service owns the volume lifecycle: it provisions a volume
//! by creating its directory on the remote share and deprovisions it by
//! removing that directory.  Attaching the volume to a workload is the Node
//! service's job.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{ControllerCapability, CreateVolumeRequest, Volume, VolumeCapability, VolumeId};

/// Controller service: centralized volume management.
///
/// Operations that a network filesystem has no use for are still part of the
/// trait so the transport can answer them; implementations report
/// [`CsiError::Unimplemented`].
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// The returned [`Volume`] carries the `volume_id` and `volume_context`
    /// that must be forwarded to subsequent Node operations.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.
    async fn delete_volume(&self, volume_id: &VolumeId) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        volume_id: &VolumeId,
        capabilities: &[VolumeCapability],
    ) -> Result<bool, CsiError>;

    /// Advertise the Controller RPCs this plugin supports.
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// Attach a volume to a node.
    async fn controller_publish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError>;

    /// Detach a volume from a node.
    async fn controller_unpublish_volume(
        &self,
        volume_id: &VolumeId,
        node_id: &str,
    ) -> Result<(), CsiError>;

    /// Grow a volume.
    async fn controller_expand_volume(
        &self,
        volume_id: &VolumeId,
        capacity_bytes: u64,
    ) -> Result<u64, CsiError>;

    /// List all volumes known to this controller.
    async fn list_volumes(&self) -> Result<Vec<Volume>, CsiError>;

    /// Return the total available capacity in bytes.
    async fn get_capacity(&self) -> Result<u64, CsiError>;

    /// Snapshot a volume, returning the snapshot id.
    async fn create_snapshot(&self, source: &VolumeId, name: &str) -> Result<String, CsiError>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), CsiError>;
}
