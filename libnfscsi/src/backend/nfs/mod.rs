//! NFS storage backend for CSI.
//!
//! [`NfsBackend`] implements [`CsiIdentity`], [`CsiController`] and
//! [`CsiNode`] for volumes that are plain directories on an NFS export.
//! A volume is provisioned by mounting the export root under a local working
//! directory, creating the volume directory inside it, and unmounting again;
//! deletion does the same with a recursive remove.  Nothing is persisted
//! locally; the volume id encodes everything needed to find the directory
//! again.
//!
//! # Working directory layout
//!
//! ```text
//! <working_dir>/
//!   <subdir>/            # export root, mounted only while a create/delete runs
//!     <subdir>/          # the volume directory on the server
//! ```
//!
//! [`CsiController`]: crate::controller::CsiController
//! [`CsiNode`]: crate::node::CsiNode

mod controller;
mod node;
pub mod params;
pub mod volume_id;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::idempotency::IdempotencyGuard;
use crate::identity::CsiIdentity;
use crate::mount::{HostMounter, Mounter};
use crate::types::{PluginCapability, PluginInfo};

/// Default plugin name reported by `GetPluginInfo`.
pub const DEFAULT_DRIVER_NAME: &str = "nfsplugin.csi.cliufreever.com";

/// Default staging root for share-root mounts.
pub const DEFAULT_WORKING_DIR: &str = "/tmp";

/// Filesystem type passed to `mount`.
pub const NFS_FS_TYPE: &str = "nfs";

/// Concrete CSI backend for NFS exports.
///
/// # Thread safety
///
/// The only mutable state is the [`IdempotencyGuard`].  Operations on
/// different volumes run fully in parallel; operations on the same volume
/// key are rejected while one is in flight.
pub struct NfsBackend {
    /// Name reported by `GetPluginInfo`.
    driver_name: String,
    /// Node identifier (hostname or user-supplied string).
    node_id: String,
    /// Root under which share roots are temporarily mounted.
    working_dir: PathBuf,
    /// Host mount table access.
    mounter: Arc<dyn Mounter>,
    /// Volume keys currently inside a create or delete.
    processing: IdempotencyGuard,
}

impl NfsBackend {
    /// Create a backend that mounts through the host.
    ///
    /// * `driver_name`: plugin name reported to the orchestrator
    /// * `node_id`: unique identifier for this node
    /// * `working_dir`: staging root for share-root mounts
    pub fn new(
        driver_name: impl Into<String>,
        node_id: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            driver_name: driver_name.into(),
            node_id: node_id.into(),
            working_dir: working_dir.into(),
            mounter: Arc::new(HostMounter),
            processing: IdempotencyGuard::new(),
        }
    }

    /// Replace the mount implementation.
    pub fn with_mounter(mut self, mounter: Arc<dyn Mounter>) -> Self {
        self.mounter = mounter;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// The registry of in-flight create/delete operations.
    pub fn processing(&self) -> &IdempotencyGuard {
        &self.processing
    }

    /// Run `f` against the mounter on the blocking thread pool.
    async fn with_mounter_blocking<T, F>(&self, f: F) -> Result<T, CsiError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Mounter) -> Result<T, CsiError> + Send + 'static,
    {
        let mounter = Arc::clone(&self.mounter);
        tokio::task::spawn_blocking(move || f(mounter.as_ref()))
            .await
            .map_err(|e| CsiError::Internal(format!("mount task failed: {e}")))?
    }
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for NfsBackend {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: self.driver_name.clone(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(vec![
            PluginCapability::ControllerService,
            PluginCapability::VolumeAccessibilityConstraints,
        ])
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::mount::FakeMounter;

    pub const TEST_NODE: &str = "fakeNode";

    /// A backend rooted at `working_dir` that mounts into `mounter`.
    pub fn fake_backend(working_dir: &Path, mounter: Arc<FakeMounter>) -> NfsBackend {
        NfsBackend::new(DEFAULT_DRIVER_NAME, TEST_NODE, working_dir).with_mounter(mounter)
    }
}
