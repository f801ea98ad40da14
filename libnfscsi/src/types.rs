//! Core CSI types: volumes, capabilities, requests, and usage statistics.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque identifier for a volume, as handed to and received from the
/// orchestrator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// One node, one writer.
    SingleNodeWriter,
    /// One node, read-only.
    SingleNodeReaderOnly,
    /// One node, any number of writers on that node.
    #[default]
    SingleNodeMultiWriter,
    /// Many nodes, read-only.
    MultiNodeReaderOnly,
    /// Many nodes, many writers.
    MultiNodeMultiWriter,
}

/// How the volume is exposed to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// A mounted filesystem.
    Mount {
        /// Filesystem type requested by the caller; empty means the plugin
        /// default.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"nfsvers=4.1"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// A raw block device.  Never supported by this plugin.
    Block,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    pub access_type: AccessType,
    #[serde(default)]
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// A plain read-write filesystem mount with no extra flags.
    pub fn mount() -> Self {
        Self::default()
    }

    /// A block-device capability.
    pub fn block() -> Self {
        Self {
            access_type: AccessType::Block,
            access_mode: AccessMode::default(),
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.access_type, AccessType::Block)
    }

    /// Mount flags carried by a filesystem capability; empty for block.
    pub fn mount_flags(&self) -> &[String] {
        match &self.access_type {
            AccessType::Mount { mount_flags, .. } => mount_flags,
            AccessType::Block => &[],
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: Vec::new(),
            },
            access_mode: AccessMode::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume metadata
// ---------------------------------------------------------------------------

/// A provisioned volume as returned by `CreateVolume`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    /// Encoded `server#basedir#subdir` handle.
    pub volume_id: VolumeId,
    /// Always zero: NFS shares are not capacity-accounted.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Display name chosen by the orchestrator.
    pub name: String,
    /// Desired capacity in bytes.  Ignored.
    #[serde(default)]
    pub capacity_bytes: u64,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage-class parameters (`server`, `basedir`, `subdir`,
    /// `mountPermission`, plus pass-through keys).
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Request to mount a volume at a workload-visible target path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Directory the share is mounted on.
    pub target_path: String,
    /// Requested capability.  Required.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

// ---------------------------------------------------------------------------
// Usage statistics
// ---------------------------------------------------------------------------

/// Unit of a [`VolumeUsage`] record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageUnit {
    Bytes,
    Inodes,
}

/// One usage record reported by `NodeGetVolumeStats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUsage {
    pub unit: UsageUnit,
    pub available: u64,
    pub total: u64,
    pub used: u64,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"nfsplugin.csi.cliufreever.com"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// RPCs the Controller service supports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControllerCapability {
    CreateDeleteVolume,
    PublishUnpublishVolume,
    SingleNodeMultiWriter,
}

/// RPCs the Node service supports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    GetVolumeStats,
    SingleNodeMultiWriter,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
}
