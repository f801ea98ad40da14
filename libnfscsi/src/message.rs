//! CSI protocol messages transmitted over QUIC.
//!
//! [`CsiMessage`] is the envelope for every request and response exchanged
//! between an orchestrator-side client and the plugin over QUIC
//! bi-directional streams.

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Top-level message envelope for CSI over QUIC.
///
/// Each QUIC bi-stream carries exactly one request followed by one response.
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests ----------------------------------------------
    Probe,
    GetPluginInfo,
    GetPluginCapabilities,

    // ----- Controller requests --------------------------------------------
    CreateVolume(CreateVolumeRequest),
    DeleteVolume(VolumeId),
    ValidateVolumeCapabilities {
        volume_id: VolumeId,
        capabilities: Vec<VolumeCapability>,
    },
    ControllerGetCapabilities,
    ControllerPublishVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    ControllerUnpublishVolume {
        volume_id: VolumeId,
        node_id: String,
    },
    ControllerExpandVolume {
        volume_id: VolumeId,
        capacity_bytes: u64,
    },
    ListVolumes,
    GetCapacity,
    CreateSnapshot {
        source_volume_id: VolumeId,
        name: String,
    },
    DeleteSnapshot(String),

    // ----- Node requests --------------------------------------------------
    StageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    UnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Mount a volume at a pod's target path.
    PublishVolume(NodePublishVolumeRequest),
    /// Unmount a published volume and remove its target path.
    UnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    GetVolumeStats {
        volume_id: VolumeId,
        volume_path: String,
    },
    NodeExpandVolume {
        volume_id: VolumeId,
        volume_path: String,
    },
    NodeGetCapabilities,
    GetNodeInfo,

    // ----- Responses ------------------------------------------------------
    VolumeCreated(Volume),
    VolumeList(Vec<Volume>),
    /// Available capacity in bytes.
    Capacity(u64),
    CapabilitiesValid(bool),
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    VolumeStats(Vec<VolumeUsage>),
    /// New capacity in bytes after an expansion.
    Expanded(u64),
    SnapshotCreated(String),
    PluginInfoResponse(PluginInfo),
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    ProbeResult(bool),
    /// The request failed.
    Error(CsiError),
}

impl CsiMessage {
    /// Whether this variant is something a client may send.
    pub fn is_request(&self) -> bool {
        !matches!(
            self,
            Self::VolumeCreated(_)
                | Self::VolumeList(_)
                | Self::Capacity(_)
                | Self::CapabilitiesValid(_)
                | Self::ControllerCapabilitiesResponse(_)
                | Self::NodeCapabilitiesResponse(_)
                | Self::VolumeStats(_)
                | Self::Expanded(_)
                | Self::SnapshotCreated(_)
                | Self::PluginInfoResponse(_)
                | Self::PluginCapabilitiesResponse(_)
                | Self::NodeInfoResponse(_)
                | Self::Ok
                | Self::ProbeResult(_)
                | Self::Error(_)
        )
    }

    /// Wrap a handler result: `Ok` through `f`, `Err` as [`CsiMessage::Error`].
    pub fn from_result<T>(result: Result<T, CsiError>, f: impl FnOnce(T) -> Self) -> Self {
        match result {
            Ok(value) => f(value),
            Err(e) => Self::Error(e),
        }
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Probe => f.write_str("Probe"),
            Self::GetPluginInfo => f.write_str("GetPluginInfo"),
            Self::GetPluginCapabilities => f.write_str("GetPluginCapabilities"),
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(id) => write!(f, "DeleteVolume({id})"),
            Self::ValidateVolumeCapabilities { volume_id, .. } => {
                write!(f, "ValidateVolumeCapabilities({volume_id})")
            }
            Self::ControllerGetCapabilities => f.write_str("ControllerGetCapabilities"),
            Self::ControllerPublishVolume { volume_id, node_id } => {
                write!(f, "ControllerPublishVolume({volume_id}, node={node_id})")
            }
            Self::ControllerUnpublishVolume { volume_id, node_id } => {
                write!(f, "ControllerUnpublishVolume({volume_id}, node={node_id})")
            }
            Self::ControllerExpandVolume { volume_id, .. } => {
                write!(f, "ControllerExpandVolume({volume_id})")
            }
            Self::ListVolumes => f.write_str("ListVolumes"),
            Self::GetCapacity => f.write_str("GetCapacity"),
            Self::CreateSnapshot {
                source_volume_id,
                name,
            } => write!(f, "CreateSnapshot(name={name}, source={source_volume_id})"),
            Self::DeleteSnapshot(id) => write!(f, "DeleteSnapshot({id})"),
            Self::StageVolume { volume_id, .. } => write!(f, "StageVolume({volume_id})"),
            Self::UnstageVolume { volume_id, .. } => write!(f, "UnstageVolume({volume_id})"),
            Self::PublishVolume(req) => write!(f, "PublishVolume({})", req.volume_id),
            Self::UnpublishVolume { volume_id, .. } => write!(f, "UnpublishVolume({volume_id})"),
            Self::GetVolumeStats { volume_id, .. } => write!(f, "GetVolumeStats({volume_id})"),
            Self::NodeExpandVolume { volume_id, .. } => {
                write!(f, "NodeExpandVolume({volume_id})")
            }
            Self::NodeGetCapabilities => f.write_str("NodeGetCapabilities"),
            Self::GetNodeInfo => f.write_str("GetNodeInfo"),
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::VolumeList(vs) => write!(f, "VolumeList(count={})", vs.len()),
            Self::Capacity(c) => write!(f, "Capacity({c})"),
            Self::CapabilitiesValid(v) => write!(f, "CapabilitiesValid({v})"),
            Self::ControllerCapabilitiesResponse(caps) => {
                write!(f, "ControllerCapabilities(count={})", caps.len())
            }
            Self::NodeCapabilitiesResponse(caps) => {
                write!(f, "NodeCapabilities(count={})", caps.len())
            }
            Self::VolumeStats(usage) => write!(f, "VolumeStats(count={})", usage.len()),
            Self::Expanded(bytes) => write!(f, "Expanded({bytes})"),
            Self::SnapshotCreated(id) => write!(f, "SnapshotCreated({id})"),
            Self::PluginInfoResponse(info) => write!(f, "PluginInfo(name={})", info.name),
            Self::PluginCapabilitiesResponse(caps) => {
                write!(f, "PluginCapabilities(count={})", caps.len())
            }
            Self::NodeInfoResponse(info) => write!(f, "NodeInfo({})", info.node_id),
            Self::Ok => f.write_str("Ok"),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({ok})"),
            Self::Error(e) => write!(f, "Error({e}, code={})", e.code()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_survives_json() {
        let msg = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "pvc-1".into(),
            capacity_bytes: 1024,
            volume_capabilities: vec![VolumeCapability::default()],
            parameters: [("server".to_owned(), "10.0.0.1".to_owned())].into(),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        let CsiMessage::CreateVolume(req) = de else {
            panic!("wrong variant");
        };
        assert_eq!(req.name, "pvc-1");
        assert_eq!(req.parameters["server"], "10.0.0.1");
    }

    #[test]
    fn error_keeps_its_kind_over_the_wire() {
        let msg = CsiMessage::Error(CsiError::Aborted("volume vol1 is being handled".into()));
        let json = serde_json::to_string(&msg).expect("serialize");
        let de: CsiMessage = serde_json::from_str(&json).expect("deserialize");
        assert!(matches!(de, CsiMessage::Error(CsiError::Aborted(_))));
    }

    #[test]
    fn requests_and_responses_are_distinguished() {
        assert!(CsiMessage::Probe.is_request());
        assert!(CsiMessage::DeleteVolume("a#b#c".into()).is_request());
        assert!(CsiMessage::NodeGetCapabilities.is_request());
        assert!(!CsiMessage::Ok.is_request());
        assert!(!CsiMessage::VolumeStats(Vec::new()).is_request());
        assert!(!CsiMessage::Error(CsiError::internal("x")).is_request());
    }

    #[test]
    fn from_result_wraps_errors() {
        let ok = CsiMessage::from_result(Ok(7u64), CsiMessage::Capacity);
        assert!(matches!(ok, CsiMessage::Capacity(7)));

        let err: Result<u64, _> = Err(CsiError::unimplemented("GetCapacity"));
        let msg = CsiMessage::from_result(err, CsiMessage::Capacity);
        assert!(matches!(msg, CsiMessage::Error(CsiError::Unimplemented(_))));
    }

    #[test]
    fn display_formatting() {
        assert_eq!(CsiMessage::Ok.to_string(), "Ok");
        assert_eq!(CsiMessage::Probe.to_string(), "Probe");
        assert_eq!(
            CsiMessage::DeleteVolume("srv#base#vol1".into()).to_string(),
            "DeleteVolume(srv#base#vol1)"
        );
        assert_eq!(
            CsiMessage::Error(CsiError::NotFound("gone".into())).to_string(),
            "Error(not found: gone, code=NotFound)"
        );
    }
}
