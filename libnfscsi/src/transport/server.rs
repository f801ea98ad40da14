//! QUIC server that runs inside the plugin and dispatches incoming CSI
//! requests to the identity, controller and node implementations.

use std::net::SocketAddr;
use std::sync::Arc;

use quinn::crypto::rustls::QuicServerConfig;
use tracing::{debug, error, info, instrument, warn};

use super::{read_message, write_message};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::message::CsiMessage;
use crate::node::CsiNode;

/// A CSI server that accepts QUIC connections and dispatches
/// [`CsiMessage`] requests to an [`CsiIdentity`] + [`CsiController`] +
/// [`CsiNode`] implementation.
pub struct CsiServer<T> {
    endpoint: quinn::Endpoint,
    handler: Arc<T>,
}

impl<T> CsiServer<T>
where
    T: CsiIdentity + CsiController + CsiNode + 'static,
{
    /// Create a new server bound to `addr`.
    pub fn new(
        addr: SocketAddr,
        tls_config: rustls::ServerConfig,
        handler: Arc<T>,
    ) -> Result<Self, CsiError> {
        let quic_server_config = QuicServerConfig::try_from(tls_config)
            .map_err(|e| CsiError::Transport(format!("invalid TLS config: {e}")))?;
        let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_server_config));
        let endpoint = quinn::Endpoint::server(server_config, addr).map_err(CsiError::transport)?;
        info!(%addr, "CSI QUIC server listening");
        Ok(Self { endpoint, handler })
    }

    /// Accept connections in a loop until the endpoint is closed.
    ///
    /// Each accepted connection spawns a Tokio task, and each bi-stream
    /// within a connection is handled concurrently.
    pub async fn serve(&self) -> Result<(), CsiError> {
        while let Some(incoming) = self.endpoint.accept().await {
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                match incoming.await {
                    Ok(conn) => {
                        let remote = conn.remote_address();
                        debug!(%remote, "CSI connection accepted");
                        if let Err(e) = Self::handle_connection(conn, handler).await {
                            warn!(%remote, error = %e, "CSI connection error");
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "CSI incoming connection failed");
                    }
                }
            });
        }
        info!("CSI QUIC server stopped accepting");
        Ok(())
    }

    /// Stop accepting connections and close the open ones.
    pub fn shutdown(&self) {
        self.endpoint
            .close(quinn::VarInt::from_u32(0), b"server shutdown");
    }

    async fn handle_connection(conn: quinn::Connection, handler: Arc<T>) -> Result<(), CsiError> {
        loop {
            let (send, recv) = match conn.accept_bi().await {
                Ok(stream) => stream,
                Err(
                    quinn::ConnectionError::ApplicationClosed(_)
                    | quinn::ConnectionError::LocallyClosed,
                ) => return Ok(()),
                Err(e) => return Err(CsiError::transport(e)),
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_stream(send, recv, &handler).await {
                    error!(error = %e, "CSI stream handler error");
                }
            });
        }
    }

    /// Process a single bi-stream: read request, dispatch, write response.
    #[instrument(skip_all)]
    async fn handle_stream(
        mut send: quinn::SendStream,
        mut recv: quinn::RecvStream,
        handler: &T,
    ) -> Result<(), CsiError> {
        let response = match read_message(&mut recv).await {
            Ok(request) => {
                debug!(%request, "CSI request received");
                dispatch(handler, request).await
            }
            Err(e) => CsiMessage::Error(CsiError::InvalidArgument(e.to_string())),
        };
        write_message(&mut send, &response).await
    }

    /// The underlying QUIC endpoint, for the local address.
    pub fn endpoint(&self) -> &quinn::Endpoint {
        &self.endpoint
    }
}

/// Map a request to the matching trait method and wrap the result in a
/// response.  Failures come back as [`CsiMessage::Error`].
pub async fn dispatch<T>(handler: &T, request: CsiMessage) -> CsiMessage
where
    T: CsiIdentity + CsiController + CsiNode,
{
    use CsiMessage as M;

    match request {
        // --- Identity -------------------------------------------------------
        M::Probe => M::from_result(handler.probe().await, M::ProbeResult),
        M::GetPluginInfo => M::from_result(handler.get_plugin_info().await, M::PluginInfoResponse),
        M::GetPluginCapabilities => M::from_result(
            handler.get_plugin_capabilities().await,
            M::PluginCapabilitiesResponse,
        ),

        // --- Controller -----------------------------------------------------
        M::CreateVolume(req) => M::from_result(handler.create_volume(req).await, M::VolumeCreated),
        M::DeleteVolume(id) => M::from_result(handler.delete_volume(&id).await, |()| M::Ok),
        M::ValidateVolumeCapabilities {
            volume_id,
            capabilities,
        } => M::from_result(
            handler
                .validate_volume_capabilities(&volume_id, &capabilities)
                .await,
            M::CapabilitiesValid,
        ),
        M::ControllerGetCapabilities => M::from_result(
            handler.controller_get_capabilities().await,
            M::ControllerCapabilitiesResponse,
        ),
        M::ControllerPublishVolume { volume_id, node_id } => M::from_result(
            handler.controller_publish_volume(&volume_id, &node_id).await,
            |()| M::Ok,
        ),
        M::ControllerUnpublishVolume { volume_id, node_id } => M::from_result(
            handler
                .controller_unpublish_volume(&volume_id, &node_id)
                .await,
            |()| M::Ok,
        ),
        M::ControllerExpandVolume {
            volume_id,
            capacity_bytes,
        } => M::from_result(
            handler
                .controller_expand_volume(&volume_id, capacity_bytes)
                .await,
            M::Expanded,
        ),
        M::ListVolumes => M::from_result(handler.list_volumes().await, M::VolumeList),
        M::GetCapacity => M::from_result(handler.get_capacity().await, M::Capacity),
        M::CreateSnapshot {
            source_volume_id,
            name,
        } => M::from_result(
            handler.create_snapshot(&source_volume_id, &name).await,
            M::SnapshotCreated,
        ),
        M::DeleteSnapshot(id) => M::from_result(handler.delete_snapshot(&id).await, |()| M::Ok),

        // --- Node -----------------------------------------------------------
        M::StageVolume {
            volume_id,
            staging_target_path,
        } => M::from_result(
            handler.stage_volume(&volume_id, &staging_target_path).await,
            |()| M::Ok,
        ),
        M::UnstageVolume {
            volume_id,
            staging_target_path,
        } => M::from_result(
            handler
                .unstage_volume(&volume_id, &staging_target_path)
                .await,
            |()| M::Ok,
        ),
        M::PublishVolume(req) => M::from_result(handler.publish_volume(req).await, |()| M::Ok),
        M::UnpublishVolume {
            volume_id,
            target_path,
        } => M::from_result(
            handler.unpublish_volume(&volume_id, &target_path).await,
            |()| M::Ok,
        ),
        M::GetVolumeStats {
            volume_id,
            volume_path,
        } => M::from_result(
            handler.get_volume_stats(&volume_id, &volume_path).await,
            M::VolumeStats,
        ),
        M::NodeExpandVolume {
            volume_id,
            volume_path,
        } => M::from_result(
            handler.expand_volume(&volume_id, &volume_path).await,
            M::Expanded,
        ),
        M::NodeGetCapabilities => {
            M::from_result(handler.get_capabilities().await, M::NodeCapabilitiesResponse)
        }
        M::GetNodeInfo => M::from_result(handler.get_info().await, M::NodeInfoResponse),

        // --- Response variants never arrive as requests ---------------------
        other => {
            warn!(msg = %other, "unexpected message variant received as request");
            M::Error(CsiError::InvalidArgument(format!(
                "unexpected message: {other}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::backend::nfs::NfsBackend;
    use crate::mount::FakeMounter;
    use crate::types::*;

    fn backend(working_dir: &std::path::Path) -> (NfsBackend, Arc<FakeMounter>) {
        let mounter = Arc::new(FakeMounter::new());
        let backend = NfsBackend::new("nfs.test", "node-1", working_dir).with_mounter(mounter.clone());
        (backend, mounter)
    }

    fn nfs_parameters() -> HashMap<String, String> {
        [
            ("server", "10.0.0.1"),
            ("basedir", "/exports"),
            ("mountPermission", "0755"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
    }

    #[tokio::test]
    async fn dispatch_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());

        assert!(matches!(
            dispatch(&backend, CsiMessage::Probe).await,
            CsiMessage::ProbeResult(true)
        ));
        let CsiMessage::PluginInfoResponse(info) =
            dispatch(&backend, CsiMessage::GetPluginInfo).await
        else {
            panic!("expected plugin info");
        };
        assert_eq!(info.name, "nfs.test");
    }

    #[tokio::test]
    async fn dispatch_create_then_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, mounter) = backend(tmp.path());

        let create = CsiMessage::CreateVolume(CreateVolumeRequest {
            name: "pvc-7".into(),
            capacity_bytes: 0,
            volume_capabilities: vec![VolumeCapability::mount()],
            parameters: nfs_parameters(),
        });
        let CsiMessage::VolumeCreated(volume) = dispatch(&backend, create).await else {
            panic!("expected a created volume");
        };
        assert_eq!(volume.volume_id.as_str(), "10.0.0.1#exports#pvc-7");
        assert!(tmp.path().join("pvc-7/pvc-7").is_dir());

        let deleted = dispatch(&backend, CsiMessage::DeleteVolume(volume.volume_id)).await;
        assert!(matches!(deleted, CsiMessage::Ok));
        assert!(!tmp.path().join("pvc-7/pvc-7").exists());
        assert_eq!(mounter.mount_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_publish_and_unpublish() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, mounter) = backend(tmp.path());
        let target = tmp.path().join("pod/volume");
        let target_path = target.display().to_string();

        let publish = CsiMessage::PublishVolume(NodePublishVolumeRequest {
            volume_id: "10.0.0.1#exports#pvc-7".into(),
            target_path: target_path.clone(),
            volume_capability: Some(VolumeCapability::mount()),
            read_only: false,
            volume_context: nfs_parameters(),
        });
        assert!(matches!(dispatch(&backend, publish).await, CsiMessage::Ok));
        assert_eq!(mounter.mount_count(), 1);

        let unpublish = CsiMessage::UnpublishVolume {
            volume_id: "10.0.0.1#exports#pvc-7".into(),
            target_path,
        };
        assert!(matches!(dispatch(&backend, unpublish).await, CsiMessage::Ok));
        assert_eq!(mounter.mount_count(), 0);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn dispatch_reports_errors_as_messages() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());

        let resp = dispatch(&backend, CsiMessage::DeleteVolume(VolumeId::default())).await;
        assert!(matches!(resp, CsiMessage::Error(CsiError::InvalidArgument(_))));

        let resp = dispatch(&backend, CsiMessage::ListVolumes).await;
        assert!(matches!(resp, CsiMessage::Error(CsiError::Unimplemented(_))));
    }

    #[tokio::test]
    async fn dispatch_rejects_response_variants() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());

        let resp = dispatch(&backend, CsiMessage::Capacity(1)).await;
        assert!(matches!(resp, CsiMessage::Error(CsiError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn dispatch_capabilities() {
        let tmp = tempfile::tempdir().unwrap();
        let (backend, _) = backend(tmp.path());

        let CsiMessage::ControllerCapabilitiesResponse(caps) =
            dispatch(&backend, CsiMessage::ControllerGetCapabilities).await
        else {
            panic!("expected controller capabilities");
        };
        assert!(caps.contains(&ControllerCapability::CreateDeleteVolume));

        let CsiMessage::NodeCapabilitiesResponse(caps) =
            dispatch(&backend, CsiMessage::NodeGetCapabilities).await
        else {
            panic!("expected node capabilities");
        };
        assert!(caps.contains(&NodeCapability::GetVolumeStats));
    }
}
