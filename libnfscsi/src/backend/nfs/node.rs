//! [`CsiNode`] for [`NfsBackend`]: mounting exports onto target paths.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::params::{BASEDIR_KEY, MOUNT_PERMISSION_KEY, SERVER_KEY, parse_mount_permission};
use super::{NFS_FS_TYPE, NfsBackend};
use crate::error::CsiError;
use crate::mount;
use crate::node::CsiNode;
use crate::types::*;

/// Where and how to mount, extracted from a publish request.
struct PublishPlan {
    source: String,
    target: PathBuf,
    options: Vec<String>,
    mode: u32,
}

impl PublishPlan {
    fn from_request(req: &NodePublishVolumeRequest) -> Result<Self, CsiError> {
        if req.volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID is required".into()));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path is required".into()));
        }
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| CsiError::InvalidArgument("volume capability is required".into()))?;
        if capability.is_block() {
            return Err(CsiError::InvalidArgument(
                "block volume is not supported".into(),
            ));
        }

        let mut options = capability.mount_flags().to_vec();
        if req.read_only {
            options.push("ro".to_owned());
        }

        let context = &req.volume_context;
        let mode = parse_mount_permission(
            context
                .get(MOUNT_PERMISSION_KEY)
                .map(String::as_str)
                .unwrap_or(""),
        )?;
        let server = context
            .get(SERVER_KEY)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CsiError::InvalidArgument("server is required".into()))?;
        let basedir = context
            .get(BASEDIR_KEY)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CsiError::InvalidArgument("base directory is required".into()))?;

        Ok(Self {
            source: format!("{server}:/{}", basedir.trim_matches('/')),
            target: PathBuf::from(&req.target_path),
            options,
            mode,
        })
    }
}

#[async_trait]
impl CsiNode for NfsBackend {
    async fn stage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeStageVolume"))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeUnstageVolume"))
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        let plan = PublishPlan::from_request(&req)?;
        debug!(
            source = %plan.source,
            options = ?plan.options,
            "publishing volume",
        );

        let mounted = self
            .with_mounter_blocking(move |mounter| {
                let is_mounted = match mounter.is_mount_point(&plan.target) {
                    Ok(mounted) => mounted,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        mount::ensure_directory(&plan.target, plan.mode).map_err(|e| {
                            CsiError::Internal(format!(
                                "create target {}: {e}",
                                plan.target.display()
                            ))
                        })?;
                        false
                    }
                    Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                        return Err(CsiError::InvalidArgument(e.to_string()));
                    }
                    Err(e) => {
                        return Err(CsiError::Internal(format!(
                            "check mount point {}: {e}",
                            plan.target.display()
                        )));
                    }
                };

                // Idempotent: an existing mount point means a prior publish
                // already succeeded.
                if is_mounted {
                    return Ok(false);
                }

                mounter.mount(&plan.source, &plan.target, NFS_FS_TYPE, &plan.options)?;

                if plan.mode > 0 {
                    mount::enforce_permission(&plan.target, plan.mode).map_err(|e| {
                        CsiError::Internal(format!(
                            "set mode {:o} on {}: {e}",
                            plan.mode,
                            plan.target.display()
                        ))
                    })?;
                }
                Ok(true)
            })
            .await?;

        if mounted {
            info!(read_only = req.read_only, "volume published");
        } else {
            debug!("target already mounted, assuming idempotent retry");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID is required".into()));
        }
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path is required".into()));
        }

        let target = PathBuf::from(target_path);
        self.with_mounter_blocking(move |mounter| {
            mount::cleanup_mount_point(mounter, &target).map_err(|e| {
                CsiError::Internal(format!("failed to unmount {}: {e}", target.display()))
            })
        })
        .await?;

        info!("volume unpublished");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_volume_stats(
        &self,
        volume_id: &VolumeId,
        volume_path: &str,
    ) -> Result<Vec<VolumeUsage>, CsiError> {
        if volume_id.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID is required".into()));
        }
        if volume_path.is_empty() {
            return Err(CsiError::InvalidArgument("volume path is required".into()));
        }

        match tokio::fs::symlink_metadata(volume_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CsiError::NotFound(format!(
                    "volume path not found: {volume_path}"
                )));
            }
            Err(e) => {
                return Err(CsiError::Internal(format!(
                    "failed to stat volume path {volume_path}: {e}"
                )));
            }
        }

        let path = volume_path.to_owned();
        let stat = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(path.as_str()))
            .await
            .map_err(CsiError::internal)?
            .map_err(|e| CsiError::Internal(format!("failed to get metrics: {e}")))?;

        let frsize = stat.fragment_size() as u64;
        let blocks = stat.blocks() as u64;
        let blocks_free = stat.blocks_free() as u64;
        let files = stat.files() as u64;
        let files_free = stat.files_free() as u64;

        Ok(vec![
            VolumeUsage {
                unit: UsageUnit::Bytes,
                available: stat.blocks_available() as u64 * frsize,
                total: blocks * frsize,
                used: blocks.saturating_sub(blocks_free) * frsize,
            },
            VolumeUsage {
                unit: UsageUnit::Inodes,
                available: files_free,
                total: files,
                used: files.saturating_sub(files_free),
            },
        ])
    }

    async fn expand_volume(
        &self,
        _volume_id: &VolumeId,
        _volume_path: &str,
    ) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("NodeExpandVolume"))
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![
            NodeCapability::GetVolumeStats,
            NodeCapability::SingleNodeMultiWriter,
        ])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.node_id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::Arc;

    use super::super::test_util::*;
    use super::*;
    use crate::mount::{FakeMounter, MountAction, MountError, MountRecord};

    const TEST_VOL_ID: &str = "testVolId";

    fn context(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    fn full_context() -> HashMap<String, String> {
        context(&[
            ("mountPermission", "0777"),
            ("server", "testServer"),
            ("basedir", "testBasePath"),
            ("subdir", "testSubPath"),
        ])
    }

    fn publish_request(target: &str) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: TEST_VOL_ID.into(),
            target_path: target.to_owned(),
            volume_capability: Some(VolumeCapability::mount()),
            read_only: false,
            volume_context: full_context(),
        }
    }

    #[tokio::test]
    async fn publish_rejects_missing_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let target = tmp.path().join("target").display().to_string();

        let mut no_id = publish_request(&target);
        no_id.volume_id = VolumeId::default();

        let no_target = publish_request("");

        let mut no_cap = publish_request(&target);
        no_cap.volume_capability = None;

        let mut bad_mode = publish_request(&target);
        bad_mode
            .volume_context
            .insert("mountPermission".into(), "07cc".into());

        let mut no_server = publish_request(&target);
        no_server.volume_context = context(&[("mountPermission", "0777")]);

        let mut no_basedir = publish_request(&target);
        no_basedir.volume_context =
            context(&[("mountPermission", "0777"), ("server", "testServer")]);

        for req in [no_id, no_target, no_cap, bad_mode, no_server, no_basedir] {
            let err = backend.publish_volume(req).await.unwrap_err();
            assert!(matches!(err, CsiError::InvalidArgument(_)), "{err}");
        }
        assert!(mounter.actions().is_empty());
    }

    #[tokio::test]
    async fn publish_rejects_block_capability_before_mounting() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let target = tmp.path().join("target");

        let mut req = publish_request(&target.display().to_string());
        req.volume_capability = Some(VolumeCapability::block());
        let err = backend.publish_volume(req).await.unwrap_err();

        assert!(matches!(err, CsiError::InvalidArgument(_)));
        assert!(mounter.actions().is_empty());
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn publish_creates_target_and_mounts() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let target = tmp.path().join("pods/uid/volumes/vol");

        let mut req = publish_request(&target.display().to_string());
        req.read_only = true;
        req.volume_capability = Some(VolumeCapability {
            access_type: AccessType::Mount {
                fs_type: String::new(),
                mount_flags: vec!["nfsvers=4.1".into()],
            },
            access_mode: AccessMode::SingleNodeMultiWriter,
        });
        backend.publish_volume(req).await.unwrap();

        assert!(target.is_dir());
        assert_eq!(
            mounter.mounted_at(&target),
            Some(MountRecord {
                source: "testServer:/testBasePath".into(),
                fs_type: "nfs".into(),
                options: vec!["nfsvers=4.1".into(), "ro".into()],
            })
        );
        let mode = std::fs::metadata(&target).unwrap().permissions().mode() & 0o7777;
        assert_eq!(mode, 0o777);
    }

    #[tokio::test]
    async fn publish_forces_absolute_basedir() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let target = tmp.path().join("target");

        let mut req = publish_request(&target.display().to_string());
        req.volume_context
            .insert("basedir".into(), "/exports/nfs/".into());
        backend.publish_volume(req).await.unwrap();

        let record = mounter.mounted_at(&target).unwrap();
        assert_eq!(record.source, "testServer:/exports/nfs");
    }

    #[tokio::test]
    async fn publish_refuses_symlinked_target() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let elsewhere = tmp.path().join("elsewhere");
        let target = tmp.path().join("target");
        std::fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, &target).unwrap();

        let err = backend
            .publish_volume(publish_request(&target.display().to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)), "{err}");
        assert!(mounter.actions().is_empty());
    }

    #[tokio::test]
    async fn publish_onto_mount_point_is_noop() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let target = tmp.path().join("target");
        let req = publish_request(&target.display().to_string());

        backend.publish_volume(req.clone()).await.unwrap();
        backend.publish_volume(req).await.unwrap();

        let mounts = mounter
            .actions()
            .into_iter()
            .filter(|a| matches!(a, MountAction::Mount { .. }))
            .count();
        assert_eq!(mounts, 1);
    }

    #[tokio::test]
    async fn publish_classifies_mount_failures() {
        let cases = [
            (
                MountError::PermissionDenied("access denied by server".into()),
                "permission",
            ),
            (MountError::InvalidArgument("bad option".into()), "invalid"),
            (MountError::Failed("timed out".into()), "internal"),
        ];
        for (mount_err, expected) in cases {
            let tmp = tempfile::tempdir().unwrap();
            let mounter = Arc::new(FakeMounter::new().with_mount_error(mount_err));
            let backend = fake_backend(tmp.path(), mounter.clone());
            let target = tmp.path().join("target").display().to_string();

            let err = backend
                .publish_volume(publish_request(&target))
                .await
                .unwrap_err();
            let ok = match expected {
                "permission" => matches!(err, CsiError::PermissionDenied(_)),
                "invalid" => matches!(err, CsiError::InvalidArgument(_)),
                _ => matches!(err, CsiError::Internal(_)),
            };
            assert!(ok, "{expected}: {err}");
            assert_eq!(mounter.mount_count(), 0);
        }
    }

    #[tokio::test]
    async fn unpublish_rejects_missing_fields() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = fake_backend(tmp.path(), Arc::new(FakeMounter::new()));

        let err = backend
            .unpublish_volume(&VolumeId::default(), "/mnt/x")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let err = backend
            .unpublish_volume(&TEST_VOL_ID.into(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unpublish_never_mounted_target_succeeds() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());

        let existing = tmp.path().join("testTargetPath");
        std::fs::create_dir_all(&existing).unwrap();
        backend
            .unpublish_volume(&TEST_VOL_ID.into(), &existing.display().to_string())
            .await
            .unwrap();

        let missing = tmp.path().join("never-created");
        backend
            .unpublish_volume(&TEST_VOL_ID.into(), &missing.display().to_string())
            .await
            .unwrap();

        assert!(mounter.actions().is_empty());
    }

    #[tokio::test]
    async fn publish_then_unpublish_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mounter = Arc::new(FakeMounter::new());
        let backend = fake_backend(tmp.path(), mounter.clone());
        let target = tmp.path().join("target");
        let target_str = target.display().to_string();

        backend
            .publish_volume(publish_request(&target_str))
            .await
            .unwrap();
        assert_eq!(mounter.mount_count(), 1);

        backend
            .unpublish_volume(&TEST_VOL_ID.into(), &target_str)
            .await
            .unwrap();
        assert_eq!(mounter.mount_count(), 0);
        assert!(!target.exists());

        // A second unpublish is a no-op.
        backend
            .unpublish_volume(&TEST_VOL_ID.into(), &target_str)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn volume_stats_for_existing_path() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = fake_backend(tmp.path(), Arc::new(FakeMounter::new()));
        let usage = backend
            .get_volume_stats(&TEST_VOL_ID.into(), &tmp.path().display().to_string())
            .await
            .unwrap();

        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].unit, UsageUnit::Bytes);
        assert!(usage[0].total >= usage[0].used);
        assert_eq!(usage[1].unit, UsageUnit::Inodes);
    }

    #[tokio::test]
    async fn volume_stats_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = fake_backend(tmp.path(), Arc::new(FakeMounter::new()));

        let err = backend
            .get_volume_stats(&VolumeId::default(), "/tmp")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let err = backend
            .get_volume_stats(&TEST_VOL_ID.into(), "")
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::InvalidArgument(_)));

        let missing = tmp.path().join("gone").display().to_string();
        let err = backend
            .get_volume_stats(&TEST_VOL_ID.into(), &missing)
            .await
            .unwrap_err();
        assert!(matches!(err, CsiError::NotFound(_)));
    }

    #[tokio::test]
    async fn node_info_and_capabilities() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = fake_backend(tmp.path(), Arc::new(FakeMounter::new()));
        assert_eq!(backend.get_info().await.unwrap().node_id, TEST_NODE);
        assert_eq!(
            backend.get_capabilities().await.unwrap(),
            vec![
                NodeCapability::GetVolumeStats,
                NodeCapability::SingleNodeMultiWriter
            ]
        );
    }

    #[tokio::test]
    async fn staging_and_expansion_are_unimplemented() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = fake_backend(tmp.path(), Arc::new(FakeMounter::new()));
        let id = VolumeId::from(TEST_VOL_ID);

        let err = backend.stage_volume(&id, "/staging").await.unwrap_err();
        assert!(matches!(err, CsiError::Unimplemented(_)));
        let err = backend.unstage_volume(&id, "/staging").await.unwrap_err();
        assert!(matches!(err, CsiError::Unimplemented(_)));
        let err = backend.expand_volume(&id, "/mnt").await.unwrap_err();
        assert!(matches!(err, CsiError::Unimplemented(_)));
    }
}
