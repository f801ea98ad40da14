//! # libnfscsi: NFS volume lifecycle for CSI, over QUIC
//!
//! `libnfscsi` provisions persistent volumes as subdirectories of an NFS
//! export and mounts them into pods.  It speaks a simplified
//! [Container Storage Interface][csi] whose messages travel over QUIC (via
//! [`quinn`]) instead of gRPC.
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: `Volume`, `VolumeId`, capabilities, requests. |
//! | [`error`] | [`CsiError`] and its gRPC-style [`ErrorCode`]. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery and health. |
//! | [`controller`] | [`CsiController`] trait: volume create/delete. |
//! | [`node`] | [`CsiNode`] trait: publish, unpublish, stats. |
//! | [`idempotency`] | Per-volume in-flight registry. |
//! | [`mount`] | [`Mounter`] abstraction over the host mount table. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | The NFS backend. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod controller;
pub mod error;
pub mod identity;
pub mod idempotency;
pub mod message;
pub mod mount;
pub mod node;
pub mod transport;
pub mod types;

pub use backend::nfs::NfsBackend;
pub use controller::CsiController;
pub use error::{CsiError, ErrorCode};
pub use identity::CsiIdentity;
pub use message::CsiMessage;
pub use mount::{HostMounter, Mounter};
pub use node::CsiNode;
pub use types::*;
