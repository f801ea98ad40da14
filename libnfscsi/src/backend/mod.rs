//! Storage backend implementations.
//!
//! A backend is a concrete type that implements [`CsiIdentity`],
//! [`CsiController`] and [`CsiNode`].
//!
//! [`CsiIdentity`]: crate::identity::CsiIdentity
//! [`CsiController`]: crate::controller::CsiController
//! [`CsiNode`]: crate::node::CsiNode

pub mod nfs;
