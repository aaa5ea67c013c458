//! Sandcask builder - turns a container image reference into an executable
//! root-filesystem bundle.
//!
//! The pipeline resolves an image reference across heterogeneous source
//! transports, streams its layers into a scratch OCI layout, unpacks that
//! layout into the destination rootfs, lays down the fixed bundle scaffold,
//! and translates the image configuration (entrypoint, cmd, env, labels)
//! into generated shell artifacts:
//!
//! ```text
//! reference ─► resolve ─► (cache bridge) ─► copy layers ─► unpack rootfs
//!                                                              │
//!                          scaffold + generated scripts ◄──────┘
//! ```
//!
//! The [`bootstrap`] module carries the other half of the contract: the
//! fixed action-script protocol that runs as the very first code inside a
//! started container, modeled here as a testable environment state machine
//! plus the shell templates it ships as.

pub mod bootstrap;
pub mod oci;
pub mod rootfs;
pub mod shell;

pub use oci::{
    extract_archive, ImageCache, ImageReference, LayerCopier, OciConveyorPacker, OciLayout,
    ResolvedSource, SkopeoCopier, SystemContext, Transport,
};
pub use rootfs::{make_base_env, LayoutUnpacker, RootfsUnpacker};

/// Sandcask builder version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
