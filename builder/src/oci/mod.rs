//! OCI image conveying and packing.
//!
//! Resolves an image reference across source transports, streams layers and
//! config into a scratch OCI layout, and translates the image configuration
//! into the bundle's generated scripts:
//!
//! - [`reference`]: transport parsing and source resolution
//! - [`archive`]: defensive tar(.gz) extraction for unprivileged callers
//! - [`copy`]: the layer-copy collaborator interface (skopeo-backed default)
//! - [`cache`]: the content-addressed cache bridge interface
//! - [`layout`]: OCI image-layout reading (index, manifest, config)
//! - [`translate`]: entrypoint/cmd/env/labels into shell artifacts
//! - [`conveyor`]: the get/pack/clean-up orchestration

mod archive;
mod cache;
mod conveyor;
mod copy;
pub(crate) mod layout;
mod reference;
mod translate;

pub use archive::extract_archive;
pub use cache::ImageCache;
pub use conveyor::OciConveyorPacker;
pub use copy::{LayerCopier, SkopeoCopier, SystemContext};
pub use layout::OciLayout;
pub use reference::{ImageReference, ResolvedSource, Transport};
pub use translate::{insert_env_script, insert_labels, insert_runscript};

pub(crate) use archive::checked_join;
