//! Bundle root filesystem materialization.
//!
//! The fixed scaffold every bundle carries ([`scaffold`], [`templates`])
//! plus the layer unpack step that flattens the scratch OCI layout into the
//! destination tree ([`unpack`]).

mod scaffold;
pub mod templates;
mod unpack;

pub use scaffold::make_base_env;
pub use unpack::{LayoutUnpacker, RootfsUnpacker};
