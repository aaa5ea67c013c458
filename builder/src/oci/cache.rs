//! Content-addressed image cache bridge.
//!
//! Rewriting a resolved source into a locally cached equivalent is the
//! cache collaborator's algorithm; the conveyor only needs the seam. When a
//! cache is installed and the build does not opt out via `no_cache`, the
//! conveyor hands it the resolved source spec and copies from whatever spec
//! comes back.

use async_trait::async_trait;

use sandcask_core::error::Result;

use super::copy::SystemContext;

/// Rewrites a resolved source spec into a locally cached, content-addressed
/// equivalent so identical layers are not re-fetched across builds.
#[async_trait]
pub trait ImageCache: Send + Sync {
    /// Return the source spec the copy should actually read from. A cache
    /// miss typically fetches into the cache first and then returns the
    /// cached location.
    async fn convert_reference(&self, source: &str, ctx: &SystemContext) -> Result<String>;
}
