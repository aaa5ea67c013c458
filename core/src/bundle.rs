//! Bundle: the unit of work and output of a build.
//!
//! A [`Bundle`] pairs a caller-owned root filesystem directory with a
//! bundle-owned scratch directory and a set of named JSON blobs the outer
//! system seals into the final artifact. The rootfs is only ever populated,
//! never created or destroyed here; the scratch directory lives and dies
//! with the bundle.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{BundleError, Result};

/// JSON object slot holding the serialized OCI image configuration.
pub const OCI_CONFIG_SLOT: &str = "oci-config";

/// Static credentials for a registry source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

/// Options controlling a bundle build.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOpts {
    /// Bypass the local image cache and fetch from the source directly.
    #[serde(default)]
    pub no_cache: bool,

    /// Skip TLS verification when talking to the source registry.
    #[serde(default)]
    pub no_https: bool,

    /// Credentials for the source registry, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker_auth: Option<AuthConfig>,

    /// Path to a registry auth file (docker `config.json` layout).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<PathBuf>,
}

/// A bundle under construction.
#[derive(Debug)]
pub struct Bundle {
    /// Destination root filesystem, owned by the caller.
    rootfs_path: PathBuf,

    /// Scratch scope, owned by this bundle, deleted by [`Bundle::remove`].
    tmp_dir: PathBuf,

    /// Named raw JSON blobs for the outer system to seal (keys unique).
    json_objects: HashMap<String, Vec<u8>>,

    /// Build options.
    opts: BuildOpts,
}

impl Bundle {
    /// Create a bundle for `rootfs_path`, with a fresh scratch directory
    /// under `tmp_parent`.
    ///
    /// The rootfs directory must already exist; it is the caller's to own.
    pub fn new(
        rootfs_path: impl Into<PathBuf>,
        tmp_parent: impl AsRef<Path>,
        opts: BuildOpts,
    ) -> Result<Self> {
        let rootfs_path = rootfs_path.into();
        if !rootfs_path.is_dir() {
            return Err(BundleError::Scaffold(format!(
                "rootfs path {} is not a directory",
                rootfs_path.display()
            )));
        }

        let tmp_dir = tempfile::Builder::new()
            .prefix("sandcask-bundle-")
            .tempdir_in(tmp_parent.as_ref())
            .map_err(|e| {
                BundleError::Scaffold(format!(
                    "failed to create bundle scratch directory in {}: {}",
                    tmp_parent.as_ref().display(),
                    e
                ))
            })?
            .into_path();

        tracing::debug!(
            rootfs = %rootfs_path.display(),
            tmp = %tmp_dir.display(),
            "Created bundle"
        );

        Ok(Self {
            rootfs_path,
            tmp_dir,
            json_objects: HashMap::new(),
            opts,
        })
    }

    /// The caller-owned destination root filesystem.
    pub fn rootfs_path(&self) -> &Path {
        &self.rootfs_path
    }

    /// The bundle-owned scratch directory.
    pub fn tmp_dir(&self) -> &Path {
        &self.tmp_dir
    }

    /// Build options for this bundle.
    pub fn opts(&self) -> &BuildOpts {
        &self.opts
    }

    /// Store a raw JSON blob under a named slot, replacing any previous
    /// value for that slot.
    pub fn insert_json_object(&mut self, slot: impl Into<String>, data: Vec<u8>) {
        self.json_objects.insert(slot.into(), data);
    }

    /// Fetch a stored JSON blob by slot name.
    pub fn json_object(&self, slot: &str) -> Option<&[u8]> {
        self.json_objects.get(slot).map(|v| v.as_slice())
    }

    /// All stored JSON blobs.
    pub fn json_objects(&self) -> &HashMap<String, Vec<u8>> {
        &self.json_objects
    }

    /// Remove the bundle's scratch resources.
    ///
    /// Idempotent: safe to call repeatedly, and safe even if the build
    /// failed before anything was written. The rootfs is never touched.
    pub fn remove(&mut self) -> Result<()> {
        match fs::remove_dir_all(&self.tmp_dir) {
            Ok(()) => {
                tracing::debug!(tmp = %self.tmp_dir.display(), "Removed bundle scratch");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BundleError::Io(e)),
        }
    }
}
