//! OCI image-layout reading.
//!
//! After the copy stage the scratch directory holds a standard OCI image
//! layout (`oci-layout`, `index.json`, `blobs/`). This module walks
//! index → manifest → config to surface the image configuration and the
//! ordered layer blob paths.

use std::path::{Path, PathBuf};

use oci_spec::image::{Config, ImageConfiguration, ImageIndex, ImageManifest};

use sandcask_core::error::{BundleError, Result};

/// An OCI image layout loaded from disk.
#[derive(Debug)]
pub struct OciLayout {
    root_dir: PathBuf,

    manifest: ImageManifest,

    configuration: ImageConfiguration,

    /// Layer blob paths in manifest order, bottom to top.
    layer_paths: Vec<PathBuf>,
}

impl OciLayout {
    /// Load an OCI image layout from a directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();

        Self::validate_layout(&root_dir)?;

        let index = Self::load_index(&root_dir)?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| {
                BundleError::Resolution(format!(
                    "no manifests in {}/index.json",
                    root_dir.display()
                ))
            })?
            .digest()
            .to_string();

        let manifest = Self::load_manifest(&root_dir, &manifest_digest)?;

        let config_digest = manifest.config().digest().to_string();
        let configuration = Self::load_configuration(&root_dir, &config_digest)?;

        let layer_paths = manifest
            .layers()
            .iter()
            .map(|layer| Self::blob_path(&root_dir, layer.digest()))
            .collect();

        Ok(Self {
            root_dir,
            manifest,
            configuration,
            layer_paths,
        })
    }

    /// The layout's root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// The image manifest.
    pub fn manifest(&self) -> &ImageManifest {
        &self.manifest
    }

    /// The full image configuration blob.
    pub fn configuration(&self) -> &ImageConfiguration {
        &self.configuration
    }

    /// The execution-relevant config section (entrypoint, cmd, env,
    /// labels). Absent in scratch images; defaults to empty.
    pub fn image_config(&self) -> Result<Config> {
        match self.configuration.config() {
            Some(config) => Ok(config.clone()),
            None => serde_json::from_str("{}").map_err(Into::into),
        }
    }

    /// Layer blob paths in order, bottom to top.
    pub fn layer_paths(&self) -> &[PathBuf] {
        &self.layer_paths
    }

    fn validate_layout(root_dir: &Path) -> Result<()> {
        for marker in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(marker).exists() {
                return Err(BundleError::Resolution(format!(
                    "not a valid OCI layout: missing {} in {}",
                    marker,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    fn load_index(root_dir: &Path) -> Result<ImageIndex> {
        let index_path = root_dir.join("index.json");
        let content = std::fs::read_to_string(&index_path).map_err(|e| {
            BundleError::Resolution(format!("failed to read {}: {}", index_path.display(), e))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| BundleError::Resolution(format!("failed to parse index.json: {}", e)))
    }

    fn load_manifest(root_dir: &Path, digest: &str) -> Result<ImageManifest> {
        let blob_path = Self::blob_path(root_dir, digest);
        let content = std::fs::read_to_string(&blob_path).map_err(|e| {
            BundleError::Resolution(format!(
                "failed to read manifest at {}: {}",
                blob_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| BundleError::Resolution(format!("failed to parse manifest: {}", e)))
    }

    fn load_configuration(root_dir: &Path, digest: &str) -> Result<ImageConfiguration> {
        let blob_path = Self::blob_path(root_dir, digest);
        let content = std::fs::read_to_string(&blob_path).map_err(|e| {
            BundleError::Resolution(format!(
                "failed to read config at {}: {}",
                blob_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| BundleError::Resolution(format!("failed to parse config: {}", e)))
    }

    fn blob_path(root_dir: &Path, digest: &str) -> PathBuf {
        let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
        root_dir.join("blobs").join(algorithm).join(hash)
    }
}
