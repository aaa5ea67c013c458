//! The OCI conveyor/packer.
//!
//! Orchestrates a bundle build end to end: resolve the reference, optionally
//! route it through the cache bridge, stream layers into the bundle's
//! scratch OCI layout, unpack that layout into the rootfs, lay down the
//! scaffold, and translate the image configuration into generated scripts.

use std::sync::Arc;

use oci_spec::image::Config;

use sandcask_core::bundle::{Bundle, OCI_CONFIG_SLOT};
use sandcask_core::error::{BundleError, Result};

use super::cache::ImageCache;
use super::copy::{LayerCopier, SkopeoCopier, SystemContext};
use super::layout::OciLayout;
use super::reference::ImageReference;
use super::translate;
use crate::rootfs::{make_base_env, LayoutUnpacker, RootfsUnpacker};

/// Conveys an image from its source and packs it into a bundle.
///
/// One conveyor drives one bundle build: `get` fetches, `pack` materializes,
/// `clean_up` releases the scratch resources. `clean_up` is safe to call at
/// any point, including after a failed or never-started fetch.
pub struct OciConveyorPacker {
    copier: Box<dyn LayerCopier>,
    cache: Option<Arc<dyn ImageCache>>,
    unpacker: Box<dyn RootfsUnpacker>,
    image_config: Option<Config>,
}

impl Default for OciConveyorPacker {
    fn default() -> Self {
        Self {
            copier: Box::new(SkopeoCopier::default()),
            cache: None,
            unpacker: Box::new(LayoutUnpacker),
            image_config: None,
        }
    }
}

impl OciConveyorPacker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the layer-copy collaborator.
    pub fn with_copier(mut self, copier: Box<dyn LayerCopier>) -> Self {
        self.copier = copier;
        self
    }

    /// Install a cache bridge. Honored unless the bundle opts out via
    /// `no_cache`.
    pub fn with_cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Replace the rootfs unpack collaborator.
    pub fn with_unpacker(mut self, unpacker: Box<dyn RootfsUnpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    /// Fetch the image into the bundle's scratch OCI layout and read its
    /// configuration.
    ///
    /// After this returns, `json_objects["oci-config"]` holds the serialized
    /// image config.
    pub async fn get(&mut self, bundle: &mut Bundle, reference: &ImageReference) -> Result<()> {
        let privileged = unsafe { libc::geteuid() } == 0;
        self.get_with_privilege(bundle, reference, privileged).await
    }

    /// `get` with an explicit privilege decision, for callers (and tests)
    /// that already know.
    pub async fn get_with_privilege(
        &mut self,
        bundle: &mut Bundle,
        reference: &ImageReference,
        privileged: bool,
    ) -> Result<()> {
        let ctx = SystemContext::from_opts(bundle.opts(), bundle.tmp_dir());

        tracing::debug!(reference = %reference, "Resolving image source");
        let resolved = reference.resolve(bundle.tmp_dir(), privileged)?;

        let mut source = resolved.spec().to_string();
        if !bundle.opts().no_cache {
            if let Some(cache) = &self.cache {
                source = cache.convert_reference(&source, &ctx).await?;
                tracing::debug!(source = %source, "Using cached source");
            }
        }

        // The rootfs extraction needs a location containing only this
        // image: the bundle's scratch directory becomes that layout.
        let destination = format!("oci:{}:tmp", bundle.tmp_dir().display());
        self.copier.copy(&source, &destination, &ctx).await?;

        // The resolver's scratch directory was only needed for the copy.
        if let Some(scratch) = resolved.scratch() {
            if let Err(e) = std::fs::remove_dir_all(scratch) {
                tracing::warn!(
                    scratch = %scratch.display(),
                    error = %e,
                    "Failed to remove resolution scratch directory"
                );
            }
        }

        let layout = OciLayout::open(bundle.tmp_dir())?;
        let config = layout.image_config()?;
        bundle.insert_json_object(OCI_CONFIG_SLOT, serde_json::to_vec(&config)?);
        self.image_config = Some(config);

        Ok(())
    }

    /// Materialize the fetched image into the bundle rootfs.
    ///
    /// Layer unpack runs first, then the base scaffold, then the generated
    /// scripts: the generated artifacts must win over image-provided files
    /// at the same paths.
    pub async fn pack(&mut self, bundle: &mut Bundle) -> Result<()> {
        let config = self.image_config.clone().ok_or_else(|| {
            BundleError::ConfigTranslation(
                "image configuration not fetched; get() must succeed before pack()".to_string(),
            )
        })?;

        self.unpacker
            .unpack(bundle.tmp_dir(), bundle.rootfs_path())
            .await?;

        make_base_env(bundle.rootfs_path())?;

        translate::insert_runscript(bundle.rootfs_path(), &config)?;
        translate::insert_env_script(bundle.rootfs_path(), &config)?;
        translate::insert_labels(bundle.rootfs_path(), &config)?;

        tracing::info!(rootfs = %bundle.rootfs_path().display(), "Packed bundle");
        Ok(())
    }

    /// Release the bundle's scratch resources. Idempotent; failures are
    /// reported but not fatal, partial output stays the caller's to discard.
    pub fn clean_up(&mut self, bundle: &mut Bundle) {
        if let Err(e) = bundle.remove() {
            tracing::warn!(error = %e, "Failed to remove bundle scratch");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sandcask_core::bundle::BuildOpts;
    use std::fs;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    use crate::oci::layout::tests::create_test_layout;
    use crate::oci::Transport;

    /// Copier that "transfers" a local `oci:<dir>` source by copying the
    /// directory tree, standing in for the network collaborator.
    struct LocalCopier;

    #[async_trait]
    impl LayerCopier for LocalCopier {
        async fn copy(&self, src: &str, dst: &str, _ctx: &SystemContext) -> Result<()> {
            let src_dir = strip_oci_spec(src);
            let dst_dir = strip_oci_spec(dst);
            copy_tree(&src_dir, &dst_dir)?;
            Ok(())
        }
    }

    fn strip_oci_spec(spec: &str) -> PathBuf {
        let rest = spec.strip_prefix("oci:").expect("oci spec expected");
        // Trim a trailing ':tag' if present.
        match rest.rsplit_once(':') {
            Some((dir, tag)) if !tag.contains('/') => PathBuf::from(dir),
            _ => PathBuf::from(rest),
        }
    }

    fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            let target = dst.join(entry.file_name());
            if entry.file_type()?.is_dir() {
                copy_tree(&entry.path(), &target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    struct CountingCache {
        conversions: AtomicUsize,
    }

    #[async_trait]
    impl ImageCache for CountingCache {
        async fn convert_reference(&self, source: &str, _ctx: &SystemContext) -> Result<String> {
            self.conversions.fetch_add(1, Ordering::SeqCst);
            Ok(source.to_string())
        }
    }

    fn setup() -> (TempDir, Bundle, ImageReference) {
        let tmp = TempDir::new().unwrap();

        let source_layout = tmp.path().join("source");
        fs::create_dir_all(&source_layout).unwrap();
        create_test_layout(&source_layout, &[("bin/app", b"#!/bin/sh\necho app\n")]);

        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        let bundle = Bundle::new(&rootfs, tmp.path(), BuildOpts::default()).unwrap();
        let reference =
            ImageReference::new(Transport::Oci, source_layout.to_str().unwrap()).unwrap();

        (tmp, bundle, reference)
    }

    fn local_packer() -> OciConveyorPacker {
        OciConveyorPacker::new().with_copier(Box::new(LocalCopier))
    }

    #[tokio::test]
    async fn test_get_stores_oci_config_json() {
        let (_tmp, mut bundle, reference) = setup();
        let mut packer = local_packer();

        packer
            .get_with_privilege(&mut bundle, &reference, false)
            .await
            .unwrap();

        let raw = bundle.json_object(OCI_CONFIG_SLOT).expect("config slot");
        let parsed: serde_json::Value = serde_json::from_slice(raw).unwrap();
        assert_eq!(parsed["Entrypoint"][0], "/bin/app");
        assert_eq!(parsed["Cmd"][0], "--serve");
    }

    #[tokio::test]
    async fn test_pack_materializes_bundle() {
        let (_tmp, mut bundle, reference) = setup();
        let mut packer = local_packer();

        packer
            .get_with_privilege(&mut bundle, &reference, false)
            .await
            .unwrap();
        packer.pack(&mut bundle).await.unwrap();

        let rootfs = bundle.rootfs_path();
        // Image content made it through the layer unpack.
        assert!(rootfs.join("bin/app").is_file());
        // Scaffold is in place.
        assert!(rootfs.join(".apptainer.d/actions/run").is_file());
        assert!(rootfs.join("etc/hosts").is_file());
        // Generated artifacts reflect the image config.
        let runscript = fs::read_to_string(rootfs.join(".apptainer.d/runscript")).unwrap();
        assert!(runscript.contains("/bin/app"));
        let env = fs::read_to_string(rootfs.join(".apptainer.d/env/10-docker2apptainer.sh"))
            .unwrap();
        assert!(env.contains("export PATH=\"/usr/local/bin:/usr/bin:/bin\""));
        assert!(env.contains("export APP_MODE=\"${APP_MODE:-standalone}\""));
        let labels: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(rootfs.join(".apptainer.d/labels.json")).unwrap())
                .unwrap();
        assert_eq!(labels["maintainer"], "ops");
    }

    #[tokio::test]
    async fn test_pack_without_get_fails() {
        let (_tmp, mut bundle, _reference) = setup();
        let mut packer = local_packer();

        let err = packer.pack(&mut bundle).await.unwrap_err();
        assert!(matches!(err, BundleError::ConfigTranslation(_)));
    }

    #[tokio::test]
    async fn test_cache_bridge_is_consulted() {
        let (_tmp, mut bundle, reference) = setup();
        let cache = Arc::new(CountingCache {
            conversions: AtomicUsize::new(0),
        });
        let mut packer = local_packer().with_cache(cache.clone());

        packer
            .get_with_privilege(&mut bundle, &reference, false)
            .await
            .unwrap();

        assert_eq!(cache.conversions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_cache_bypasses_bridge() {
        let tmp = TempDir::new().unwrap();
        let source_layout = tmp.path().join("source");
        fs::create_dir_all(&source_layout).unwrap();
        create_test_layout(&source_layout, &[("f", b"x")]);
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        let opts = BuildOpts {
            no_cache: true,
            ..Default::default()
        };
        let mut bundle = Bundle::new(&rootfs, tmp.path(), opts).unwrap();
        let reference =
            ImageReference::new(Transport::Oci, source_layout.to_str().unwrap()).unwrap();

        let cache = Arc::new(CountingCache {
            conversions: AtomicUsize::new(0),
        });
        let mut packer = local_packer().with_cache(cache.clone());

        packer
            .get_with_privilege(&mut bundle, &reference, false)
            .await
            .unwrap();

        assert_eq!(cache.conversions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_clean_up_is_idempotent_and_safe_before_get() {
        let (_tmp, mut bundle, _reference) = setup();
        let mut packer = local_packer();

        // Never fetched anything: still safe.
        packer.clean_up(&mut bundle);
        assert!(!bundle.tmp_dir().exists());
        // And again.
        packer.clean_up(&mut bundle);
    }

    #[tokio::test]
    async fn test_clean_up_after_full_build_keeps_rootfs() {
        let (_tmp, mut bundle, reference) = setup();
        let mut packer = local_packer();

        packer
            .get_with_privilege(&mut bundle, &reference, false)
            .await
            .unwrap();
        packer.pack(&mut bundle).await.unwrap();
        packer.clean_up(&mut bundle);

        assert!(!bundle.tmp_dir().exists());
        assert!(bundle.rootfs_path().join(".apptainer.d/runscript").exists());
    }
}
