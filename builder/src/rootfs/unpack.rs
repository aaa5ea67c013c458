//! Rootfs layer unpacking.
//!
//! Flattens the scratch OCI layout into the destination rootfs by applying
//! each layer in manifest order. Overlay whiteout entries delete what lower
//! layers provided; entry paths are confined to the rootfs the same way the
//! defensive archive extractor confines its entries.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use tar::Archive;

use sandcask_core::error::{BundleError, Result};

use crate::oci::{checked_join, OciLayout};

/// Whiteout marker prefix: `.wh.<name>` deletes `<name>` from lower layers.
const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque whiteout marker: hides the entire directory content from lower
/// layers.
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// Turns a scratch OCI-layout image into a flat filesystem tree.
#[async_trait]
pub trait RootfsUnpacker: Send + Sync {
    async fn unpack(&self, layout_dir: &Path, rootfs: &Path) -> Result<()>;
}

/// Default unpacker reading layer blobs straight from the OCI layout.
#[derive(Debug, Default)]
pub struct LayoutUnpacker;

#[async_trait]
impl RootfsUnpacker for LayoutUnpacker {
    async fn unpack(&self, layout_dir: &Path, rootfs: &Path) -> Result<()> {
        let layout = OciLayout::open(layout_dir)?;

        tracing::debug!(
            layout = %layout_dir.display(),
            rootfs = %rootfs.display(),
            layers = layout.layer_paths().len(),
            "Unpacking image layers"
        );

        for layer in layout.layer_paths() {
            apply_layer(layer, rootfs)?;
        }

        Ok(())
    }
}

/// Apply a single layer blob (tar, gzipped or not) onto the rootfs.
fn apply_layer(layer: &Path, rootfs: &Path) -> Result<()> {
    let file = File::open(layer).map_err(|e| {
        BundleError::Copy(format!("failed to open layer {}: {}", layer.display(), e))
    })?;

    let mut reader = BufReader::new(file);
    let head = reader.fill_buf().map_err(|e| {
        BundleError::ArchiveCorrupt(format!("failed to read layer {}: {}", layer.display(), e))
    })?;
    let gzipped = head.len() >= 2 && head[..2] == [0x1f, 0x8b];

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);

    let entries = archive
        .entries()
        .map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?;
        let name = entry
            .path()
            .map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?
            .into_owned();

        // Confinement check runs before anything touches the filesystem.
        let target = checked_join(rootfs, &name)?;

        let file_name = name
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        if file_name == OPAQUE_WHITEOUT {
            if let Some(parent) = target.parent() {
                clear_dir(parent)?;
            }
            continue;
        }

        if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let victim = target.with_file_name(hidden);
            if let Ok(meta) = victim.symlink_metadata() {
                if meta.file_type().is_dir() {
                    fs::remove_dir_all(&victim)?;
                } else {
                    fs::remove_file(&victim)?;
                }
            }
            continue;
        }

        // unpack_in re-checks confinement and handles every entry type a
        // rootfs needs (symlinks, hardlinks, devices are skipped without
        // privileges).
        entry.unpack_in(rootfs).map_err(|e| {
            BundleError::Copy(format!(
                "failed to unpack {} from layer {}: {}",
                name.display(),
                layer.display(),
                e
            ))
        })?;
    }

    Ok(())
}

/// Remove a directory's contents without removing the directory itself.
fn clear_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for child in fs::read_dir(dir)? {
        let child = child?;
        if child.file_type()?.is_dir() {
            fs::remove_dir_all(child.path())?;
        } else {
            fs::remove_file(child.path())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn write_layer(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, content) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(content.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *content).unwrap();
        }
        builder.finish().unwrap();
    }

    #[test]
    fn test_apply_layer_extracts_files() {
        let tmp = TempDir::new().unwrap();
        let layer = tmp.path().join("layer.tar.gz");
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        write_layer(&layer, &[("etc/os-release", b"ID=test\n")]);
        apply_layer(&layer, &rootfs).unwrap();

        assert_eq!(
            fs::read(rootfs.join("etc/os-release")).unwrap(),
            b"ID=test\n"
        );
    }

    #[test]
    fn test_whiteout_removes_lower_layer_file() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        let lower = tmp.path().join("lower.tar.gz");
        write_layer(&lower, &[("app/config", b"lower"), ("app/keep", b"keep")]);
        apply_layer(&lower, &rootfs).unwrap();

        let upper = tmp.path().join("upper.tar.gz");
        write_layer(&upper, &[("app/.wh.config", b"")]);
        apply_layer(&upper, &rootfs).unwrap();

        assert!(!rootfs.join("app/config").exists());
        assert!(rootfs.join("app/keep").exists());
    }

    #[test]
    fn test_opaque_whiteout_clears_directory() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        let lower = tmp.path().join("lower.tar.gz");
        write_layer(
            &lower,
            &[("cache/a", b"a"), ("cache/sub/b", b"b"), ("other/c", b"c")],
        );
        apply_layer(&lower, &rootfs).unwrap();

        let upper = tmp.path().join("upper.tar.gz");
        write_layer(&upper, &[("cache/.wh..wh..opq", b"")]);
        apply_layer(&upper, &rootfs).unwrap();

        assert!(rootfs.join("cache").is_dir());
        assert!(!rootfs.join("cache/a").exists());
        assert!(!rootfs.join("cache/sub").exists());
        assert!(rootfs.join("other/c").exists());
    }

    #[test]
    fn test_layer_traversal_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir(&rootfs).unwrap();

        let layer = tmp.path().join("evil.tar.gz");
        {
            let file = File::create(&layer).unwrap();
            let encoder = GzEncoder::new(file, Compression::default());
            let mut builder = tar::Builder::new(encoder);
            let mut header = tar::Header::new_gnu();
            let name = b"../outside";
            header.as_gnu_mut().unwrap().name[..name.len()].copy_from_slice(name);
            header.set_size(4);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, &b"oops"[..]).unwrap();
            builder.finish().unwrap();
        }

        let err = apply_layer(&layer, &rootfs).unwrap_err();
        assert!(matches!(err, BundleError::IllegalExtractionPath { .. }));
        assert!(!tmp.path().join("outside").exists());
    }

    #[tokio::test]
    async fn test_layout_unpacker_applies_all_layers() {
        let tmp = TempDir::new().unwrap();
        let layout_dir = tmp.path().join("layout");
        let rootfs = tmp.path().join("rootfs");
        fs::create_dir_all(&layout_dir).unwrap();
        fs::create_dir(&rootfs).unwrap();

        crate::oci::layout::tests::create_test_layout(
            &layout_dir,
            &[("bin/app", b"#!/bin/sh\n" as &[u8])],
        );

        LayoutUnpacker
            .unpack(&layout_dir, &rootfs)
            .await
            .unwrap();

        assert!(rootfs.join("bin/app").is_file());
    }
}
