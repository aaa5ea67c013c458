//! Defensive tar(.gz) extraction.
//!
//! A plain streaming unpacker for the unprivileged `oci-archive` path: no
//! chown, no id remapping, entries created with the archive's declared mode
//! bits under the invoking user's identity. Entry names are confined to the
//! destination directory; anything trying to escape it is fatal.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::{Archive, EntryType};

use sandcask_core::error::{BundleError, Result};

/// Gzip stream magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extract a tar or tar.gz archive into `dst`.
///
/// Compression is detected by sniffing the first bytes of the stream, never
/// the file extension. Directory entries are created idempotently, regular
/// files are created or truncated and copied verbatim, and every other
/// entry type is silently ignored. Clean end-of-archive is success; any
/// other decode failure is [`BundleError::ArchiveCorrupt`].
pub fn extract_archive(src: &Path, dst: &Path) -> Result<()> {
    let file = File::open(src).map_err(|e| {
        BundleError::ArchiveCorrupt(format!("failed to open {}: {}", src.display(), e))
    })?;

    let mut reader = BufReader::new(file);
    let head = reader.fill_buf().map_err(|e| {
        BundleError::ArchiveCorrupt(format!("failed to read {}: {}", src.display(), e))
    })?;
    let gzipped = head.len() >= 2 && head[..2] == GZIP_MAGIC;

    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut archive = Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?;
        let name = entry
            .path()
            .map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?
            .into_owned();

        let target = checked_join(dst, &name)?;

        match entry.header().entry_type() {
            EntryType::Directory => {
                if !target.is_dir() {
                    fs::create_dir_all(&target)?;
                }
            }
            EntryType::Regular => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mode = entry.header().mode().unwrap_or(0o644);
                let mut out = open_with_mode(&target, mode)?;
                io::copy(&mut entry, &mut out)
                    .map_err(|e| BundleError::ArchiveCorrupt(e.to_string()))?;
            }
            _ => {
                tracing::debug!(entry = %name.display(), "Skipping unsupported entry type");
            }
        }
    }

    Ok(())
}

#[cfg(unix)]
fn open_with_mode(path: &Path, mode: u32) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(mode & 0o7777)
        .open(path)?)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path, _mode: u32) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?)
}

/// Join an archive entry name onto `dst`, rejecting names that would
/// resolve outside it.
///
/// Leading root components are treated as relative (an absolute entry name
/// lands inside the destination, it does not replace it). Parent-directory
/// segments may only step back over path components the entry itself
/// introduced; stepping past the destination root is a fatal
/// [`BundleError::IllegalExtractionPath`].
pub(crate) fn checked_join(dst: &Path, name: &Path) -> Result<PathBuf> {
    let mut clean = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
            Component::ParentDir => {
                if !clean.pop() {
                    return Err(BundleError::IllegalExtractionPath {
                        path: dst.join(name),
                    });
                }
            }
            Component::Normal(part) => clean.push(part),
        }
    }
    Ok(dst.join(clean))
}
