//! Base environment scaffold.
//!
//! Builds the fixed directory/file layout every bundle must contain before
//! any image-derived content is considered valid. Idempotent: running it on
//! an already-populated bundle corrects permissions and rewrites the fixed
//! files to their required contents without disturbing anything else.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;

use sandcask_core::error::{BundleError, Result};

use super::templates;

/// Fixed directory skeleton, created if absent.
const SCAFFOLD_DIRS: &[&str] = &[
    ".apptainer.d/libs",
    ".apptainer.d/actions",
    ".apptainer.d/env",
    "dev",
    "proc",
    "root",
    "var/tmp",
    "tmp",
    "etc",
    "sys",
    "home",
];

/// Fixed symlink skeleton as `(link, target)` pairs, created only when the
/// link path does not already exist. Existing entries are left untouched so
/// the scaffold can be layered onto a pre-populated image rootfs.
const SCAFFOLD_SYMLINKS: &[(&str, &str)] = &[
    ("apptainer", ".apptainer.d/runscript"),
    (".run", ".apptainer.d/actions/run"),
    (".exec", ".apptainer.d/actions/exec"),
    (".test", ".apptainer.d/actions/test"),
    (".shell", ".apptainer.d/actions/shell"),
    ("environment", ".apptainer.d/env/90-environment.sh"),
];

/// Fixed scaffold files as `(path, mode, contents)`. Written
/// unconditionally: the contents are a required invariant, not an
/// image-provided default.
const SCAFFOLD_FILES: &[(&str, u32, &str)] = &[
    ("etc/hosts", 0o644, ""),
    ("etc/resolv.conf", 0o644, ""),
    (".apptainer.d/actions/exec", 0o755, templates::EXEC_ACTION),
    (".apptainer.d/actions/run", 0o755, templates::RUN_ACTION),
    (".apptainer.d/actions/shell", 0o755, templates::SHELL_ACTION),
    (".apptainer.d/actions/start", 0o755, templates::START_ACTION),
    (".apptainer.d/actions/test", 0o755, templates::TEST_ACTION),
    (".apptainer.d/env/01-base.sh", 0o755, templates::ENV_01_BASE),
    (
        ".apptainer.d/env/90-environment.sh",
        0o755,
        templates::ENV_90_ENVIRONMENT,
    ),
    (
        ".apptainer.d/env/91-environment.sh",
        0o755,
        templates::ENV_90_ENVIRONMENT,
    ),
    (".apptainer.d/env/95-apps.sh", 0o755, templates::ENV_95_APPS),
    (".apptainer.d/env/99-base.sh", 0o755, templates::ENV_99_BASE),
    (
        ".apptainer.d/env/99-runtimevars.sh",
        0o755,
        templates::ENV_99_RUNTIMEVARS,
    ),
    (".apptainer.d/runscript", 0o755, templates::DEFAULT_RUNSCRIPT),
    (
        ".apptainer.d/startscript",
        0o755,
        templates::DEFAULT_STARTSCRIPT,
    ),
];

/// Build the base environment scaffold under `rootfs`.
///
/// Independent of any specific image, and safe to call on an
/// already-populated bundle. Every step fails loudly; a bundle without its
/// complete scaffold is not usable.
pub fn make_base_env(rootfs: &Path) -> Result<()> {
    ensure_owner_writable(rootfs)?;
    make_dirs(rootfs)?;
    make_symlinks(rootfs)?;
    make_files(rootfs)?;
    Ok(())
}

/// Add owner-write permission to `rootfs` if it is missing. Other
/// permission bits are never touched.
#[cfg(unix)]
fn ensure_owner_writable(rootfs: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::metadata(rootfs)
        .map_err(|e| BundleError::Scaffold(format!("failed to stat rootfs path: {}", e)))?;
    let mode = metadata.permissions().mode();
    if mode & 0o200 == 0 {
        tracing::info!(path = %rootfs.display(), "Adding owner write permission to build path");
        fs::set_permissions(rootfs, fs::Permissions::from_mode(mode | 0o200)).map_err(|e| {
            BundleError::PermissionRepair {
                path: rootfs.to_path_buf(),
                message: e.to_string(),
            }
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn ensure_owner_writable(_rootfs: &Path) -> Result<()> {
    Ok(())
}

fn make_dirs(rootfs: &Path) -> Result<()> {
    for dir in SCAFFOLD_DIRS {
        let path = rootfs.join(dir);
        fs::create_dir_all(&path).map_err(|e| {
            BundleError::Scaffold(format!("failed to create {}: {}", path.display(), e))
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_symlinks(rootfs: &Path) -> Result<()> {
    for (link, target) in SCAFFOLD_SYMLINKS {
        let path = rootfs.join(link);
        if fs::symlink_metadata(&path).is_err() {
            std::os::unix::fs::symlink(target, &path).map_err(|e| {
                BundleError::Scaffold(format!("failed to symlink {}: {}", path.display(), e))
            })?;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_symlinks(_rootfs: &Path) -> Result<()> {
    Ok(())
}

fn make_files(rootfs: &Path) -> Result<()> {
    for (file, mode, contents) in SCAFFOLD_FILES {
        make_file(&rootfs.join(file), *mode, contents)?;
    }
    Ok(())
}

/// Write one scaffold file with the required mode.
///
/// Some inherited images ship critical files read-only, so an existing
/// file's permission bits are corrected before the truncating rewrite.
fn make_file(path: &Path, mode: u32, contents: &str) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if path.is_file() {
            fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
                BundleError::Scaffold(format!(
                    "failed to fix permissions on {}: {}",
                    path.display(),
                    e
                ))
            })?;
        }
    }

    let mut file = open_with_mode(path, mode)
        .map_err(|e| BundleError::Scaffold(format!("failed to create {}: {}", path.display(), e)))?;
    file.write_all(contents.as_bytes())
        .map_err(|e| BundleError::Scaffold(format!("failed to write {}: {}", path.display(), e)))?;
    drop(file);

    // The create-time mode is subject to the caller's umask; pin the exact
    // required bits.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
            BundleError::Scaffold(format!(
                "failed to set permissions on {}: {}",
                path.display(),
                e
            ))
        })?;
    }

    Ok(())
}

#[cfg(unix)]
fn open_with_mode(path: &Path, mode: u32) -> std::io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path, _mode: u32) -> std::io::Result<fs::File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}
