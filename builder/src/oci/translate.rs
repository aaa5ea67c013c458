//! Image configuration translation.
//!
//! Turns the fetched image config into the bundle's generated shell
//! artifacts: the runscript emulating entrypoint/cmd run semantics, the
//! environment-injection script, and the labels manifest. Generation is
//! deterministic; identical configs produce identical bytes.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use oci_spec::image::Config;

use sandcask_core::error::{BundleError, Result};

use crate::shell;

/// Fixed tail of the generated runscript: argument capture, the
/// entrypoint/cmd precedence branches, and the `set`/`exec` re-tokenization
/// step that expands the embedded command into discrete argv entries.
const RUNSCRIPT_BODY: &str = r#"CMDLINE_ARGS=""
# prepare command line arguments for evaluation
for arg in "$@"; do
    CMDLINE_ARGS="${CMDLINE_ARGS} \"$arg\""
done

# ENTRYPOINT only - run entrypoint plus args
if [ -z "$OCI_CMD" ] && [ -n "$OCI_ENTRYPOINT" ]; then
    if [ $# -gt 0 ]; then
        OCI_RUN="${OCI_ENTRYPOINT} ${CMDLINE_ARGS}"
    else
        OCI_RUN="${OCI_ENTRYPOINT}"
    fi
fi

# CMD only - run CMD or override with args
if [ -n "$OCI_CMD" ] && [ -z "$OCI_ENTRYPOINT" ]; then
    if [ $# -gt 0 ]; then
        OCI_RUN="${CMDLINE_ARGS}"
    else
        OCI_RUN="${OCI_CMD}"
    fi
fi

# ENTRYPOINT and CMD - run ENTRYPOINT with CMD as default args
# override with user provided args
if [ -n "$OCI_CMD" ] && [ -n "$OCI_ENTRYPOINT" ]; then
    if [ $# -gt 0 ]; then
        OCI_RUN="${OCI_ENTRYPOINT} ${CMDLINE_ARGS}"
    else
        OCI_RUN="${OCI_ENTRYPOINT} ${OCI_CMD}"
    fi
fi

# Evaluate shell expressions first and set arguments accordingly,
# then execute final command as first container process
eval "set ${OCI_RUN}"
exec "$@"
"#;

/// Render the runscript for an image config.
pub fn render_runscript(config: &Config) -> String {
    let entrypoint = config.entrypoint().clone().unwrap_or_default();
    let cmd = config.cmd().clone().unwrap_or_default();

    let mut script = String::from("#!/bin/sh\n");
    script.push_str(&format!(
        "OCI_ENTRYPOINT='{}'\n",
        shell::escape_single_quotes(&shell::args_quoted(&entrypoint))
    ));
    script.push_str(&format!(
        "OCI_CMD='{}'\n",
        shell::escape_single_quotes(&shell::args_quoted(&cmd))
    ));
    script.push_str(RUNSCRIPT_BODY);
    script
}

/// Render the environment-injection script for an image config.
///
/// `PATH` is exported as a literal so the image always wins; every other
/// `KEY=VALUE` exports with a run-time-override fallback, and a bare `KEY`
/// passes the host value through, defaulting to empty.
pub fn render_env_script(config: &Config) -> String {
    let mut script = String::from("#!/bin/sh\n");
    for element in config.env().iter().flatten() {
        let line = match element.split_once('=') {
            None => format!("export {}=\"${{{}:-}}\"\n", element, element),
            Some(("PATH", value)) => {
                format!("export PATH=\"{}\"\n", shell::escape_double_quotes(value))
            }
            Some((key, value)) => format!(
                "export {}=\"${{{}:-{}}}\"\n",
                key,
                key,
                shell::escape_double_quotes(value)
            ),
        };
        script.push_str(&line);
    }
    script
}

/// Render the labels manifest as indented JSON with stable key order.
pub fn render_labels(config: &Config) -> Result<String> {
    let labels: BTreeMap<&String, &String> =
        config.labels().iter().flatten().collect();
    Ok(serde_json::to_string_pretty(&labels)?)
}

/// Write the generated runscript into the bundle rootfs (0755).
pub fn insert_runscript(rootfs: &Path, config: &Config) -> Result<()> {
    write_executable(
        &rootfs.join(".apptainer.d/runscript"),
        &render_runscript(config),
    )
}

/// Write the image environment translation into the bundle rootfs (0755).
pub fn insert_env_script(rootfs: &Path, config: &Config) -> Result<()> {
    write_executable(
        &rootfs.join(".apptainer.d/env/10-docker2apptainer.sh"),
        &render_env_script(config),
    )
}

/// Write the labels manifest into the bundle rootfs (0644).
pub fn insert_labels(rootfs: &Path, config: &Config) -> Result<()> {
    let path = rootfs.join(".apptainer.d/labels.json");
    fs::write(&path, render_labels(config)?).map_err(|e| {
        BundleError::ConfigTranslation(format!("failed to write {}: {}", path.display(), e))
    })?;
    set_mode(&path, 0o644)
}

fn write_executable(path: &Path, content: &str) -> Result<()> {
    fs::write(path, content).map_err(|e| {
        BundleError::ConfigTranslation(format!("failed to write {}: {}", path.display(), e))
    })?;
    set_mode(path, 0o755)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| {
        BundleError::ConfigTranslation(format!(
            "failed to set permissions on {}: {}",
            path.display(),
            e
        ))
    })
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}
