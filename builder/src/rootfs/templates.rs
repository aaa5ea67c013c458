//! Fixed-content bundle scaffold templates.
//!
//! Every bundle carries these files regardless of the source image. Their
//! contents are a versioned wire-format contract between the packer and the
//! runtime that later enters the bundle; any change here is an externally
//! observable compatibility break.

/// Contents of `/.apptainer.d/actions/exec`.
pub const EXEC_ACTION: &str = r#"#!/bin/sh

for script in /.apptainer.d/env/*.sh; do
    if [ -f "$script" ]; then
        . "$script"
    fi
done

exec "$@"
"#;

/// Contents of `/.apptainer.d/actions/run`.
pub const RUN_ACTION: &str = r#"#!/bin/sh

for script in /.apptainer.d/env/*.sh; do
    if [ -f "$script" ]; then
        . "$script"
    fi
done

if test -n "${APPTAINER_APPNAME:-}"; then

    if test -x "/scif/apps/${APPTAINER_APPNAME:-}/scif/runscript"; then
        exec "/scif/apps/${APPTAINER_APPNAME:-}/scif/runscript" "$@"
    else
        echo "No runscript for contained app: ${APPTAINER_APPNAME:-}"
        exit 1
    fi

elif test -x "/.apptainer.d/runscript"; then
    exec "/.apptainer.d/runscript" "$@"
else
    echo "No runscript found, executing /bin/sh"
    exec /bin/sh "$@"
fi
"#;

/// Contents of `/.apptainer.d/actions/shell`.
pub const SHELL_ACTION: &str = r#"#!/bin/sh

for script in /.apptainer.d/env/*.sh; do
    if [ -f "$script" ]; then
        . "$script"
    fi
done

if test -n "$APPTAINER_SHELL" -a -x "$APPTAINER_SHELL"; then
    exec $APPTAINER_SHELL "$@"

    echo "ERROR: Failed running shell as defined by '\$APPTAINER_SHELL'" 1>&2
    exit 1

elif test -x /bin/bash; then
    SHELL=/bin/bash
    PS1="Sandcask $APPTAINER_NAME:\\w> "
    export SHELL PS1
    exec /bin/bash --norc "$@"
elif test -x /bin/sh; then
    SHELL=/bin/sh
    export SHELL
    exec /bin/sh "$@"
else
    echo "ERROR: /bin/sh does not exist in container" 1>&2
fi
exit 1
"#;

/// Contents of `/.apptainer.d/actions/start`.
pub const START_ACTION: &str = r#"#!/bin/sh

# if we are here start notify PID 1 to continue
# DON'T REMOVE
kill -CONT 1

for script in /.apptainer.d/env/*.sh; do
    if [ -f "$script" ]; then
        . "$script"
    fi
done

if test -x "/.apptainer.d/startscript"; then
    exec "/.apptainer.d/startscript"
fi
"#;

/// Contents of `/.apptainer.d/actions/test`.
pub const TEST_ACTION: &str = r#"#!/bin/sh

for script in /.apptainer.d/env/*.sh; do
    if [ -f "$script" ]; then
        . "$script"
    fi
done


if test -n "${APPTAINER_APPNAME:-}"; then

    if test -x "/scif/apps/${APPTAINER_APPNAME:-}/scif/test"; then
        exec "/scif/apps/${APPTAINER_APPNAME:-}/scif/test" "$@"
    else
        echo "No tests for contained app: ${APPTAINER_APPNAME:-}"
        exit 1
    fi
elif test -x "/.apptainer.d/test"; then
    exec "/.apptainer.d/test" "$@"
else
    echo "No test found in container, executing /bin/sh -c true"
    exec /bin/sh -c true
fi
"#;

/// Contents of `/.apptainer.d/env/01-base.sh`: fixed header, sourced first.
pub const ENV_01_BASE: &str = "#!/bin/sh\n\n";

/// Contents of `/.apptainer.d/env/90-environment.sh` and
/// `/.apptainer.d/env/91-environment.sh`: the user-customizable markers.
pub const ENV_90_ENVIRONMENT: &str = r#"#!/bin/sh
# Custom environment shell code should follow

"#;

/// Contents of `/.apptainer.d/env/95-apps.sh`: per-application PATH and
/// LD_LIBRARY_PATH wiring for the active app scope.
pub const ENV_95_APPS: &str = r#"#!/bin/sh

if test -n "${APPTAINER_APPNAME:-}"; then

    # The active app should be exported
    export APPTAINER_APPNAME

    if test -d "/scif/apps/${APPTAINER_APPNAME:-}/"; then
        SCIF_APPS="/scif/apps"
        SCIF_APPROOT="/scif/apps/${APPTAINER_APPNAME:-}"
        export SCIF_APPROOT SCIF_APPS
        PATH="/scif/apps/${APPTAINER_APPNAME:-}:$PATH"

        # Automatically add application bin to path
        if test -d "/scif/apps/${APPTAINER_APPNAME:-}/bin"; then
            PATH="/scif/apps/${APPTAINER_APPNAME:-}/bin:$PATH"
        fi

        # Automatically add application lib to LD_LIBRARY_PATH
        if test -d "/scif/apps/${APPTAINER_APPNAME:-}/lib"; then
            LD_LIBRARY_PATH="/scif/apps/${APPTAINER_APPNAME:-}/lib:$LD_LIBRARY_PATH"
            export LD_LIBRARY_PATH
        fi

        # Automatically source environment
        if [ -f "/scif/apps/${APPTAINER_APPNAME:-}/scif/env/01-base.sh" ]; then
            . "/scif/apps/${APPTAINER_APPNAME:-}/scif/env/01-base.sh"
        fi
        if [ -f "/scif/apps/${APPTAINER_APPNAME:-}/scif/env/90-environment.sh" ]; then
            . "/scif/apps/${APPTAINER_APPNAME:-}/scif/env/90-environment.sh"
        fi

        export PATH
    else
        echo "Could not locate the container application: ${APPTAINER_APPNAME}"
        exit 1
    fi
fi

"#;

/// Contents of `/.apptainer.d/env/99-base.sh`: LD_LIBRARY_PATH and prompt
/// defaults, the common denominator sourced in every image.
pub const ENV_99_BASE: &str = r#"#!/bin/sh

if [ -z "$LD_LIBRARY_PATH" ]; then
    LD_LIBRARY_PATH="/.apptainer.d/libs"
else
    LD_LIBRARY_PATH="$LD_LIBRARY_PATH:/.apptainer.d/libs"
fi

PS1="Sandcask> "
export LD_LIBRARY_PATH PS1
"#;

/// Contents of `/.apptainer.d/env/99-runtimevars.sh`: the out-of-band PATH
/// override protocol. Each variable is unset after being applied, and the
/// file is a no-op when none of them is set.
pub const ENV_99_RUNTIMEVARS: &str = r#"#!/bin/sh

if [ -n "${SING_USER_DEFINED_PREPEND_PATH:-}" ]; then
	PATH="${SING_USER_DEFINED_PREPEND_PATH}:${PATH}"
fi

if [ -n "${SING_USER_DEFINED_APPEND_PATH:-}" ]; then
	PATH="${PATH}:${SING_USER_DEFINED_APPEND_PATH}"
fi

if [ -n "${SING_USER_DEFINED_PATH:-}" ]; then
	PATH="${SING_USER_DEFINED_PATH}"
fi

unset SING_USER_DEFINED_PREPEND_PATH \
	  SING_USER_DEFINED_APPEND_PATH \
	  SING_USER_DEFINED_PATH

export PATH
"#;

/// Contents of `/.apptainer.d/runscript`: the default, overwritten by the
/// generated runscript for OCI sources.
pub const DEFAULT_RUNSCRIPT: &str = r#"#!/bin/sh

echo "There is no runscript defined for this container\n";
"#;

/// Contents of `/.apptainer.d/startscript`.
pub const DEFAULT_STARTSCRIPT: &str = "#!/bin/sh\n";

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::process::Command;
    use tempfile::TempDir;

    fn sh(script: &str) -> std::process::Output {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .output()
            .expect("sh should be available")
    }

    #[test]
    fn test_all_scripts_have_shebang() {
        for template in [
            EXEC_ACTION,
            RUN_ACTION,
            SHELL_ACTION,
            START_ACTION,
            TEST_ACTION,
            ENV_01_BASE,
            ENV_90_ENVIRONMENT,
            ENV_95_APPS,
            ENV_99_BASE,
            ENV_99_RUNTIMEVARS,
            DEFAULT_RUNSCRIPT,
            DEFAULT_STARTSCRIPT,
        ] {
            assert!(template.starts_with("#!/bin/sh\n"));
        }
    }

    #[test]
    fn test_runtimevars_prepend_path() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("99-runtimevars.sh");
        fs::write(&file, ENV_99_RUNTIMEVARS).unwrap();

        let out = sh(&format!(
            "PATH=/usr/bin; SING_USER_DEFINED_PREPEND_PATH=/z; . {}; \
             printf '%s\\n' \"$PATH\" \"${{SING_USER_DEFINED_PREPEND_PATH:-gone}}\"",
            file.display()
        ));
        let stdout = String::from_utf8(out.stdout).unwrap();
        let mut lines = stdout.lines();
        assert_eq!(lines.next(), Some("/z:/usr/bin"));
        // The protocol variable is consumed.
        assert_eq!(lines.next(), Some("gone"));
    }

    #[test]
    fn test_runtimevars_append_and_override() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("99-runtimevars.sh");
        fs::write(&file, ENV_99_RUNTIMEVARS).unwrap();

        let out = sh(&format!(
            "PATH=/usr/bin; SING_USER_DEFINED_APPEND_PATH=/y; . {}; printf %s \"$PATH\"",
            file.display()
        ));
        assert_eq!(out.stdout, b"/usr/bin:/y");

        let out = sh(&format!(
            "PATH=/usr/bin; SING_USER_DEFINED_PATH=/only; . {}; printf %s \"$PATH\"",
            file.display()
        ));
        assert_eq!(out.stdout, b"/only");
    }

    #[test]
    fn test_runtimevars_idempotent_without_vars() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("99-runtimevars.sh");
        fs::write(&file, ENV_99_RUNTIMEVARS).unwrap();

        let out = sh(&format!(
            "PATH=/usr/bin:/bin; . {f}; . {f}; printf %s \"$PATH\"",
            f = file.display()
        ));
        assert_eq!(out.stdout, b"/usr/bin:/bin");
    }
}
