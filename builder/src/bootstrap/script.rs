//! The shipped bootstrap shell script and the env-script sourcing order.
//!
//! [`ACTION_SCRIPT`] is the shell rendition of the bootstrap state machine
//! that the launcher injects as the container's first process. Like the
//! scaffold templates it is a versioned wire-format contract; the helper
//! commands it calls (`getallenv`, `getenvkey`, `unescape`, `fixpath`,
//! `sylog`, `umask_builtin`) are builtins provided by the launcher's shell
//! interpreter.

use std::path::{Path, PathBuf};

use sandcask_core::error::Result;

/// Container path of the environment-script directory.
pub const ENV_DIR: &str = "/.apptainer.d/env";

/// The user-customizable environment file, sourced with a PATH default
/// when no earlier script set one.
pub const CUSTOM_ENV_SCRIPT: &str = "90-environment.sh";

/// The translated image environment file; sourcing it triggers a PATH
/// recomputation to merge image fragments with runtime defaults.
pub const IMAGE_ENV_SCRIPT: &str = "10-docker2apptainer.sh";

/// Legacy name for the translated image environment file.
pub const LEGACY_IMAGE_ENV_SCRIPT: &str = "10-docker.sh";

/// The base runtime file; the injected-environment file is sourced right
/// after it.
pub const BASE_RUNTIME_SCRIPT: &str = "99-base.sh";

/// Container path of the injected-environment file carrying variables
/// forwarded from the host invocation.
pub const INJECTED_ENV_FILE: &str = "/.inject-apptainer-env.sh";

/// Container path of the legacy top-level environment file, the fallback
/// for bundles that predate the env-script directory.
pub const LEGACY_ENV_FILE: &str = "/environment";

/// Sourcing order for an environment-script directory: `NN-name.sh` files
/// in lexical filename order. The numeric prefix convention is the
/// ordering contract; nothing else about a filename matters here.
pub fn env_script_order(env_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut scripts = Vec::new();
    for entry in std::fs::read_dir(env_dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "sh") {
            scripts.push(path);
        }
    }
    scripts.sort_by_key(|p| p.file_name().map(|n| n.to_os_string()));
    Ok(scripts)
}

/// The in-container bootstrap script.
pub const ACTION_SCRIPT: &str = r#"#!/bin/sh

declare -r __exported_env__=$(getallenv)
declare -r __command__=${APPTAINER_COMMAND:-}

if test -n "${APPTAINER_APPNAME:-}"; then
    readonly APPTAINER_APPNAME
fi

export PWD

unsupported_builtin() {
    sylog warning "$1 is not supported by this shell interpreter"
}

# create alias for unsupported builtin that trigger a panic
alias umask="umask_builtin"
alias trap="unsupported_builtin trap"
alias fg="unsupported_builtin fg"
alias bg="unsupported_builtin bg"

clear_env() {
    local IFS=$'\n'

    # disable globbing as __exported_env__ may contain
    # wildcard evaluated by shell, values are opaque text
    set -o noglob

    for e in ${__exported_env__}; do
        key=$(getenvkey "${e}")
        case "${key}" in
        PWD|HOME|OPTIND|UID|GID|APPTAINER_APPNAME|APPTAINER_SHELL)
            ;;
        APPTAINER_NAME|APPTAINER_CONTAINER)
            readonly "${key}"
            ;;
        *)
            unset "${key}"
            ;;
        esac
    done

    set +o noglob
}

restore_env() {
    local IFS=$'\n'

    # disable globbing as __exported_env__ and the export
    # statement below may contain wildcard evaluated by shell
    set -o noglob

    # restore environment variables which haven't been
    # defined by the image scripts above, empty
    # variables are also unset
    for e in ${__exported_env__}; do
        key=$(getenvkey "${e}")
        if ! test -v "${key}"; then
            export "$(unescape ${e})"
        elif test -z "${!key}"; then
            unset "${key}"
        fi
    done

    set +o noglob
}

clear_env
shopt -s expand_aliases

if test -d "/.apptainer.d/env"; then
    for __script__ in /.apptainer.d/env/*.sh; do
        if test -f "${__script__}"; then
            sylog debug "Sourcing ${__script__}"

            case "${__script__}" in
            /.apptainer.d/env/90-environment.sh)
                # image environment files below may be absent depending on
                # image source and build, so fix the PATH if not defined here
                if ! test -v PATH; then
                    export PATH="$(fixpath)"
                fi
                source "${__script__}"
                ;;
            /.apptainer.d/env/10-docker2apptainer.sh| \
            /.apptainer.d/env/10-docker.sh)
                source "${__script__}"
                # append potential missing entries from the default PATH
                export PATH="$(fixpath)"
                ;;
            /.apptainer.d/env/99-base.sh)
                # the common denominator in every generated bundle, inject
                # forwarded variables right after
                source "${__script__}"
                source "/.inject-apptainer-env.sh"
                ;;
            *)
                source "${__script__}"
                ;;
            esac
        fi
    done
else
    # legacy bundles predating the environment-script directory
    if test -f "/environment"; then
        source "/environment"
        export PATH="$(fixpath)"
    fi
    source "/.inject-apptainer-env.sh"
fi

shopt -u expand_aliases
restore_env

# If there is no .apptainer.d then a custom PS1 wasn't set; an empty PS1
# gives a confusing silent prompt, so force one
if test -z "${PS1:-}"; then
	export PS1="Sandcask> "
fi

# bash is often the current shell and would override PS1 on startup, so
# re-assert it through PROMPT_COMMAND
if test -z "${PROMPT_COMMAND:-}"; then
    export PROMPT_COMMAND="PS1=\"${PS1}\"; unset PROMPT_COMMAND"
else
    export PROMPT_COMMAND="${PROMPT_COMMAND:-}; PROMPT_COMMAND=\"\${PROMPT_COMMAND%%; PROMPT_COMMAND=*}\"; PS1=\"${PS1}\""
fi

export APPTAINER_ENVIRONMENT="${APPTAINER_ENVIRONMENT:-/.apptainer.d/env/91-environment.sh}"

sylog debug "Running action command ${__command__}"

case "${__command__}" in
exec)
    exec "$@" ;;
shell)
    if test -n "${APPTAINER_SHELL:-}" -a -x "${APPTAINER_SHELL:-}"; then
        exec "${APPTAINER_SHELL:-}" "$@"
    elif test -x "/bin/bash"; then
        export SHELL=/bin/bash
        exec "/bin/bash" --norc "$@"
    elif test -x "/bin/sh"; then
        export SHELL=/bin/sh
        exec "/bin/sh" "$@"
    fi

    sylog error "/bin/sh does not exist in container"
    exit 1 ;;
run)
    if test -n "${APPTAINER_APPNAME:-}"; then
        if test -x "/scif/apps/${APPTAINER_APPNAME:-}/scif/runscript"; then
            exec "/scif/apps/${APPTAINER_APPNAME:-}/scif/runscript" "$@"
        fi
        sylog error "no runscript for contained app: ${APPTAINER_APPNAME:-}"
        exit 1
    elif test -x "/.apptainer.d/runscript"; then
        exec "/.apptainer.d/runscript" "$@"
    elif test -x "/apptainer"; then
        exec "/apptainer" "$@"
    elif test -x "/bin/sh"; then
        sylog info "No runscript found in container, executing /bin/sh"
        exec "/bin/sh" "$@"
    fi

    sylog error "No runscript and no /bin/sh executable found in container, aborting"
    exit 1 ;;
test)
    if test -n "${APPTAINER_APPNAME:-}"; then
        if test -x "/scif/apps/${APPTAINER_APPNAME:-}/scif/test"; then
            exec "/scif/apps/${APPTAINER_APPNAME:-}/scif/test" "$@"
        fi
        sylog error "No tests for contained app: ${APPTAINER_APPNAME:-}"
        exit 1
    elif test -x "/.apptainer.d/test"; then
        exec "/.apptainer.d/test" "$@"
    fi

    sylog info "No test script found in container, exiting"
    exit 0 ;;
start)
    if test -x "/.apptainer.d/startscript"; then
        exec "/.apptainer.d/startscript" "$@"
    fi

    sylog info "No instance start script found in container"
    exit 0 ;;
*)
    sylog error "Unknown action ${__command__}"
    exit 1 ;;
esac
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_env_script_order_is_lexical() {
        let tmp = TempDir::new().unwrap();
        // Created deliberately out of order.
        for name in [
            "99-runtimevars.sh",
            "01-base.sh",
            "95-apps.sh",
            "10-docker2apptainer.sh",
            "90-environment.sh",
            "99-base.sh",
        ] {
            fs::write(tmp.path().join(name), "#!/bin/sh\n").unwrap();
        }

        let order: Vec<String> = env_script_order(tmp.path())
            .unwrap()
            .into_iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();

        assert_eq!(
            order,
            vec![
                "01-base.sh",
                "10-docker2apptainer.sh",
                "90-environment.sh",
                "95-apps.sh",
                "99-base.sh",
                "99-runtimevars.sh",
            ]
        );
    }

    #[test]
    fn test_env_script_order_skips_non_scripts() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("50-env.sh"), "#!/bin/sh\n").unwrap();
        fs::write(tmp.path().join("README"), "not a script").unwrap();
        fs::create_dir(tmp.path().join("60-subdir.sh")).unwrap();

        let order = env_script_order(tmp.path()).unwrap();
        assert_eq!(order.len(), 1);
        assert!(order[0].ends_with("50-env.sh"));
    }

    #[test]
    fn test_action_script_covers_every_action() {
        for action in ["exec)", "shell)", "run)", "test)", "start)"] {
            assert!(ACTION_SCRIPT.contains(action), "{} branch missing", action);
        }
        // Unknown actions are fatal.
        assert!(ACTION_SCRIPT.contains("Unknown action"));
    }

    #[test]
    fn test_action_script_special_cases_the_known_env_files() {
        assert!(ACTION_SCRIPT.contains(&format!("{}/{}", ENV_DIR, CUSTOM_ENV_SCRIPT)));
        assert!(ACTION_SCRIPT.contains(&format!("{}/{}", ENV_DIR, IMAGE_ENV_SCRIPT)));
        assert!(ACTION_SCRIPT.contains(&format!("{}/{}", ENV_DIR, LEGACY_IMAGE_ENV_SCRIPT)));
        assert!(ACTION_SCRIPT.contains(&format!("{}/{}", ENV_DIR, BASE_RUNTIME_SCRIPT)));
        assert!(ACTION_SCRIPT.contains(INJECTED_ENV_FILE));
        assert!(ACTION_SCRIPT.contains(LEGACY_ENV_FILE));
    }

    #[test]
    fn test_action_script_disables_globbing_for_env_passes() {
        // Both passes treat variable values as opaque text.
        assert_eq!(ACTION_SCRIPT.matches("set -o noglob").count(), 2);
        assert_eq!(ACTION_SCRIPT.matches("set +o noglob").count(), 2);
    }

    #[test]
    fn test_action_script_protects_identity_markers() {
        assert!(ACTION_SCRIPT.contains("APPTAINER_NAME|APPTAINER_CONTAINER)"));
    }
}
