//! Action dispatch.
//!
//! Once the environment passes are done, the requested action decides what
//! the container process becomes. Action and app scope arrive as explicit
//! parameters, not ambient globals, so every precedence chain here is
//! testable against a plain directory tree.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use sandcask_core::error::{BundleError, Result};

/// Environment variable carrying the requested action.
pub const ACTION_VAR: &str = "APPTAINER_COMMAND";

/// Environment variable carrying the active application scope.
pub const APPNAME_VAR: &str = "APPTAINER_APPNAME";

/// Environment variable carrying the interactive-shell override.
pub const SHELL_VAR: &str = "APPTAINER_SHELL";

/// Top-level behavior requested at container start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Exec,
    Shell,
    Run,
    Test,
    Start,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Exec => "exec",
            Action::Shell => "shell",
            Action::Run => "run",
            Action::Test => "test",
            Action::Start => "start",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Action {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exec" => Ok(Action::Exec),
            "shell" => Ok(Action::Shell),
            "run" => Ok(Action::Run),
            "test" => Ok(Action::Test),
            "start" => Ok(Action::Start),
            other => Err(BundleError::Bootstrap(format!("unknown action {}", other))),
        }
    }
}

/// Everything dispatch needs, threaded explicitly.
#[derive(Debug, Clone)]
pub struct BootContext<'a> {
    /// The mounted bundle rootfs dispatch probes for executables.
    pub rootfs: &'a Path,

    /// The requested action.
    pub action: Action,

    /// Active application scope, if any.
    pub app_name: Option<&'a str>,

    /// Interactive-shell override (container-absolute path), if set.
    pub shell_override: Option<&'a str>,

    /// User-supplied positional arguments.
    pub args: &'a [String],
}

/// What the bootstrap ends as. Every leaf either replaces the process
/// image or exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Replace the process image with `argv` (container-absolute paths).
    /// `notice` is printed to stderr first when a fallback was taken.
    Exec {
        argv: Vec<String>,
        notice: Option<String>,
    },
    /// Soft success: report and exit zero.
    SoftExit { message: String },
}

impl Dispatch {
    fn exec(argv: Vec<String>) -> Self {
        Dispatch::Exec { argv, notice: None }
    }

    fn exec_with_notice(argv: Vec<String>, notice: impl Into<String>) -> Self {
        Dispatch::Exec {
            argv,
            notice: Some(notice.into()),
        }
    }
}

/// DISPATCH: branch on the requested action.
pub fn dispatch(ctx: &BootContext) -> Result<Dispatch> {
    match ctx.action {
        Action::Exec => {
            if ctx.args.is_empty() {
                return Err(BundleError::Bootstrap("exec requires a command".to_string()));
            }
            Ok(Dispatch::exec(ctx.args.to_vec()))
        }
        Action::Shell => resolve_shell(ctx),
        Action::Run => resolve_run(ctx),
        Action::Test => resolve_test(ctx),
        Action::Start => resolve_start(ctx),
    }
}

/// Shell precedence: explicit override, then bash without startup files,
/// then plain sh. No shell at all is fatal.
fn resolve_shell(ctx: &BootContext) -> Result<Dispatch> {
    if let Some(shell) = ctx.shell_override {
        if is_executable(ctx.rootfs, shell) {
            return Ok(Dispatch::exec(argv(shell, &[], ctx.args)));
        }
    }
    if is_executable(ctx.rootfs, "/bin/bash") {
        return Ok(Dispatch::exec(argv("/bin/bash", &["--norc"], ctx.args)));
    }
    if is_executable(ctx.rootfs, "/bin/sh") {
        return Ok(Dispatch::exec(argv("/bin/sh", &[], ctx.args)));
    }
    Err(BundleError::Bootstrap(
        "/bin/sh does not exist in container".to_string(),
    ))
}

/// Run precedence: app runscript when an app scope is set (fatal if the
/// app has none), the bundle runscript, the self-referential run path,
/// then an sh fallback with a notice.
fn resolve_run(ctx: &BootContext) -> Result<Dispatch> {
    if let Some(app) = ctx.app_name {
        let runscript = format!("/scif/apps/{}/scif/runscript", app);
        if is_executable(ctx.rootfs, &runscript) {
            return Ok(Dispatch::exec(argv(&runscript, &[], ctx.args)));
        }
        return Err(BundleError::Bootstrap(format!(
            "no runscript for contained app: {}",
            app
        )));
    }
    if is_executable(ctx.rootfs, "/.apptainer.d/runscript") {
        return Ok(Dispatch::exec(argv("/.apptainer.d/runscript", &[], ctx.args)));
    }
    if is_executable(ctx.rootfs, "/apptainer") {
        return Ok(Dispatch::exec(argv("/apptainer", &[], ctx.args)));
    }
    if is_executable(ctx.rootfs, "/bin/sh") {
        return Ok(Dispatch::exec_with_notice(
            argv("/bin/sh", &[], ctx.args),
            "No runscript found in container, executing /bin/sh",
        ));
    }
    Err(BundleError::Bootstrap(
        "no runscript and no /bin/sh executable found in container".to_string(),
    ))
}

/// Test mirrors run's precedence, but a missing test target is a soft,
/// zero-exit no-op.
fn resolve_test(ctx: &BootContext) -> Result<Dispatch> {
    if let Some(app) = ctx.app_name {
        let test = format!("/scif/apps/{}/scif/test", app);
        if is_executable(ctx.rootfs, &test) {
            return Ok(Dispatch::exec(argv(&test, &[], ctx.args)));
        }
        return Err(BundleError::Bootstrap(format!(
            "no tests for contained app: {}",
            app
        )));
    }
    if is_executable(ctx.rootfs, "/.apptainer.d/test") {
        return Ok(Dispatch::exec(argv("/.apptainer.d/test", &[], ctx.args)));
    }
    Ok(Dispatch::SoftExit {
        message: "no test script found in container".to_string(),
    })
}

/// Start runs the startscript if present; its absence is a soft success.
/// The liveness handshake with the supervising init (`kill -CONT 1`) is
/// emitted by the shipped action script before this branch runs.
fn resolve_start(ctx: &BootContext) -> Result<Dispatch> {
    if is_executable(ctx.rootfs, "/.apptainer.d/startscript") {
        return Ok(Dispatch::exec(argv(
            "/.apptainer.d/startscript",
            &[],
            ctx.args,
        )));
    }
    Ok(Dispatch::SoftExit {
        message: "no instance start script found in container".to_string(),
    })
}

fn argv(program: &str, fixed: &[&str], args: &[String]) -> Vec<String> {
    let mut argv = Vec::with_capacity(1 + fixed.len() + args.len());
    argv.push(program.to_string());
    argv.extend(fixed.iter().map(|a| a.to_string()));
    argv.extend(args.iter().cloned());
    argv
}

/// Probe a container-absolute path for an executable regular file.
#[cfg(unix)]
fn is_executable(rootfs: &Path, container_path: &str) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let path = rootfs.join(container_path.trim_start_matches('/'));
    match std::fs::metadata(&path) {
        Ok(meta) => meta.is_file() && meta.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn is_executable(rootfs: &Path, container_path: &str) -> bool {
    rootfs.join(container_path.trim_start_matches('/')).is_file()
}
