//! In-container bootstrap protocol.
//!
//! The first code that runs inside a started container, before any
//! application code, with nothing richer than a POSIX shell available. The
//! protocol is a small state machine:
//!
//! ```text
//! INIT -> SANITIZE -> SOURCE_ENV -> RESTORE -> DISPATCH
//!                                                 |
//!                              exec | shell | run | test | start
//! ```
//!
//! The inherited environment is snapshotted verbatim, cleared down to a
//! small allow-list so image scripts see an image-controlled base, sourced
//! scripts run in lexical order, and the snapshot is then restored wherever
//! the image did not deliberately override it. Finally the requested action
//! picks what to exec.
//!
//! [`env`] and [`action`] model those phases as pure, testable functions;
//! [`script`] carries the shell rendition that actually ships.

pub mod action;
pub mod env;
pub mod script;

pub use action::{dispatch, Action, BootContext, Dispatch};
pub use env::{restore, sanitize, EnvSnapshot, WorkingEnv, ENV_ALLOWLIST, ENV_READONLY};
pub use script::{env_script_order, ACTION_SCRIPT};
