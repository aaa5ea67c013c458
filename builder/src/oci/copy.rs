//! Layer copying via the external image-copy collaborator.
//!
//! The conveyor does not speak registry protocols itself; it hands a
//! resolved source spec and a scratch OCI-layout destination to a
//! [`LayerCopier`]. The default implementation drives `skopeo copy`, which
//! already understands every transport the resolver emits.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;

use sandcask_core::bundle::BuildOpts;
use sandcask_core::error::{BundleError, Result};

/// Transfer settings threaded through resolution and copy.
#[derive(Debug, Clone)]
pub struct SystemContext {
    /// Skip TLS verification when talking to the source.
    pub insecure_skip_tls_verify: bool,

    /// Static credentials for the source registry.
    pub auth: Option<(String, String)>,

    /// Registry auth file (docker `config.json` layout).
    pub auth_file: Option<PathBuf>,

    /// OS to select when the source is multi-platform.
    pub os_choice: String,

    /// Where the collaborator may spool large temporary files.
    pub big_files_tmp_dir: PathBuf,

    /// User agent reported to registries.
    pub user_agent: String,
}

impl SystemContext {
    /// Derive a context from build options, spooling big files into the
    /// bundle's scratch directory.
    pub fn from_opts(opts: &BuildOpts, tmp_dir: &Path) -> Self {
        Self {
            insecure_skip_tls_verify: opts.no_https,
            auth: opts
                .docker_auth
                .as_ref()
                .map(|a| (a.username.clone(), a.password.clone())),
            auth_file: opts.auth_file.clone(),
            os_choice: "linux".to_string(),
            big_files_tmp_dir: tmp_dir.to_path_buf(),
            user_agent: format!("sandcask/{}", crate::VERSION),
        }
    }
}

/// Streams all layers and config from a resolved source into a scratch
/// OCI-layout destination.
///
/// On any transfer error the destination is indeterminate and the whole
/// bundle must be discarded; there is no partial-result contract.
#[async_trait]
pub trait LayerCopier: Send + Sync {
    async fn copy(&self, src: &str, dst: &str, ctx: &SystemContext) -> Result<()>;
}

/// [`LayerCopier`] backed by the `skopeo` binary.
#[derive(Debug, Clone)]
pub struct SkopeoCopier {
    skopeo_path: PathBuf,
}

impl Default for SkopeoCopier {
    fn default() -> Self {
        Self {
            skopeo_path: PathBuf::from("skopeo"),
        }
    }
}

impl SkopeoCopier {
    /// Use a specific `skopeo` binary instead of whatever `$PATH` finds.
    pub fn new(skopeo_path: impl Into<PathBuf>) -> Self {
        Self {
            skopeo_path: skopeo_path.into(),
        }
    }

    fn build_args(src: &str, dst: &str, ctx: &SystemContext) -> Vec<String> {
        // Accept-any-source signature policy; verification is out of scope
        // here. Progress/report output is suppressed, builds are
        // non-interactive.
        let mut args = vec![
            "--insecure-policy".to_string(),
            "copy".to_string(),
            "--quiet".to_string(),
            "--override-os".to_string(),
            ctx.os_choice.clone(),
        ];
        if ctx.insecure_skip_tls_verify {
            args.push("--src-tls-verify=false".to_string());
        }
        if let Some((user, password)) = &ctx.auth {
            args.push("--src-creds".to_string());
            args.push(format!("{}:{}", user, password));
        }
        if let Some(auth_file) = &ctx.auth_file {
            args.push("--authfile".to_string());
            args.push(auth_file.display().to_string());
        }
        args.push(src.to_string());
        args.push(dst.to_string());
        args
    }
}

#[async_trait]
impl LayerCopier for SkopeoCopier {
    async fn copy(&self, src: &str, dst: &str, ctx: &SystemContext) -> Result<()> {
        let args = Self::build_args(src, dst, ctx);
        tracing::debug!(src, dst, "Copying image via skopeo");

        let output = tokio::process::Command::new(&self.skopeo_path)
            .args(&args)
            .env("TMPDIR", &ctx.big_files_tmp_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                BundleError::Copy(format!(
                    "failed to run {}: {}",
                    self.skopeo_path.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BundleError::Copy(format!(
                "copying {} failed: {}",
                src,
                stderr.trim()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sandcask_core::bundle::AuthConfig;

    fn plain_ctx() -> SystemContext {
        SystemContext::from_opts(&BuildOpts::default(), Path::new("/tmp/scratch"))
    }

    #[test]
    fn test_context_defaults() {
        let ctx = plain_ctx();
        assert!(!ctx.insecure_skip_tls_verify);
        assert!(ctx.auth.is_none());
        assert_eq!(ctx.os_choice, "linux");
        assert_eq!(ctx.big_files_tmp_dir, PathBuf::from("/tmp/scratch"));
        assert!(ctx.user_agent.starts_with("sandcask/"));
    }

    #[test]
    fn test_build_args_plain() {
        let args = SkopeoCopier::build_args("docker://alpine", "oci:/tmp/x:tmp", &plain_ctx());
        assert_eq!(
            args,
            vec![
                "--insecure-policy",
                "copy",
                "--quiet",
                "--override-os",
                "linux",
                "docker://alpine",
                "oci:/tmp/x:tmp",
            ]
        );
    }

    #[test]
    fn test_build_args_with_tls_skip_and_auth() {
        let opts = BuildOpts {
            no_https: true,
            docker_auth: Some(AuthConfig {
                username: "builder".to_string(),
                password: "s3cret".to_string(),
            }),
            ..Default::default()
        };
        let ctx = SystemContext::from_opts(&opts, Path::new("/tmp/scratch"));

        let args = SkopeoCopier::build_args("docker://private/img", "oci:/tmp/x:tmp", &ctx);
        assert!(args.contains(&"--src-tls-verify=false".to_string()));
        let creds_at = args.iter().position(|a| a == "--src-creds").unwrap();
        assert_eq!(args[creds_at + 1], "builder:s3cret");
    }

    #[test]
    fn test_build_args_with_auth_file() {
        let opts = BuildOpts {
            auth_file: Some(PathBuf::from("/home/u/.docker/config.json")),
            ..Default::default()
        };
        let ctx = SystemContext::from_opts(&opts, Path::new("/tmp/scratch"));

        let args = SkopeoCopier::build_args("docker://img", "oci:/tmp/x:tmp", &ctx);
        let at = args.iter().position(|a| a == "--authfile").unwrap();
        assert_eq!(args[at + 1], "/home/u/.docker/config.json");
    }

    #[tokio::test]
    async fn test_copy_missing_binary_is_copy_error() {
        let copier = SkopeoCopier::new("/nonexistent/skopeo-binary");
        let err = copier
            .copy("docker://img", "oci:/tmp/x:tmp", &plain_ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, BundleError::Copy(_)));
    }
}
