//! Image reference parsing and source resolution.
//!
//! A reference is a `(transport, locator)` pair. Resolution maps it to a
//! transport-qualified source spec the layer copier understands, extracting
//! archives into a private scratch directory first where the direct path is
//! unavailable to unprivileged callers.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use sandcask_core::error::{BundleError, Result};

use super::archive::extract_archive;

/// Access method for an image source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Registry-backed source (`docker://registry/repo:tag`).
    Docker,
    /// Single-file `docker save` tarball.
    DockerArchive,
    /// Image held by a local docker daemon.
    DockerDaemon,
    /// Unpacked OCI image layout directory.
    Oci,
    /// Single-file archive of an OCI image layout.
    OciArchive,
}

impl Transport {
    /// All transports this resolver supports, in documentation order.
    pub const ALL: [Transport; 5] = [
        Transport::Docker,
        Transport::DockerArchive,
        Transport::DockerDaemon,
        Transport::Oci,
        Transport::OciArchive,
    ];

    /// The transport's wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Docker => "docker",
            Transport::DockerArchive => "docker-archive",
            Transport::DockerDaemon => "docker-daemon",
            Transport::Oci => "oci",
            Transport::OciArchive => "oci-archive",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Transport {
    type Err = BundleError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "docker" => Ok(Transport::Docker),
            "docker-archive" => Ok(Transport::DockerArchive),
            "docker-daemon" => Ok(Transport::DockerDaemon),
            "oci" => Ok(Transport::Oci),
            "oci-archive" => Ok(Transport::OciArchive),
            other => Err(BundleError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// A parsed image reference, immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    transport: Transport,
    locator: String,
}

impl ImageReference {
    /// Build a reference from a transport and a transport-specific locator.
    pub fn new(transport: Transport, locator: impl Into<String>) -> Result<Self> {
        let locator = locator.into();
        if locator.trim().is_empty() {
            return Err(BundleError::InvalidLocator(format!(
                "empty locator for transport {}",
                transport
            )));
        }
        Ok(Self { transport, locator })
    }

    /// Parse a `transport:locator` string.
    pub fn parse(reference: &str) -> Result<Self> {
        let (transport, locator) = reference.split_once(':').ok_or_else(|| {
            BundleError::InvalidLocator(format!(
                "reference '{}' is missing a transport prefix",
                reference
            ))
        })?;
        Self::new(transport.parse()?, locator)
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Resolve this reference into a source spec for the layer copier.
    ///
    /// For `oci-archive` sources, privileged callers resolve the archive
    /// directly; unprivileged callers get a plain extraction into a private
    /// scratch directory under `tmp_parent` first, because id-remapped
    /// extraction fails without root. The returned scratch directory is
    /// transient: the caller removes it once the copy is done, even on
    /// success.
    pub fn resolve(&self, tmp_parent: &Path, privileged: bool) -> Result<ResolvedSource> {
        match self.transport {
            Transport::Docker => Ok(ResolvedSource::direct(format!("docker://{}", self.locator))),
            Transport::DockerArchive => Ok(ResolvedSource::direct(format!(
                "docker-archive:{}",
                self.locator
            ))),
            Transport::DockerDaemon => Ok(ResolvedSource::direct(format!(
                "docker-daemon:{}",
                self.locator
            ))),
            Transport::Oci => Ok(ResolvedSource::direct(format!("oci:{}", self.locator))),
            Transport::OciArchive => {
                if privileged {
                    return Ok(ResolvedSource::direct(format!(
                        "oci-archive:{}",
                        self.locator
                    )));
                }

                // The locator may carry a ':tag' suffix to preserve across
                // the extraction round trip.
                let (file, tag) = match self.locator.split_once(':') {
                    Some((file, tag)) => (file, Some(tag)),
                    None => (self.locator.as_str(), None),
                };

                let scratch = tempfile::Builder::new()
                    .prefix("temp-oci-")
                    .tempdir_in(tmp_parent)
                    .map_err(|e| {
                        BundleError::Resolution(format!(
                            "could not create temporary oci directory: {}",
                            e
                        ))
                    })?
                    .into_path();

                tracing::debug!(
                    archive = file,
                    scratch = %scratch.display(),
                    "Extracting oci-archive for unprivileged resolution"
                );
                extract_archive(Path::new(file), &scratch)?;

                let spec = match tag {
                    Some(tag) => format!("oci:{}:{}", scratch.display(), tag),
                    None => format!("oci:{}", scratch.display()),
                };
                Ok(ResolvedSource::with_scratch(spec, scratch))
            }
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.transport, self.locator)
    }
}

/// An opaque resolved source, consumed exactly once by the layer copier.
#[derive(Debug)]
pub struct ResolvedSource {
    spec: String,
    scratch: Option<PathBuf>,
}

impl ResolvedSource {
    fn direct(spec: String) -> Self {
        Self {
            spec,
            scratch: None,
        }
    }

    fn with_scratch(spec: String, scratch: PathBuf) -> Self {
        Self {
            spec,
            scratch: Some(scratch),
        }
    }

    /// The transport-qualified source spec the copier consumes.
    pub fn spec(&self) -> &str {
        &self.spec
    }

    /// Scratch directory backing the resolution, if one was needed. The
    /// caller removes it after the copy completes.
    pub fn scratch(&self) -> Option<&Path> {
        self.scratch.as_deref()
    }
}
