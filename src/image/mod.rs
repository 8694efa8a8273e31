use oci_distribution::Reference;
use thiserror::Error;

/// Transport marker some callers prepend to image strings.
const TRANSPORT_PREFIX: &str = "docker://";

const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("invalid image reference '{reference}': {reason}")]
    Invalid { reference: String, reason: String },
}

/// A parsed container image reference with docker-style normalization applied.
///
/// A bare `nginx` acquires the default `docker.io` domain and the `library/`
/// path; an explicit domain (first segment containing `.`, `:` or being
/// `localhost`) is preserved verbatim. Whether the source string carried a
/// tag or digest is preserved: `canonical()` defaults to `:latest`, the
/// accessors do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    inner: Reference,
    tag: Option<String>,
    digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Result<Self, ReferenceError> {
        let raw = image.strip_prefix(TRANSPORT_PREFIX).unwrap_or(image);
        let inner = Reference::try_from(raw).map_err(|e| ReferenceError::Invalid {
            reference: image.to_string(),
            reason: e.to_string(),
        })?;
        let digest = inner.digest().map(str::to_owned);
        // The underlying parser fills in `latest` when the source has neither
        // tag nor digest; keep the source form instead.
        let tag = if digest.is_none() && !has_explicit_tag(raw) {
            None
        } else {
            inner.tag().map(str::to_owned)
        };
        Ok(Self { inner, tag, digest })
    }

    /// Registry domain, never empty.
    pub fn domain(&self) -> &str {
        self.inner.registry()
    }

    /// Repository path below the domain.
    pub fn repository(&self) -> &str {
        self.inner.repository()
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Fully qualified name without tag or digest.
    pub fn trimmed(&self) -> String {
        format!("{}/{}", self.inner.registry(), self.inner.repository())
    }

    /// Fully qualified reference, always carrying an explicit tag or digest.
    pub fn canonical(&self) -> String {
        let mut out = self.trimmed();
        match (&self.tag, &self.digest) {
            (Some(tag), _) => {
                out.push(':');
                out.push_str(tag);
            }
            (None, None) => {
                out.push(':');
                out.push_str(DEFAULT_TAG);
            }
            (None, Some(_)) => {}
        }
        if let Some(digest) = &self.digest {
            out.push('@');
            out.push_str(digest);
        }
        out
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

/// Whether the last path segment of `raw` carries a `:tag` (as opposed to a
/// `:port` in the domain).
fn has_explicit_tag(raw: &str) -> bool {
    let name = raw.split('@').next().unwrap_or(raw);
    let last = name.rsplit('/').next().unwrap_or(name);
    last.contains(':')
}
