//! Error types for the probe module.

use thiserror::Error;

/// Errors detected before a hop is attempted.
///
/// The engine turns these into a `url_invalid` report; they never escape
/// [`super::ProbeEngine::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    /// The URL does not parse or has no host.
    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL parses but is not http or https.
    #[error("unsupported URL scheme '{scheme}' in '{url}'")]
    UnsupportedScheme { url: String, scheme: String },
}

// Constructor helpers instead of From impls: both variants need the offending URL.
impl ProbeError {
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn unsupported_scheme(url: impl Into<String>, scheme: impl Into<String>) -> Self {
        Self::UnsupportedScheme {
            url: url.into(),
            scheme: scheme.into(),
        }
    }
}
