//! Error types for probes, expiry lookups and sweeps.

use thiserror::Error;

use crate::store::StoreError;

/// Failures from the standalone expiry lookups (TLS certificate, WHOIS).
///
/// Transport variants mean the remote side could not be reached or refused
/// the exchange; `NotFound` and `Unparsed` mean it answered but the answer
/// could not be understood.
#[derive(Error, Debug)]
pub enum ExpiryError {
    #[error("invalid host: {host}")]
    InvalidHost { host: String },

    #[error("transport error talking to {peer}: {source}")]
    Transport {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {seconds:.1}s talking to {peer}")]
    Timeout { peer: String, seconds: f64 },

    #[error("tls error: {message}")]
    Tls { message: String },

    #[error("certificate could not be decoded: {message}")]
    Certificate { message: String },

    #[error("expiry not found")]
    NotFound,

    #[error("unparsed whois")]
    Unparsed,
}

impl ExpiryError {
    pub fn transport(peer: impl Into<String>, source: std::io::Error) -> Self {
        Self::Transport { peer: peer.into(), source }
    }

    pub fn timeout(peer: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            peer: peer.into(),
            seconds: after.as_secs_f64(),
        }
    }

    /// `true` when the peer answered but its data could not be interpreted.
    pub fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::Unparsed | Self::Certificate { .. }
        )
    }
}

/// Failures that abort a sweep as a whole.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("service lister failed: {0}")]
    Lister(#[from] StoreError),

    #[error("monitoring cancelled")]
    Cancelled,

    #[error("result receiver dropped")]
    OutputClosed,

    #[error("sweep interval must be greater than zero")]
    InvalidInterval,

    #[error("http client could not be built: {0}")]
    Client(#[from] reqwest::Error),
}
