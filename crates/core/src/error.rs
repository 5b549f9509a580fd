use std::sync::Arc;

use thiserror::Error;

/// The single error type produced by the wire protocol and session engine.
///
/// Every fatal kind maps to exactly one [`DisconnectReason`] via
/// [`Error::disconnect_reason`]; non-fatal kinds (`Protocol`, `Parse`) are
/// logged and dropped by the caller instead of propagated as a session
/// failure.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Framing(String),

    #[error("tls engine error: {0}")]
    Tls(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("version mismatch: peer reported major={major} minor={minor} status={status}")]
    VersionMismatch { major: u16, minor: u16, status: u16 },

    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("ping timeout: {0} consecutive pings missed")]
    PingTimeout(u32),

    #[error("failed to decode protobuf body for message {msg_id:#06x}: {source}")]
    Parse {
        msg_id: u16,
        #[source]
        source: prost::DecodeError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The terminal classification reported to whatever is hosting a [`Session`](crate::session::Session).
///
/// This is deliberately a flat enum distinct from [`Error`]: `Error` carries
/// rich internal context for logging, `DisconnectReason` is the stable,
/// small vocabulary a caller (status line, metrics, retry policy) switches
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Normal,
    UserRequested,
    TransportError,
    VersionMismatch,
    Timeout,
    PingTimeout,
    Error,
}

impl Error {
    /// Classify a fatal error into the reason a [`Session`](crate::session::Session) reports upward.
    pub fn disconnect_reason(&self) -> DisconnectReason {
        match self {
            Error::Transport(_) => DisconnectReason::TransportError,
            Error::Framing(_) => DisconnectReason::Error,
            Error::Tls(_) => DisconnectReason::Error,
            Error::Protocol(_) => DisconnectReason::Error,
            Error::VersionMismatch { .. } => DisconnectReason::VersionMismatch,
            Error::Timeout(_) => DisconnectReason::Timeout,
            Error::PingTimeout(_) => DisconnectReason::PingTimeout,
            Error::Parse { .. } => DisconnectReason::Error,
        }
    }
}

/// An error produced while loading or validating the on-disk [`Config`](crate::config::Config).
///
/// Kept separate from [`Error`]: these occur before a [`Session`](crate::session::Session)
/// ever exists and have nothing to do with the wire protocol.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("config validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("failed to load TLS material from {path}: {source}")]
    Tls {
        path: String,
        #[source]
        source: Arc<std::io::Error>,
    },
}
