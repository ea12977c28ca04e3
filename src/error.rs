//! Error types for handshake and transport operations.

use thiserror::Error;

use crate::identity::PeerId;

/// Errors surfaced by the secure channel.
#[derive(Debug, Error)]
pub enum Error {
    /// Frame or message is truncated or has a bad length.
    #[error("malformed message: {0}")]
    MalformedMessage(&'static str),

    /// AEAD tag verification failed.
    #[error("decryption failed")]
    Decrypt,

    /// Identity signature did not verify against the declared identity key.
    #[error("invalid identity signature")]
    InvalidSignature,

    /// Authenticated peer differs from the expected one.
    #[error("peer mismatch: expected {expected}, got {actual}")]
    PeerMismatch { expected: PeerId, actual: PeerId },

    /// Unexpected state or token for the current pattern.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// The 2^64-1 nonce bound was reached.
    #[error("nonce exhausted")]
    NonceExhaustion,

    /// No cached static key for the peer; the selector picks XX instead.
    #[error("no cached static key for peer")]
    CacheMiss,

    /// The underlying duplex failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The handshake or stream was cancelled by the caller.
    #[error("aborted")]
    Aborted,
}

impl Error {
    /// True for failures that an IK attempt may recover from via XXfallback.
    pub(crate) fn is_fallback_trigger(&self) -> bool {
        matches!(self, Error::Decrypt | Error::MalformedMessage(_))
    }
}
