//! noiselink - Noise-based secure channels for peer-to-peer transports.
//!
//! This crate provides:
//! - `handshake`: a pure Noise Protocol Framework implementation of the
//!   XX, IK, and XXfallback patterns over X25519, ChaCha20-Poly1305, and
//!   SHA-256
//! - `channel`: a secure-channel layer that authenticates peers by their
//!   long-term Ed25519 identity keys and returns an encrypted, framed
//!   duplex stream
//!
//! # Example
//!
//! ```rust,ignore
//! use noiselink::{Identity, Noise, NoiseConfig};
//!
//! let identity = Identity::generate();
//! let noise = Noise::new(NoiseConfig::default())?;
//!
//! // `io` is any AsyncRead + AsyncWrite transport.
//! let secured = noise.secure_outbound(&identity, io, remote_peer).await?;
//! secured.conn.send(b"hello").await?;
//! ```

pub mod cache;
pub mod channel;
pub mod cipher;
mod driver;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod identity;
pub mod keypair;
pub mod metrics;
pub mod payload;
pub mod state;
pub mod stream;

/// Wire protocol identifier; also the handshake prologue.
pub const PROTOCOL_ID: &str = "/noise";

// Re-export commonly used types at the crate root for convenience
pub use cache::{MemoryKeyCache, StaticKeyCache};
pub use channel::{Noise, NoiseConfig, SecuredConnection};
pub use cipher::{Hash, HASH_SIZE, TAG_SIZE};
pub use error::Error;
pub use framing::{Duplex, MAX_FRAME_LEN};
pub use handshake::{Config, HandshakeState, Pattern};
pub use identity::{Identity, PeerId, SIGNATURE_SIZE};
pub use keypair::{Key, KeyError, KeyPair, KEY_SIZE};
pub use metrics::NoiseMetrics;
pub use payload::{NoiseExtensions, NoiseHandshakePayload};
pub use state::{CipherState, SymmetricState};
pub use stream::{SecureReader, SecureStream, SecureWriter, MAX_PLAINTEXT_LEN};
