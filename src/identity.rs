//! Long-term Ed25519 identity keys.
//!
//! The identity key signs the Noise static key, binding the two. It is
//! never used in the Diffie-Hellman exchange itself.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Ed25519 signature size in bytes.
pub const SIGNATURE_SIZE: usize = 64;

/// A peer's identity: its 32-byte Ed25519 public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerId([u8; 32]);

impl PeerId {
    /// Wraps raw public key bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parses a peer id from a slice; fails unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Raw public key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Serialization used in the handshake payload.
    pub fn marshal(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    /// Verifies an Ed25519 signature made by this identity.
    ///
    /// Returns false for malformed keys or signatures as well as for
    /// honest verification failures.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let key = match VerifyingKey::from_bytes(&self.0) {
            Ok(k) => k,
            Err(_) => return false,
        };
        let sig = match Signature::from_slice(signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        key.verify(message, &sig).is_ok()
    }

    /// First 8 hex characters, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({}...)", self.short_hex())
    }
}

/// A local Ed25519 identity key pair.
///
/// The signing key is zeroized on drop by `ed25519-dalek`.
#[derive(Clone)]
pub struct Identity {
    signing_key: SigningKey,
}

impl Identity {
    /// Generates a fresh identity from the OS CSPRNG.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut rand_core::OsRng);
        Self { signing_key }
    }

    /// Rebuilds an identity from its 32-byte secret seed.
    pub fn from_bytes(bytes: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(bytes),
        }
    }

    /// The peer id derived from this identity's public key.
    pub fn peer_id(&self) -> PeerId {
        PeerId(*self.signing_key.verifying_key().as_bytes())
    }

    /// Signs a message with the identity secret key.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let id = Identity::generate();
        let sig = id.sign(b"challenge");

        assert!(id.peer_id().verify(b"challenge", &sig));
        assert!(!id.peer_id().verify(b"other", &sig));
    }

    #[test]
    fn verify_rejects_malformed_signature() {
        let id = Identity::generate();
        assert!(!id.peer_id().verify(b"msg", &[0u8; 10]));
    }

    #[test]
    fn verify_rejects_foreign_signature() {
        let a = Identity::generate();
        let b = Identity::generate();
        let sig = a.sign(b"msg");
        assert!(!b.peer_id().verify(b"msg", &sig));
    }

    #[test]
    fn from_bytes_is_deterministic() {
        let id = Identity::generate();
        let seed = id.signing_key.to_bytes();
        let rebuilt = Identity::from_bytes(&seed);
        assert_eq!(id.peer_id(), rebuilt.peer_id());
    }

    #[test]
    fn marshal_roundtrips_through_slice() {
        let id = Identity::generate();
        let peer = id.peer_id();
        assert_eq!(PeerId::from_slice(&peer.marshal()), Some(peer));
        assert_eq!(PeerId::from_slice(&[0u8; 31]), None);
    }
}
