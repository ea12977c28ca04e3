//! Curve25519 keys for the Noise handshake.

use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of Noise keys in bytes.
pub const KEY_SIZE: usize = 32;

/// A 32-byte Curve25519 key (public key or DH output).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Zeroize)]
pub struct Key(pub [u8; KEY_SIZE]);

impl Key {
    /// Creates a key from raw bytes.
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Creates a key from a slice; fails unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// True if every byte is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// Hex representation of the full key.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        Self::from_slice(&bytes).ok_or(hex::FromHexError::InvalidStringLength)
    }

    /// First 8 hex characters, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl Default for Key {
    fn default() -> Self {
        Self([0u8; KEY_SIZE])
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}...)", self.short_hex())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; KEY_SIZE]> for Key {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Errors from keypair construction and DH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    /// DH produced the all-zero shared secret (low-order peer point).
    #[error("low-order point in DH")]
    LowOrderPoint,
    /// The provided private scalar is all zeros.
    #[error("invalid private scalar")]
    InvalidScalar,
}

/// An X25519 key pair. The private half is zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    /// Private scalar.
    pub private: Key,
    /// Public point.
    pub public: Key,
}

impl KeyPair {
    /// Generates a fresh random key pair from the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(rand_core::OsRng);
        let public = PublicKey::from(&secret);

        Self {
            private: Key(secret.to_bytes()),
            public: Key(public.to_bytes()),
        }
    }

    /// Rebuilds a key pair from a private scalar, deriving the public half
    /// by base-point scalar multiplication. All-zero scalars are rejected.
    pub fn from_private(private: Key) -> Result<Self, KeyError> {
        if private.is_zero() {
            return Err(KeyError::InvalidScalar);
        }
        let secret = StaticSecret::from(private.0);
        let public = PublicKey::from(&secret);

        Ok(Self {
            private,
            public: Key(public.to_bytes()),
        })
    }

    /// X25519 Diffie-Hellman with a peer public key.
    pub fn dh(&self, peer_public: &Key) -> Result<Key, KeyError> {
        let secret = StaticSecret::from(self.private.0);
        let peer = PublicKey::from(peer_public.0);
        let shared = Key(secret.diffie_hellman(&peer).to_bytes());

        if shared.is_zero() {
            return Err(KeyError::LowOrderPoint);
        }
        Ok(shared)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_zero() {
        assert!(Key::default().is_zero());
        assert!(!Key([7; KEY_SIZE]).is_zero());
    }

    #[test]
    fn key_hex_roundtrip() {
        let key = Key([0xAB; KEY_SIZE]);
        let parsed = Key::from_hex(&key.to_hex()).unwrap();
        assert_eq!(key, parsed);

        assert!(Key::from_hex("zz").is_err());
        assert!(Key::from_hex("abcd").is_err());
    }

    #[test]
    fn generate_is_nonzero() {
        let kp = KeyPair::generate();
        assert!(!kp.private.is_zero());
        assert!(!kp.public.is_zero());
    }

    #[test]
    fn from_private_rederives_public() {
        let kp = KeyPair::generate();
        let rebuilt = KeyPair::from_private(kp.private).unwrap();
        assert_eq!(kp.public, rebuilt.public);
    }

    #[test]
    fn from_private_rejects_zero_scalar() {
        assert_eq!(
            KeyPair::from_private(Key::default()).unwrap_err(),
            KeyError::InvalidScalar
        );
    }

    #[test]
    fn dh_agrees() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();

        let ab = alice.dh(&bob.public).unwrap();
        let ba = bob.dh(&alice.public).unwrap();
        assert_eq!(ab, ba);
        assert!(!ab.is_zero());
    }

    #[test]
    fn dh_rejects_low_order_point() {
        let kp = KeyPair::generate();
        // DH with the identity point yields the all-zero secret.
        let err = kp.dh(&Key::default()).unwrap_err();
        assert_eq!(err, KeyError::LowOrderPoint);
    }

    #[test]
    fn debug_redacts_private_half() {
        let kp = KeyPair::generate();
        let rendered = format!("{:?}", kp);
        assert!(!rendered.contains(&kp.private.to_hex()));
    }
}
