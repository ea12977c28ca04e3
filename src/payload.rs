//! Authenticated handshake payload.
//!
//! Carries the long-term identity public key and its signature over the
//! Noise static key, binding the two. Encoded as protobuf; unknown fields
//! are ignored on decode.

use prost::Message;

use crate::error::Error;
use crate::identity::{Identity, PeerId};
use crate::keypair::Key;

/// Domain separator for the identity signature, concatenated directly
/// with the 32-byte static public key.
pub const STATIC_KEY_DOMAIN: &[u8] = b"noise-libp2p-static-key:";

/// Optional payload extensions.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseExtensions {
    /// Certificate hashes for WebTransport.
    #[prost(bytes = "vec", repeated, tag = "1")]
    pub webtransport_certhashes: Vec<Vec<u8>>,
}

/// The handshake payload proper.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct NoiseHandshakePayload {
    /// Marshalled identity public key.
    #[prost(bytes = "vec", tag = "1")]
    pub identity_key: Vec<u8>,
    /// Identity signature over the domain-separated static key.
    #[prost(bytes = "vec", tag = "2")]
    pub identity_sig: Vec<u8>,
    /// Optional extensions.
    #[prost(message, optional, tag = "4")]
    pub extensions: Option<NoiseExtensions>,
}

/// The byte string the identity key signs: domain separator plus the
/// Noise static public key.
fn signed_message(static_pub: &Key) -> Vec<u8> {
    let mut msg = Vec::with_capacity(STATIC_KEY_DOMAIN.len() + 32);
    msg.extend_from_slice(STATIC_KEY_DOMAIN);
    msg.extend_from_slice(static_pub.as_bytes());
    msg
}

/// Builds and encodes the local payload: identity key, signature over the
/// local static key, and any extensions.
pub fn signed_payload(
    identity: &Identity,
    static_pub: &Key,
    extensions: Option<NoiseExtensions>,
) -> Vec<u8> {
    let payload = NoiseHandshakePayload {
        identity_key: identity.peer_id().marshal(),
        identity_sig: identity.sign(&signed_message(static_pub)).to_vec(),
        extensions,
    };

    let mut buf = Vec::with_capacity(payload.encoded_len());
    payload.encode(&mut buf).expect("vec write is infallible");
    buf
}

/// Decodes a received payload and verifies the identity signature against
/// the peer's declared Noise static key (`rs`). When `expected` is given,
/// the authenticated identity must match it.
pub fn verify_payload(
    bytes: &[u8],
    remote_static: &Key,
    expected: Option<&PeerId>,
) -> Result<(PeerId, Option<NoiseExtensions>), Error> {
    let payload = NoiseHandshakePayload::decode(bytes)
        .map_err(|_| Error::MalformedMessage("undecodable handshake payload"))?;

    let peer = PeerId::from_slice(&payload.identity_key)
        .ok_or(Error::MalformedMessage("bad identity key length"))?;

    if !peer.verify(&signed_message(remote_static), &payload.identity_sig) {
        return Err(Error::InvalidSignature);
    }

    if let Some(expected) = expected {
        if *expected != peer {
            return Err(Error::PeerMismatch {
                expected: *expected,
                actual: peer,
            });
        }
    }

    Ok((peer, payload.extensions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keypair::KeyPair;

    #[test]
    fn payload_verifies_against_static_key() {
        let identity = Identity::generate();
        let noise_static = KeyPair::generate();

        let bytes = signed_payload(&identity, &noise_static.public, None);
        let (peer, ext) = verify_payload(&bytes, &noise_static.public, None).unwrap();

        assert_eq!(peer, identity.peer_id());
        assert!(ext.is_none());
    }

    #[test]
    fn payload_rejects_wrong_static_key() {
        let identity = Identity::generate();
        let noise_static = KeyPair::generate();
        let other = KeyPair::generate();

        let bytes = signed_payload(&identity, &noise_static.public, None);
        assert!(matches!(
            verify_payload(&bytes, &other.public, None),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn payload_rejects_tampered_signature() {
        let identity = Identity::generate();
        let noise_static = KeyPair::generate();

        let mut payload =
            NoiseHandshakePayload::decode(&signed_payload(&identity, &noise_static.public, None)[..])
                .unwrap();
        payload.identity_sig[0] ^= 0xFF;

        let mut bytes = Vec::new();
        payload.encode(&mut bytes).unwrap();
        assert!(matches!(
            verify_payload(&bytes, &noise_static.public, None),
            Err(Error::InvalidSignature)
        ));
    }

    #[test]
    fn payload_enforces_expected_peer() {
        let identity = Identity::generate();
        let stranger = Identity::generate();
        let noise_static = KeyPair::generate();

        let bytes = signed_payload(&identity, &noise_static.public, None);

        let expected = identity.peer_id();
        assert!(verify_payload(&bytes, &noise_static.public, Some(&expected)).is_ok());

        let wrong = stranger.peer_id();
        assert!(matches!(
            verify_payload(&bytes, &noise_static.public, Some(&wrong)),
            Err(Error::PeerMismatch { .. })
        ));
    }

    #[test]
    fn extensions_roundtrip() {
        let identity = Identity::generate();
        let noise_static = KeyPair::generate();
        let ext = NoiseExtensions {
            webtransport_certhashes: vec![vec![1, 2, 3], vec![4, 5]],
        };

        let bytes = signed_payload(&identity, &noise_static.public, Some(ext.clone()));
        let (_, decoded) = verify_payload(&bytes, &noise_static.public, None).unwrap();
        assert_eq!(decoded, Some(ext));
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let identity = Identity::generate();
        let noise_static = KeyPair::generate();

        let mut bytes = signed_payload(&identity, &noise_static.public, None);
        // Append an unknown varint field (tag 6, wire type 0).
        bytes.extend_from_slice(&[0x30, 0x07]);

        assert!(verify_payload(&bytes, &noise_static.public, None).is_ok());
    }

    #[test]
    fn empty_payload_fails_signature_check() {
        let noise_static = KeyPair::generate();
        let empty = NoiseHandshakePayload::default();
        let mut bytes = Vec::new();
        empty.encode(&mut bytes).unwrap();

        let err = verify_payload(&bytes, &noise_static.public, None).unwrap_err();
        assert!(matches!(err, Error::MalformedMessage(_)));
    }
}
