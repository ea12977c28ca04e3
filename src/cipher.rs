//! Cryptographic primitives: SHA-256, HKDF, ChaCha20-Poly1305.

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, CHACHA20_POLY1305};
use sha2::{Digest, Sha256};

use crate::keypair::Key;

/// Hash output size (SHA-256).
pub const HASH_SIZE: usize = 32;

/// AEAD tag size (Poly1305).
pub const TAG_SIZE: usize = 16;

/// A 32-byte hash output.
pub type Hash = [u8; HASH_SIZE];

/// Computes SHA-256 over the concatenation of the given slices.
pub fn hash(data: &[&[u8]]) -> Hash {
    let mut hasher = Sha256::new();
    for d in data {
        hasher.update(d);
    }
    hasher.finalize().into()
}

/// Computes HMAC-SHA256.
pub fn hmac(key: &Hash, data: &[&[u8]]) -> Hash {
    // HMAC(K, m) = H((K ^ opad) || H((K ^ ipad) || m))
    let mut ipad = [0x36u8; 64];
    let mut opad = [0x5cu8; 64];

    for i in 0..HASH_SIZE {
        ipad[i] ^= key[i];
        opad[i] ^= key[i];
    }

    let mut inner = Sha256::new();
    inner.update(ipad);
    for d in data {
        inner.update(d);
    }
    let inner_result: Hash = inner.finalize().into();

    let mut outer = Sha256::new();
    outer.update(opad);
    outer.update(inner_result);
    outer.finalize().into()
}

/// Noise HKDF: extract with the chaining key, then expand with counter
/// bytes 0x01, 0x02, 0x03. Derives `num_outputs` (1-3) 32-byte keys.
pub fn hkdf(chaining_key: &Key, input: &[u8], num_outputs: usize) -> Vec<Key> {
    assert!((1..=3).contains(&num_outputs), "num_outputs must be 1-3");

    let secret = hmac(chaining_key.as_bytes(), &[input]);

    let mut outputs = Vec::with_capacity(num_outputs);

    let out1 = hmac(&secret, &[&[0x01]]);
    outputs.push(Key::new(out1));

    if num_outputs >= 2 {
        let out2 = hmac(&secret, &[&out1, &[0x02]]);
        outputs.push(Key::new(out2));
    }

    if num_outputs >= 3 {
        let out3 = hmac(&secret, &[outputs[1].as_bytes(), &[0x03]]);
        outputs.push(Key::new(out3));
    }

    outputs
}

/// Derives two keys from the chaining key and input.
pub fn kdf2(chaining_key: &Key, input: &[u8]) -> (Key, Key) {
    let keys = hkdf(chaining_key, input, 2);
    (keys[0], keys[1])
}

/// Derives three keys from the chaining key and input.
pub fn kdf3(chaining_key: &Key, input: &[u8]) -> (Key, Key, Key) {
    let keys = hkdf(chaining_key, input, 3);
    (keys[0], keys[1], keys[2])
}

/// Builds the 12-byte AEAD nonce: four zero bytes then the counter
/// in little-endian.
fn make_nonce(counter: u64) -> Nonce {
    let mut nonce_bytes = [0u8; 12];
    nonce_bytes[4..].copy_from_slice(&counter.to_le_bytes());
    Nonce::assume_unique_for_key(nonce_bytes)
}

/// Encrypts plaintext with ChaCha20-Poly1305, appending the 16-byte tag.
pub fn encrypt(key: &Key, nonce: u64, ad: &[u8], plaintext: &[u8]) -> Vec<u8> {
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, key.as_bytes()).expect("valid key size");
    let sealing_key = LessSafeKey::new(unbound);

    let mut out = Vec::with_capacity(plaintext.len() + TAG_SIZE);
    out.extend_from_slice(plaintext);

    sealing_key
        .seal_in_place_append_tag(make_nonce(nonce), Aad::from(ad), &mut out)
        .expect("encryption failed");
    out
}

/// Decrypts ChaCha20-Poly1305 ciphertext, verifying the trailing tag.
pub fn decrypt(key: &Key, nonce: u64, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, DecryptError> {
    if ciphertext.len() < TAG_SIZE {
        return Err(DecryptError);
    }
    let unbound = UnboundKey::new(&CHACHA20_POLY1305, key.as_bytes()).map_err(|_| DecryptError)?;
    let opening_key = LessSafeKey::new(unbound);

    let mut buffer = ciphertext.to_vec();
    let plaintext = opening_key
        .open_in_place(make_nonce(nonce), Aad::from(ad), &mut buffer)
        .map_err(|_| DecryptError)?;
    let len = plaintext.len();
    buffer.truncate(len);
    Ok(buffer)
}

/// AEAD tag verification failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecryptError;

impl std::fmt::Display for DecryptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "decryption failed")
    }
}

impl std::error::Error for DecryptError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_concatenates() {
        let h1 = hash(&[b"hello"]);
        let h2 = hash(&[b"hello"]);
        assert_eq!(h1, h2);

        assert_ne!(h1, hash(&[b"world"]));
        assert_eq!(hash(&[b"hello", b"world"]), hash(&[b"helloworld"]));
    }

    #[test]
    fn hash_matches_sha256_vector() {
        // SHA-256("abc")
        let h = hash(&[b"abc"]);
        assert_eq!(
            hex::encode(h),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hmac_matches_rfc4231_vector() {
        // RFC 4231 test case 2: key "Jefe", data "what do ya want for nothing?"
        // HMAC zero-pads short keys, so padding to 32 bytes is equivalent.
        let mut key = [0u8; HASH_SIZE];
        key[..4].copy_from_slice(b"Jefe");
        let out = hmac(&key, &[b"what do ya want for nothing?"]);
        assert_eq!(
            hex::encode(out),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn hkdf_outputs_are_prefix_stable() {
        let ck = Key::default();

        let one = hkdf(&ck, b"input", 1);
        let two = hkdf(&ck, b"input", 2);
        let three = hkdf(&ck, b"input", 3);

        assert_eq!(two[0], one[0]);
        assert_eq!(three[0], two[0]);
        assert_eq!(three[1], two[1]);
        assert_ne!(two[0], two[1]);
    }

    #[test]
    #[should_panic]
    fn hkdf_rejects_zero_outputs() {
        hkdf(&Key::default(), b"input", 0);
    }

    #[test]
    #[should_panic]
    fn hkdf_rejects_four_outputs() {
        hkdf(&Key::default(), b"input", 4);
    }

    #[test]
    fn kdf_helpers_agree_with_hkdf() {
        let ck = Key::new([9; 32]);
        let (a, b) = kdf2(&ck, b"x");
        let (c, d, e) = kdf3(&ck, b"x");
        assert_eq!(a, c);
        assert_eq!(b, d);
        assert_ne!(d, e);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let key = Key::new([1; 32]);
        let ct = encrypt(&key, 0, b"ad", b"hello, world!");
        assert_eq!(ct.len(), 13 + TAG_SIZE);

        let pt = decrypt(&key, 0, b"ad", &ct).unwrap();
        assert_eq!(pt, b"hello, world!");
    }

    #[test]
    fn decrypt_rejects_wrong_nonce_key_or_ad() {
        let key = Key::new([1; 32]);
        let ct = encrypt(&key, 7, b"ad", b"secret");

        assert!(decrypt(&key, 8, b"ad", &ct).is_err());
        assert!(decrypt(&Key::new([2; 32]), 7, b"ad", &ct).is_err());
        assert!(decrypt(&key, 7, b"other", &ct).is_err());
    }

    #[test]
    fn decrypt_rejects_short_input() {
        let key = Key::new([1; 32]);
        assert!(decrypt(&key, 0, &[], &[0u8; 8]).is_err());
    }

    #[test]
    fn nonce_counter_changes_ciphertext() {
        let key = Key::new([3; 32]);
        let a = encrypt(&key, 0, &[], b"p");
        let b = encrypt(&key, 1, &[], b"p");
        assert_ne!(a, b);
    }
}
