//! CipherState and SymmetricState for the Noise handshake.

use crate::cipher::{self, Hash, HASH_SIZE};
use crate::error::Error;
use crate::keypair::Key;

/// Highest usable nonce; reaching it is a fatal error.
pub const MAX_NONCE: u64 = u64::MAX - 1;

/// Nonce value reserved for the rekey operation.
const REKEY_NONCE: u64 = u64::MAX;

/// AEAD key plus a monotonic 64-bit nonce counter for one direction.
///
/// The key is absent until the first `MixKey`; keyless encrypt/decrypt
/// pass data through unchanged, per the Noise spec.
#[derive(Debug)]
pub struct CipherState {
    key: Option<Key>,
    nonce: u64,
}

impl CipherState {
    /// Creates a keyless CipherState.
    pub fn new() -> Self {
        Self { key: None, nonce: 0 }
    }

    /// Creates a CipherState already holding a key.
    pub fn with_key(key: Key) -> Self {
        let mut cs = Self::new();
        cs.initialize_key(key);
        cs
    }

    /// Installs a key and resets the nonce to zero.
    pub fn initialize_key(&mut self, key: Key) {
        self.key = Some(key);
        self.nonce = 0;
    }

    /// True once a key has been mixed in.
    pub fn has_key(&self) -> bool {
        self.key.is_some()
    }

    /// Current nonce counter.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    #[cfg(test)]
    pub(crate) fn set_nonce(&mut self, n: u64) {
        self.nonce = n;
    }

    /// Seals `plaintext` under the current nonce, then increments it.
    /// Without a key the plaintext is returned unchanged.
    pub fn encrypt_with_ad(&mut self, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let key = match &self.key {
            Some(k) => k,
            None => return Ok(plaintext.to_vec()),
        };
        if self.nonce >= MAX_NONCE {
            return Err(Error::NonceExhaustion);
        }

        let ciphertext = cipher::encrypt(key, self.nonce, ad, plaintext);
        self.nonce += 1;
        Ok(ciphertext)
    }

    /// Opens `ciphertext` under the current nonce, incrementing it only on
    /// success. Tag mismatch does not advance the nonce.
    pub fn decrypt_with_ad(&mut self, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let key = match &self.key {
            Some(k) => k,
            None => return Ok(ciphertext.to_vec()),
        };
        if self.nonce >= MAX_NONCE {
            return Err(Error::NonceExhaustion);
        }

        let plaintext =
            cipher::decrypt(key, self.nonce, ad, ciphertext).map_err(|_| Error::Decrypt)?;
        self.nonce += 1;
        Ok(plaintext)
    }

    /// Replaces the key with `ENCRYPT(key, 2^64-1, "", [0u8; 32])[..32]`.
    /// The nonce counter is not reset.
    pub fn rekey(&mut self) -> Result<(), Error> {
        let key = match &self.key {
            Some(k) => *k,
            None => return Err(Error::ProtocolViolation("rekey without key")),
        };

        let sealed = cipher::encrypt(&key, REKEY_NONCE, &[], &[0u8; 32]);
        let new_key = Key::from_slice(&sealed[..32]).expect("32-byte rekey output");

        let nonce = self.nonce;
        self.initialize_key(new_key);
        self.nonce = nonce;
        Ok(())
    }
}

impl Default for CipherState {
    fn default() -> Self {
        Self::new()
    }
}

/// Chaining key, running handshake hash, and the current cipher.
///
/// The cipher field is written only by `mix_key`, `mix_key_and_hash`,
/// `encrypt_and_hash`/`decrypt_and_hash` (nonce), and `split`.
#[derive(Debug)]
pub struct SymmetricState {
    ck: Key,
    h: Hash,
    cipher: CipherState,
}

impl SymmetricState {
    /// Initializes from a protocol name: names up to 32 bytes are
    /// zero-padded into `h`, longer ones are hashed. `ck` starts equal
    /// to `h`.
    pub fn new(protocol_name: &str) -> Self {
        let h = if protocol_name.len() <= HASH_SIZE {
            let mut padded = [0u8; HASH_SIZE];
            padded[..protocol_name.len()].copy_from_slice(protocol_name.as_bytes());
            padded
        } else {
            cipher::hash(&[protocol_name.as_bytes()])
        };

        Self {
            ck: Key::new(h),
            h,
            cipher: CipherState::new(),
        }
    }

    /// Mixes `input` into the chaining key and installs the derived cipher key.
    pub fn mix_key(&mut self, input: &[u8]) {
        let (ck, temp_k) = cipher::kdf2(&self.ck, input);
        self.ck = ck;
        self.cipher.initialize_key(temp_k);
    }

    /// Mixes `data` into the running handshake hash.
    pub fn mix_hash(&mut self, data: &[u8]) {
        self.h = cipher::hash(&[&self.h, data]);
    }

    /// Mixes `input` into the chaining key, the hash, and the cipher key.
    pub fn mix_key_and_hash(&mut self, input: &[u8]) {
        let (ck, temp_h, temp_k) = cipher::kdf3(&self.ck, input);
        self.ck = ck;
        self.mix_hash(temp_h.as_bytes());
        self.cipher.initialize_key(temp_k);
    }

    /// True once `mix_key` has run at least once.
    pub fn has_key(&self) -> bool {
        self.cipher.has_key()
    }

    /// Encrypts with the handshake hash as AD, then mixes the ciphertext
    /// into the hash.
    pub fn encrypt_and_hash(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let h = self.h;
        let ciphertext = self.cipher.encrypt_with_ad(&h, plaintext)?;
        self.mix_hash(&ciphertext);
        Ok(ciphertext)
    }

    /// Decrypts with the handshake hash as AD, then mixes the ciphertext
    /// (not the plaintext) into the hash.
    pub fn decrypt_and_hash(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        let h = self.h;
        let plaintext = self.cipher.decrypt_with_ad(&h, ciphertext)?;
        self.mix_hash(ciphertext);
        Ok(plaintext)
    }

    /// Finalizes the handshake into two transport CipherStates.
    pub fn split(&self) -> (CipherState, CipherState) {
        let keys = cipher::hkdf(&self.ck, &[], 2);
        (CipherState::with_key(keys[0]), CipherState::with_key(keys[1]))
    }

    /// Current handshake hash.
    pub fn hash(&self) -> &Hash {
        &self.h
    }
}
