//! Key-derived, position-addressable stream cipher for archive containers.
//!
//! The transform XORs every byte of the payload region with a keystream byte
//! chosen by its payload-relative position, so applying it twice with the same
//! key restores the input and any window can be decrypted on its own.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Salt for the key-stretching step. Changing it breaks every existing container.
const KDF_SALT: &[u8] = b"dxport.archive.keystream.v1";

/// PBKDF2 rounds used to turn the key text into a keystream seed
const KDF_ROUNDS: u32 = 1024;

/// Keystream block size (one SHA-256 digest)
pub const KEYSTREAM_BLOCK_SIZE: usize = 32;

/// Opaque key material supplied by the application (usually a key string)
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub struct ArchiveKey(Vec<u8>);

impl ArchiveKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// An empty key means containers are stored in clear
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Short digest of the key, safe to put in logs
    pub fn fingerprint(&self) -> String {
        hex::encode(&Sha256::digest(&self.0)[..4])
    }
}

impl From<&str> for ArchiveKey {
    fn from(key: &str) -> Self {
        Self(key.as_bytes().to_vec())
    }
}

impl From<String> for ArchiveKey {
    fn from(key: String) -> Self {
        Self(key.into_bytes())
    }
}

impl From<&[u8]> for ArchiveKey {
    fn from(key: &[u8]) -> Self {
        Self(key.to_vec())
    }
}

impl fmt::Debug for ArchiveKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ArchiveKey").field(&self.fingerprint()).finish()
    }
}

/// Keystream generator bound to one key
#[derive(Clone)]
pub struct Cipher {
    seed: [u8; 32],
}

impl Cipher {
    /// Build a cipher for `key`, or `None` when the key is empty (no transform)
    pub fn new(key: &ArchiveKey) -> Option<Self> {
        if key.is_empty() {
            return None;
        }

        let mut seed = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(key.as_bytes(), KDF_SALT, KDF_ROUNDS, &mut seed);
        Some(Self { seed })
    }

    /// XOR `data` in place with the keystream starting at `position`
    pub fn apply(&self, position: u64, data: &mut [u8]) {
        let mut done = 0;
        let mut position = position;

        while done < data.len() {
            let block = self.block(position / KEYSTREAM_BLOCK_SIZE as u64);
            let offset = (position % KEYSTREAM_BLOCK_SIZE as u64) as usize;
            let n = (KEYSTREAM_BLOCK_SIZE - offset).min(data.len() - done);

            for (byte, key) in data[done..done + n].iter_mut().zip(&block[offset..offset + n]) {
                *byte ^= key;
            }

            done += n;
            position += n as u64;
        }
    }

    fn block(&self, index: u64) -> [u8; KEYSTREAM_BLOCK_SIZE] {
        let mut hasher = Sha256::new();
        hasher.update(self.seed);
        hasher.update(index.to_le_bytes());
        hasher.finalize().into()
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher").finish_non_exhaustive()
    }
}
