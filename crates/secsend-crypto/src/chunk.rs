//! Per-chunk AES-GCM encryption/decryption
//!
//! Encrypted chunk format (binary):
//! ```text
//! [N bytes: ciphertext][16 bytes: GCM tag]
//! nonce = chunk_nonce(chunk_index), AAD = empty
//! ```
//!
//! The nonce is not stored with the chunk: both sides recompute it from the
//! base nonce and the chunk's position in the logical stream. Decrypting a
//! chunk under the wrong index therefore fails authentication, which also
//! rules out reordering.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key};
use rand::{CryptoRng, RngCore};
use secsend_core::{SecsendError, SecsendResult};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::commit::commit;
use crate::keys::{derive_subkey, generate, BaseKey, KeyHasher, Sha256Hasher, FILE_PREFIX, META_PREFIX};
use crate::{Nonce, ALGO_AES_GCM, SUBKEY_LEN, TAG_LEN};

/// GCM's 32-bit block counter caps a single message below 2^32 bytes.
const MAX_CHUNK_LEN: u64 = 1 << 32;

/// Supported cipher suites, keyed by their wire identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherSuite {
    AesGcm,
}

impl CipherSuite {
    /// Look up a suite by the `algo` field of the metadata.
    pub fn from_name(name: &str) -> SecsendResult<Self> {
        match name {
            ALGO_AES_GCM => Ok(CipherSuite::AesGcm),
            other => Err(SecsendError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::AesGcm => ALGO_AES_GCM,
        }
    }

    pub fn tag_len(self) -> u64 {
        match self {
            CipherSuite::AesGcm => TAG_LEN as u64,
        }
    }

    pub fn out_chunk_size(self, chunk_size: u64) -> u64 {
        chunk_size + self.tag_len()
    }

    pub fn encrypted_size(self, plain_size: u64, chunk_size: u64) -> u64 {
        let tag = self.tag_len();
        let full = plain_size / chunk_size;
        let rem = plain_size % chunk_size;
        let mut size = full * (chunk_size + tag);
        if rem > 0 {
            size += rem + tag;
        }
        size
    }

    pub fn decrypted_size(self, cipher_size: u64, chunk_size: u64) -> u64 {
        let tag = self.tag_len();
        let cipher_chunk = chunk_size + tag;
        let full = cipher_size / cipher_chunk;
        let rem = cipher_size % cipher_chunk;
        let mut size = full * chunk_size;
        if rem > 0 {
            // A trailing fragment shorter than a tag holds no plaintext.
            size += rem.saturating_sub(tag);
        }
        size
    }

    pub fn derive(self, key: BaseKey, nonce: Nonce) -> ChunkCipherContext {
        match self {
            CipherSuite::AesGcm => ChunkCipherContext::derive(key, nonce),
        }
    }
}

/// Ciphertext chunk size for a plaintext chunk size.
pub fn out_chunk_size(chunk_size: u64) -> u64 {
    CipherSuite::AesGcm.out_chunk_size(chunk_size)
}

/// Total ciphertext length for `plain_size` bytes split in `chunk_size` chunks.
///
/// `chunk_size` must be non-zero.
pub fn encrypted_size(plain_size: u64, chunk_size: u64) -> u64 {
    CipherSuite::AesGcm.encrypted_size(plain_size, chunk_size)
}

/// Inverse of [`encrypted_size`]; `chunk_size` is the plaintext chunk size.
pub fn decrypted_size(cipher_size: u64, chunk_size: u64) -> u64 {
    CipherSuite::AesGcm.decrypted_size(cipher_size, chunk_size)
}

/// Key material for one transfer: base key, base nonce, and the two derived AEADs.
///
/// Immutable once derived. One context serves one upload or download session.
#[derive(Clone)]
pub struct ChunkCipherContext {
    key: BaseKey,
    nonce: Nonce,
    file: Aes256Gcm,
    meta: Aes256Gcm,
    commitment: [u8; SUBKEY_LEN],
}

impl ChunkCipherContext {
    pub fn derive(key: BaseKey, nonce: Nonce) -> Self {
        Self::derive_with(&Sha256Hasher, key, nonce)
    }

    pub fn derive_with<H: KeyHasher + ?Sized>(hasher: &H, key: BaseKey, nonce: Nonce) -> Self {
        let mut file_key = derive_subkey(hasher, &key, FILE_PREFIX);
        let mut meta_key = derive_subkey(hasher, &key, META_PREFIX);
        let file = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&file_key));
        let meta = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&meta_key));
        file_key.zeroize();
        meta_key.zeroize();
        let commitment = commit(hasher, &key, &nonce);

        Self {
            key,
            nonce,
            file,
            meta,
            commitment,
        }
    }

    /// Fresh random key and nonce.
    pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> Self {
        let (nonce, key) = generate(rng);
        Self::derive(key, nonce)
    }

    pub fn key(&self) -> &BaseKey {
        &self.key
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    pub fn suite(&self) -> CipherSuite {
        CipherSuite::AesGcm
    }

    /// The key commitment tag to publish with the metadata.
    pub fn commitment(&self) -> &[u8; SUBKEY_LEN] {
        &self.commitment
    }

    /// Constant-time check of a published commitment against this context's key.
    pub fn verify_commitment(&self, tag: &[u8]) -> bool {
        bool::from(self.commitment.as_slice().ct_eq(tag))
    }

    /// Nonce for chunk `index`: the low 8 bytes of the base nonce, read as a
    /// little-endian u64, plus `index` (wrapping). The high 4 bytes are kept.
    pub fn chunk_nonce(&self, index: u64) -> Nonce {
        let mut out = self.nonce;
        let mut low = [0u8; 8];
        low.copy_from_slice(&out[..8]);
        let counter = u64::from_le_bytes(low).wrapping_add(index);
        out[..8].copy_from_slice(&counter.to_le_bytes());
        out
    }

    /// Seal one content chunk. Output is `plaintext.len() + 16` bytes.
    pub fn encrypt(&self, index: u64, plaintext: &[u8]) -> SecsendResult<Vec<u8>> {
        seal(&self.file, &self.chunk_nonce(index), plaintext)
    }

    /// Open one content chunk. Fails with `AuthenticationFailure` on any tag mismatch.
    pub fn decrypt(&self, index: u64, ciphertext: &[u8]) -> SecsendResult<Vec<u8>> {
        open(&self.file, &self.chunk_nonce(index), ciphertext)
    }

    /// Seal a metadata field under the metadata subkey.
    pub(crate) fn seal_field(&self, index: u64, plaintext: &[u8]) -> SecsendResult<Vec<u8>> {
        seal(&self.meta, &self.chunk_nonce(index), plaintext)
    }

    pub(crate) fn open_field(&self, index: u64, ciphertext: &[u8]) -> SecsendResult<Vec<u8>> {
        open(&self.meta, &self.chunk_nonce(index), ciphertext)
    }
}

impl std::fmt::Debug for ChunkCipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkCipherContext")
            .field("suite", &ALGO_AES_GCM)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

fn seal(cipher: &Aes256Gcm, nonce: &Nonce, plaintext: &[u8]) -> SecsendResult<Vec<u8>> {
    if plaintext.len() as u64 >= MAX_CHUNK_LEN {
        return Err(SecsendError::Other(anyhow::anyhow!(
            "chunk of {} bytes exceeds the AES-GCM message limit",
            plaintext.len()
        )));
    }
    cipher
        .encrypt(aes_gcm::Nonce::from_slice(nonce), plaintext)
        .map_err(|e| SecsendError::Other(anyhow::anyhow!("chunk encryption failed: {e}")))
}

fn open(cipher: &Aes256Gcm, nonce: &Nonce, ciphertext: &[u8]) -> SecsendResult<Vec<u8>> {
    if ciphertext.len() < TAG_LEN {
        return Err(SecsendError::AuthenticationFailure);
    }
    cipher
        .decrypt(aes_gcm::Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SecsendError::AuthenticationFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_LEN;
    use proptest::prelude::*;

    fn ctx() -> ChunkCipherContext {
        ChunkCipherContext::derive(BaseKey::from_bytes([42u8; KEY_LEN]), [7u8; 12])
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let c = ctx();
        let encrypted = c.encrypt(0, b"hello, encrypted world!").unwrap();
        assert_eq!(encrypted.len(), 23 + TAG_LEN);
        let decrypted = c.decrypt(0, &encrypted).unwrap();
        assert_eq!(decrypted, b"hello, encrypted world!");
    }

    #[test]
    fn test_encrypt_decrypt_empty() {
        let c = ctx();
        let encrypted = c.encrypt(5, b"").unwrap();
        assert_eq!(encrypted.len(), TAG_LEN);
        assert_eq!(c.decrypt(5, &encrypted).unwrap(), b"");
    }

    #[test]
    fn test_decrypt_wrong_chunk_index() {
        let c = ctx();
        let encrypted = c.encrypt(0, b"secret data").unwrap();
        assert!(matches!(
            c.decrypt(1, &encrypted),
            Err(SecsendError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let c1 = ctx();
        let c2 = ChunkCipherContext::derive(BaseKey::from_bytes([43u8; KEY_LEN]), [7u8; 12]);
        let encrypted = c1.encrypt(0, b"secret data").unwrap();
        assert!(matches!(
            c2.decrypt(0, &encrypted),
            Err(SecsendError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_tampered_ciphertext() {
        let c = ctx();
        let mut encrypted = c.encrypt(0, b"secret data").unwrap();
        encrypted[2] ^= 0xFF;
        assert!(matches!(
            c.decrypt(0, &encrypted),
            Err(SecsendError::AuthenticationFailure)
        ));
        assert!(matches!(
            c.decrypt(0, &encrypted[..4]),
            Err(SecsendError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_metadata_key_separate_from_file_key() {
        let c = ctx();
        let sealed = c.seal_field(0, b"name").unwrap();
        assert!(c.decrypt(0, &sealed).is_err());
        assert_eq!(c.open_field(0, &sealed).unwrap(), b"name");
    }

    #[test]
    fn test_chunk_nonce_layout() {
        let mut base = [0u8; 12];
        base[..8].copy_from_slice(&(u64::MAX - 1).to_le_bytes());
        base[8..].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);
        let c = ChunkCipherContext::derive(BaseKey::from_bytes([1u8; KEY_LEN]), base);

        assert_eq!(c.chunk_nonce(0), base);

        let n1 = c.chunk_nonce(1);
        assert_eq!(&n1[..8], &u64::MAX.to_le_bytes());
        // wraps modulo 2^64, high bytes untouched
        let n2 = c.chunk_nonce(2);
        assert_eq!(&n2[..8], &0u64.to_le_bytes());
        assert_eq!(&n2[8..], &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_commitment_check() {
        let c = ctx();
        assert!(c.verify_commitment(c.commitment()));
        let other = ChunkCipherContext::derive(BaseKey::from_bytes([1u8; KEY_LEN]), [7u8; 12]);
        assert!(!c.verify_commitment(other.commitment()));
    }

    #[test]
    fn test_encrypted_size_values() {
        assert_eq!(encrypted_size(0, 1024), 0);
        assert_eq!(encrypted_size(1, 1024), 17);
        assert_eq!(encrypted_size(1024, 1024), 1040);
        assert_eq!(encrypted_size(1025, 1024), 1040 + 17);
        assert_eq!(decrypted_size(1040 + 17, 1024), 1025);
        assert_eq!(out_chunk_size(1024), 1040);
    }

    #[test]
    fn test_suite_lookup() {
        assert_eq!(CipherSuite::from_name("aes-gcm").unwrap(), CipherSuite::AesGcm);
        assert_eq!(CipherSuite::AesGcm.name(), "aes-gcm");
        assert!(matches!(
            CipherSuite::from_name("chacha"),
            Err(SecsendError::UnsupportedAlgorithm(name)) if name == "chacha"
        ));
    }

    #[test]
    fn test_debug_redacted() {
        let dbg = format!("{:?}", ctx());
        assert!(dbg.contains("REDACTED"));
    }

    proptest! {
        #[test]
        fn sizes_are_inverse(n in 0u64..10_000_000, c in 1u64..100_000) {
            prop_assert_eq!(decrypted_size(encrypted_size(n, c), c), n);
        }

        #[test]
        fn roundtrip_any_index(data in proptest::collection::vec(any::<u8>(), 0..2048), idx in any::<u64>()) {
            let c = ctx();
            let sealed = c.encrypt(idx, &data).unwrap();
            prop_assert_eq!(c.decrypt(idx, &sealed).unwrap(), data);
        }

        #[test]
        fn wrong_index_fails(data in proptest::collection::vec(any::<u8>(), 0..256), i in any::<u64>(), j in any::<u64>()) {
            prop_assume!(i != j);
            let c = ctx();
            let sealed = c.encrypt(i, &data).unwrap();
            prop_assert!(c.decrypt(j, &sealed).is_err());
        }
    }
}
