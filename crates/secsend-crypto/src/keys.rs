//! Base key material, subkey derivation, and the hash capability

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{CryptoRng, RngCore};
use secsend_core::{SecsendError, SecsendResult};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::{Nonce, KEY_LEN, NONCE_LEN, SUBKEY_LEN};

pub(crate) const FILE_PREFIX: &[u8] = b"secsend_file";
pub(crate) const META_PREFIX: &[u8] = b"secsend_meta";
pub(crate) const SIGN_PREFIX: &[u8] = b"secsend_sign";

/// One-way hash used for subkey derivation and key commitment.
///
/// Passed explicitly so tests can substitute a recording or fixed implementation.
pub trait KeyHasher {
    /// Hash the concatenation of `parts`.
    fn digest(&self, parts: &[&[u8]]) -> [u8; SUBKEY_LEN];
}

/// The production hasher: plain SHA-256 over the concatenated parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl KeyHasher for Sha256Hasher {
    fn digest(&self, parts: &[&[u8]]) -> [u8; SUBKEY_LEN] {
        let mut h = Sha256::new();
        for part in parts {
            h.update(part);
        }
        h.finalize().into()
    }
}

/// The per-transfer 128-bit base key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct BaseKey {
    bytes: [u8; KEY_LEN],
}

impl BaseKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Unpadded URL-safe base64, the form shared with the recipient.
    pub fn to_text(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.bytes)
    }

    pub fn from_text(s: &str) -> SecsendResult<Self> {
        let mut raw = URL_SAFE_NO_PAD
            .decode(s.trim().trim_end_matches('='))
            .map_err(|_| SecsendError::InvalidKey)?;
        if raw.len() != KEY_LEN {
            raw.zeroize();
            return Err(SecsendError::InvalidKey);
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&raw);
        raw.zeroize();
        Ok(Self { bytes })
    }
}

impl Drop for BaseKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for BaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BaseKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh random base nonce and base key.
pub fn generate<R: RngCore + CryptoRng + ?Sized>(rng: &mut R) -> (Nonce, BaseKey) {
    let mut nonce = [0u8; NONCE_LEN];
    let mut key = [0u8; KEY_LEN];
    rng.fill_bytes(&mut nonce);
    rng.fill_bytes(&mut key);
    (nonce, BaseKey::from_bytes(key))
}

/// `subkey = H(prefix || key)`
pub(crate) fn derive_subkey<H: KeyHasher + ?Sized>(
    hasher: &H,
    key: &BaseKey,
    prefix: &[u8],
) -> [u8; SUBKEY_LEN] {
    hasher.digest(&[prefix, key.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_generate_is_random() {
        let mut rng = rand::thread_rng();
        let (n1, k1) = generate(&mut rng);
        let (n2, k2) = generate(&mut rng);
        assert_ne!(n1, n2);
        assert_ne!(k1.as_bytes(), k2.as_bytes());
    }

    #[test]
    fn test_generate_deterministic_with_seeded_rng() {
        let (n1, k1) = generate(&mut StdRng::seed_from_u64(7));
        let (n2, k2) = generate(&mut StdRng::seed_from_u64(7));
        assert_eq!(n1, n2);
        assert_eq!(k1, k2);
    }

    #[test]
    fn test_subkeys_are_domain_separated() {
        let key = BaseKey::from_bytes([42u8; KEY_LEN]);
        let file = derive_subkey(&Sha256Hasher, &key, FILE_PREFIX);
        let meta = derive_subkey(&Sha256Hasher, &key, META_PREFIX);
        assert_ne!(file, meta);
        assert_eq!(file, derive_subkey(&Sha256Hasher, &key, FILE_PREFIX));
    }

    #[test]
    fn test_sha256_hasher_concatenates() {
        let split = Sha256Hasher.digest(&[b"secsend_", b"file"]);
        let whole = Sha256Hasher.digest(&[b"secsend_file"]);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_key_text_roundtrip() {
        let key = BaseKey::from_bytes([0xFBu8; KEY_LEN]);
        let text = key.to_text();
        assert!(!text.contains('='));
        assert!(!text.contains('+') && !text.contains('/'));
        assert_eq!(BaseKey::from_text(&text).unwrap(), key);
    }

    #[test]
    fn test_key_text_rejects_wrong_length() {
        let short = URL_SAFE_NO_PAD.encode([1u8; 8]);
        assert!(matches!(
            BaseKey::from_text(&short),
            Err(SecsendError::InvalidKey)
        ));
        assert!(BaseKey::from_text("***").is_err());
    }

    #[test]
    fn test_debug_redacted() {
        let key = BaseKey::from_bytes([1u8; KEY_LEN]);
        let dbg = format!("{key:?}");
        assert!(dbg.contains("REDACTED"));
    }
}
