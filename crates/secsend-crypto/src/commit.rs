//! Key commitment
//!
//! AEAD tags only authenticate chunk by chunk. The commitment binds the base
//! key to the transfer's base nonce, so a resuming uploader or a downloader can
//! reject a wrong key before producing any output.

use subtle::ConstantTimeEq;

use crate::keys::{BaseKey, KeyHasher, SIGN_PREFIX};
use crate::{Nonce, SUBKEY_LEN};

/// `tag = H("secsend_sign" || nonce || key)`
pub fn commit<H: KeyHasher + ?Sized>(hasher: &H, key: &BaseKey, nonce: &Nonce) -> [u8; SUBKEY_LEN] {
    hasher.digest(&[SIGN_PREFIX, nonce, key.as_bytes()])
}

/// Check a stored commitment against the key in hand. Constant time in the tag contents.
pub fn verify<H: KeyHasher + ?Sized>(hasher: &H, tag: &[u8], key: &BaseKey, nonce: &Nonce) -> bool {
    let expected = commit(hasher, key, nonce);
    // ct_eq on slices of different length returns false without comparing contents
    bool::from(expected.as_slice().ct_eq(tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Sha256Hasher;
    use crate::KEY_LEN;

    #[test]
    fn test_commit_verify() {
        let key = BaseKey::from_bytes([3u8; KEY_LEN]);
        let nonce = [9u8; 12];
        let tag = commit(&Sha256Hasher, &key, &nonce);
        assert!(verify(&Sha256Hasher, &tag, &key, &nonce));
    }

    #[test]
    fn test_verify_wrong_key_or_nonce() {
        let key = BaseKey::from_bytes([3u8; KEY_LEN]);
        let key2 = BaseKey::from_bytes([4u8; KEY_LEN]);
        let nonce = [9u8; 12];
        let tag = commit(&Sha256Hasher, &key, &nonce);

        assert!(!verify(&Sha256Hasher, &tag, &key2, &nonce));
        assert!(!verify(&Sha256Hasher, &tag, &key, &[8u8; 12]));
    }

    #[test]
    fn test_verify_truncated_tag() {
        let key = BaseKey::from_bytes([3u8; KEY_LEN]);
        let nonce = [9u8; 12];
        let tag = commit(&Sha256Hasher, &key, &nonce);
        assert!(!verify(&Sha256Hasher, &tag[..16], &key, &nonce));
        assert!(!verify(&Sha256Hasher, &[], &key, &nonce));
    }

    #[test]
    fn test_commit_differs_from_subkeys() {
        let key = BaseKey::from_bytes([3u8; KEY_LEN]);
        let nonce = [0u8; 12];
        let tag = commit(&Sha256Hasher, &key, &nonce);
        let file = crate::keys::derive_subkey(&Sha256Hasher, &key, crate::keys::FILE_PREFIX);
        assert_ne!(tag, file);
    }
}
