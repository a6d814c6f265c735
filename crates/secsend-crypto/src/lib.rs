//! secsend-crypto: end-to-end encryption of transfer content and metadata
//!
//! Every transfer has one random 16-byte base key and one random 12-byte base
//! nonce. Nothing is ever keyed by the base key directly:
//! ```text
//! base key (16 bytes, random, shared out of band)
//!   ├── file subkey     = SHA-256("secsend_file" || key)  → AES-256-GCM over content chunks
//!   ├── metadata subkey = SHA-256("secsend_meta" || key)  → AES-256-GCM over name/MIME/chunk size
//!   └── commitment      = SHA-256("secsend_sign" || nonce || key), stored in clear
//!
//! chunk nonce(i) = base nonce with its low 8 bytes (LE u64) incremented by i
//! ```

pub mod chunk;
pub mod commit;
pub mod keys;
pub mod metadata;

pub use chunk::{decrypted_size, encrypted_size, out_chunk_size, ChunkCipherContext, CipherSuite};
pub use commit::{commit, verify};
pub use keys::{generate, BaseKey, KeyHasher, Sha256Hasher};
pub use metadata::{EncryptedMetadata, TransferMetadata, METADATA_VERSION};

/// Size of a base key in bytes
pub const KEY_LEN: usize = 16;

/// Size of a GCM nonce
pub const NONCE_LEN: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_LEN: usize = 16;

/// Size of a derived subkey (full SHA-256 digest)
pub const SUBKEY_LEN: usize = 32;

/// Wire identifier of the only supported suite
pub const ALGO_AES_GCM: &str = "aes-gcm";

/// A 12-byte nonce
pub type Nonce = [u8; NONCE_LEN];
