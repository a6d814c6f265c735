//! Transfer metadata, plaintext and sealed
//!
//! Wire form (JSON, binary fields standard base64):
//! ```text
//! {
//!   "version": 1,
//!   "name": b64(seal_meta(0, utf8(name))),
//!   "mime_type": b64(seal_meta(1, mime)),
//!   "iv": b64(base nonce),
//!   "chunk_size": b64(seal_meta(2, u32_le(chunk_size))),
//!   "algo": "aes-gcm",
//!   "complete": false,
//!   "key_sign": b64(commitment),
//!   "timeout_s": 0,
//!   "timeout_ts": 1700000000        (optional, set by the store on finalize)
//! }
//! ```
//!
//! The sealed fields use the metadata subkey, so their small fixed indices
//! never collide with content chunk nonces.

use serde::{Deserialize, Serialize};

use secsend_core::{SecsendError, SecsendResult};

use crate::chunk::{ChunkCipherContext, CipherSuite};
use crate::keys::BaseKey;
use crate::{Nonce, NONCE_LEN};

/// Current metadata format version
pub const METADATA_VERSION: u32 = 1;

const NAME_IDX: u64 = 0;
const MIME_IDX: u64 = 1;
const CHUNK_SIZE_IDX: u64 = 2;

/// Plaintext view of a transfer's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferMetadata {
    pub version: u32,
    pub name: String,
    pub mime_type: String,
    pub nonce: Nonce,
    /// Plaintext chunk size in bytes
    pub chunk_size: u32,
    pub algo: CipherSuite,
    pub complete: bool,
    pub key_sign: Vec<u8>,
    /// Lifetime after completion, in seconds (0 = never expires)
    pub timeout_s: u64,
}

/// Wire form of the metadata, as stored by the untrusted server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMetadata {
    pub version: u32,
    #[serde(with = "b64")]
    pub name: Vec<u8>,
    #[serde(with = "b64")]
    pub mime_type: Vec<u8>,
    #[serde(with = "b64")]
    pub iv: Vec<u8>,
    #[serde(with = "b64")]
    pub chunk_size: Vec<u8>,
    pub algo: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(with = "b64")]
    pub key_sign: Vec<u8>,
    #[serde(default)]
    pub timeout_s: u64,
    /// Unix timestamp after which a completed transfer is gone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ts: Option<u64>,
}

impl TransferMetadata {
    /// Metadata for a new, not yet complete upload.
    pub fn new(
        ctx: &ChunkCipherContext,
        name: impl Into<String>,
        mime_type: impl Into<String>,
        chunk_size: u32,
        timeout_s: u64,
    ) -> Self {
        Self {
            version: METADATA_VERSION,
            name: name.into(),
            mime_type: mime_type.into(),
            nonce: *ctx.nonce(),
            chunk_size,
            algo: ctx.suite(),
            complete: false,
            key_sign: ctx.commitment().to_vec(),
            timeout_s,
        }
    }

    /// Seal name, MIME type and chunk size under the metadata subkey.
    pub fn seal(&self, ctx: &ChunkCipherContext) -> SecsendResult<EncryptedMetadata> {
        Ok(EncryptedMetadata {
            version: self.version,
            name: ctx.seal_field(NAME_IDX, self.name.as_bytes())?,
            mime_type: ctx.seal_field(MIME_IDX, self.mime_type.as_bytes())?,
            iv: self.nonce.to_vec(),
            chunk_size: ctx.seal_field(CHUNK_SIZE_IDX, &self.chunk_size.to_le_bytes())?,
            algo: self.algo.name().to_string(),
            complete: self.complete,
            key_sign: self.key_sign.clone(),
            timeout_s: self.timeout_s,
            timeout_ts: None,
        })
    }
}

impl EncryptedMetadata {
    pub fn to_json(&self) -> SecsendResult<Vec<u8>> {
        serde_json::to_vec(self)
            .map_err(|e| SecsendError::InvalidMetadata(format!("serialization: {e}")))
    }

    /// Parse and validate the wire form.
    pub fn from_json(data: &[u8]) -> SecsendResult<Self> {
        let meta: EncryptedMetadata = serde_json::from_slice(data)
            .map_err(|e| SecsendError::InvalidMetadata(format!("deserialization: {e}")))?;
        meta.validate()?;
        Ok(meta)
    }

    /// Algorithm first, then version, then nonce length.
    pub fn validate(&self) -> SecsendResult<()> {
        CipherSuite::from_name(&self.algo)?;
        if self.version != METADATA_VERSION {
            return Err(SecsendError::UnsupportedVersion(self.version));
        }
        self.nonce()?;
        Ok(())
    }

    pub fn suite(&self) -> SecsendResult<CipherSuite> {
        CipherSuite::from_name(&self.algo)
    }

    pub fn nonce(&self) -> SecsendResult<Nonce> {
        self.iv.as_slice().try_into().map_err(|_| {
            SecsendError::InvalidMetadata(format!(
                "iv must be {NONCE_LEN} bytes, got {}",
                self.iv.len()
            ))
        })
    }

    /// Derive the cipher context for `key`, check the key commitment, and open
    /// the sealed fields.
    ///
    /// A commitment mismatch is `InvalidKey`; nothing is decrypted in that case.
    pub fn unlock(&self, key: BaseKey) -> SecsendResult<(ChunkCipherContext, TransferMetadata)> {
        self.validate()?;
        let ctx = self.suite()?.derive(key, self.nonce()?);
        if !ctx.verify_commitment(&self.key_sign) {
            tracing::debug!("key commitment mismatch");
            return Err(SecsendError::InvalidKey);
        }
        let meta = self.open(&ctx)?;
        Ok((ctx, meta))
    }

    /// Open the sealed fields. Any bad tag is `AuthenticationFailure`.
    pub fn open(&self, ctx: &ChunkCipherContext) -> SecsendResult<TransferMetadata> {
        self.validate()?;
        let name = ctx.open_field(NAME_IDX, &self.name)?;
        let mime = ctx.open_field(MIME_IDX, &self.mime_type)?;
        let chunk = ctx.open_field(CHUNK_SIZE_IDX, &self.chunk_size)?;

        let name = String::from_utf8(name)
            .map_err(|_| SecsendError::InvalidMetadata("name is not UTF-8".into()))?;
        let mime_type = String::from_utf8(mime)
            .map_err(|_| SecsendError::InvalidMetadata("MIME type is not UTF-8".into()))?;
        let chunk: [u8; 4] = chunk.as_slice().try_into().map_err(|_| {
            SecsendError::InvalidMetadata(format!("chunk size field is {} bytes", chunk.len()))
        })?;
        let chunk_size = u32::from_le_bytes(chunk);
        if chunk_size == 0 {
            return Err(SecsendError::InvalidMetadata("chunk size is zero".into()));
        }

        Ok(TransferMetadata {
            version: self.version,
            name,
            mime_type,
            nonce: self.nonce()?,
            chunk_size,
            algo: self.suite()?,
            complete: self.complete,
            key_sign: self.key_sign.clone(),
            timeout_s: self.timeout_s,
        })
    }
}

mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD
            .decode(s)
            .map_err(|e| serde::de::Error::custom(format!("base64 decode: {e}")))
    }
}
