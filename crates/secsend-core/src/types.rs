//! Transfer identifiers
//!
//! Two kinds of identifier name one transfer:
//!   - `RootId` (kind tag 1): returned at registration, grants append/finalize/delete
//!   - `FileId` (kind tag 0): derived one-way from the root, grants read access only
//!
//! Text form is unpadded URL-safe base64 of `kind || id_bytes`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::SecsendError;

/// Raw identifier length (without the kind tag)
pub const ID_LEN: usize = 10;

const FILE_ID_PREFIX: &[u8] = b"secsend_fiid";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IdKind {
    File = 0,
    Root = 1,
}

impl IdKind {
    fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(IdKind::File),
            1 => Some(IdKind::Root),
            _ => None,
        }
    }
}

/// Owner-capable transfer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RootId([u8; ID_LEN]);

/// Read-only transfer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId([u8; ID_LEN]);

impl RootId {
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; ID_LEN];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Derive the read-only identifier: `SHA-256("secsend_fiid" || root)[..10]`.
    pub fn file_id(&self) -> FileId {
        let mut hasher = Sha256::new();
        hasher.update(FILE_ID_PREFIX);
        hasher.update(self.0);
        let digest = hasher.finalize();
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&digest[..ID_LEN]);
        FileId(bytes)
    }
}

impl FileId {
    pub fn from_bytes(bytes: [u8; ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    /// Lowercase hex, used as the storage key for the transfer.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn encode(kind: IdKind, bytes: &[u8; ID_LEN]) -> String {
    let mut raw = Vec::with_capacity(ID_LEN + 1);
    raw.push(kind as u8);
    raw.extend_from_slice(bytes);
    URL_SAFE_NO_PAD.encode(raw)
}

fn decode(s: &str) -> Result<(IdKind, [u8; ID_LEN]), SecsendError> {
    let raw = URL_SAFE_NO_PAD
        .decode(s.trim_end_matches('='))
        .map_err(|_| SecsendError::InvalidId(s.to_string()))?;
    let (tag, id) = raw
        .split_first()
        .ok_or_else(|| SecsendError::InvalidId(s.to_string()))?;
    let kind = IdKind::from_tag(*tag).ok_or_else(|| SecsendError::InvalidId(s.to_string()))?;
    let bytes: [u8; ID_LEN] = id
        .try_into()
        .map_err(|_| SecsendError::InvalidId(s.to_string()))?;
    Ok((kind, bytes))
}

/// Parse either kind of identifier, returning the read-only view.
///
/// A root id is accepted and reduced to its file id; this is what a
/// downloader holding the owner link needs.
pub fn parse_any_file_id(s: &str) -> Result<FileId, SecsendError> {
    match decode(s)? {
        (IdKind::File, bytes) => Ok(FileId(bytes)),
        (IdKind::Root, bytes) => Ok(RootId(bytes).file_id()),
    }
}

impl FromStr for RootId {
    type Err = SecsendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match decode(s)? {
            (IdKind::Root, bytes) => Ok(RootId(bytes)),
            (IdKind::File, _) => Err(SecsendError::InvalidId(s.to_string())),
        }
    }
}

impl FromStr for FileId {
    type Err = SecsendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match decode(s)? {
            (IdKind::File, bytes) => Ok(FileId(bytes)),
            (IdKind::Root, _) => Err(SecsendError::InvalidId(s.to_string())),
        }
    }
}

impl fmt::Display for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(IdKind::Root, &self.0))
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&encode(IdKind::File, &self.0))
    }
}

// Root ids are capabilities; keep them out of logs.
impl fmt::Debug for RootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RootId").field(&"[REDACTED]").finish()
    }
}

impl fmt::Debug for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("FileId").field(&self.to_string()).finish()
    }
}
