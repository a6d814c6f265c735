//! Streaming multi-file archive (stored Zip64)
//!
//! The archive is produced lazily, entry data is never buffered as a whole,
//! and its exact byte length is known before the first byte is read. Entries
//! are always emitted sorted by name, so the same entry set yields the same
//! bytes no matter the insertion order. Resumed uploads rely on that to
//! regenerate the archive and skip what the server already holds.

pub mod crc32;
pub mod records;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use secsend_core::{SecsendError, SecsendResult};
use tokio_util::io::ReaderStream;

use crate::ByteStream;
use self::crc32::Crc32;
use self::records::{CentralEntry, DosDateTime};

/// Where an entry's bytes come from.
#[derive(Debug, Clone)]
pub enum EntrySource {
    Memory(Bytes),
    File(PathBuf),
}

impl EntrySource {
    async fn open(&self) -> SecsendResult<ByteStream> {
        match self {
            EntrySource::Memory(data) => Ok(crate::once(data.clone())),
            EntrySource::File(path) => {
                let file = tokio::fs::File::open(path).await?;
                Ok(ReaderStream::new(file)
                    .map(|r| r.map_err(SecsendError::from))
                    .boxed())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub name: String,
    pub modified: DateTime<Utc>,
    /// Declared size; the streamed data must match it exactly.
    pub size: u64,
    pub source: EntrySource,
}

impl ArchiveEntry {
    pub fn from_bytes(name: impl Into<String>, modified: DateTime<Utc>, data: Bytes) -> Self {
        Self {
            name: name.into(),
            modified,
            size: data.len() as u64,
            source: EntrySource::Memory(data),
        }
    }

    /// Entry for a file on disk, named after its final path component.
    pub async fn from_path(path: &Path) -> SecsendResult<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(SecsendError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                SecsendError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!("{} has no file name", path.display()),
                ))
            })?;
        let modified: DateTime<Utc> = meta.modified()?.into();
        Ok(Self {
            name,
            modified,
            size: meta.len(),
            source: EntrySource::File(path.to_path_buf()),
        })
    }
}

/// A set of entries to serialize as one archive.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names longer than a zip name field (u16) are rejected.
    pub fn add(&mut self, entry: ArchiveEntry) -> SecsendResult<()> {
        if entry.name.len() > u16::MAX as usize {
            return Err(SecsendError::InvalidMetadata(format!(
                "archive entry name is {} bytes",
                entry.name.len()
            )));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in emission order (sorted by name, bytewise).
    pub fn sorted_entries(&self) -> Vec<ArchiveEntry> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| a.name.cmp(&b.name));
        sorted
    }

    /// Exact serialized length.
    pub fn size(&self) -> u64 {
        let per_entry: u64 = self
            .entries
            .iter()
            .map(|e| {
                let name = e.name.as_bytes();
                (records::local_header_len(name)
                    + records::DATA_DESCRIPTOR_LEN
                    + records::central_header_len(name)) as u64
                    + e.size
            })
            .sum();
        per_entry
            + (records::ZIP64_EOCD_LEN + records::ZIP64_LOCATOR_LEN + records::EOCD_LEN) as u64
    }

    pub fn into_stream(self) -> ByteStream {
        let state = ArchiveState {
            pending: self.sorted_entries().into(),
            entry_count: self.entries.len() as u64,
            phase: Phase::NextEntry,
            offset: 0,
            central: Vec::new(),
        };
        stream::unfold(state, |mut st| async move {
            match st.step().await {
                Ok(Some(buf)) => Some((Ok(buf), st)),
                Ok(None) => None,
                Err(e) => {
                    st.phase = Phase::Done;
                    Some((Err(e), st))
                }
            }
        })
        .boxed()
    }
}

struct OpenEntry {
    entry: ArchiveEntry,
    modified: DosDateTime,
    header_offset: u64,
    crc: Crc32,
    read: u64,
    body: ByteStream,
}

enum Phase {
    NextEntry,
    Body(Box<OpenEntry>),
    Done,
}

struct ArchiveState {
    pending: VecDeque<ArchiveEntry>,
    entry_count: u64,
    phase: Phase,
    offset: u64,
    central: Vec<CentralEntry>,
}

impl ArchiveState {
    /// Produce the next non-empty buffer, or `None` once the end records are out.
    async fn step(&mut self) -> SecsendResult<Option<Bytes>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Done) {
                Phase::Done => return Ok(None),
                Phase::NextEntry => {
                    let Some(entry) = self.pending.pop_front() else {
                        return Ok(Some(self.emit_directory()));
                    };
                    let modified = DosDateTime::from_utc(&entry.modified);
                    let body = entry.source.open().await?;
                    let mut out = BytesMut::new();
                    records::write_local_header(&mut out, entry.name.as_bytes(), modified);
                    let header_offset = self.offset;
                    self.offset += out.len() as u64;
                    tracing::debug!(name = %entry.name, offset = header_offset, "archive entry");
                    self.phase = Phase::Body(Box::new(OpenEntry {
                        entry,
                        modified,
                        header_offset,
                        crc: Crc32::new(),
                        read: 0,
                        body,
                    }));
                    return Ok(Some(out.freeze()));
                }
                Phase::Body(mut open) => match open.body.next().await {
                    Some(Ok(buf)) => {
                        if buf.is_empty() {
                            self.phase = Phase::Body(open);
                            continue;
                        }
                        open.crc.update(&buf);
                        open.read += buf.len() as u64;
                        if open.read > open.entry.size {
                            return Err(size_changed(&open));
                        }
                        self.offset += buf.len() as u64;
                        self.phase = Phase::Body(open);
                        return Ok(Some(buf));
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        if open.read != open.entry.size {
                            return Err(size_changed(&open));
                        }
                        let mut out = BytesMut::new();
                        records::write_data_descriptor(&mut out, open.crc.value(), open.read);
                        self.offset += out.len() as u64;
                        let OpenEntry {
                            entry,
                            modified,
                            header_offset,
                            crc,
                            read,
                            ..
                        } = *open;
                        self.central.push(CentralEntry {
                            name: entry.name.into_bytes(),
                            modified,
                            crc: crc.value(),
                            size: read,
                            header_offset,
                        });
                        self.phase = Phase::NextEntry;
                        return Ok(Some(out.freeze()));
                    }
                },
            }
        }
    }

    fn emit_directory(&mut self) -> Bytes {
        let cd_offset = self.offset;
        let mut out = BytesMut::new();
        for entry in &self.central {
            records::write_central_header(&mut out, entry);
        }
        let cd_size = out.len() as u64;
        records::write_end_records(&mut out, self.entry_count, cd_size, cd_offset);
        self.offset += out.len() as u64;
        self.phase = Phase::Done;
        out.freeze()
    }
}

fn size_changed(open: &OpenEntry) -> SecsendError {
    SecsendError::Other(anyhow::anyhow!(
        "archive entry '{}' changed while streaming: declared {} bytes, read {}",
        open.entry.name,
        open.entry.size,
        open.read
    ))
}
