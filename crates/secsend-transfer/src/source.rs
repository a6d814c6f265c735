//! Plaintext sources for an upload.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncSeekExt;
use tokio_util::io::ReaderStream;

use secsend_core::{SecsendError, SecsendResult};
use secsend_stream::{Archive, ArchiveEntry, ByteStream, ByteStreamExt};

pub const DEFAULT_MIME: &str = "application/octet-stream";
pub const ARCHIVE_MIME: &str = "application/zip";

pub enum UploadSource {
    File { path: PathBuf, size: u64 },
    Memory { name: String, data: Bytes },
    /// Several files streamed as one zip. Not seekable: reopening regenerates
    /// the archive and skips forward.
    Archive { name: String, archive: Archive },
}

impl UploadSource {
    pub async fn file(path: &Path) -> SecsendResult<Self> {
        let meta = tokio::fs::metadata(path).await?;
        if !meta.is_file() {
            return Err(SecsendError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            )));
        }
        Ok(UploadSource::File {
            path: path.to_path_buf(),
            size: meta.len(),
        })
    }

    pub fn memory(name: impl Into<String>, data: Bytes) -> Self {
        UploadSource::Memory {
            name: name.into(),
            data,
        }
    }

    /// One path uploads the file as is; several become a zip named
    /// `<archive_name>.zip` (default `archive.zip`).
    pub async fn from_paths(paths: &[PathBuf], archive_name: Option<&str>) -> SecsendResult<Self> {
        match paths {
            [] => Err(SecsendError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "nothing to upload",
            ))),
            [single] => Self::file(single).await,
            many => {
                let mut archive = Archive::new();
                for path in many {
                    archive.add(ArchiveEntry::from_path(path).await?)?;
                }
                let stem = archive_name.unwrap_or("archive");
                Ok(UploadSource::Archive {
                    name: format!("{stem}.zip"),
                    archive,
                })
            }
        }
    }

    /// Plaintext length in bytes.
    pub fn len(&self) -> u64 {
        match self {
            UploadSource::File { size, .. } => *size,
            UploadSource::Memory { data, .. } => data.len() as u64,
            UploadSource::Archive { archive, .. } => archive.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_seekable(&self) -> bool {
        !matches!(self, UploadSource::Archive { .. })
    }

    pub fn default_name(&self) -> String {
        match self {
            UploadSource::File { path, .. } => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            UploadSource::Memory { name, .. } | UploadSource::Archive { name, .. } => name.clone(),
        }
    }

    pub fn default_mime(&self) -> &'static str {
        match self {
            UploadSource::Archive { .. } => ARCHIVE_MIME,
            _ => DEFAULT_MIME,
        }
    }

    /// Stream the plaintext starting at byte `offset`.
    pub async fn open(self, offset: u64) -> SecsendResult<ByteStream> {
        match self {
            UploadSource::File { path, .. } => {
                let mut file = tokio::fs::File::open(&path).await?;
                if offset > 0 {
                    file.seek(SeekFrom::Start(offset)).await?;
                }
                Ok(ReaderStream::new(file)
                    .map(|r| r.map_err(SecsendError::from))
                    .boxed())
            }
            UploadSource::Memory { data, .. } => {
                let start = (offset.min(data.len() as u64)) as usize;
                Ok(secsend_stream::once(data.slice(start..)))
            }
            UploadSource::Archive { archive, .. } => Ok(archive.into_stream().skip_prefix(offset)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secsend_stream::collect;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_source_seeks() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let src = UploadSource::file(&path).await.unwrap();
        assert_eq!(src.len(), 10);
        assert_eq!(src.default_name(), "data.bin");
        assert!(src.is_seekable());
        assert_eq!(collect(src.open(4).await.unwrap()).await.unwrap(), b"456789");
    }

    #[tokio::test]
    async fn test_directory_rejected() {
        let tmp = TempDir::new().unwrap();
        assert!(UploadSource::file(tmp.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_several_paths_become_archive() {
        let tmp = TempDir::new().unwrap();
        let a = tmp.path().join("a.txt");
        let b = tmp.path().join("b.txt");
        std::fs::write(&a, b"aaa").unwrap();
        std::fs::write(&b, b"bbbb").unwrap();

        let src = UploadSource::from_paths(&[b.clone(), a.clone()], Some("docs"))
            .await
            .unwrap();
        assert_eq!(src.default_name(), "docs.zip");
        assert_eq!(src.default_mime(), ARCHIVE_MIME);
        assert!(!src.is_seekable());

        let expected = src.len();
        let full = collect(src.open(0).await.unwrap()).await.unwrap();
        assert_eq!(full.len() as u64, expected);

        let again = UploadSource::from_paths(&[a, b], Some("docs")).await.unwrap();
        let tail = collect(again.open(50).await.unwrap()).await.unwrap();
        assert_eq!(tail, full[50..]);
    }

    #[tokio::test]
    async fn test_memory_source_offset_past_end() {
        let src = UploadSource::memory("m", Bytes::from_static(b"abc"));
        assert_eq!(collect(src.open(10).await.unwrap()).await.unwrap(), b"");
    }
}
