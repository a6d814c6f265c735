//! secsend-transfer: one upload or download attempt, end to end
//!
//! A session owns the composed stream pipeline for a single attempt and is
//! dropped when the attempt ends. Anything that outlives it (the root id and
//! the key) is what a later [`UploadSession::resume`] needs.

pub mod download;
pub mod info;
pub mod range;
pub mod response;
pub mod source;
pub mod upload;

pub use download::DownloadSession;
pub use info::{delete_transfer, transfer_info, TransferInfo};
pub use range::{parse_range_header, ByteRange, ByteRangeSpec};
pub use response::ResponseHeaders;
pub use source::UploadSource;
pub use upload::{UploadOptions, UploadSession};

/// Progress callback type (bytes_done, bytes_total, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;
