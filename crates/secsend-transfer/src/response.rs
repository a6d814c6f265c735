//! Response headers for serving a decrypted download over HTTP.

use secsend_crypto::TransferMetadata;

use crate::range::ByteRange;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeaders {
    /// 200, or 206 when a range was requested
    pub status: u16,
    pub content_length: u64,
    pub content_range: Option<String>,
    pub content_type: String,
    pub content_disposition: String,
}

impl ResponseHeaders {
    /// `range` is the resolved request range, if the request carried one.
    pub fn new(meta: &TransferMetadata, total: u64, range: Option<ByteRange>, inline: bool) -> Self {
        // never let the browser render stored HTML
        let content_type = match meta.mime_type.as_str() {
            "text/html" => "text/plain".to_string(),
            other => other.to_string(),
        };
        let disposition = if inline { "inline" } else { "attachment" };
        let content_disposition = format!(
            "{disposition}; filename=\"{}\"",
            meta.name.replace(['"', '\\'], "_")
        );

        let (status, content_length, content_range) = match range {
            Some(r) => (
                206,
                r.len(),
                Some(format!("bytes {}-{}/{total}", r.start, r.end)),
            ),
            None => (200, total, None),
        };

        Self {
            status,
            content_length,
            content_range,
            content_type,
            content_disposition,
        }
    }

    /// Header name/value pairs, in a fixed order.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![
            ("Content-Type", self.content_type.clone()),
            ("Content-Length", self.content_length.to_string()),
            ("Content-Disposition", self.content_disposition.clone()),
            ("Accept-Ranges", "bytes".to_string()),
        ];
        if let Some(range) = &self.content_range {
            out.push(("Content-Range", range.clone()));
        }
        out
    }
}
