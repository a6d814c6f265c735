//! HTTP `Range: bytes=...` parsing and resolution against the plaintext size.
//!
//! Only a single range is served; a multi-range request is rejected rather
//! than answered with `multipart/byteranges`. Offsets are `u64` throughout.

use std::str::FromStr;

use secsend_core::{SecsendError, SecsendResult};

/// An inclusive byte range (`start..=end`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Length in bytes; `end` is inclusive.
    pub fn len(self) -> u64 {
        debug_assert!(self.start <= self.end);
        self.end - self.start + 1
    }

    pub fn is_empty(self) -> bool {
        self.start > self.end
    }

    /// True when the range covers all of a `total`-byte body.
    pub fn is_full(self, total: u64) -> bool {
        self.start == 0 && total > 0 && self.end == total - 1
    }
}

/// One range-specifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRangeSpec {
    /// `first-last` or `first-`.
    FromTo { start: u64, end: Option<u64> },
    /// `-suffix-length`.
    Suffix { suffix_len: u64 },
}

fn invalid(what: &str) -> SecsendError {
    SecsendError::InvalidRange(what.to_string())
}

fn parse_u64(s: &str, whole: &str) -> SecsendResult<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(invalid(whole));
    }
    s.parse::<u64>().map_err(|_| invalid(whole))
}

/// `a-b`, `a-` or `-n`, without the unit prefix.
impl FromStr for ByteRangeSpec {
    type Err = SecsendError;

    fn from_str(s: &str) -> SecsendResult<Self> {
        let part = s.trim();
        if let Some(suffix) = part.strip_prefix('-') {
            return Ok(ByteRangeSpec::Suffix {
                suffix_len: parse_u64(suffix, s)?,
            });
        }

        let (start, end) = part.split_once('-').ok_or_else(|| invalid(s))?;
        let start = parse_u64(start, s)?;
        let end = if end.trim().is_empty() {
            None
        } else {
            Some(parse_u64(end, s)?)
        };
        if matches!(end, Some(end) if start > end) {
            return Err(invalid(s));
        }
        Ok(ByteRangeSpec::FromTo { start, end })
    }
}

impl ByteRangeSpec {
    /// Clamp to a `len`-byte body. Unsatisfiable ranges are `InvalidRange`.
    pub fn resolve(self, len: u64) -> SecsendResult<ByteRange> {
        let unsatisfiable =
            || SecsendError::InvalidRange(format!("{self:?} not satisfiable for {len} bytes"));
        if len == 0 {
            return Err(unsatisfiable());
        }
        match self {
            ByteRangeSpec::FromTo { start, end } => {
                if start >= len || matches!(end, Some(end) if end < start) {
                    return Err(unsatisfiable());
                }
                let end = end.unwrap_or(len - 1).min(len - 1);
                Ok(ByteRange { start, end })
            }
            ByteRangeSpec::Suffix { suffix_len } => {
                if suffix_len == 0 {
                    return Err(unsatisfiable());
                }
                Ok(ByteRange {
                    start: len.saturating_sub(suffix_len),
                    end: len - 1,
                })
            }
        }
    }
}

/// Parse an HTTP `Range` header value.
///
/// Returns `Ok(None)` when the unit is not `bytes`, which is to be ignored.
pub fn parse_range_header(value: &str) -> SecsendResult<Option<ByteRangeSpec>> {
    let (unit, rest) = value.trim().split_once('=').ok_or_else(|| invalid(value))?;
    if !unit.trim().eq_ignore_ascii_case("bytes") {
        return Ok(None);
    }
    if rest.contains(',') {
        return Err(SecsendError::InvalidRange(
            "multiple ranges are not supported".into(),
        ));
    }
    rest.parse().map(Some)
}
