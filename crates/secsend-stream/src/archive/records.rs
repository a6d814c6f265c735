//! Zip64 record layouts for a stored (uncompressed), streamed archive.
//!
//! Every record is little-endian. Local headers carry zero sizes and CRC with
//! general purpose bit 3 set; the real values follow the entry data in a
//! Zip64 data descriptor and are repeated in the central directory.

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, Datelike, Timelike, Utc};

const SIG_LOCAL_HEADER: u32 = 0x0403_4b50;
const SIG_DATA_DESCRIPTOR: u32 = 0x0807_4b50;
const SIG_CENTRAL_HEADER: u32 = 0x0201_4b50;
const SIG_ZIP64_EOCD: u32 = 0x0606_4b50;
const SIG_ZIP64_LOCATOR: u32 = 0x0706_4b50;
const SIG_EOCD: u32 = 0x0605_4b50;

/// 4.5, the first version with Zip64. Host byte 0 (MS-DOS attributes).
const VERSION: u16 = 45;
const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;
const FLAGS: u16 = FLAG_DATA_DESCRIPTOR | FLAG_UTF8;
const METHOD_STORED: u16 = 0;

const ZIP64_EXTRA_TAG: u16 = 0x0001;
const ZIP64_EXTRA_BODY: u16 = 8 * 3 + 4;
const ZIP64_EXTRA_LEN: usize = 4 + ZIP64_EXTRA_BODY as usize;

pub const LOCAL_HEADER_FIXED: usize = 30;
pub const CENTRAL_HEADER_FIXED: usize = 46;
pub const DATA_DESCRIPTOR_LEN: usize = 24;
pub const ZIP64_EOCD_LEN: usize = 56;
pub const ZIP64_LOCATOR_LEN: usize = 20;
pub const EOCD_LEN: usize = 22;

/// MS-DOS packed date and time (UTC, 2-second resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// Years outside the representable 1980..=2107 are clamped.
    pub fn from_utc(ts: &DateTime<Utc>) -> Self {
        let (year, month, day, hour, min, sec) = match ts.year() {
            y if y < 1980 => (1980, 1, 1, 0, 0, 0),
            y if y > 2107 => (2107, 12, 31, 23, 59, 58),
            y => (y, ts.month(), ts.day(), ts.hour(), ts.minute(), ts.second()),
        };
        let date = day | (month << 5) | (((year - 1980) as u32) << 9);
        let time = (sec / 2) | (min << 5) | (hour << 11);
        Self {
            time: time as u16,
            date: date as u16,
        }
    }
}

fn put_zip64_extra(out: &mut BytesMut, size: u64, offset: u64) {
    out.put_u16_le(ZIP64_EXTRA_TAG);
    out.put_u16_le(ZIP64_EXTRA_BODY);
    out.put_u64_le(size); // original size
    out.put_u64_le(size); // compressed size
    out.put_u64_le(offset);
    out.put_u32_le(0); // disk start
}

pub fn local_header_len(name: &[u8]) -> usize {
    LOCAL_HEADER_FIXED + name.len() + ZIP64_EXTRA_LEN
}

pub fn central_header_len(name: &[u8]) -> usize {
    CENTRAL_HEADER_FIXED + name.len() + ZIP64_EXTRA_LEN
}

/// Local file header with placeholder CRC and sizes. `name` must fit in u16.
pub fn write_local_header(out: &mut BytesMut, name: &[u8], modified: DosDateTime) {
    out.reserve(local_header_len(name));
    out.put_u32_le(SIG_LOCAL_HEADER);
    out.put_u16_le(VERSION);
    out.put_u16_le(FLAGS);
    out.put_u16_le(METHOD_STORED);
    out.put_u16_le(modified.time);
    out.put_u16_le(modified.date);
    out.put_u32_le(0); // crc
    out.put_u32_le(0); // compressed size
    out.put_u32_le(0); // uncompressed size
    out.put_u16_le(name.len() as u16);
    out.put_u16_le(ZIP64_EXTRA_LEN as u16);
    out.put_slice(name);
    put_zip64_extra(out, 0, 0);
}

pub fn write_data_descriptor(out: &mut BytesMut, crc: u32, size: u64) {
    out.reserve(DATA_DESCRIPTOR_LEN);
    out.put_u32_le(SIG_DATA_DESCRIPTOR);
    out.put_u32_le(crc);
    out.put_u64_le(size);
    out.put_u64_le(size);
}

/// Everything the central directory needs about one finished entry.
#[derive(Debug, Clone)]
pub struct CentralEntry {
    pub name: Vec<u8>,
    pub modified: DosDateTime,
    pub crc: u32,
    pub size: u64,
    pub header_offset: u64,
}

pub fn write_central_header(out: &mut BytesMut, entry: &CentralEntry) {
    out.reserve(central_header_len(&entry.name));
    out.put_u32_le(SIG_CENTRAL_HEADER);
    out.put_u16_le(VERSION); // made by
    out.put_u16_le(VERSION); // needed to extract
    out.put_u16_le(FLAGS);
    out.put_u16_le(METHOD_STORED);
    out.put_u16_le(entry.modified.time);
    out.put_u16_le(entry.modified.date);
    out.put_u32_le(entry.crc);
    out.put_u32_le(u32::MAX); // compressed size, see zip64 extra
    out.put_u32_le(u32::MAX); // uncompressed size
    out.put_u16_le(entry.name.len() as u16);
    out.put_u16_le(ZIP64_EXTRA_LEN as u16);
    out.put_u16_le(0); // comment length
    out.put_u16_le(0); // disk number start
    out.put_u16_le(0); // internal attributes
    out.put_u32_le(0); // external attributes
    out.put_u32_le(u32::MAX); // local header offset, see zip64 extra
    out.put_slice(&entry.name);
    put_zip64_extra(out, entry.size, entry.header_offset);
}

/// Zip64 end-of-central-directory record, its locator, and the classic
/// end record with every field saturated.
pub fn write_end_records(out: &mut BytesMut, entries: u64, cd_size: u64, cd_offset: u64) {
    let eocd64_offset = cd_offset + cd_size;
    out.reserve(ZIP64_EOCD_LEN + ZIP64_LOCATOR_LEN + EOCD_LEN);

    out.put_u32_le(SIG_ZIP64_EOCD);
    out.put_u64_le((ZIP64_EOCD_LEN - 12) as u64);
    out.put_u16_le(VERSION);
    out.put_u16_le(VERSION);
    out.put_u32_le(0); // this disk
    out.put_u32_le(0); // disk with central directory
    out.put_u64_le(entries);
    out.put_u64_le(entries);
    out.put_u64_le(cd_size);
    out.put_u64_le(cd_offset);

    out.put_u32_le(SIG_ZIP64_LOCATOR);
    out.put_u32_le(0);
    out.put_u64_le(eocd64_offset);
    out.put_u32_le(1); // total disks

    out.put_u32_le(SIG_EOCD);
    out.put_u16_le(0);
    out.put_u16_le(0);
    out.put_u16_le(u16::MAX);
    out.put_u16_le(u16::MAX);
    out.put_u32_le(u32::MAX);
    out.put_u32_le(u32::MAX);
    out.put_u16_le(0); // comment length
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_dos_datetime() {
        let ts = Utc.with_ymd_and_hms(2021, 3, 14, 15, 9, 27).unwrap();
        let dos = DosDateTime::from_utc(&ts);
        assert_eq!(dos.date, 14 | (3 << 5) | (41 << 9));
        assert_eq!(dos.time, 13 | (9 << 5) | (15 << 11));
    }

    #[test]
    fn test_dos_datetime_clamps() {
        let old = Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap();
        let dos = DosDateTime::from_utc(&old);
        assert_eq!(dos.date, 1 | (1 << 5));
        assert_eq!(dos.time, 0);
    }

    #[test]
    fn test_record_lengths_match_writers() {
        let name = "fileutf8_é.txt".as_bytes();
        let dos = DosDateTime { time: 0, date: 0 };

        let mut out = BytesMut::new();
        write_local_header(&mut out, name, dos);
        assert_eq!(out.len(), local_header_len(name));
        assert_eq!(&out[..4], &SIG_LOCAL_HEADER.to_le_bytes());

        let mut out = BytesMut::new();
        write_data_descriptor(&mut out, 1, 2);
        assert_eq!(out.len(), DATA_DESCRIPTOR_LEN);

        let mut out = BytesMut::new();
        let entry = CentralEntry {
            name: name.to_vec(),
            modified: dos,
            crc: 7,
            size: 9,
            header_offset: 11,
        };
        write_central_header(&mut out, &entry);
        assert_eq!(out.len(), central_header_len(name));

        let mut out = BytesMut::new();
        write_end_records(&mut out, 1, 2, 3);
        assert_eq!(out.len(), ZIP64_EOCD_LEN + ZIP64_LOCATOR_LEN + EOCD_LEN);
    }

    #[test]
    fn test_end_records_layout() {
        let mut out = BytesMut::new();
        write_end_records(&mut out, 2, 100, 1000);

        // zip64 record size field excludes signature and the field itself
        assert_eq!(&out[4..12], &44u64.to_le_bytes());
        // locator points at the zip64 record, right after the directory
        let loc = &out[ZIP64_EOCD_LEN..];
        assert_eq!(&loc[..4], &SIG_ZIP64_LOCATOR.to_le_bytes());
        assert_eq!(&loc[8..16], &1100u64.to_le_bytes());
        let eocd = &out[ZIP64_EOCD_LEN + ZIP64_LOCATOR_LEN..];
        assert_eq!(&eocd[..4], &SIG_EOCD.to_le_bytes());
        assert_eq!(&eocd[8..10], &u16::MAX.to_le_bytes());
    }
}
