//! CRC-32 (IEEE 802.3, reflected polynomial 0xEDB88320), as used by zip readers.

const POLY: u32 = 0xEDB8_8320;

const TABLE: [u32; 256] = make_table();

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut c = i as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 { POLY ^ (c >> 1) } else { c >> 1 };
            k += 1;
        }
        table[i] = c;
        i += 1;
    }
    table
}

/// Running CRC-32 over a byte stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32 {
    value: u32,
}

impl Crc32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.value = crc32(data, self.value);
    }

    pub fn value(&self) -> u32 {
        self.value
    }
}

/// Continue a CRC: `crc32(b, crc32(a, 0)) == crc32(a ++ b, 0)`.
pub fn crc32(data: &[u8], prev: u32) -> u32 {
    let mut c = !prev;
    for &b in data {
        c = TABLE[((c ^ b as u32) & 0xFF) as usize] ^ (c >> 8);
    }
    !c
}
