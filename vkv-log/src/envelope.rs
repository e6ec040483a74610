// Every entry appended to a log is wrapped in a small envelope carrying its
// length and a checksum, so that a torn write at the tail (a page flushed
// mid-entry, e.g. on crash) is detectable and the tail can be truncated
// back to the last good entry on recovery.

use vkv_base::{err, Result};

pub const ENVELOPE_HEADER_LEN: usize = 8;

pub fn encode(entry: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ENVELOPE_HEADER_LEN + entry.len());
    out.extend_from_slice(&(entry.len() as u32).to_le_bytes());
    let checksum = crc32fast::hash(entry);
    out.extend_from_slice(&checksum.to_le_bytes());
    out.extend_from_slice(entry);
    out
}

pub fn encoded_len(entry_len: usize) -> usize {
    ENVELOPE_HEADER_LEN + entry_len
}

// Decodes one entry starting at `buf[0..]`. Returns the payload slice and
// the number of bytes consumed from `buf`, or `None` if `buf` does not yet
// contain a complete entry (the page ended mid-write).
pub fn try_decode(buf: &[u8]) -> Result<Option<(&[u8], usize)>> {
    if buf.len() < ENVELOPE_HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_le_bytes(buf[0..4].try_into().unwrap()) as usize;
    let checksum = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    // An all-zero header means we've hit the unwritten tail of a page.
    if len == 0 && checksum == 0 {
        return Ok(None);
    }
    let total = ENVELOPE_HEADER_LEN + len;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = &buf[ENVELOPE_HEADER_LEN..total];
    let actual = crc32fast::hash(payload);
    if actual != checksum {
        return Err(err("log entry checksum mismatch, tail is corrupt"));
    }
    Ok(Some((payload, total)))
}
