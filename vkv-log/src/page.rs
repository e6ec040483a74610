use vkv_device::{round_up_to_sector, SECTOR_SIZE};

// One fixed-size in-memory frame of the log. Pages map 1:1 onto device
// segments: page number N lives in segment N, always at offset 0, which
// keeps the address arithmetic (address / page_size, address % page_size)
// trivial and lets truncation simply delete whole segments.
pub struct Page {
    pub buf: Vec<u8>,
    pub written: usize,
    pub flushed: usize,
}

impl Page {
    pub fn new(page_size: usize) -> Self {
        Page {
            buf: vec![0u8; page_size],
            written: 0,
            flushed: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.written
    }

    pub fn append(&mut self, bytes: &[u8]) {
        let end = self.written + bytes.len();
        self.buf[self.written..end].copy_from_slice(bytes);
        self.written = end;
    }

    // The byte range that still needs to reach the device, rounded up to a
    // whole number of sectors so `Device::write`'s alignment contract holds.
    pub fn unflushed_range(&self) -> Option<(usize, usize)> {
        if self.flushed >= self.written {
            return None;
        }
        let start = self.flushed - (self.flushed % SECTOR_SIZE);
        let end = round_up_to_sector(self.written).min(self.buf.len());
        Some((start, end))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn append_and_remaining() {
        let mut p = Page::new(64);
        assert_eq!(p.remaining(), 64);
        p.append(b"hello");
        assert_eq!(p.remaining(), 59);
        assert_eq!(&p.buf[0..5], b"hello");
    }

    #[test]
    fn unflushed_range_grows() {
        let mut p = Page::new(SECTOR_SIZE * 2);
        assert_eq!(p.unflushed_range(), None);
        p.append(&vec![1u8; 10]);
        let (start, end) = p.unflushed_range().unwrap();
        assert_eq!(start, 0);
        assert_eq!(end, SECTOR_SIZE);
        p.flushed = p.written;
        assert_eq!(p.unflushed_range(), None);
    }
}
