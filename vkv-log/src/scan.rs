// Scan iterators walk entries in address order between two addresses.
// `BufferingMode` controls how many pages ahead of the current read
// position are speculatively fetched from the device while a caller is
// still consuming the current one -- plain prefetch depth, nothing fancier.

use vkv_base::{Address, Result};

use crate::allocator::LogAllocator;
use crate::envelope;

// How many pages ahead of the current read position the scanner fetches
// speculatively while the caller is still consuming the current one. Only
// `NoBuffering` and `Single` affect behavior here; `Double` is accepted for
// compatibility with callers tuned against the fold/snapshot checkpoint
// path, which reads two pages at a time (the current one and the one being
// copied out).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BufferingMode {
    NoBuffering,
    Single,
    Double,
}

impl BufferingMode {
    fn prefetch_depth(self) -> usize {
        match self {
            BufferingMode::NoBuffering => 0,
            BufferingMode::Single => 1,
            BufferingMode::Double => 2,
        }
    }
}

pub struct Scanner<'a> {
    log: &'a LogAllocator,
    cursor: Address,
    end: Address,
    mode: BufferingMode,
    cur_page_num: Option<u64>,
    cur_page: Vec<u8>,
    next_page: Option<(u64, Vec<u8>)>,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(log: &'a LogAllocator, begin: Address, end: Address, mode: BufferingMode) -> Self {
        Scanner {
            log,
            cursor: begin,
            end,
            mode,
            cur_page_num: None,
            cur_page: Vec::new(),
            next_page: None,
        }
    }

    async fn page_for(&mut self, page_num: u64) -> Result<()> {
        if self.cur_page_num == Some(page_num) {
            return Ok(());
        }
        if let Some((num, buf)) = self.next_page.take() {
            if num == page_num {
                self.cur_page = buf;
                self.cur_page_num = Some(page_num);
                self.prefetch_next(page_num).await?;
                return Ok(());
            }
        }
        self.cur_page = self.log.read_page(page_num).await?;
        self.cur_page_num = Some(page_num);
        self.prefetch_next(page_num).await?;
        Ok(())
    }

    async fn prefetch_next(&mut self, from_page: u64) -> Result<()> {
        if self.mode.prefetch_depth() == 0 {
            return Ok(());
        }
        let next_num = from_page + 1;
        if next_num * self.log.page_size() >= self.end.0 {
            return Ok(());
        }
        let buf = self.log.read_page(next_num).await?;
        self.next_page = Some((next_num, buf));
        Ok(())
    }

    pub async fn next(&mut self) -> Result<Option<(Address, Vec<u8>)>> {
        loop {
            if self.cursor.0 >= self.end.0 {
                return Ok(None);
            }
            let page_size = self.log.page_size();
            let page_num = self.cursor.0 / page_size;
            let offset = (self.cursor.0 % page_size) as usize;
            self.page_for(page_num).await?;
            if offset >= self.cur_page.len() {
                self.cursor = Address((page_num + 1) * page_size);
                continue;
            }
            match envelope::try_decode(&self.cur_page[offset..])? {
                Some((payload, consumed)) => {
                    let addr = self.cursor;
                    self.cursor = Address(self.cursor.0 + consumed as u64);
                    return Ok(Some((addr, payload.to_vec())));
                }
                None => {
                    // Either the page ends here (move to the next one) or
                    // we've hit the unwritten/corrupt tail of the log.
                    self.cursor = Address((page_num + 1) * page_size);
                    if self.cursor.0 >= self.end.0 {
                        return Ok(None);
                    }
                }
            }
        }
    }
}

impl LogAllocator {
    pub fn scan(&self, begin: Address, end: Address, mode: BufferingMode) -> Scanner<'_> {
        Scanner::new(self, begin, end, mode)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use test_log::test;
    use vkv_device::{Device, MemDevice};

    #[test(tokio::test)]
    async fn scan_yields_entries_in_order() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 8));
        let log = LogAllocator::new(device, 4096, 2);
        let mut addrs = vec![];
        for i in 0..20u8 {
            addrs.push(log.append(&[i; 10]).await.unwrap());
        }
        log.flush().await.unwrap();
        let tail = log.tail_address().await;
        let mut scanner = log.scan(Address(0), tail, BufferingMode::NoBuffering);
        let mut i = 0u8;
        while let Some((addr, payload)) = scanner.next().await.unwrap() {
            assert_eq!(addr, addrs[i as usize]);
            assert_eq!(payload, vec![i; 10]);
            i += 1;
        }
        assert_eq!(i, 20);
    }

    #[test(tokio::test)]
    async fn scan_stops_at_end_address() {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 8));
        let log = LogAllocator::new(device, 4096, 2);
        let a0 = log.append(b"one").await.unwrap();
        let mid = log.tail_address().await;
        log.append(b"two").await.unwrap();
        log.flush().await.unwrap();
        let mut scanner = log.scan(Address(0), mid, BufferingMode::Single);
        let (addr, payload) = scanner.next().await.unwrap().unwrap();
        assert_eq!(addr, a0);
        assert_eq!(payload, b"one");
        assert!(scanner.next().await.unwrap().is_none());
    }
}
