// Append-only paged log. Addresses are global byte offsets; address / page_size
// gives the page (and device segment) number, address % page_size the offset
// within it. The page ring only keeps `ring_capacity` pages resident in
// memory -- older, already-flushed pages are dropped and re-fetched from the
// device on demand by a scan that still needs them.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use vkv_base::{err, Address, Result};
use vkv_device::Device;

use crate::envelope;
use crate::page::Page;

pub struct LogAllocator {
    device: Arc<dyn Device>,
    page_size: u64,
    ring_capacity: usize,
    state: Mutex<State>,
}

struct State {
    // pages[0] is page number `base_page_num`.
    pages: VecDeque<Page>,
    base_page_num: u64,
    tail_address: Address,
    begin_address: Address,
    flushed_address: Address,
}

impl LogAllocator {
    pub fn new(device: Arc<dyn Device>, page_size: u64, ring_capacity: usize) -> Self {
        let mut pages = VecDeque::with_capacity(ring_capacity);
        pages.push_back(Page::new(page_size as usize));
        LogAllocator {
            device,
            page_size,
            ring_capacity,
            state: Mutex::new(State {
                pages,
                base_page_num: 0,
                tail_address: Address(0),
                begin_address: Address(0),
                flushed_address: Address(0),
            }),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    pub async fn tail_address(&self) -> Address {
        self.state.lock().await.tail_address
    }

    pub async fn begin_address(&self) -> Address {
        self.state.lock().await.begin_address
    }

    pub async fn flushed_address(&self) -> Address {
        self.state.lock().await.flushed_address
    }

    // Reserves space for `entry`, returns its logical address. Rolls over to
    // a fresh page (flushing the old one to the device first) if `entry`
    // would not fit in the remainder of the current page.
    pub async fn append(&self, entry: &[u8]) -> Result<Address> {
        let total = envelope::encoded_len(entry.len());
        if total as u64 > self.page_size {
            return Err(err("entry larger than one log page"));
        }
        let encoded = envelope::encode(entry);
        let mut state = self.state.lock().await;
        let cur_idx = state.pages.len() - 1;
        if state.pages[cur_idx].remaining() < total {
            self.roll_page(&mut state).await?;
        }
        let cur_idx = state.pages.len() - 1;
        let page_num = state.base_page_num + cur_idx as u64;
        let offset_in_page = state.pages[cur_idx].written as u64;
        let address = Address(page_num * self.page_size + offset_in_page);
        state.pages[cur_idx].append(&encoded);
        state.tail_address = Address(address.0 + encoded.len() as u64);
        trace!(target: "vkv::log", address = address.0, len = entry.len(), "appended");
        Ok(address)
    }

    async fn roll_page(&self, state: &mut State) -> Result<()> {
        let last_idx = state.pages.len() - 1;
        let page_num = state.base_page_num + last_idx as u64;
        self.flush_page(state, page_num).await?;
        state
            .pages
            .push_back(Page::new(self.page_size as usize));
        while state.pages.len() > self.ring_capacity {
            state.pages.pop_front();
            state.base_page_num += 1;
        }
        Ok(())
    }

    async fn flush_page(&self, state: &mut State, page_num: u64) -> Result<()> {
        let idx = (page_num - state.base_page_num) as usize;
        let Some((start, end)) = state.pages[idx].unflushed_range() else {
            return Ok(());
        };
        let buf = state.pages[idx].buf[start..end].to_vec();
        self.device.write(page_num as u32, start as u64, &buf).await?;
        state.pages[idx].flushed = state.pages[idx].written;
        let flushed_global = page_num * self.page_size + state.pages[idx].flushed as u64;
        if flushed_global > state.flushed_address.0 {
            state.flushed_address = Address(flushed_global);
        }
        debug!(target: "vkv::log", page = page_num, upto = state.pages[idx].flushed, "flushed page");
        Ok(())
    }

    // Flushes all outstanding writes up to (and including) the current tail,
    // ensuring durable scans can see everything appended so far. Called
    // before a checkpoint commit.
    pub async fn flush(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        let last_idx = state.pages.len() - 1;
        let page_num = state.base_page_num + last_idx as u64;
        self.flush_page(&mut state, page_num).await?;
        Ok(())
    }

    // Advances `begin_address`, dropping resident pages that are now fully
    // covered and deleting their backing segments. `new_begin` must not
    // exceed `tail_address`.
    pub async fn truncate(&self, new_begin: Address) -> Result<()> {
        let mut state = self.state.lock().await;
        if new_begin.0 > state.tail_address.0 {
            return Err(err("cannot truncate past tail"));
        }
        if new_begin.0 <= state.begin_address.0 {
            return Ok(());
        }
        state.begin_address = new_begin;
        let new_begin_page = new_begin.0 / self.page_size;
        while state.base_page_num < new_begin_page && !state.pages.is_empty() {
            state.pages.pop_front();
            let dropped = state.base_page_num;
            state.base_page_num += 1;
            self.device.delete_segment(dropped as u32).await?;
        }
        Ok(())
    }

    // Reads and envelope-decodes the single entry at `address`, fetching
    // the owning page from the device first if it is no longer resident.
    // Used for random-access chain traversal (hash index chasing), as
    // opposed to `scan`'s sequential walk.
    pub async fn read_entry(&self, address: Address) -> Result<Vec<u8>> {
        let page_num = address.0 / self.page_size;
        let offset = (address.0 % self.page_size) as usize;
        let page = self.read_page(page_num).await?;
        match envelope::try_decode(&page[offset..])? {
            Some((payload, _consumed)) => Ok(payload.to_vec()),
            None => Err(err("no log entry at address")),
        }
    }

    // Reads the raw envelope-decoded payload at `address`, fetching the
    // owning page from the device if it is no longer resident.
    pub(crate) async fn read_page(&self, page_num: u64) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        if page_num >= state.base_page_num
            && (page_num - state.base_page_num) < state.pages.len() as u64
        {
            let idx = (page_num - state.base_page_num) as usize;
            return Ok(state.pages[idx].buf.clone());
        }
        drop(state);
        self.device.read(page_num as u32, 0, self.page_size as usize).await
    }

    pub(crate) fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use vkv_device::MemDevice;

    fn small_allocator() -> LogAllocator {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 4));
        LogAllocator::new(device, 4096, 2)
    }

    #[test(tokio::test)]
    async fn append_advances_tail() {
        let log = small_allocator();
        let a0 = log.append(b"one").await.unwrap();
        let a1 = log.append(b"two").await.unwrap();
        assert_eq!(a0, Address(0));
        assert!(a1.0 > a0.0);
        assert_eq!(log.tail_address().await, Address(a1.0 + envelope::encoded_len(3) as u64));
    }

    #[test(tokio::test)]
    async fn rolls_over_pages() {
        let log = small_allocator();
        // Each entry is small; force enough entries to exceed one page.
        let entry = vec![7u8; 100];
        let mut addrs = vec![];
        for _ in 0..50 {
            addrs.push(log.append(&entry).await.unwrap());
        }
        let page_size = log.page_size();
        let first_page = addrs[0].0 / page_size;
        let last_page = addrs.last().unwrap().0 / page_size;
        assert!(last_page > first_page, "expected a page rollover");
    }

    #[test(tokio::test)]
    async fn read_entry_random_access() {
        let log = small_allocator();
        let a0 = log.append(b"one").await.unwrap();
        let a1 = log.append(b"two").await.unwrap();
        log.flush().await.unwrap();
        assert_eq!(log.read_entry(a1).await.unwrap(), b"two");
        assert_eq!(log.read_entry(a0).await.unwrap(), b"one");
    }

    #[test(tokio::test)]
    async fn truncate_advances_begin_and_deletes_segments() {
        let log = small_allocator();
        let entry = vec![7u8; 100];
        for _ in 0..50 {
            log.append(&entry).await.unwrap();
        }
        log.flush().await.unwrap();
        let tail = log.tail_address().await;
        let page_size = log.page_size();
        let new_begin = Address((tail.0 / page_size) * page_size);
        log.truncate(new_begin).await.unwrap();
        assert_eq!(log.begin_address().await, new_begin);
    }
}
