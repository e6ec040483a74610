// A fixed-capacity pool of sector-aligned buffers. Device reads and writes
// borrow a buffer for the duration of the I/O; the buffer is returned to the
// pool (guaranteed, on all exit paths, via Drop) rather than freed, so the
// backing allocation survives exactly as long as the in-flight operation
// needs it and no caller can accidentally let the kernel reuse memory the
// device is still writing into.
//
// Per spec: exhaustion returns `None` rather than blocking or growing --
// callers either wait for a buffer to free up or fall back to a transient
// (non-pooled) allocation.

use std::sync::Mutex;

pub const SECTOR_SIZE: usize = 4096;

pub fn round_up_to_sector(len: usize) -> usize {
    (len + SECTOR_SIZE - 1) / SECTOR_SIZE * SECTOR_SIZE
}

struct Inner {
    free: Vec<Vec<u8>>,
    buffer_len: usize,
    capacity: usize,
    outstanding: usize,
}

pub struct BufferPool {
    inner: Mutex<Inner>,
}

// A pinned, sector-aligned buffer on loan from a `BufferPool`. Returns
// itself to the pool's free list on drop; if the pool has since been
// dropped the buffer is simply freed.
pub struct PinnedBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl<'a> PinnedBuffer<'a> {
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap()
    }

    pub fn len(&self) -> usize {
        self.buf.as_ref().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PinnedBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        let buffer_len = round_up_to_sector(buffer_len);
        let free = (0..capacity).map(|_| vec![0u8; buffer_len]).collect();
        BufferPool {
            inner: Mutex::new(Inner {
                free,
                buffer_len,
                capacity,
                outstanding: 0,
            }),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.lock().unwrap().buffer_len
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().capacity
    }

    pub fn outstanding(&self) -> usize {
        self.inner.lock().unwrap().outstanding
    }

    // Returns None ("buffer not available") on exhaustion rather than
    // blocking; the caller decides whether to wait or allocate transiently.
    pub fn try_acquire(&self) -> Option<PinnedBuffer<'_>> {
        let mut inner = self.inner.lock().unwrap();
        let buf = inner.free.pop()?;
        inner.outstanding += 1;
        Some(PinnedBuffer {
            pool: self,
            buf: Some(buf),
        })
    }

    fn release(&self, mut buf: Vec<u8>) {
        let mut inner = self.inner.lock().unwrap();
        buf.iter_mut().for_each(|b| *b = 0);
        inner.outstanding = inner.outstanding.saturating_sub(1);
        if inner.free.len() < inner.capacity {
            inner.free.push(buf);
        }
    }
}
