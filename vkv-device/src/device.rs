// Sector-aligned async block I/O. `offset` and `len` are sector-aligned;
// reads of an unaligned length are padded up to the next sector and the
// caller trims the result. Failures surface as an error from the async
// call rather than a callback, since every caller in this workspace already
// awaits the I/O -- the "callback with non-zero code" contract from the
// spec becomes a plain `Result`.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use vkv_base::{err, Result};

use crate::buffer_pool::{round_up_to_sector, SECTOR_SIZE};

pub type SegmentId = u32;

#[async_trait::async_trait]
pub trait Device: Send + Sync {
    async fn read(&self, segment_id: SegmentId, offset: u64, len: usize) -> Result<Vec<u8>>;
    async fn write(&self, segment_id: SegmentId, offset: u64, buf: &[u8]) -> Result<()>;
    async fn delete_segment(&self, segment_id: SegmentId) -> Result<()>;
    fn segment_size(&self) -> u64;
}

// A device backed by one file per log segment under `base_dir`.
pub struct FileDevice {
    base_dir: PathBuf,
    segment_size: u64,
    prefix: &'static str,
    // Lazily opened, kept around for reuse across calls. A real deployment
    // would cap this; the workspace's segment count is bounded by
    // checkpoint-triggered truncation so an unbounded map is acceptable here.
    open: Mutex<HashMap<SegmentId, ()>>,
}

impl FileDevice {
    pub fn new(base_dir: impl Into<PathBuf>, segment_size: u64, prefix: &'static str) -> Self {
        FileDevice {
            base_dir: base_dir.into(),
            segment_size,
            prefix,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn path_for(&self, segment_id: SegmentId) -> PathBuf {
        self.base_dir
            .join(format!("{}-{:08}.seg", self.prefix, segment_id))
    }

    async fn open_rw(&self, segment_id: SegmentId) -> Result<File> {
        tokio::fs::create_dir_all(&self.base_dir).await?;
        let path = self.path_for(segment_id);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .await?;
        self.open.lock().unwrap().insert(segment_id, ());
        Ok(file)
    }
}

#[async_trait::async_trait]
impl Device for FileDevice {
    async fn read(&self, segment_id: SegmentId, offset: u64, len: usize) -> Result<Vec<u8>> {
        if offset % SECTOR_SIZE as u64 != 0 {
            return Err(err("read offset not sector-aligned"));
        }
        let padded_len = round_up_to_sector(len);
        let mut file = self.open_rw(segment_id).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; padded_len];
        let mut total = 0;
        loop {
            let n = file.read(&mut buf[total..]).await?;
            if n == 0 {
                break;
            }
            total += n;
            if total == padded_len {
                break;
            }
        }
        // Short reads (e.g. reading the tail of a not-yet-full segment) are
        // zero-padded rather than treated as an error; the log allocator
        // distinguishes "unwritten" from "written" via its own metadata.
        Ok(buf)
    }

    async fn write(&self, segment_id: SegmentId, offset: u64, buf: &[u8]) -> Result<()> {
        if offset % SECTOR_SIZE as u64 != 0 {
            return Err(err("write offset not sector-aligned"));
        }
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(err("write length not sector-aligned"));
        }
        let mut file = self.open_rw(segment_id).await?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        file.write_all(buf).await?;
        file.flush().await?;
        Ok(())
    }

    async fn delete_segment(&self, segment_id: SegmentId) -> Result<()> {
        self.open.lock().unwrap().remove(&segment_id);
        let path = self.path_for(segment_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn segment_size(&self) -> u64 {
        self.segment_size
    }
}

// An in-memory device for tests: no alignment requirements on reads past
// the written length, but still enforces write-side alignment so tests
// exercise the same contract as `FileDevice`.
#[derive(Default)]
pub struct MemDevice {
    segments: Mutex<HashMap<SegmentId, Vec<u8>>>,
    segment_size: u64,
}

impl MemDevice {
    pub fn new(segment_size: u64) -> Self {
        MemDevice {
            segments: Mutex::new(HashMap::new()),
            segment_size,
        }
    }
}

#[async_trait::async_trait]
impl Device for MemDevice {
    async fn read(&self, segment_id: SegmentId, offset: u64, len: usize) -> Result<Vec<u8>> {
        let padded_len = round_up_to_sector(len);
        let segments = self.segments.lock().unwrap();
        let mut out = vec![0u8; padded_len];
        if let Some(seg) = segments.get(&segment_id) {
            let start = offset as usize;
            let end = (start + padded_len).min(seg.len());
            if start < seg.len() {
                out[..end - start].copy_from_slice(&seg[start..end]);
            }
        }
        Ok(out)
    }

    async fn write(&self, segment_id: SegmentId, offset: u64, buf: &[u8]) -> Result<()> {
        if buf.len() % SECTOR_SIZE != 0 {
            return Err(err("write length not sector-aligned"));
        }
        let mut segments = self.segments.lock().unwrap();
        let seg = segments.entry(segment_id).or_default();
        let end = offset as usize + buf.len();
        if seg.len() < end {
            seg.resize(end, 0);
        }
        seg[offset as usize..end].copy_from_slice(buf);
        Ok(())
    }

    async fn delete_segment(&self, segment_id: SegmentId) -> Result<()> {
        self.segments.lock().unwrap().remove(&segment_id);
        Ok(())
    }

    fn segment_size(&self) -> u64 {
        self.segment_size
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn mem_device_roundtrip() {
        let dev = MemDevice::new(1 << 20);
        let mut buf = vec![0u8; SECTOR_SIZE];
        buf[0] = 42;
        dev.write(0, 0, &buf).await.unwrap();
        let back = dev.read(0, 0, 1).await.unwrap();
        assert_eq!(back[0], 42);
        assert_eq!(back.len(), SECTOR_SIZE);
    }

    #[test(tokio::test)]
    async fn file_device_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let dev = FileDevice::new(dir.path(), 1 << 20, "log");
        let mut buf = vec![0u8; SECTOR_SIZE * 2];
        buf[SECTOR_SIZE] = 7;
        dev.write(3, 0, &buf).await.unwrap();
        let back = dev.read(3, SECTOR_SIZE as u64, 1).await.unwrap();
        assert_eq!(back[0], 7);
    }

    #[test(tokio::test)]
    async fn unaligned_offset_rejected() {
        let dev = MemDevice::new(1 << 20);
        let err = dev.write(0, 1, &[0u8; SECTOR_SIZE]).await.unwrap_err();
        assert_eq!(err.kind(), vkv_base::ErrorKind::Storage);
    }
}
