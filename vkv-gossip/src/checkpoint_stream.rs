// Checkpoint streaming to a replica (spec.md §4.10): "the primary opens
// a `ReceiveCheckpointHandler` on the replica side; file segments
// arrive as `(segment-id, token, file-type, start-address, data)`
// tuples. Empty `data` closes the current file. The handler writes
// sector-aligned chunks and updates last-primary-sync time." Grounded
// in `vkv_device::Device::write`, which already takes a segment id and
// a sector-aligned offset.

use std::sync::Arc;

use vkv_device::{round_up_to_sector, Device, SegmentId};

use vkv_base::Result;

use crate::connection::Connection;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    Log,
    IndexSnapshot,
}

#[derive(Clone, Debug)]
pub struct CheckpointChunk {
    pub segment_id: SegmentId,
    pub token: [u8; 16],
    pub file_type: FileType,
    pub start_address: u64,
    pub data: Vec<u8>,
}

/// Replica-side receiver for one in-progress checkpoint transfer.
/// A transfer may span several segments of the same `file_type`; an
/// empty-`data` chunk closes whichever file is currently open.
pub struct ReceiveCheckpointHandler {
    device: Arc<dyn Device>,
    connection: Arc<Connection>,
    open_file: Option<(SegmentId, FileType)>,
    bytes_received: u64,
}

impl ReceiveCheckpointHandler {
    pub fn new(device: Arc<dyn Device>, connection: Arc<Connection>) -> Self {
        ReceiveCheckpointHandler { device, connection, open_file: None, bytes_received: 0 }
    }

    pub async fn handle_chunk(&mut self, chunk: CheckpointChunk, now_micros: i64) -> Result<()> {
        if chunk.data.is_empty() {
            self.open_file = None;
            self.connection.touch_primary_sync(now_micros);
            return Ok(());
        }
        self.open_file = Some((chunk.segment_id, chunk.file_type));
        let mut padded = chunk.data.clone();
        padded.resize(round_up_to_sector(padded.len()), 0);
        self.device.write(chunk.segment_id, chunk.start_address, &padded).await?;
        self.bytes_received += chunk.data.len() as u64;
        self.connection.record_recv(chunk.data.len());
        self.connection.touch_primary_sync(now_micros);
        Ok(())
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }

    pub fn has_open_file(&self) -> bool {
        self.open_file.is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use vkv_device::MemDevice;

    fn handler() -> ReceiveCheckpointHandler {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 16));
        ReceiveCheckpointHandler::new(device, Arc::new(Connection::default()))
    }

    #[test(tokio::test)]
    async fn writes_non_empty_chunks_and_tracks_open_file() {
        let mut handler = handler();
        handler
            .handle_chunk(
                CheckpointChunk { segment_id: 0, token: [0u8; 16], file_type: FileType::Log, start_address: 0, data: vec![1, 2, 3, 4] },
                1000,
            )
            .await
            .unwrap();
        assert!(handler.has_open_file());
        assert_eq!(handler.bytes_received(), 4);
    }

    #[test(tokio::test)]
    async fn empty_chunk_closes_the_open_file_and_touches_sync_time() {
        let mut handler = handler();
        handler
            .handle_chunk(
                CheckpointChunk { segment_id: 0, token: [0u8; 16], file_type: FileType::Log, start_address: 0, data: vec![1] },
                1000,
            )
            .await
            .unwrap();
        handler
            .handle_chunk(
                CheckpointChunk { segment_id: 0, token: [0u8; 16], file_type: FileType::Log, start_address: 0, data: vec![] },
                2000,
            )
            .await
            .unwrap();
        assert!(!handler.has_open_file());
        assert_eq!(handler.connection.stats().last_primary_sync_micros, 2000);
    }
}
