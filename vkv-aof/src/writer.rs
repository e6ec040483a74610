use vkv_base::{Address, Result, SessionId, Version};
use vkv_log::LogAllocator;
use vkv_store::CheckpointMetadata;

use crate::record::{write_frame, AofRecord, OpType};

/// Appends AOF records to a dedicated log. Reuses `vkv_log::LogAllocator`
/// wholesale rather than a bespoke writer -- the AOF has exactly the same
/// shape as the main-store log (append-only, page-ring resident, flushed
/// to sector-aligned segments) and gets its crash-safety envelope for
/// free from it.
pub struct AofWriter {
    log: LogAllocator,
}

impl AofWriter {
    pub fn new(log: LogAllocator) -> Self {
        AofWriter { log }
    }

    pub fn log(&self) -> &LogAllocator {
        &self.log
    }

    pub async fn write_store_upsert(
        &self,
        session: SessionId,
        version: Version,
        key: &[u8],
        value: &[u8],
        expiration: i64,
    ) -> Result<Address> {
        let payload = upsert_payload(key, value, expiration);
        self.append(OpType::StoreUpsert, 0, version, session, payload).await
    }

    pub async fn write_store_rmw(
        &self,
        session: SessionId,
        version: Version,
        key: &[u8],
        resulting_value: &[u8],
        expiration: i64,
    ) -> Result<Address> {
        // The AOF can't serialize the update closure, so it records the
        // value RMW produced; replay re-applies it as that exact value
        // (see `Replayer`), which is what makes replay idempotent.
        let payload = upsert_payload(key, resulting_value, expiration);
        self.append(OpType::StoreRmw, 0, version, session, payload).await
    }

    pub async fn write_store_delete(&self, session: SessionId, version: Version, key: &[u8]) -> Result<Address> {
        let mut payload = vec![];
        write_frame(&mut payload, key);
        self.append(OpType::StoreDelete, 0, version, session, payload).await
    }

    pub async fn write_object_store_upsert(
        &self,
        session: SessionId,
        version: Version,
        key: &[u8],
        encoded_object: &[u8],
    ) -> Result<Address> {
        let mut payload = vec![];
        write_frame(&mut payload, key);
        write_frame(&mut payload, encoded_object);
        self.append(OpType::ObjectStoreUpsert, 0, version, session, payload).await
    }

    pub async fn write_object_store_delete(&self, session: SessionId, version: Version, key: &[u8]) -> Result<Address> {
        let mut payload = vec![];
        write_frame(&mut payload, key);
        self.append(OpType::ObjectStoreDelete, 0, version, session, payload).await
    }

    pub async fn write_txn_start(&self, session: SessionId, version: Version) -> Result<Address> {
        self.append(OpType::TxnStart, 0, version, session, vec![]).await
    }

    pub async fn write_txn_commit(&self, session: SessionId, version: Version) -> Result<Address> {
        self.append(OpType::TxnCommit, 0, version, session, vec![]).await
    }

    pub async fn write_txn_abort(&self, session: SessionId, version: Version) -> Result<Address> {
        self.append(OpType::TxnAbort, 0, version, session, vec![]).await
    }

    pub async fn write_stored_procedure(
        &self,
        session: SessionId,
        version: Version,
        name: &[u8],
        args: &[u8],
    ) -> Result<Address> {
        let mut payload = vec![];
        write_frame(&mut payload, name);
        write_frame(&mut payload, args);
        self.append(OpType::StoredProcedure, 0, version, session, payload).await
    }

    pub async fn write_checkpoint_commit(&self, meta: &CheckpointMetadata, object_store: bool) -> Result<Address> {
        let payload = rmp_serde::to_vec(meta)?;
        let op_type = if object_store {
            OpType::ObjectStoreCheckpointCommit
        } else {
            OpType::MainStoreCheckpointCommit
        };
        self.append(op_type, 0, meta.version, SessionId(0), payload).await
    }

    pub async fn flush(&self) -> Result<()> {
        self.log.flush().await
    }

    /// Drops AOF segments covered by a committed checkpoint; safe to call
    /// once the checkpoint's commit metadata is itself durable.
    pub async fn truncate_covered(&self, covered_address: Address) -> Result<()> {
        self.log.truncate(covered_address).await
    }

    async fn append(
        &self,
        op_type: OpType,
        sub_type: u8,
        version: Version,
        session_id: SessionId,
        payload: Vec<u8>,
    ) -> Result<Address> {
        let record = AofRecord {
            op_type,
            sub_type,
            version,
            session_id,
            payload,
        };
        self.log.append(&record.encode()).await
    }
}

fn upsert_payload(key: &[u8], value: &[u8], expiration: i64) -> Vec<u8> {
    let mut payload = vec![];
    write_frame(&mut payload, key);
    write_frame(&mut payload, value);
    payload.extend_from_slice(&expiration.to_le_bytes());
    payload
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use test_log::test;
    use vkv_device::{Device, MemDevice};

    fn writer() -> AofWriter {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 16));
        AofWriter::new(LogAllocator::new(device, 4096, 4))
    }

    #[test(tokio::test)]
    async fn writes_advance_the_log() {
        let aof = writer();
        let a0 = aof
            .write_store_upsert(SessionId(1), Version(1), b"k", b"v", 0)
            .await
            .unwrap();
        let a1 = aof.write_store_delete(SessionId(1), Version(2), b"k").await.unwrap();
        assert!(a1.0 > a0.0);
    }

    #[test(tokio::test)]
    async fn truncate_covered_advances_begin() {
        let aof = writer();
        aof.write_store_upsert(SessionId(1), Version(1), b"k", b"v", 0)
            .await
            .unwrap();
        aof.flush().await.unwrap();
        let tail = aof.log().tail_address().await;
        aof.truncate_covered(tail).await.unwrap();
        assert_eq!(aof.log().begin_address().await, tail);
    }
}
