// Replays an AOF tail against a freshly index-restored store kernel.
// Per-session transaction brackets (TxnStart..TxnCommit|TxnAbort) are
// buffered and applied atomically on commit, or dropped on abort, so a
// crash mid-transaction never leaves partial effects visible. Records
// outside any bracket (the common case -- most writes aren't inside a
// MULTI) apply as they're read.

use std::collections::HashMap;

use tracing::{debug, warn};

use vkv_base::{err, Result, SessionId};
use vkv_log::{BufferingMode, LogAllocator};
use vkv_store::StoreKernel;

use crate::record::{read_frame, AofRecord, OpType};

pub struct Replayer<'a> {
    store: &'a StoreKernel,
    objects: Option<&'a StoreKernel>,
    pending: HashMap<SessionId, Vec<AofRecord>>,
}

#[derive(Default, Debug, Eq, PartialEq)]
pub struct ReplayStats {
    pub applied: u64,
    pub aborted_txns: u64,
    pub committed_txns: u64,
}

impl<'a> Replayer<'a> {
    pub fn new(store: &'a StoreKernel) -> Self {
        Replayer {
            store,
            objects: None,
            pending: HashMap::new(),
        }
    }

    /// Routes `ObjectStore*` AOF records to a second store kernel rather
    /// than skipping them; the object store holds `Object::encode()`d
    /// bytes as its value, so the same recovered-upsert/delete primitives
    /// the main store uses apply unchanged.
    pub fn with_objects(mut self, objects: &'a StoreKernel) -> Self {
        self.objects = Some(objects);
        self
    }

    /// Replays every AOF record in `[from, aof_log.tail_address())`.
    pub async fn replay_from(&mut self, aof_log: &LogAllocator, from: vkv_base::Address) -> Result<ReplayStats> {
        let tail = aof_log.tail_address().await;
        let mut scanner = aof_log.scan(from, tail, BufferingMode::Single);
        let mut stats = ReplayStats::default();
        while let Some((_, bytes)) = scanner.next().await? {
            let record = AofRecord::decode(&bytes)?;
            self.apply_one(record, &mut stats).await?;
        }
        if !self.pending.is_empty() {
            warn!(
                target: "vkv::aof",
                sessions = self.pending.len(),
                "AOF tail ended with open transaction brackets; treating as aborted"
            );
        }
        Ok(stats)
    }

    async fn apply_one(&mut self, record: AofRecord, stats: &mut ReplayStats) -> Result<()> {
        match record.op_type {
            OpType::TxnStart => {
                self.pending.insert(record.session_id, vec![]);
                Ok(())
            }
            OpType::TxnCommit => {
                let buffered = self.pending.remove(&record.session_id).unwrap_or_default();
                for op in buffered {
                    self.apply_store_op(op, stats).await?;
                }
                stats.committed_txns += 1;
                Ok(())
            }
            OpType::TxnAbort => {
                self.pending.remove(&record.session_id);
                stats.aborted_txns += 1;
                Ok(())
            }
            OpType::StoredProcedure => {
                debug!(target: "vkv::aof", session = record.session_id.0, "skipping stored procedure replay (no registry wired up)");
                Ok(())
            }
            OpType::MainStoreCheckpointCommit | OpType::ObjectStoreCheckpointCommit => {
                debug!(target: "vkv::aof", version = record.version.0, "observed checkpoint commit marker during replay");
                Ok(())
            }
            OpType::StoreUpsert
            | OpType::StoreRmw
            | OpType::StoreDelete
            | OpType::ObjectStoreUpsert
            | OpType::ObjectStoreRmw
            | OpType::ObjectStoreDelete => {
                if let Some(buffer) = self.pending.get_mut(&record.session_id) {
                    buffer.push(record);
                    Ok(())
                } else {
                    self.apply_store_op(record, stats).await
                }
            }
        }
    }

    async fn apply_store_op(&self, record: AofRecord, stats: &mut ReplayStats) -> Result<()> {
        match record.op_type {
            OpType::StoreUpsert | OpType::StoreRmw => {
                let (key, pos) = read_frame(&record.payload, 0)?;
                let (value, pos) = read_frame(&record.payload, pos)?;
                if record.payload.len() < pos + 8 {
                    return Err(err("truncated expiration in AOF upsert payload"));
                }
                let expiration = i64::from_le_bytes(record.payload[pos..pos + 8].try_into().unwrap());
                self.store
                    .apply_recovered_upsert(key, value, expiration, record.version)
                    .await?;
                stats.applied += 1;
                Ok(())
            }
            OpType::StoreDelete => {
                let (key, _) = read_frame(&record.payload, 0)?;
                self.store.apply_recovered_delete(key, record.version).await?;
                stats.applied += 1;
                Ok(())
            }
            OpType::ObjectStoreUpsert | OpType::ObjectStoreRmw => {
                let Some(objects) = self.objects else {
                    debug!(target: "vkv::aof", "skipping object-store AOF record (no objects store configured)");
                    return Ok(());
                };
                let (key, pos) = read_frame(&record.payload, 0)?;
                let (value, pos) = read_frame(&record.payload, pos)?;
                if record.payload.len() < pos + 8 {
                    return Err(err("truncated expiration in AOF object-store upsert payload"));
                }
                let expiration = i64::from_le_bytes(record.payload[pos..pos + 8].try_into().unwrap());
                objects.apply_recovered_upsert(key, value, expiration, record.version).await?;
                stats.applied += 1;
                Ok(())
            }
            OpType::ObjectStoreDelete => {
                let Some(objects) = self.objects else {
                    debug!(target: "vkv::aof", "skipping object-store AOF record (no objects store configured)");
                    return Ok(());
                };
                let (key, _) = read_frame(&record.payload, 0)?;
                objects.apply_recovered_delete(key, record.version).await?;
                stats.applied += 1;
                Ok(())
            }
            _ => unreachable!("apply_store_op called with a non-data op"),
        }
    }
}
