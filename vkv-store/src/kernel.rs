// The store kernel: Read/Upsert/RMW/Delete over a hash index chained
// through an append-only log. The spec's "pending-I/O" state — queue the
// operation against an in-flight disk read, retry when it completes —
// collapses here into a plain `.await`: `LogAllocator::read_entry`
// already suspends the calling task at the device read and resumes it
// with the materialized record, which is the cooperative-suspension
// redesign called for in place of a callback/retry state machine. There
// is consequently no separate `Pending` variant on these return types.
//
// Two keys can share a bucket selector while differing in their tag (see
// `vkv_index`'s module doc); the bucket then holds one chain threading
// both keys' records together. A tag mismatch on the bucket head means
// the *most recent* write wasn't this key, not that this key is absent,
// so every read path below chases the full chain from the head address
// regardless of tag match, same as `rmw`/`delete` already do.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use vkv_base::{Address, Clock, Result, Version};
use vkv_index::{HashIndex, Probe};
use vkv_log::LogAllocator;

use crate::record::Record;

pub struct StoreKernel {
    index: HashIndex,
    log: LogAllocator,
    clock: Arc<dyn Clock>,
    write_version: AtomicU64,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    Found(Vec<u8>),
    NotFound,
}

impl StoreKernel {
    pub fn new(index: HashIndex, log: LogAllocator, clock: Arc<dyn Clock>) -> Self {
        StoreKernel {
            index,
            log,
            clock,
            write_version: AtomicU64::new(0),
        }
    }

    pub fn log(&self) -> &LogAllocator {
        &self.log
    }

    pub fn index(&self) -> &HashIndex {
        &self.index
    }

    fn next_version(&self) -> Version {
        Version(self.write_version.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub async fn read(&self, key: &[u8]) -> Result<ReadOutcome> {
        let hash = HashIndex::hash_key(key);
        let head = match self.index.peek(hash).await {
            Probe::Empty => return Ok(ReadOutcome::NotFound),
            Probe::Occupied { address, .. } => address,
        };
        // Chase regardless of tag match: a mismatched tag only means the
        // bucket's *most recent* write wasn't this key, not that this key
        // isn't somewhere further back in the same bucket's chain (two
        // keys sharing the bucket selector but differing in tag still
        // share one chain, per vkv_index's module doc).
        match self.chase(key, head).await? {
            Some(record) if !record.is_tombstone() && !record.is_expired(self.clock.now_micros()) => {
                Ok(ReadOutcome::Found(record.value.unwrap()))
            }
            _ => Ok(ReadOutcome::NotFound),
        }
    }

    pub async fn upsert(&self, key: &[u8], value: &[u8], expiration: i64) -> Result<(Address, Version)> {
        let hash = HashIndex::hash_key(key);
        let mut bucket = self.index.lock(hash).await;
        let prev = bucket.current().unwrap_or(Address::INVALID);
        let version = self.next_version();
        let record = Record {
            key: key.to_vec(),
            value: Some(value.to_vec()),
            expiration,
            version,
            prev_address: prev,
        };
        let address = self.log.append(&record.encode()).await?;
        bucket.set(address);
        Ok((address, version))
    }

    /// Read-modify-write. `updater` sees the key's current live value (`None`
    /// if absent, tombstoned, or expired) and returns the value to store.
    /// Always copies the new version to the tail; see this crate's design
    /// notes for why in-place update is not attempted over this log model.
    pub async fn rmw(&self, key: &[u8], updater: impl FnOnce(Option<&[u8]>) -> Vec<u8>) -> Result<(Address, Version, Vec<u8>)> {
        let hash = HashIndex::hash_key(key);
        let mut bucket = self.index.lock(hash).await;
        let prev = bucket.current().unwrap_or(Address::INVALID);
        let current = match self.chase(key, prev).await? {
            Some(r) if !r.is_tombstone() && !r.is_expired(self.clock.now_micros()) => r.value,
            _ => None,
        };
        let new_value = updater(current.as_deref());
        let version = self.next_version();
        let record = Record {
            key: key.to_vec(),
            value: Some(new_value.clone()),
            expiration: 0,
            version,
            prev_address: prev,
        };
        let address = self.log.append(&record.encode()).await?;
        bucket.set(address);
        Ok((address, version, new_value))
    }

    /// Returns `None` if the key didn't exist (no-op, nothing appended);
    /// otherwise the version the tombstone was written at, so callers
    /// (the AOF writer) can record a replay-consistent version.
    pub async fn delete(&self, key: &[u8]) -> Result<Option<Version>> {
        let hash = HashIndex::hash_key(key);
        let mut bucket = self.index.lock(hash).await;
        let prev = bucket.current().unwrap_or(Address::INVALID);
        let existed = matches!(
            self.chase(key, prev).await?,
            Some(r) if !r.is_tombstone() && !r.is_expired(self.clock.now_micros())
        );
        if !existed {
            return Ok(None);
        }
        let version = self.next_version();
        let record = Record {
            key: key.to_vec(),
            value: None,
            expiration: 0,
            version,
            prev_address: prev,
        };
        let address = self.log.append(&record.encode()).await?;
        bucket.set(address);
        Ok(Some(version))
    }

    /// Like `read`, but also surfaces the record's raw expiration tick
    /// (0 meaning "no expiration") so callers can implement TTL/PERSIST
    /// without re-deriving it from a second read.
    pub async fn read_with_expiration(&self, key: &[u8]) -> Result<Option<(Vec<u8>, i64)>> {
        let hash = HashIndex::hash_key(key);
        let head = match self.index.peek(hash).await {
            Probe::Empty => return Ok(None),
            Probe::Occupied { address, .. } => address,
        };
        match self.chase(key, head).await? {
            Some(record) if !record.is_tombstone() && !record.is_expired(self.clock.now_micros()) => {
                Ok(Some((record.value.unwrap(), record.expiration)))
            }
            _ => Ok(None),
        }
    }

    /// Rewrites a live key's expiration tick, keeping its value. Returns
    /// `None` (no-op, nothing appended) if the key doesn't currently
    /// exist, mirroring `delete`'s "nothing to do" contract.
    pub async fn set_expiration(&self, key: &[u8], expiration: i64) -> Result<Option<Version>> {
        let hash = HashIndex::hash_key(key);
        let mut bucket = self.index.lock(hash).await;
        let prev = bucket.current().unwrap_or(Address::INVALID);
        let current = match self.chase(key, prev).await? {
            Some(r) if !r.is_tombstone() && !r.is_expired(self.clock.now_micros()) => r.value,
            _ => None,
        };
        let Some(value) = current else {
            return Ok(None);
        };
        let version = self.next_version();
        let record = Record {
            key: key.to_vec(),
            value: Some(value),
            expiration,
            version,
            prev_address: prev,
        };
        let address = self.log.append(&record.encode()).await?;
        bucket.set(address);
        Ok(Some(version))
    }

    /// Approximate DBSIZE: counts bucket heads that currently resolve to a
    /// live (non-tombstone, non-expired) record. This undercounts when two
    /// live keys collide at the same bucket selector (the loser is
    /// unreachable through the index, per `vkv_index`'s module doc), which
    /// is the same approximation the flat single-entry-per-bucket index
    /// makes everywhere else -- exact enumeration would need a full log
    /// scan, which this crate does not otherwise require for any operation.
    pub async fn key_count(&self) -> Result<u64> {
        let mut count = 0u64;
        for (_, address) in self.index.snapshot().await {
            if !address.is_valid() {
                continue;
            }
            let begin = self.log.begin_address().await;
            if address.0 < begin.0 {
                continue;
            }
            let bytes = self.log.read_entry(address).await?;
            let record = Record::decode(&bytes)?;
            if !record.is_tombstone() && !record.is_expired(self.clock.now_micros()) {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Drops every key from view (`FLUSHALL`). The underlying log is left
    /// in place -- only the index is cleared -- consistent with the
    /// kernel's existing delete path, which tombstones rather than erases.
    pub async fn clear(&self) -> Result<()> {
        self.index.clear().await;
        Ok(())
    }

    /// Walks the chain starting at `start`, following each record's
    /// `prev_address`, until it finds `key`, runs off the beginning of the
    /// log (truncated/reclaimed), or hits an invalid address.
    async fn chase(&self, key: &[u8], start: Address) -> Result<Option<Record>> {
        let mut cursor = start;
        loop {
            if !cursor.is_valid() {
                return Ok(None);
            }
            let begin = self.log.begin_address().await;
            if cursor.0 < begin.0 {
                return Ok(None);
            }
            let bytes = self.log.read_entry(cursor).await?;
            let record = Record::decode(&bytes)?;
            if record.key == key {
                return Ok(Some(record));
            }
            cursor = record.prev_address;
        }
    }

    /// Replays one already-decoded AOF record against this kernel during
    /// recovery. `vkv-aof` owns framing and op dispatch; this just needs a
    /// narrow surface to apply an upsert/delete without re-deriving version
    /// numbers (the AOF-stored version wins so replay is idempotent).
    pub async fn apply_recovered_upsert(&self, key: &[u8], value: &[u8], expiration: i64, version: Version) -> Result<Address> {
        let hash = HashIndex::hash_key(key);
        let mut bucket = self.index.lock(hash).await;
        let prev = bucket.current().unwrap_or(Address::INVALID);
        let record = Record {
            key: key.to_vec(),
            value: Some(value.to_vec()),
            expiration,
            version,
            prev_address: prev,
        };
        let address = self.log.append(&record.encode()).await?;
        bucket.set(address);
        self.bump_version_floor(version);
        Ok(address)
    }

    pub async fn apply_recovered_delete(&self, key: &[u8], version: Version) -> Result<Address> {
        let hash = HashIndex::hash_key(key);
        let mut bucket = self.index.lock(hash).await;
        let prev = bucket.current().unwrap_or(Address::INVALID);
        let record = Record {
            key: key.to_vec(),
            value: None,
            expiration: 0,
            version,
            prev_address: prev,
        };
        let address = self.log.append(&record.encode()).await?;
        bucket.set(address);
        self.bump_version_floor(version);
        Ok(address)
    }

    fn bump_version_floor(&self, replayed: Version) {
        self.write_version.fetch_max(replayed.0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::Arc;
    use test_log::test;
    use vkv_base::SystemClock;
    use vkv_device::{Device, MemDevice};

    fn kernel() -> StoreKernel {
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 64));
        let log = LogAllocator::new(device, 4096, 4);
        let index = HashIndex::new(64);
        StoreKernel::new(index, log, Arc::new(SystemClock))
    }

    #[test(tokio::test)]
    async fn read_missing_key_is_not_found() {
        let store = kernel();
        assert_eq!(store.read(b"nope").await.unwrap(), ReadOutcome::NotFound);
    }

    #[test(tokio::test)]
    async fn upsert_then_read_roundtrips() {
        let store = kernel();
        store.upsert(b"foo", b"bar", 0).await.unwrap();
        assert_eq!(store.read(b"foo").await.unwrap(), ReadOutcome::Found(b"bar".to_vec()));
    }

    #[test(tokio::test)]
    async fn upsert_overwrites_previous_value() {
        let store = kernel();
        store.upsert(b"foo", b"one", 0).await.unwrap();
        store.upsert(b"foo", b"two", 0).await.unwrap();
        assert_eq!(store.read(b"foo").await.unwrap(), ReadOutcome::Found(b"two".to_vec()));
    }

    #[test(tokio::test)]
    async fn delete_tombstones_the_key() {
        let store = kernel();
        store.upsert(b"foo", b"bar", 0).await.unwrap();
        assert!(store.delete(b"foo").await.unwrap().is_some());
        assert_eq!(store.read(b"foo").await.unwrap(), ReadOutcome::NotFound);
    }

    #[test(tokio::test)]
    async fn delete_of_missing_key_returns_false() {
        let store = kernel();
        assert!(store.delete(b"ghost").await.unwrap().is_none());
    }

    #[test(tokio::test)]
    async fn rmw_increments_a_counter() {
        let store = kernel();
        let incr = |cur: Option<&[u8]>| {
            let n: i64 = cur
                .map(|b| std::str::from_utf8(b).unwrap().parse().unwrap())
                .unwrap_or(0);
            (n + 1).to_string().into_bytes()
        };
        store.rmw(b"c", incr).await.unwrap();
        store.rmw(b"c", incr).await.unwrap();
        assert_eq!(store.read(b"c").await.unwrap(), ReadOutcome::Found(b"2".to_vec()));
    }

    #[test(tokio::test)]
    async fn distinct_keys_do_not_interfere() {
        let store = kernel();
        store.upsert(b"a", b"1", 0).await.unwrap();
        store.upsert(b"b", b"2", 0).await.unwrap();
        assert_eq!(store.read(b"a").await.unwrap(), ReadOutcome::Found(b"1".to_vec()));
        assert_eq!(store.read(b"b").await.unwrap(), ReadOutcome::Found(b"2".to_vec()));
    }

    #[test(tokio::test)]
    async fn expired_key_reads_as_missing() {
        let store = kernel();
        store.upsert(b"foo", b"bar", 1).await.unwrap();
        assert_eq!(store.read(b"foo").await.unwrap(), ReadOutcome::NotFound);
    }

    #[test(tokio::test)]
    async fn set_expiration_preserves_value_and_updates_ttl() {
        let store = kernel();
        store.upsert(b"k", b"v", 0).await.unwrap();
        store.set_expiration(b"k", 1).await.unwrap();
        assert_eq!(store.read(b"k").await.unwrap(), ReadOutcome::NotFound);
    }

    #[test(tokio::test)]
    async fn set_expiration_on_missing_key_is_a_noop() {
        let store = kernel();
        assert!(store.set_expiration(b"ghost", 1).await.unwrap().is_none());
    }

    #[test(tokio::test)]
    async fn read_with_expiration_surfaces_the_tick() {
        let store = kernel();
        store.upsert(b"k", b"v", 42).await.unwrap();
        let (value, expiration) = store.read_with_expiration(b"k").await.unwrap().unwrap();
        assert_eq!(value, b"v");
        assert_eq!(expiration, 42);
    }

    #[test(tokio::test)]
    async fn key_count_reflects_live_keys_only() {
        let store = kernel();
        store.upsert(b"a", b"1", 0).await.unwrap();
        store.upsert(b"b", b"2", 0).await.unwrap();
        assert_eq!(store.key_count().await.unwrap(), 2);
        store.delete(b"a").await.unwrap();
        assert_eq!(store.key_count().await.unwrap(), 1);
    }

    #[test(tokio::test)]
    async fn clear_drops_every_key() {
        let store = kernel();
        store.upsert(b"a", b"1", 0).await.unwrap();
        store.upsert(b"b", b"2", 0).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.read(b"a").await.unwrap(), ReadOutcome::NotFound);
        assert_eq!(store.read(b"b").await.unwrap(), ReadOutcome::NotFound);
        assert_eq!(store.key_count().await.unwrap(), 0);
    }

    #[test(tokio::test)]
    async fn read_chases_past_a_bucket_selector_collision() {
        // A single-bucket index forces every key through the same bucket
        // entry regardless of tag, reproducing the `Upsert(A); Upsert(B)`
        // selector-collision scenario deterministically rather than
        // hunting for two keys that happen to collide under a wider table.
        let device: Arc<dyn Device> = Arc::new(MemDevice::new(4096 * 64));
        let log = LogAllocator::new(device, 4096, 4);
        let store = StoreKernel::new(HashIndex::new(1), log, Arc::new(SystemClock));

        store.upsert(b"a", b"1", 0).await.unwrap();
        store.upsert(b"b", b"2", 0).await.unwrap();

        assert_eq!(store.read(b"a").await.unwrap(), ReadOutcome::Found(b"1".to_vec()));
        assert_eq!(store.read(b"b").await.unwrap(), ReadOutcome::Found(b"2".to_vec()));
        assert_eq!(store.read_with_expiration(b"a").await.unwrap().unwrap().0, b"1".to_vec());
    }

    #[test(tokio::test)]
    async fn recovered_delete_tombstones_without_reusing_live_version() {
        let store = kernel();
        let a1 = store.apply_recovered_upsert(b"k", b"v1", 0, Version(5)).await.unwrap();
        assert!(a1.is_valid());
        store.apply_recovered_delete(b"k", Version(6)).await.unwrap();
        assert_eq!(store.read(b"k").await.unwrap(), ReadOutcome::NotFound);
        // A subsequent live write must get a version strictly above anything replayed.
        store.upsert(b"k", b"v2", 0).await.unwrap();
        assert_eq!(store.read(b"k").await.unwrap(), ReadOutcome::Found(b"v2".to_vec()));
    }
}
