// A flat array of hash buckets over the log: `HashIndex` only ever knows
// about the newest address filed under a bucket and the tag of the key
// that wrote it. Chasing a chain of older records (following each
// record's embedded `prev_address` and deciding pending-vs-miss against
// `begin_address`) is the store kernel's job, since that requires reading
// the log; this crate hands out a locked view of one bucket at a time so
// the kernel can read-then-replace the head atomically with its log
// append.
//
// Tag collisions at the bucket-selector level are possible: two keys
// whose selector bits match but whose tags differ will overwrite each
// other's bucket entry. The loser is not lost -- a write under either
// key always threads `prev_address` from the bucket's current head
// (see the store kernel), so the two keys end up sharing one mixed-key
// chain -- but `tag_matches` alone can no longer tell a caller whether
// the bucket head *is* the key they want; the store kernel's `chase`
// must walk the chain by key equality rather than stopping at a tag
// mismatch. This mirrors the flat, single-entry-per-bucket design
// called for; a set-associative bucket (multiple tags per slot) would
// avoid the shared chain at the cost of a wider table.

use tokio::sync::{Mutex, MutexGuard};

use vkv_base::Address;

use crate::bucket::{selector_bits, tag_of, Entry};

pub struct HashIndex {
    buckets: Vec<Mutex<Entry>>,
    mask: u64,
}

impl HashIndex {
    /// Builds a table with at least `min_buckets` slots, rounded up to a
    /// power of two so bucket selection is a mask rather than a modulo.
    pub fn new(min_buckets: usize) -> Self {
        let num_buckets = min_buckets.max(1).next_power_of_two();
        let buckets = (0..num_buckets).map(|_| Mutex::new(Entry::EMPTY)).collect();
        HashIndex {
            buckets,
            mask: (num_buckets - 1) as u64,
        }
    }

    pub fn num_buckets(&self) -> usize {
        (self.mask + 1) as usize
    }

    /// A stable 64-bit hash of a key, used both to select a bucket and as
    /// the value callers pass back into `lock`/`peek`.
    pub fn hash_key(key: &[u8]) -> u64 {
        rapidhash::rapidhash(key)
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (selector_bits(hash) & self.mask) as usize
    }

    /// A snapshot read of a bucket's current head, without locking it for
    /// update. `tag_matches` tells the caller whether the stored tag
    /// agrees with this key's tag before it pays for a log read.
    pub async fn peek(&self, hash: u64) -> Probe {
        let idx = self.bucket_index(hash);
        let entry = *self.buckets[idx].lock().await;
        if entry.is_empty() {
            Probe::Empty
        } else {
            Probe::Occupied {
                tag_matches: entry.tag == tag_of(hash),
                address: entry.address,
            }
        }
    }

    /// Locks the bucket for `hash` so the caller can read the current head,
    /// append a log record whose `prev_address` is that head, and publish
    /// the new head, all without another writer racing in between. The
    /// lock is a `tokio::sync::Mutex` specifically so it can be held across
    /// the `.await` of the log append.
    pub async fn lock(&self, hash: u64) -> BucketGuard<'_> {
        let idx = self.bucket_index(hash);
        let guard = self.buckets[idx].lock().await;
        BucketGuard {
            guard,
            tag: tag_of(hash),
        }
    }

    /// Packs the table into `(tag, address)` pairs in bucket order, for
    /// writing out at an index-checkpoint boundary.
    pub async fn snapshot(&self) -> Vec<(u16, Address)> {
        let mut out = Vec::with_capacity(self.buckets.len());
        for bucket in &self.buckets {
            let entry = *bucket.lock().await;
            out.push((entry.tag, entry.address));
        }
        out
    }

    /// Resets every bucket to empty. Previously-written log records become
    /// unreachable through this table -- `FLUSHALL` semantics -- without
    /// touching the underlying log itself.
    pub async fn clear(&self) {
        for bucket in &self.buckets {
            *bucket.lock().await = Entry::EMPTY;
        }
    }

    /// Rehydrates a table previously produced by `snapshot`. The caller is
    /// responsible for constructing a table of the same size first.
    pub async fn restore(&self, entries: &[(u16, Address)]) -> vkv_base::Result<()> {
        if entries.len() != self.buckets.len() {
            return Err(vkv_base::err("index snapshot size mismatch"));
        }
        for (bucket, (tag, address)) in self.buckets.iter().zip(entries) {
            let mut guard = bucket.lock().await;
            *guard = Entry {
                tag: *tag,
                address: *address,
            };
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Probe {
    Empty,
    Occupied { tag_matches: bool, address: Address },
}

pub struct BucketGuard<'a> {
    guard: MutexGuard<'a, Entry>,
    tag: u16,
}

impl<'a> BucketGuard<'a> {
    /// The address currently filed in this bucket, regardless of whether
    /// its tag matches the key being inserted -- this is what becomes the
    /// new record's `prev_address`.
    pub fn current(&self) -> Option<Address> {
        if self.guard.is_empty() {
            None
        } else {
            Some(self.guard.address)
        }
    }

    pub fn tag_matches(&self) -> bool {
        !self.guard.is_empty() && self.guard.tag == self.tag
    }

    /// Publishes a new head address under this guard's tag.
    pub fn set(&mut self, address: Address) {
        *self.guard = Entry {
            tag: self.tag,
            address,
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn fresh_table_is_empty() {
        let index = HashIndex::new(16);
        assert_eq!(index.num_buckets(), 16);
        let hash = HashIndex::hash_key(b"hello");
        assert_eq!(index.peek(hash).await, Probe::Empty);
    }

    #[test(tokio::test)]
    async fn lock_then_set_publishes_head() {
        let index = HashIndex::new(16);
        let hash = HashIndex::hash_key(b"hello");
        {
            let mut bucket = index.lock(hash).await;
            assert_eq!(bucket.current(), None);
            bucket.set(Address(100));
        }
        match index.peek(hash).await {
            Probe::Occupied { tag_matches, address } => {
                assert!(tag_matches);
                assert_eq!(address, Address(100));
            }
            Probe::Empty => panic!("expected occupied bucket"),
        }
    }

    #[test(tokio::test)]
    async fn chained_inserts_thread_prev_address() {
        let index = HashIndex::new(16);
        let hash = HashIndex::hash_key(b"hello");
        let mut prevs = vec![];
        for i in 0..3u64 {
            let mut bucket = index.lock(hash).await;
            prevs.push(bucket.current());
            bucket.set(Address(100 + i));
        }
        assert_eq!(prevs, vec![None, Some(Address(100)), Some(Address(101))]);
    }

    #[test(tokio::test)]
    async fn snapshot_and_restore_roundtrip() {
        let index = HashIndex::new(8);
        let hash = HashIndex::hash_key(b"k");
        index.lock(hash).await.set(Address(42));
        let snap = index.snapshot().await;

        let restored = HashIndex::new(8);
        restored.restore(&snap).await.unwrap();
        match restored.peek(hash).await {
            Probe::Occupied { address, .. } => assert_eq!(address, Address(42)),
            Probe::Empty => panic!("expected occupied bucket after restore"),
        }
    }

    #[test(tokio::test)]
    async fn restore_rejects_size_mismatch() {
        let index = HashIndex::new(8);
        let wrong_size = vec![(0u16, Address::INVALID); 4];
        assert!(index.restore(&wrong_size).await.is_err());
    }

    #[test(tokio::test)]
    async fn clear_empties_every_bucket() {
        let index = HashIndex::new(8);
        let hash = HashIndex::hash_key(b"k");
        index.lock(hash).await.set(Address(42));
        index.clear().await;
        assert_eq!(index.peek(hash).await, Probe::Empty);
    }
}
