// Lockable-context support for the transaction manager's Prepare/Main
// phases (spec.md §4.8): a transaction declares the set of keys it
// touches, locks are acquired in canonical order (key hash ascending)
// to avoid deadlocks between concurrently executing transactions that
// share keys, and released once Main completes.
//
// This sits above `vkv_store::StoreKernel`'s own per-bucket locking:
// the kernel already makes a single key's Upsert/RMW/Delete atomic at
// record granularity, but a transaction spanning several keys needs
// those several keys held together across the whole batch, which is
// exactly what `LockableContext` provides.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Default)]
pub struct KeyLockTable {
    locks: DashMap<u64, Arc<Mutex<()>>>,
}

impl KeyLockTable {
    pub fn new() -> Self {
        KeyLockTable::default()
    }

    fn entry(&self, hash: u64) -> Arc<Mutex<()>> {
        self.locks.entry(hash).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquires locks for every hash in `hashes`, ascending, deduplicated.
    /// Holding the returned guard set for the lifetime of a transaction's
    /// Main phase makes the batch atomic with respect to any other
    /// transaction or bare command that shares one of these keys.
    pub async fn lock_all(&self, hashes: impl IntoIterator<Item = u64>) -> LockGuardSet {
        let mut ordered: BTreeMap<u64, Arc<Mutex<()>>> = BTreeMap::new();
        for hash in hashes {
            ordered.entry(hash).or_insert_with(|| self.entry(hash));
        }
        let mut guards = Vec::with_capacity(ordered.len());
        for (_, mutex) in ordered {
            guards.push(mutex.lock_owned().await);
        }
        LockGuardSet { guards }
    }
}

/// Holds every lock a transaction's footprint acquired; dropping it
/// releases them all (Finalize, per spec.md §4.8, runs lock-free, so
/// this is dropped before that phase starts).
pub struct LockGuardSet {
    guards: Vec<OwnedMutexGuard<()>>,
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;

    #[test(tokio::test)]
    async fn lock_all_is_reentrant_safe_with_dedup() {
        let table = KeyLockTable::new();
        // Same hash twice must not deadlock against itself.
        let _guards = table.lock_all([1u64, 1u64, 2u64]).await;
    }

    #[test(tokio::test)]
    async fn second_acquirer_waits_for_release() {
        let table = Arc::new(KeyLockTable::new());
        let first = table.lock_all([5u64]).await;
        let table2 = table.clone();
        let handle = tokio::spawn(async move {
            let _g = table2.lock_all([5u64]).await;
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        drop(first);
        handle.await.unwrap();
    }
}
