// Checkpoint flow per the kernel's commit protocol:
//   1. flush outstanding appends, read the tail as the covered address A
//   2. snapshot the index (bucket array)
//   3. in Snapshot mode, additionally copy the covered log range out to a
//      separate device so the checkpoint does not depend on the live log
//      retaining that range
//   4. package {token, version, A} as commit metadata
// The AOF covered by A becomes eligible for truncation once this metadata
// is durable; that truncation is `vkv-aof`'s call, not this crate's.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use vkv_base::{err_fatal, Address, Result, Version};
use vkv_log::{BufferingMode, LogAllocator};

use crate::kernel::StoreKernel;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CheckpointMode {
    Fold,
    Snapshot,
    Auto { fold_below_bytes: u64 },
}

impl Default for CheckpointMode {
    fn default() -> Self {
        CheckpointMode::Auto {
            fold_below_bytes: 64 * 1024 * 1024,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResolvedMode {
    Fold,
    Snapshot,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct CheckpointToken(pub [u8; 16]);

impl CheckpointToken {
    pub fn new() -> Self {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        CheckpointToken(bytes)
    }
}

impl Default for CheckpointToken {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub token: CheckpointToken,
    pub version: Version,
    pub covered_address: Address,
    pub mode: ResolvedMode,
    pub index_snapshot: Vec<(u16, Address)>,
}

impl StoreKernel {
    /// Runs one checkpoint cycle and returns the commit metadata to persist
    /// externally (the AOF writer keys truncation eligibility off
    /// `covered_address`). `snapshot_log` must be `Some` whenever the
    /// resolved mode turns out to be `Snapshot`; it is the destination log
    /// the covered range is copied into.
    pub async fn checkpoint(
        &self,
        mode: CheckpointMode,
        checkpoint_version: Version,
        snapshot_log: Option<&LogAllocator>,
    ) -> Result<CheckpointMetadata> {
        self.log().flush().await?;
        let begin = self.log().begin_address().await;
        let covered_address = self.log().tail_address().await;
        let in_memory_bytes = covered_address.0.saturating_sub(begin.0);

        let resolved_mode = match mode {
            CheckpointMode::Fold => ResolvedMode::Fold,
            CheckpointMode::Snapshot => ResolvedMode::Snapshot,
            CheckpointMode::Auto { fold_below_bytes } => {
                if in_memory_bytes < fold_below_bytes {
                    ResolvedMode::Fold
                } else {
                    ResolvedMode::Snapshot
                }
            }
        };

        if resolved_mode == ResolvedMode::Snapshot {
            let target = snapshot_log
                .ok_or_else(|| err_fatal("snapshot checkpoint requires a snapshot device"))?;
            copy_log_range(self.log(), begin, covered_address, target).await?;
        }

        let index_snapshot = self.index().snapshot().await;
        Ok(CheckpointMetadata {
            token: CheckpointToken::new(),
            version: checkpoint_version,
            covered_address,
            mode: resolved_mode,
            index_snapshot,
        })
    }

    /// Rehydrates the index from a prior checkpoint's snapshot. The log
    /// itself is recovered separately (fold-over: the live log already
    /// covers it; snapshot mode: the caller replays `snapshot_log` first).
    pub async fn restore_index(&self, metadata: &CheckpointMetadata) -> Result<()> {
        self.index().restore(&metadata.index_snapshot).await
    }
}

async fn copy_log_range(
    source: &LogAllocator,
    begin: Address,
    end: Address,
    target: &LogAllocator,
) -> Result<()> {
    let mut scanner = source.scan(begin, end, BufferingMode::Single);
    while let Some((_, payload)) = scanner.next().await? {
        target.append(&payload).await?;
    }
    target.flush().await
}
