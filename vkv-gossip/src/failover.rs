// Replica-driven failover state machine (spec.md §4.10):
//
//   NoFailover -> IssuingPauseWrites -> WaitingForSync
//             -> TakingOverAsPrimary -> AttachingReplicas -> NoFailover
//
// `Default` requires the primary reachable and the replica caught up;
// `Force` skips the sync wait; `Takeover` skips the vote. Grounded in
// the same suspend-with-timeout, cancel-on-expiry shape the teacher
// uses for pending I/O in `vkv-device`/`vkv-store`, here applied to a
// higher-level state machine instead of a single async operation.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use vkv_base::{err_cluster, NodeId, Result};
use vkv_cluster::ClusterConfigHandle;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailoverState {
    NoFailover,
    IssuingPauseWrites,
    WaitingForSync,
    TakingOverAsPrimary,
    AttachingReplicas,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailoverOptions {
    Default,
    Force,
    Takeover,
}

/// Abstracts the operations the failover controller needs to perform
/// against the primary, the local replication log, and the rest of the
/// replica set. `vkv`'s binary implements this against real RESP
/// connections and the local `vkv-aof` replay offset.
#[async_trait::async_trait]
pub trait FailoverHooks: Send + Sync {
    async fn pause_primary_writes(&self, primary: &NodeId) -> Result<u64>;
    async fn local_replication_offset(&self) -> u64;
    async fn broadcast_config(&self) -> Result<()>;
    async fn send_replica_of(&self, replica: &NodeId, new_primary: &NodeId) -> Result<()>;
}

pub struct FailoverController<H: FailoverHooks> {
    local_node: NodeId,
    config: std::sync::Arc<ClusterConfigHandle>,
    hooks: H,
    sync_poll_interval: Duration,
}

impl<H: FailoverHooks> FailoverController<H> {
    pub fn new(local_node: NodeId, config: std::sync::Arc<ClusterConfigHandle>, hooks: H) -> Self {
        FailoverController { local_node, config, hooks, sync_poll_interval: Duration::from_millis(50) }
    }

    /// Drives the full state machine to completion or failure. Returns
    /// `Ok(())` on a successful promotion; on a timeout or hook error the
    /// state resets to `NoFailover` and an error is returned, matching
    /// "on expiry the state machine returns false and resets".
    pub async fn failover(
        &self,
        primary: &NodeId,
        replicas: &[NodeId],
        options: FailoverOptions,
        failover_timeout: Duration,
    ) -> Result<()> {
        let mut state = FailoverState::NoFailover;
        let result = timeout(failover_timeout, self.drive(&mut state, primary, replicas, options)).await;
        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, ?state, "failover aborted");
                Err(e)
            }
            Err(_) => {
                warn!(?state, "failover timed out");
                Err(err_cluster("failover timed out"))
            }
        }
    }

    async fn drive(
        &self,
        state: &mut FailoverState,
        primary: &NodeId,
        replicas: &[NodeId],
        options: FailoverOptions,
    ) -> Result<()> {
        *state = FailoverState::IssuingPauseWrites;
        let primary_offset = if options == FailoverOptions::Takeover {
            0
        } else {
            self.hooks.pause_primary_writes(primary).await?
        };

        *state = FailoverState::WaitingForSync;
        if options != FailoverOptions::Force && options != FailoverOptions::Takeover {
            loop {
                if self.hooks.local_replication_offset().await >= primary_offset {
                    break;
                }
                tokio::time::sleep(self.sync_poll_interval).await;
            }
        }

        *state = FailoverState::TakingOverAsPrimary;
        self.config.promote_to_primary(&self.local_node);
        info!(node = %self.local_node, "promoted to primary");

        *state = FailoverState::AttachingReplicas;
        self.hooks.broadcast_config().await?;
        for replica in replicas {
            if replica == &self.local_node {
                continue;
            }
            self.hooks.send_replica_of(replica, &self.local_node).await?;
        }
        if options == FailoverOptions::Default {
            self.hooks.send_replica_of(primary, &self.local_node).await?;
        }

        *state = FailoverState::NoFailover;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use test_log::test;
    use vkv_cluster::ClusterConfig;

    struct FakeHooks {
        primary_offset: u64,
        local_offset: AtomicU64,
        broadcasts: AtomicU64,
    }

    #[async_trait::async_trait]
    impl FailoverHooks for FakeHooks {
        async fn pause_primary_writes(&self, _primary: &NodeId) -> Result<u64> {
            Ok(self.primary_offset)
        }
        async fn local_replication_offset(&self) -> u64 {
            self.local_offset.load(Ordering::Relaxed)
        }
        async fn broadcast_config(&self) -> Result<()> {
            self.broadcasts.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        async fn send_replica_of(&self, _replica: &NodeId, _new_primary: &NodeId) -> Result<()> {
            Ok(())
        }
    }

    fn node(s: &str) -> NodeId {
        NodeId(s.to_string())
    }

    #[test(tokio::test)]
    async fn default_failover_waits_for_sync_then_promotes() {
        let mut cfg = ClusterConfig::new(node("replica"), "127.0.0.1".into(), 7000);
        cfg.workers.insert(node("primary"), vkv_cluster::Worker {
            role: vkv_cluster::Role::Primary,
            config_epoch: 1,
            ..vkv_cluster::Worker::unassigned(node("primary"), "1.1.1.1".into(), 7000)
        });
        if let Some(w) = cfg.workers.get_mut(&node("replica")) {
            w.role = vkv_cluster::Role::Replica;
            w.primary_of = Some(node("primary"));
        }
        cfg.slots[0] = Some(node("primary"));
        let handle = Arc::new(ClusterConfigHandle::new(cfg));

        let hooks = FakeHooks { primary_offset: 100, local_offset: AtomicU64::new(100), broadcasts: AtomicU64::new(0) };
        let controller = FailoverController::new(node("replica"), handle.clone(), hooks);
        controller
            .failover(&node("primary"), &[node("replica")], FailoverOptions::Default, Duration::from_secs(1))
            .await
            .unwrap();

        let after = handle.load();
        assert_eq!(after.local_worker().role, vkv_cluster::Role::Primary);
        assert_eq!(after.owner_of_slot(0), Some(&node("replica")));
    }

    #[test(tokio::test)]
    async fn failover_times_out_when_replica_never_catches_up() {
        let cfg = ClusterConfig::new(node("replica"), "127.0.0.1".into(), 7000);
        let handle = Arc::new(ClusterConfigHandle::new(cfg));
        let hooks = FakeHooks { primary_offset: 100, local_offset: AtomicU64::new(0), broadcasts: AtomicU64::new(0) };
        let controller = FailoverController::new(node("replica"), handle, hooks);
        let result = controller
            .failover(&node("primary"), &[], FailoverOptions::Default, Duration::from_millis(150))
            .await;
        assert!(result.is_err());
    }

    #[test(tokio::test)]
    async fn takeover_skips_the_sync_wait() {
        let cfg = ClusterConfig::new(node("replica"), "127.0.0.1".into(), 7000);
        let handle = Arc::new(ClusterConfigHandle::new(cfg));
        let hooks = FakeHooks { primary_offset: 100, local_offset: AtomicU64::new(0), broadcasts: AtomicU64::new(0) };
        let controller = FailoverController::new(node("replica"), handle.clone(), hooks);
        controller
            .failover(&node("primary"), &[], FailoverOptions::Takeover, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(handle.load().local_worker().role, vkv_cluster::Role::Primary);
    }
}
