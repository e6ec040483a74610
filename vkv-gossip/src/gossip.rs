// The periodic gossip exchange (spec.md §4.10): pick a connection, send
// the most recent serialized config (or an empty ping if unchanged
// since the last round), receive the peer's config, and merge it in.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use vkv_base::{NodeId, Result};
use vkv_cluster::ClusterConfigHandle;

use crate::connection::ConnectionStore;
use crate::message::GossipMessage;

/// Abstracts the actual network call so this crate stays transport-
/// agnostic; `vkv`'s binary wires this to real `CLUSTER GOSSIP` RPCs
/// over the RESP connections it already holds to peers.
#[async_trait::async_trait]
pub trait GossipTransport: Send + Sync {
    async fn exchange(&self, peer: &NodeId, outgoing: GossipMessage) -> Result<GossipMessage>;
}

pub struct GossipWorker<T: GossipTransport> {
    local_node: NodeId,
    config: Arc<ClusterConfigHandle>,
    connections: Arc<ConnectionStore>,
    transport: T,
    last_sent_epoch: AtomicU64,
    round_robin: AtomicU64,
}

impl<T: GossipTransport> GossipWorker<T> {
    pub fn new(local_node: NodeId, config: Arc<ClusterConfigHandle>, connections: Arc<ConnectionStore>, transport: T) -> Self {
        GossipWorker {
            local_node,
            config,
            connections,
            transport,
            last_sent_epoch: AtomicU64::new(0),
            round_robin: AtomicU64::new(0),
        }
    }

    /// Runs a single gossip round against one peer chosen round-robin
    /// from the connection store's current membership. A no-op if there
    /// are no known peers yet.
    pub async fn run_once(&self) -> Result<()> {
        let peers = self.connections.peer_ids();
        let candidates: Vec<_> = peers.into_iter().filter(|p| *p != self.local_node).collect();
        if candidates.is_empty() {
            return Ok(());
        }
        let idx = (self.round_robin.fetch_add(1, Ordering::Relaxed) as usize) % candidates.len();
        let peer = candidates[idx].clone();
        self.exchange_with(&peer).await
    }

    pub async fn exchange_with(&self, peer: &NodeId) -> Result<()> {
        let current = self.config.load();
        let changed = current.config_epoch != self.last_sent_epoch.load(Ordering::Relaxed);
        let outgoing = if changed { GossipMessage::Gossip((*current).clone()) } else { GossipMessage::Ping };

        let conn = self.connections.connection(peer);
        let outgoing_len = match &outgoing {
            GossipMessage::Ping => 0,
            other => other.encode().len(),
        };
        conn.record_send(outgoing_len);

        let reply = match self.transport.exchange(peer, outgoing).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(peer = %peer, error = %e, "gossip exchange failed");
                return Err(e);
            }
        };
        self.last_sent_epoch.store(current.config_epoch, Ordering::Relaxed);

        match reply {
            GossipMessage::Ping => {}
            GossipMessage::Gossip(remote) | GossipMessage::GossipWithMeet(remote) => {
                conn.record_recv(rmp_serde::to_vec(&remote).map(|v| v.len()).unwrap_or(0));
                debug!(peer = %peer, remote_epoch = remote.config_epoch, "merging gossiped config");
                self.config.merge(&remote);
            }
            other => {
                warn!(peer = %peer, reply = ?other, "unexpected reply to a gossip exchange");
            }
        }
        Ok(())
    }
}
