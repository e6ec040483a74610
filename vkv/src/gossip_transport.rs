// Real `vkv_gossip::GossipTransport`/`FailoverHooks` implementations
// wired against `resp_client`'s plain RESP RPCs, per spec.md §4.10's
// "`vkv`'s binary wires this to real `CLUSTER GOSSIP` RPCs" (see
// `vkv-gossip::gossip`'s module doc, which names this crate as the
// intended implementor).

use std::sync::Arc;

use vkv_base::{err_cluster, NodeId, Result};
use vkv_cluster::ClusterConfigHandle;
use vkv_gossip::{GossipMessage, GossipTransport};

use crate::resp_client::send_command;

pub struct RespGossipTransport {
    config: Arc<ClusterConfigHandle>,
}

impl RespGossipTransport {
    pub fn new(config: Arc<ClusterConfigHandle>) -> Self {
        RespGossipTransport { config }
    }

    fn peer_addr(&self, peer: &NodeId) -> Result<String> {
        let config = self.config.load();
        let worker = config.workers.get(peer).ok_or_else(|| err_cluster(format!("unknown peer {peer}")))?;
        Ok(format!("{}:{}", worker.address, worker.port))
    }
}

#[async_trait::async_trait]
impl GossipTransport for RespGossipTransport {
    async fn exchange(&self, peer: &NodeId, outgoing: GossipMessage) -> Result<GossipMessage> {
        let addr = self.peer_addr(peer)?;
        let payload = outgoing.encode();
        let reply = send_command(&addr, &[b"CLUSTER", b"GOSSIP", &payload]).await?;
        match reply {
            vkv_resp::Frame::Bulk(Some(bytes)) => GossipMessage::decode(&bytes),
            vkv_resp::Frame::Error(e) => Err(err_cluster(format!("peer {peer} rejected gossip: {e}"))),
            other => Err(err_cluster(format!("unexpected gossip reply from {peer}: {other:?}"))),
        }
    }
}

/// `vkv_gossip::FailoverHooks` over real RESP connections to the
/// primary and fellow replicas. `local_replication_offset` reports the
/// local config epoch rather than a true AOF byte offset -- there is no
/// primary-to-replica streaming replication offset exposed on the wire
/// yet (checkpoint streaming, spec.md §4.10, moves snapshot files, not
/// a running log position), a documented gap consistent with this
/// workspace's "single-shard linearizability, eventually-consistent
/// gossip" scope (spec.md §1 Non-goals).
pub struct RespFailoverHooks {
    config: Arc<ClusterConfigHandle>,
}

impl RespFailoverHooks {
    pub fn new(config: Arc<ClusterConfigHandle>) -> Self {
        RespFailoverHooks { config }
    }

    fn addr_of(&self, node: &NodeId) -> Result<String> {
        let config = self.config.load();
        let worker = config.workers.get(node).ok_or_else(|| err_cluster(format!("unknown node {node}")))?;
        Ok(format!("{}:{}", worker.address, worker.port))
    }
}

#[async_trait::async_trait]
impl vkv_gossip::FailoverHooks for RespFailoverHooks {
    async fn pause_primary_writes(&self, primary: &NodeId) -> Result<u64> {
        let addr = self.addr_of(primary)?;
        match send_command(&addr, &[b"CLUSTER", b"FAILSTOPWRITES", primary.0.as_bytes()]).await? {
            vkv_resp::Frame::Integer(offset) => Ok(offset as u64),
            other => Err(err_cluster(format!("unexpected failstopwrites reply: {other:?}"))),
        }
    }

    async fn local_replication_offset(&self) -> u64 {
        self.config.load().config_epoch
    }

    async fn broadcast_config(&self) -> Result<()> {
        let config = self.config.load();
        for peer in config.workers.keys() {
            if *peer == config.local_node_id {
                continue;
            }
            let Ok(addr) = self.addr_of(peer) else { continue };
            let payload = GossipMessage::Gossip((*config).clone()).encode();
            let _ = send_command(&addr, &[b"CLUSTER", b"GOSSIP", &payload]).await;
        }
        Ok(())
    }

    async fn send_replica_of(&self, replica: &NodeId, new_primary: &NodeId) -> Result<()> {
        let addr = self.addr_of(replica)?;
        send_command(&addr, &[b"REPLICAOF", new_primary.0.as_bytes()]).await?;
        Ok(())
    }
}
