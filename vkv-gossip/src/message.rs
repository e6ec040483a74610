// The wire payloads carried over the `CLUSTER` internal RPC subcommands
// (spec.md §6): `CLUSTER GOSSIP`, `CLUSTER GOSSIP WITHMEET`, and the
// three `failstopwrites`/`failauthreq`/`failreplicationoffset` verbs
// used during a failover. Encoded with `rmp_serde`, same as the rest of
// the workspace's on-wire/on-disk structures.

use serde::{Deserialize, Serialize};

use vkv_base::NodeId;
use vkv_cluster::ClusterConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Sent when the local config hasn't changed since the last round;
    /// counted as an "empty" send.
    Ping,
    Gossip(ClusterConfig),
    GossipWithMeet(ClusterConfig),
    FailStopWrites { node_id: NodeId },
    FailStopWritesAck { offset: u64 },
    FailAuthReq { node_id: NodeId, epoch: u64, slots: Vec<u16> },
    FailAuthGranted,
    FailAuthDenied,
    FailReplicationOffset { offset: u64 },
}

impl GossipMessage {
    pub fn encode(&self) -> Vec<u8> {
        rmp_serde::to_vec(self).expect("gossip messages are always serializable")
    }

    pub fn decode(bytes: &[u8]) -> vkv_base::Result<GossipMessage> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
