//! Gossip exchange, replica failover, and checkpoint streaming
//! (spec.md §4.10).

mod checkpoint_stream;
mod connection;
mod failover;
mod gossip;
mod message;

pub use checkpoint_stream::{CheckpointChunk, FileType, ReceiveCheckpointHandler};
pub use connection::{Connection, ConnectionStats, ConnectionStore};
pub use failover::{FailoverController, FailoverHooks, FailoverOptions, FailoverState};
pub use gossip::{GossipTransport, GossipWorker};
pub use message::GossipMessage;
