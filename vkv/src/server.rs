// Server wiring (spec.md §4.7/§5): one `Arc<Dispatcher>` shared by every
// connection, a per-connection `TransactionManager` wrapped in
// `AuthGate`/`AdminCommands`/`ClusterCommands`, and the background
// workers (monitor sampling; gossip, once `cluster_enabled`, per
// `vkv-gossip`'s constructors and `gossip_transport`'s real RESP
// implementation of its transport trait).

use std::sync::Arc;

use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use vkv_aof::{AofWriter, Replayer};
use vkv_base::{Address, Clock, NodeId, Result, SessionId, SystemClock};
use vkv_cluster::ClusterConfigHandle;
use vkv_device::{Device, FileDevice};
use vkv_gossip::{ConnectionStore, GossipWorker};
use vkv_index::HashIndex;
use vkv_log::LogAllocator;
use vkv_monitor::{LatencyHistograms, Monitor, SessionRegistry};
use vkv_resp::{CommandHandler, Dispatcher, Session};
use vkv_store::StoreKernel;
use vkv_txn::{KeyLockTable, KeyVersionTable, TransactionManager};

use crate::admin::AdminCommands;
use crate::auth::AuthGate;
use crate::cluster_commands::{ClusterCommands, ClusterState};
use crate::config::ServerConfig;
use crate::gossip_transport::RespGossipTransport;

/// Cluster-mode state, built only when `config.cluster_enabled`.
struct ClusterWiring {
    local_node: NodeId,
    config: Arc<ClusterConfigHandle>,
    connections: Arc<ConnectionStore>,
}

/// Everything a connection handler needs, built once at startup and
/// cloned (cheaply, via `Arc`) into each connection's task.
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
    versions: Arc<KeyVersionTable>,
    locks: Arc<KeyLockTable>,
    aof: Option<Arc<AofWriter>>,
    monitor: Arc<Monitor>,
    session_registry: Arc<SessionRegistry>,
    cluster: Option<ClusterWiring>,
    next_session: std::sync::atomic::AtomicI32,
}

impl Server {
    /// Opens the store/object logs (and, if enabled, the AOF) under
    /// `config.data_dir`, replays any AOF tail into the store, and
    /// returns a server ready to `serve()`.
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let store_device: Arc<dyn Device> = Arc::new(FileDevice::new(config.data_dir.join("store"), 1 << 24, "store"));
        let object_device: Arc<dyn Device> = Arc::new(FileDevice::new(config.data_dir.join("objects"), 1 << 24, "objects"));
        let store_log = LogAllocator::new(store_device, config.page_size, 16);
        let object_log = LogAllocator::new(object_device, config.page_size, 16);
        let store = StoreKernel::new(HashIndex::new(config.index_buckets), store_log, clock.clone());
        let objects = StoreKernel::new(HashIndex::new(config.index_buckets), object_log, clock.clone());

        let aof = if config.aof_enabled {
            let aof_device: Arc<dyn Device> = Arc::new(FileDevice::new(config.data_dir.join("aof"), 1 << 24, "aof"));
            let aof_log = LogAllocator::new(aof_device, config.page_size, 16);
            let stats = Replayer::new(&store).with_objects(&objects).replay_from(&aof_log, Address(0)).await?;
            info!(applied = stats.applied, committed_txns = stats.committed_txns, aborted_txns = stats.aborted_txns, "replayed AOF on startup");
            Some(Arc::new(AofWriter::new(aof_log)))
        } else {
            None
        };

        let dispatcher = Arc::new(Dispatcher {
            store: Arc::new(store),
            objects: Arc::new(objects),
            aof: aof.clone(),
            session: SessionId(0),
            clock,
        });

        let latencies = Arc::new(LatencyHistograms::new());
        let session_registry = Arc::new(SessionRegistry::new());
        let monitor = Arc::new(Monitor::new(Arc::new(SystemClock), session_registry.clone(), latencies));

        let cluster = if config.cluster_enabled {
            let node_id = NodeId(config.node_id.clone().unwrap_or_else(random_node_id));
            let host = config.bind_address.rsplit_once(':').map(|(h, _)| h.to_string()).unwrap_or_else(|| config.bind_address.clone());
            let cluster_config = vkv_cluster::ClusterConfig::new(node_id.clone(), host, config.cluster_port);
            info!(node_id = %node_id, port = config.cluster_port, "cluster mode enabled");
            Some(ClusterWiring {
                local_node: node_id,
                config: Arc::new(ClusterConfigHandle::new(cluster_config)),
                connections: Arc::new(ConnectionStore::new()),
            })
        } else {
            None
        };

        Ok(Server {
            config,
            dispatcher,
            versions: Arc::new(KeyVersionTable::new()),
            locks: Arc::new(KeyLockTable::new()),
            aof,
            monitor,
            session_registry,
            cluster,
            next_session: std::sync::atomic::AtomicI32::new(1),
        })
    }

    /// Binds the listener and runs the accept loop forever, alongside
    /// the monitor's periodic sampling task. Returns only on a fatal
    /// listener error.
    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!(addr = %self.config.bind_address, "listening");

        // Runs for the lifetime of the process; nothing currently signals
        // this channel; a future graceful-shutdown path (SIGTERM) would.
        let (_monitor_cancel_tx, monitor_cancel_rx) = tokio::sync::oneshot::channel();
        tokio::spawn(
            self.monitor
                .clone()
                .run(std::time::Duration::from_secs(self.config.sampling_frequency_secs.max(1)), monitor_cancel_rx),
        );

        if let Some(cluster) = &self.cluster {
            let worker = Arc::new(GossipWorker::new(
                cluster.local_node.clone(),
                cluster.config.clone(),
                cluster.connections.clone(),
                RespGossipTransport::new(cluster.config.clone()),
            ));
            let delay = std::time::Duration::from_secs(self.config.gossip_delay_secs.max(1));
            tokio::spawn(async move {
                loop {
                    tokio::time::sleep(delay).await;
                    if let Err(e) = worker.run_once().await {
                        warn!(error = %e, "gossip round failed");
                    }
                }
            });
        }

        loop {
            let (socket, peer) = match listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    error!(error = %e, "accept failed");
                    continue;
                }
            };
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(socket).await {
                    warn!(peer = %peer, error = %e, "connection ended with an error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut socket: TcpStream) -> Result<()> {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let session_id = SessionId(self.next_session.fetch_add(1, std::sync::atomic::Ordering::Relaxed));
        let counters = self.session_registry.register(session_id);

        let per_connection_dispatcher = Arc::new(Dispatcher {
            store: self.dispatcher.store.clone(),
            objects: self.dispatcher.objects.clone(),
            aof: self.dispatcher.aof.clone(),
            session: session_id,
            clock: self.dispatcher.clock.clone(),
        });
        let mut txn = TransactionManager::new(per_connection_dispatcher, self.versions.clone(), self.locks.clone());
        if let Some(aof) = &self.aof {
            txn = txn.with_aof(aof.clone(), session_id);
        }
        let auth_gated = AuthGate::new(txn, self.config.requirepass.clone());
        let admin = AdminCommands::new(auth_gated, self.config.clone(), self.monitor.clone());
        let cluster_state = self.cluster.as_ref().map(|c| ClusterState {
            local_node: c.local_node.clone(),
            config: c.config.clone(),
            connections: c.connections.clone(),
        });
        let handler = ClusterCommands::new(admin, cluster_state);

        let mut session = Session::new();
        let mut buf = [0u8; 16 * 1024];
        let result = loop {
            let n = match socket.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) => break Err(e.into()),
            };
            session.feed(&buf[..n]);
            let out = session.drive(&handler).await;
            counters.record_command(n, out.len());
            if !out.is_empty() {
                if let Err(e) = socket.write_all(&out).await {
                    break Err(e.into());
                }
            }
            if session.closed {
                break Ok(());
            }
        };
        self.session_registry.deregister(session_id);
        result
    }
}

/// Generates a 40-character hex node-id, matching the Redis Cluster
/// convention (a SHA1-width random identifier) closely enough for this
/// workspace's purposes -- nothing here parses it as a hash.
fn random_node_id() -> String {
    let mut rng = rand::thread_rng();
    (0..40).map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap()).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn running_server() -> (Arc<Server>, std::net::SocketAddr, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.bind_address = "127.0.0.1:0".to_string();
        config.aof_enabled = false;
        let server = Arc::new(Server::start(config).await.unwrap());
        let listener = TcpListener::bind(&server.config.bind_address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = server.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                let server = accepted.clone();
                tokio::spawn(async move {
                    let _ = server.handle_connection(socket).await;
                });
            }
        });
        (server, addr, dir)
    }

    #[test(tokio::test)]
    async fn ping_round_trips_over_a_real_socket() {
        let (_server, addr, _dir) = running_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+PONG\r\n");
    }

    #[test(tokio::test)]
    async fn set_then_get_round_trips_over_a_real_socket() {
        let (_server, addr, _dir) = running_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n")
            .await
            .unwrap();
        let mut buf = [0u8; 256];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"+OK\r\n$1\r\nv\r\n");
    }

    #[test(tokio::test)]
    async fn authentication_is_enforced_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.bind_address = "127.0.0.1:0".to_string();
        config.aof_enabled = false;
        config.requirepass = Some("hunter2".to_string());
        let server = Arc::new(Server::start(config).await.unwrap());
        let listener = TcpListener::bind(&server.config.bind_address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = server.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                let server = accepted.clone();
                tokio::spawn(async move {
                    let _ = server.handle_connection(socket).await;
                });
            }
        });

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(b"*2\r\n$3\r\nGET\r\n$1\r\nk\r\n").await.unwrap();
        let mut buf = [0u8; 64];
        let n = stream.read(&mut buf).await.unwrap();
        assert!(buf[..n].starts_with(b"-NOAUTH"));
    }

    #[test(tokio::test)]
    async fn cluster_gossip_rpc_merges_a_peer_into_nodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.data_dir = dir.path().to_path_buf();
        config.bind_address = "127.0.0.1:0".to_string();
        config.aof_enabled = false;
        config.cluster_enabled = true;
        config.node_id = Some("localnode0000000000000000000000000000000".to_string());
        let server = Arc::new(Server::start(config).await.unwrap());
        let listener = TcpListener::bind(&server.config.bind_address).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = server.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else { break };
                let server = accepted.clone();
                tokio::spawn(async move {
                    let _ = server.handle_connection(socket).await;
                });
            }
        });

        let mut remote = vkv_cluster::ClusterConfig::new(NodeId("remotenode00000000000000000000000000000".to_string()), "10.0.0.9".to_string(), 6401);
        remote.config_epoch = 1;
        if let Some(w) = remote.workers.get_mut(&NodeId("remotenode00000000000000000000000000000".to_string())) {
            w.role = vkv_cluster::Role::Primary;
            w.config_epoch = 1;
        }
        let payload = vkv_gossip::GossipMessage::Gossip(remote).encode();

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut request = vec![];
        vkv_resp::Frame::array(vec![
            vkv_resp::Frame::bulk(b"CLUSTER".to_vec()),
            vkv_resp::Frame::bulk(b"GOSSIP".to_vec()),
            vkv_resp::Frame::bulk(payload),
        ])
        .encode(&mut request);
        stream.write_all(&request).await.unwrap();
        let mut buf = [0u8; 4096];
        let n = stream.read(&mut buf).await.unwrap();
        assert_eq!(buf[0], b'$', "expected a bulk reply carrying the merged config");

        let mut nodes_request = vec![];
        vkv_resp::Frame::array(vec![vkv_resp::Frame::bulk(b"CLUSTER".to_vec()), vkv_resp::Frame::bulk(b"NODES".to_vec())])
            .encode(&mut nodes_request);
        stream.write_all(&nodes_request).await.unwrap();
        let n = stream.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.contains("remotenode00000000000000000000000000000"), "nodes output: {text}");
    }
}
