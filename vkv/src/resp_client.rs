// A minimal RESP client used only for the internal peer-to-peer RPCs
// spec.md §6 lists under "Cluster subcommands (internal RPC, same
// wire)" -- `vkv-gossip`'s `GossipTransport`/`FailoverHooks` traits are
// transport-agnostic by design; this is the real implementation the
// binary plugs in, issuing the same RESP commands a `redis-cli` client
// would send, over a plain `TcpStream` dialed to the peer's
// `address:port`.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use vkv_base::{err, Result};
use vkv_resp::frame::{self, Frame};

/// Sends one command (an array of bulk strings) to `addr` and returns
/// the single reply frame. Opens a fresh connection per call -- these
/// RPCs are infrequent (one gossip round per `gossip_delay`, failover
/// only during a promotion) so a connection pool would be premature.
pub async fn send_command(addr: &str, parts: &[&[u8]]) -> Result<Frame> {
    let mut stream = TcpStream::connect(addr).await.map_err(|e| err(format!("connecting to {addr}: {e}")))?;
    let request = Frame::array(parts.iter().map(|p| Frame::bulk(p.to_vec())).collect());
    stream.write_all(&request.to_bytes()).await.map_err(|e| err(format!("writing to {addr}: {e}")))?;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some((reply, _)) = frame::parse(&buf, 0)? {
            return Ok(reply);
        }
        let n = stream.read(&mut chunk).await.map_err(|e| err(format!("reading from {addr}: {e}")))?;
        if n == 0 {
            return Err(err(format!("connection to {addr} closed before a full reply arrived")));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use tokio::net::TcpListener;

    #[test(tokio::test)]
    async fn round_trips_a_simple_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let _ = socket.read(&mut buf).await.unwrap();
            socket.write_all(b"+PONG\r\n").await.unwrap();
        });
        let reply = send_command(&addr.to_string(), &[b"PING"]).await.unwrap();
        assert_eq!(reply, Frame::simple("PONG"));
    }
}
