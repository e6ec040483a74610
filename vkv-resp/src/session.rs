// Per-connection protocol state machine (spec.md §4.7). A `Session`
// owns nothing about sockets -- the `vkv` binary's connection task
// reads bytes off a `TcpStream` and calls `feed`/`drive`, so this
// crate stays transport-agnostic and unit-testable without a network.
//
// Pipelining: `drive` loops over every complete frame already sitting
// in the receive buffer, dispatching each in issue order and appending
// its encoded response to one output buffer, which the caller flushes
// once at end-of-batch -- "flushed cooperatively on a high-water mark
// or end-of-batch" per spec.md §4.7.

use vkv_base::{err_parse, Result};

use crate::dispatch::CommandHandler;
use crate::frame::{self, Frame};

pub struct Session {
    buf: Vec<u8>,
    pos: usize,
    pub closed: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Session { buf: Vec::new(), pos: 0, closed: false }
    }

    /// Appends newly-read network bytes to the receive buffer.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Parses and dispatches every complete command currently buffered,
    /// encoding each response in order. Returns the bytes to write back
    /// to the socket. A parse error closes the session after emitting
    /// `-ERR`, per spec.md §4.7's "parse error -> session emits -ERR …
    /// and closes."
    pub async fn drive(&mut self, handler: &dyn CommandHandler) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            match self.next_request() {
                Ok(Some(args)) => {
                    if args.is_empty() {
                        continue;
                    }
                    let cmd = match std::str::from_utf8(&args[0]) {
                        Ok(s) => s.to_string(),
                        Err(_) => {
                            Frame::error("ERR invalid command name encoding").encode(&mut out);
                            continue;
                        }
                    };
                    let response = handler.call(&cmd, &args[1..]).await;
                    response.encode(&mut out);
                }
                Ok(None) => break,
                Err(e) => {
                    Frame::error(format!("ERR {e}")).encode(&mut out);
                    self.closed = true;
                    break;
                }
            }
        }
        self.compact();
        out
    }

    /// Parses one command off the buffer without dispatching it --
    /// exposed separately so tests can exercise parsing/pipelining
    /// without a `CommandHandler`.
    fn next_request(&mut self) -> Result<Option<Vec<Vec<u8>>>> {
        match frame::parse(&self.buf, self.pos)? {
            Some((frame, next)) => {
                self.pos = next;
                Ok(Some(frame_to_args(frame)?))
            }
            None => Ok(None),
        }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    #[cfg(test)]
    fn pending_bytes(&self) -> usize {
        self.buf.len() - self.pos
    }
}

fn frame_to_args(frame: Frame) -> Result<Vec<Vec<u8>>> {
    match frame {
        Frame::Array(Some(items)) => items
            .into_iter()
            .map(|f| match f {
                Frame::Bulk(Some(b)) => Ok(b),
                _ => Err(err_parse("command array elements must be bulk strings")),
            })
            .collect(),
        Frame::Array(None) => Ok(vec![]),
        _ => Err(err_parse("expected an array frame for a command")),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use test_log::test;

    struct Echo;

    #[async_trait]
    impl CommandHandler for Echo {
        async fn call(&self, cmd: &str, args: &[Vec<u8>]) -> Frame {
            match cmd.to_ascii_uppercase().as_str() {
                "PING" => Frame::simple("PONG"),
                "ECHO" => Frame::bulk(args[0].clone()),
                _ => Frame::error("ERR unknown command"),
            }
        }
    }

    #[test(tokio::test)]
    async fn drives_a_single_pipelined_command() {
        let mut session = Session::new();
        session.feed(b"*1\r\n$4\r\nPING\r\n");
        let out = session.drive(&Echo).await;
        assert_eq!(out, b"+PONG\r\n");
        assert_eq!(session.pending_bytes(), 0);
    }

    #[test(tokio::test)]
    async fn drives_multiple_pipelined_commands_in_order() {
        let mut session = Session::new();
        session.feed(b"*1\r\n$4\r\nPING\r\n*2\r\n$4\r\nECHO\r\n$2\r\nhi\r\n");
        let out = session.drive(&Echo).await;
        assert_eq!(out, b"+PONG\r\n$2\r\nhi\r\n".to_vec());
    }

    #[test(tokio::test)]
    async fn partial_frame_across_two_feeds() {
        let mut session = Session::new();
        session.feed(b"*1\r\n$4\r\nPIN");
        assert_eq!(session.drive(&Echo).await, b"".to_vec());
        session.feed(b"G\r\n");
        assert_eq!(session.drive(&Echo).await, b"+PONG\r\n".to_vec());
    }

    #[test(tokio::test)]
    async fn malformed_frame_emits_error_and_closes() {
        let mut session = Session::new();
        session.feed(b"!nope\r\n");
        let out = session.drive(&Echo).await;
        assert!(out.starts_with(b"-ERR"));
        assert!(session.closed);
    }
}
