// Minimal AUTH / auth identity on a session (SPEC_FULL.md §2.2): a
// boolean authenticated/not-authenticated identity against a single
// configured password, independent of the (out of scope) ACL rule
// grammar. Wraps an inner `CommandHandler` the same way
// `vkv_txn::TransactionManager` does, so it slots into the same
// per-connection handler chain.

use std::sync::atomic::{AtomicBool, Ordering};

use vkv_resp::{CommandHandler, Frame};

pub struct AuthGate<H> {
    inner: H,
    requirepass: Option<String>,
    authenticated: AtomicBool,
}

impl<H: CommandHandler> AuthGate<H> {
    pub fn new(inner: H, requirepass: Option<String>) -> Self {
        let authenticated = requirepass.is_none();
        AuthGate { inner, requirepass, authenticated: AtomicBool::new(authenticated) }
    }
}

const NO_AUTH_COMMANDS: &[&str] = &["AUTH", "HELLO", "PING", "QUIT"];

#[async_trait::async_trait]
impl<H: CommandHandler> CommandHandler for AuthGate<H> {
    async fn call(&self, cmd: &str, args: &[Vec<u8>]) -> Frame {
        let upper = cmd.to_ascii_uppercase();
        if upper == "AUTH" {
            let Some(requirepass) = &self.requirepass else {
                return Frame::error("ERR Client sent AUTH, but no password is set");
            };
            let Some(supplied) = args.last() else {
                return Frame::error("ERR wrong number of arguments for 'auth' command");
            };
            if supplied.as_slice() == requirepass.as_bytes() {
                self.authenticated.store(true, Ordering::Relaxed);
                Frame::simple("OK")
            } else {
                Frame::error("WRONGPASS invalid username-password pair or user is disabled.")
            }
        } else if self.authenticated.load(Ordering::Relaxed) || NO_AUTH_COMMANDS.contains(&upper.as_str()) {
            self.inner.call(cmd, args).await
        } else {
            Frame::error("NOAUTH Authentication required.")
        }
    }
}
