// MULTI/EXEC/WATCH and stored-procedure dispatch (spec.md §4.8). Wraps
// an inner `CommandHandler` -- ordinarily `vkv_resp::Dispatcher` -- and
// intercepts the transaction-control commands itself, forwarding
// everything else straight through (bumping WATCH versions along the
// way) so a `TransactionManager` can be dropped in wherever a bare
// `CommandHandler` is expected (spec.md §4.7's dispatch boundary).
//
// Phases, per spec.md §4.8:
//   Prepare  -- MULTI queues commands; EXEC derives the transaction's
//               key footprint from them and acquires locks in
//               ascending-hash order (`KeyLockTable::lock_all`).
//   Main     -- queued commands run against the inner handler while
//               the footprint is held, so no other transaction or bare
//               command touching the same keys can interleave.
//   Finalize -- locks are dropped (end of `Main`'s scope) before the
//               response is returned; stored procedures that declare
//               no footprint skip Prepare entirely (`run_finalize_only`).

use std::sync::Arc;

use tokio::sync::Mutex;

use vkv_aof::AofWriter;
use vkv_base::SessionId;
use vkv_resp::{CommandHandler, Frame};

use crate::lock::KeyLockTable;
use crate::procedure::ProcedureRegistry;
use crate::watch::KeyVersionTable;

#[derive(Default)]
struct TxnState {
    in_multi: bool,
    queued: Vec<(String, Vec<Vec<u8>>)>,
    dirty: bool,
    watched: Vec<(u64, u64)>,
}

pub struct TransactionManager<H> {
    inner: Arc<H>,
    versions: Arc<KeyVersionTable>,
    locks: Arc<KeyLockTable>,
    procedures: Arc<ProcedureRegistry>,
    aof: Option<Arc<AofWriter>>,
    session: SessionId,
    state: Mutex<TxnState>,
}

impl<H: CommandHandler> TransactionManager<H> {
    pub fn new(inner: Arc<H>, versions: Arc<KeyVersionTable>, locks: Arc<KeyLockTable>) -> Self {
        TransactionManager {
            inner,
            versions,
            locks,
            procedures: Arc::new(ProcedureRegistry::new()),
            aof: None,
            session: SessionId(0),
            state: Mutex::new(TxnState::default()),
        }
    }

    pub fn with_aof(mut self, aof: Arc<AofWriter>, session: SessionId) -> Self {
        self.aof = Some(aof);
        self.session = session;
        self
    }

    pub fn with_procedures(mut self, procedures: Arc<ProcedureRegistry>) -> Self {
        self.procedures = procedures;
        self
    }

    fn bump_versions_for(&self, cmd: &str, args: &[Vec<u8>]) {
        if is_write_command(cmd) {
            for key in command_keys(cmd, args) {
                self.versions.bump(KeyVersionTable::hash_of(key));
            }
        }
    }

    async fn exec(&self) -> Frame {
        let (was_in_multi, queued, watched, dirty) = {
            let mut state = self.state.lock().await;
            let was_in_multi = state.in_multi;
            state.in_multi = false;
            (
                was_in_multi,
                std::mem::take(&mut state.queued),
                std::mem::take(&mut state.watched),
                std::mem::replace(&mut state.dirty, false),
            )
        };
        if !was_in_multi {
            return Frame::error("ERR EXEC without MULTI");
        }
        if dirty {
            return Frame::error("EXECABORT Transaction discarded because of previous errors.");
        }
        for (hash, at_watch) in &watched {
            if self.versions.current(*hash) != *at_watch {
                return Frame::Array(None);
            }
        }
        let hashes: Vec<u64> = queued
            .iter()
            .flat_map(|(cmd, args)| command_keys(cmd, args))
            .map(KeyVersionTable::hash_of)
            .collect();
        let _guard = self.locks.lock_all(hashes).await;

        if let Some(aof) = &self.aof {
            let _ = aof.write_txn_start(self.session, vkv_base::Version(0)).await;
        }
        let mut results = Vec::with_capacity(queued.len());
        for (cmd, args) in &queued {
            let response = self.inner.call(cmd, args).await;
            self.bump_versions_for(cmd, args);
            results.push(response);
        }
        if let Some(aof) = &self.aof {
            let _ = aof.write_txn_commit(self.session, vkv_base::Version(0)).await;
        }
        Frame::array(results)
    }
}

#[async_trait::async_trait]
impl<H: CommandHandler> CommandHandler for TransactionManager<H> {
    async fn call(&self, cmd: &str, args: &[Vec<u8>]) -> Frame {
        let upper = cmd.to_ascii_uppercase();
        match upper.as_str() {
            "MULTI" => {
                let mut state = self.state.lock().await;
                if state.in_multi {
                    return Frame::error("ERR MULTI calls can not be nested");
                }
                state.in_multi = true;
                state.queued.clear();
                state.dirty = false;
                Frame::simple("OK")
            }
            "DISCARD" => {
                let mut state = self.state.lock().await;
                if !state.in_multi {
                    return Frame::error("ERR DISCARD without MULTI");
                }
                *state = TxnState::default();
                Frame::simple("OK")
            }
            "WATCH" => {
                let mut state = self.state.lock().await;
                if state.in_multi {
                    return Frame::error("ERR WATCH inside MULTI is not allowed");
                }
                for key in args {
                    let hash = KeyVersionTable::hash_of(key);
                    state.watched.push((hash, self.versions.current(hash)));
                }
                Frame::simple("OK")
            }
            "UNWATCH" => {
                self.state.lock().await.watched.clear();
                Frame::simple("OK")
            }
            "EXEC" => self.exec().await,
            "CALL" => {
                let Some(name) = args.first() else {
                    return Frame::error("ERR wrong number of arguments for 'call' command");
                };
                let name = String::from_utf8_lossy(name).to_string();
                let proc_args = &args[1..];
                match self.procedures.get(&name) {
                    Some(proc) => match proc.footprint(proc_args) {
                        Some(footprint) => {
                            let hashes = footprint.iter().map(|k| KeyVersionTable::hash_of(k));
                            let _guard = self.locks.lock_all(hashes).await;
                            proc.run(self.inner.as_ref(), proc_args).await
                        }
                        None => proc.run(self.inner.as_ref(), proc_args).await,
                    },
                    None => Frame::error(format!("ERR unknown stored procedure '{name}'")),
                }
            }
            _ => {
                let mut state = self.state.lock().await;
                if state.in_multi {
                    state.queued.push((cmd.to_string(), args.to_vec()));
                    Frame::simple("QUEUED")
                } else {
                    drop(state);
                    let response = self.inner.call(cmd, args).await;
                    self.bump_versions_for(cmd, args);
                    response
                }
            }
        }
    }
}

/// A conservative key-position table for the command set `vkv_resp`
/// implements: most commands take their key as the first argument, and
/// variadic-key commands (`DEL`) take every argument as a key. Commands
/// not listed here are treated as keyless (e.g. `PING`), which only
/// affects WATCH-version bumping and transaction footprint locking, not
/// correctness of the command itself.
fn command_keys<'a>(cmd: &str, args: &'a [Vec<u8>]) -> Vec<&'a [u8]> {
    match cmd.to_ascii_uppercase().as_str() {
        "DEL" | "EXISTS" => args.iter().map(|v| v.as_slice()).collect(),
        "PING" | "ECHO" | "DBSIZE" | "FLUSHALL" | "COMMAND" | "INFO" | "HELLO" | "SELECT" | "AUTH" | "CONFIG" => vec![],
        _ => args.first().map(|v| vec![v.as_slice()]).unwrap_or_default(),
    }
}

fn is_write_command(cmd: &str) -> bool {
    matches!(
        cmd.to_ascii_uppercase().as_str(),
        "SET" | "DEL"
            | "INCR"
            | "DECR"
            | "INCRBY"
            | "EXPIRE"
            | "PEXPIRE"
            | "PERSIST"
            | "LPUSH"
            | "RPUSH"
            | "LPOP"
            | "RPOP"
            | "LSET"
            | "LINSERT"
            | "LREM"
            | "ZADD"
            | "ZREM"
            | "GEOADD"
            | "HSET"
            | "HDEL"
            | "FLUSHALL"
    )
}
