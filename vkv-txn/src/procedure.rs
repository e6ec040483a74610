// Stored procedures (spec.md §4.8): server-side command sequences that
// run with an explicit, named footprint rather than the client having
// to bracket them in MULTI/EXEC. Lua/script *authoring* is out of
// scope (spec.md §1); procedures here are native Rust callables
// registered at startup, per SPEC_FULL.md §9's "tagged sum variant …
// with an explicit vtable of function pointers" redesign note for
// deep/virtual dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use vkv_resp::{CommandHandler, Frame};

#[async_trait::async_trait]
pub trait StoredProcedure: Send + Sync {
    /// The set of keys this call will touch, given its arguments.
    /// `None` means "finalize-only": the procedure runs lock-free
    /// (spec.md §4.8's Prepare-skipping mode), typically because it
    /// only reads already-consistent state or performs no key access.
    fn footprint(&self, args: &[Vec<u8>]) -> Option<Vec<Vec<u8>>>;

    async fn run(&self, ctx: &dyn CommandHandler, args: &[Vec<u8>]) -> Frame;
}

#[derive(Default)]
pub struct ProcedureRegistry {
    procedures: HashMap<String, Arc<dyn StoredProcedure>>,
}

impl ProcedureRegistry {
    /// An empty registry plus the procedures this crate ships: `SWAP`
    /// (atomically exchanges two keys' values) and `HEALTHCHECK`
    /// (lock-free liveness probe).
    pub fn new() -> Self {
        let mut registry = ProcedureRegistry::default();
        registry.register("SWAP", Arc::new(Swap));
        registry.register("HEALTHCHECK", Arc::new(HealthCheck));
        registry
    }

    pub fn register(&mut self, name: &str, procedure: Arc<dyn StoredProcedure>) {
        self.procedures.insert(name.to_ascii_uppercase(), procedure);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StoredProcedure>> {
        self.procedures.get(&name.to_ascii_uppercase()).cloned()
    }
}

struct Swap;

#[async_trait::async_trait]
impl StoredProcedure for Swap {
    fn footprint(&self, args: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
        (args.len() == 2).then(|| args.to_vec())
    }

    async fn run(&self, ctx: &dyn CommandHandler, args: &[Vec<u8>]) -> Frame {
        let (Some(a), Some(b)) = (args.first(), args.get(1)) else {
            return Frame::error("ERR wrong number of arguments for 'swap' procedure");
        };
        let va = match ctx.call("GET", &[a.clone()]).await {
            Frame::Bulk(Some(v)) => v,
            Frame::Bulk(None) => vec![],
            other => return other,
        };
        let vb = match ctx.call("GET", &[b.clone()]).await {
            Frame::Bulk(Some(v)) => v,
            Frame::Bulk(None) => vec![],
            other => return other,
        };
        ctx.call("SET", &[a.clone(), vb]).await;
        ctx.call("SET", &[b.clone(), va]).await;
        Frame::simple("OK")
    }
}

struct HealthCheck;

#[async_trait::async_trait]
impl StoredProcedure for HealthCheck {
    fn footprint(&self, _args: &[Vec<u8>]) -> Option<Vec<Vec<u8>>> {
        None
    }

    async fn run(&self, _ctx: &dyn CommandHandler, _args: &[Vec<u8>]) -> Frame {
        Frame::simple("OK")
    }
}
