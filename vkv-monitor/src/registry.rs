// The set of live sessions the monitor samples each pass. Sessions
// register on connect and deregister on close; the registry only holds
// an `Arc`, so a session that closes mid-sample still contributes its
// final numbers.

use std::sync::Arc;

use dashmap::DashMap;

use vkv_base::SessionId;

use crate::counters::SessionCounters;

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<SessionCounters>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    pub fn register(&self, id: SessionId) -> Arc<SessionCounters> {
        let counters = Arc::new(SessionCounters::default());
        self.sessions.insert(id, counters.clone());
        counters
    }

    pub fn deregister(&self, id: SessionId) {
        self.sessions.remove(&id);
    }

    pub fn active_sessions(&self) -> Vec<Arc<SessionCounters>> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
