use serde::{Deserialize, Serialize};

// A 64-bit monotonically increasing log address, used by the log allocator,
// hash index, and AOF alike to name a byte offset into an append-only log.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Address(pub u64);

impl Address {
    pub const INVALID: Address = Address(u64::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl std::ops::Add<u64> for Address {
    type Output = Address;
    fn add(self, rhs: u64) -> Address {
        Address(self.0 + rhs)
    }
}

// A record or checkpoint version. Advances on checkpoint boundaries.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }
}

// Identifies a node within a cluster by its hex node-id.
#[derive(Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// Identifies one connection's in-flight session for AOF transaction
// bracketing and pending-I/O bookkeeping.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct SessionId(pub i32);
