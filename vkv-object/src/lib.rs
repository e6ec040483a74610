//! Typed values that live behind a key in addition to the plain byte
//! strings the store kernel handles directly: lists, sorted sets (and
//! the geo-indexed sorted set variant), and hashes.
//!
//! Each operation is a pure function of `(current object, input) ->
//! (new object, output)` -- callers own the concurrency control (a
//! store record holds one `Object`, mutated under the same lockable
//! context that guards plain byte values).

mod geo;
mod hash;
mod list;
mod sorted_set;

pub use geo::{geo_decode, geo_encode, geo_hash_string, haversine_km, GeoBox, GEO_HASH_ALPHABET};
pub use hash::HashObj;
pub use list::List;
pub use sorted_set::{AddFlags, RangeByRank, SortedSet, SubsetView};

use serde::{Deserialize, Serialize};

/// The typed value stored behind a key, as an alternative to a plain
/// byte string (which the store kernel's `Record` carries directly).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Object {
    List(List),
    SortedSet(SortedSet),
    Hash(HashObj),
}

impl Object {
    /// Approximate heap footprint, maintained incrementally by each
    /// typed object rather than recomputed here; used for cache
    /// eviction accounting.
    pub fn size_bytes(&self) -> usize {
        match self {
            Object::List(l) => l.size_bytes(),
            Object::SortedSet(s) => s.size_bytes(),
            Object::Hash(h) => h.size_bytes(),
        }
    }

    pub fn encode(&self) -> vkv_base::Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> vkv_base::Result<Object> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Object::List(_) => "list",
            Object::SortedSet(_) => "zset",
            Object::Hash(_) => "hash",
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut list = List::new();
        list.push_tail(b"a".to_vec());
        list.push_tail(b"b".to_vec());
        let obj = Object::List(list);
        let bytes = obj.encode().unwrap();
        let back = Object::decode(&bytes).unwrap();
        match back {
            Object::List(l) => assert_eq!(l.range(0, -1), vec![b"a".to_vec(), b"b".to_vec()]),
            _ => panic!("wrong variant"),
        }
    }
}
