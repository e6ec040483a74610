//! Cluster configuration: the epoch-versioned, immutable slot/worker
//! map and its CAS-based merge algorithm (spec.md §4.9).

mod config;

pub use config::{ClusterConfig, ClusterConfigHandle, Role, Worker, SLOT_COUNT};

/// Maps a key to one of the 16384 cluster slots. Honors the standard
/// `{tag}` hash-tag convention so related keys can be co-located on one
/// shard, the same way the store's own key hashing (`vkv_index`) keys
/// off the whole byte string otherwise.
pub fn key_slot(key: &[u8]) -> u16 {
    let tagged = hash_tag(key).unwrap_or(key);
    (rapidhash::rapidhash(tagged) % SLOT_COUNT as u64) as u16
}

fn hash_tag(key: &[u8]) -> Option<&[u8]> {
    let open = key.iter().position(|&b| b == b'{')?;
    let close = key[open + 1..].iter().position(|&b| b == b'}')?;
    if close == 0 {
        return None;
    }
    Some(&key[open + 1..open + 1 + close])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_slot_is_stable_and_in_range() {
        let a = key_slot(b"foo");
        let b = key_slot(b"foo");
        assert_eq!(a, b);
        assert!((a as usize) < SLOT_COUNT);
    }

    #[test]
    fn hash_tag_colocates_related_keys() {
        assert_eq!(key_slot(b"user:{123}:profile"), key_slot(b"user:{123}:sessions"));
    }

    #[test]
    fn empty_hash_tag_falls_back_to_whole_key() {
        assert_ne!(key_slot(b"a{}b"), key_slot(b"c{}d"));
    }
}
