use vkv_base::Address;

// A single hash-table slot: the address of the newest log record filed
// under this bucket, plus the remaining hash bits ("tag") of the key that
// wrote it. `Entry::EMPTY` marks a bucket that has never been written.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct Entry {
    pub tag: u16,
    pub address: Address,
}

impl Entry {
    pub const EMPTY: Entry = Entry {
        tag: 0,
        address: Address::INVALID,
    };

    pub fn is_empty(&self) -> bool {
        !self.address.is_valid()
    }
}

// Splits a key hash into the bits that select a bucket and the bits kept
// resident in the bucket as a fast-path filter. The low 16 bits become the
// tag; bucket selection comes from the bits above that, so growing the
// table (more bucket-selector bits) never changes a key's tag.
pub(crate) const TAG_BITS: u32 = 16;

pub(crate) fn tag_of(hash: u64) -> u16 {
    (hash & 0xffff) as u16
}

pub(crate) fn selector_bits(hash: u64) -> u64 {
    hash >> TAG_BITS
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_entry_has_invalid_address() {
        assert!(Entry::EMPTY.is_empty());
        assert!(!Entry::EMPTY.address.is_valid());
    }

    #[test]
    fn tag_and_selector_partition_the_hash() {
        let hash: u64 = 0x1234_5678_9abc_def0;
        assert_eq!(tag_of(hash), 0xdef0);
        assert_eq!(selector_bits(hash), hash >> 16);
    }
}
