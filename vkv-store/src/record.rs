// The main-store record: a length-prefixed key and an optional value (a
// tombstone records `None`), plus the bookkeeping a chain walk and a
// recovery pass both need. This is the payload the log allocator wraps in
// its own length+checksum envelope; the record carries a second, wider
// checksum of its own because recovery needs to distinguish "envelope is
// fine but this record's fields are garbage" from "torn write", and
// because the checksum here covers the header fields too (prev_address in
// particular must not be silently corrupted).

use vkv_base::{err, Address, Result, Version};

// key_len(4) + value_len(4) + expiration(8) + version(8) + prev_address(8) + checksum(4)
const HEADER_LEN: usize = 36;
const TOMBSTONE_VALUE_LEN: u32 = u32::MAX;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Record {
    pub key: Vec<u8>,
    pub value: Option<Vec<u8>>,
    pub expiration: i64,
    pub version: Version,
    pub prev_address: Address,
}

impl Record {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_expired(&self, now_micros: i64) -> bool {
        self.expiration != 0 && self.expiration <= now_micros
    }

    pub fn encode(&self) -> Vec<u8> {
        let value_len = match &self.value {
            Some(v) => v.len() as u32,
            None => TOMBSTONE_VALUE_LEN,
        };
        let mut body =
            Vec::with_capacity(HEADER_LEN + self.key.len() + self.value.as_ref().map_or(0, |v| v.len()));
        body.extend_from_slice(&(self.key.len() as u32).to_le_bytes());
        body.extend_from_slice(&value_len.to_le_bytes());
        body.extend_from_slice(&self.expiration.to_le_bytes());
        body.extend_from_slice(&self.version.0.to_le_bytes());
        body.extend_from_slice(&self.prev_address.0.to_le_bytes());
        body.extend_from_slice(&[0u8; 4]); // checksum placeholder
        body.extend_from_slice(&self.key);
        if let Some(value) = &self.value {
            body.extend_from_slice(value);
        }
        let checksum = crc32fast::hash(&body[..28]) ^ crc32fast::hash(&body[HEADER_LEN..]);
        body[28..32].copy_from_slice(&checksum.to_le_bytes());
        body
    }

    pub fn decode(bytes: &[u8]) -> Result<Record> {
        if bytes.len() < HEADER_LEN {
            return Err(err("record shorter than header"));
        }
        let key_len = u32::from_le_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let value_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let expiration = i64::from_le_bytes(bytes[8..16].try_into().unwrap());
        let version = Version(u64::from_le_bytes(bytes[16..24].try_into().unwrap()));
        let prev_address = Address(u64::from_le_bytes(bytes[24..32].try_into().unwrap()));
        let checksum = u32::from_le_bytes(bytes[32..36].try_into().unwrap());

        let payload_len = if value_len == TOMBSTONE_VALUE_LEN {
            key_len
        } else {
            key_len + value_len as usize
        };
        if bytes.len() != HEADER_LEN + payload_len {
            return Err(err("record length does not match header"));
        }

        let expected = crc32fast::hash(&bytes[..28]) ^ crc32fast::hash(&bytes[HEADER_LEN..]);
        if expected != checksum {
            return Err(err("record checksum mismatch"));
        }

        let key = bytes[HEADER_LEN..HEADER_LEN + key_len].to_vec();
        let value = if value_len == TOMBSTONE_VALUE_LEN {
            None
        } else {
            Some(bytes[HEADER_LEN + key_len..].to_vec())
        };
        Ok(Record {
            key,
            value,
            expiration,
            version,
            prev_address,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_value() {
        let rec = Record {
            key: b"foo".to_vec(),
            value: Some(b"bar".to_vec()),
            expiration: 0,
            version: Version(1),
            prev_address: Address::INVALID,
        };
        let encoded = rec.encode();
        let decoded = Record::decode(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn roundtrip_tombstone() {
        let rec = Record {
            key: b"foo".to_vec(),
            value: None,
            expiration: 0,
            version: Version(2),
            prev_address: Address(128),
        };
        let encoded = rec.encode();
        let decoded = Record::decode(&encoded).unwrap();
        assert!(decoded.is_tombstone());
        assert_eq!(decoded.prev_address, Address(128));
    }

    #[test]
    fn detects_corruption() {
        let rec = Record {
            key: b"k".to_vec(),
            value: Some(b"v".to_vec()),
            expiration: 0,
            version: Version(1),
            prev_address: Address::INVALID,
        };
        let mut encoded = rec.encode();
        let last = encoded.len() - 1;
        encoded[last] ^= 0xff;
        assert!(Record::decode(&encoded).is_err());
    }

    #[test]
    fn expiration_zero_means_no_ttl() {
        let rec = Record {
            key: b"k".to_vec(),
            value: Some(b"v".to_vec()),
            expiration: 0,
            version: Version(1),
            prev_address: Address::INVALID,
        };
        assert!(!rec.is_expired(i64::MAX));
    }

    #[test]
    fn expiration_in_past_is_expired() {
        let rec = Record {
            key: b"k".to_vec(),
            value: Some(b"v".to_vec()),
            expiration: 100,
            version: Version(1),
            prev_address: Address::INVALID,
        };
        assert!(rec.is_expired(101));
        assert!(rec.is_expired(100));
        assert!(!rec.is_expired(99));
    }
}
