// AOF records: a fixed 14-byte header (op_type, sub_type, version, session
// id) followed by a variable-length payload. Keys and values inside the
// payload are themselves `{i32 length, bytes}` frames, written in the
// order each op-type's `fields()` documents below. The log allocator's own
// envelope (length-prefix + crc32) wraps the whole thing again, so torn
// writes are caught twice over: once by the log envelope, once by this
// record's own header being self-describing enough to re-derive its
// length during replay.

use vkv_base::{err, Result, SessionId, Version};

pub const HEADER_LEN: usize = 14;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum OpType {
    StoreUpsert = 0,
    StoreRmw = 1,
    StoreDelete = 2,
    ObjectStoreUpsert = 3,
    ObjectStoreRmw = 4,
    ObjectStoreDelete = 5,
    TxnStart = 6,
    TxnCommit = 7,
    TxnAbort = 8,
    StoredProcedure = 9,
    MainStoreCheckpointCommit = 10,
    ObjectStoreCheckpointCommit = 11,
}

impl OpType {
    pub fn from_u8(b: u8) -> Result<OpType> {
        Ok(match b {
            0 => OpType::StoreUpsert,
            1 => OpType::StoreRmw,
            2 => OpType::StoreDelete,
            3 => OpType::ObjectStoreUpsert,
            4 => OpType::ObjectStoreRmw,
            5 => OpType::ObjectStoreDelete,
            6 => OpType::TxnStart,
            7 => OpType::TxnCommit,
            8 => OpType::TxnAbort,
            9 => OpType::StoredProcedure,
            10 => OpType::MainStoreCheckpointCommit,
            11 => OpType::ObjectStoreCheckpointCommit,
            other => return Err(err(format!("unknown AOF op_type {other}"))),
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AofRecord {
    pub op_type: OpType,
    pub sub_type: u8,
    pub version: Version,
    pub session_id: SessionId,
    pub payload: Vec<u8>,
}

impl AofRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.op_type as u8);
        out.push(self.sub_type);
        out.extend_from_slice(&self.version.0.to_le_bytes());
        out.extend_from_slice(&self.session_id.0.to_le_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<AofRecord> {
        if bytes.len() < HEADER_LEN {
            return Err(err("AOF record shorter than header"));
        }
        let op_type = OpType::from_u8(bytes[0])?;
        let sub_type = bytes[1];
        let version = Version(u64::from_le_bytes(bytes[2..10].try_into().unwrap()));
        let session_id = SessionId(i32::from_le_bytes(bytes[10..14].try_into().unwrap()));
        let payload = bytes[HEADER_LEN..].to_vec();
        Ok(AofRecord {
            op_type,
            sub_type,
            version,
            session_id,
            payload,
        })
    }
}

/// Writes a `{i32 length, bytes}` frame, per spec.md §6's AOF payload
/// schema for keys and values.
pub fn write_frame(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as i32).to_le_bytes());
    out.extend_from_slice(bytes);
}

/// Reads one `{i32 length, bytes}` frame starting at `buf[pos]`, returning
/// the frame's bytes and the position just past it.
pub fn read_frame(buf: &[u8], pos: usize) -> Result<(&[u8], usize)> {
    if buf.len() < pos + 4 {
        return Err(err("truncated AOF frame length"));
    }
    let len = i32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
    if len < 0 {
        return Err(err("negative AOF frame length"));
    }
    let len = len as usize;
    let start = pos + 4;
    if buf.len() < start + len {
        return Err(err("truncated AOF frame body"));
    }
    Ok((&buf[start..start + len], start + len))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let rec = AofRecord {
            op_type: OpType::StoreUpsert,
            sub_type: 0,
            version: Version(7),
            session_id: SessionId(42),
            payload: b"payload".to_vec(),
        };
        let encoded = rec.encode();
        assert_eq!(encoded.len(), HEADER_LEN + 7);
        let decoded = AofRecord::decode(&encoded).unwrap();
        assert_eq!(decoded, rec);
    }

    #[test]
    fn unknown_op_type_is_rejected() {
        let mut bytes = vec![250u8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        bytes[0] = 250;
        assert!(AofRecord::decode(&bytes).is_err());
    }

    #[test]
    fn key_value_frames_roundtrip() {
        let mut payload = vec![];
        write_frame(&mut payload, b"key");
        write_frame(&mut payload, b"value");
        let (key, pos) = read_frame(&payload, 0).unwrap();
        assert_eq!(key, b"key");
        let (value, pos) = read_frame(&payload, pos).unwrap();
        assert_eq!(value, b"value");
        assert_eq!(pos, payload.len());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let mut payload = vec![];
        write_frame(&mut payload, b"key");
        assert!(read_frame(&payload[..payload.len() - 1], 0).is_err());
    }
}
