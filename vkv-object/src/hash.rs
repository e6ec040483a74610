use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A field/value map, the HSET/HGET family's backing type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HashObj {
    fields: HashMap<Vec<u8>, Vec<u8>>,
    size_bytes: usize,
}

impl HashObj {
    pub fn new() -> Self {
        HashObj::default()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn get(&self, field: &[u8]) -> Option<&[u8]> {
        self.fields.get(field).map(|v| v.as_slice())
    }

    /// Returns the previous value, if any (distinguishes HSET's "new
    /// field" vs "overwrote existing" return code).
    pub fn set(&mut self, field: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        self.size_bytes += value.len();
        let prev = self.fields.insert(field.clone(), value);
        match &prev {
            Some(prev) => self.size_bytes -= prev.len(),
            None => self.size_bytes += field.len(),
        }
        prev
    }

    pub fn remove(&mut self, field: &[u8]) -> Option<Vec<u8>> {
        let prev = self.fields.remove(field);
        if let Some(prev) = &prev {
            self.size_bytes -= field.len() + prev.len();
        }
        prev
    }

    pub fn contains(&self, field: &[u8]) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_overwrite_returns_previous_value() {
        let mut h = HashObj::new();
        assert_eq!(h.set(b"f".to_vec(), b"1".to_vec()), None);
        assert_eq!(h.set(b"f".to_vec(), b"2".to_vec()), Some(b"1".to_vec()));
        assert_eq!(h.get(b"f"), Some(b"2".as_slice()));
    }

    #[test]
    fn remove_absent_field_is_none() {
        let mut h = HashObj::new();
        assert_eq!(h.remove(b"nope"), None);
    }
}
