use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A doubly-linked sequence of byte strings. Backed by a `VecDeque`
/// rather than an actual linked list -- head/tail push/pop and
/// index-from-either-end are all the list operations need, and a
/// deque gives O(1) for all of them without the pointer-chasing a
/// literal linked list would cost on every `index`/`range` call.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct List {
    items: VecDeque<Vec<u8>>,
    size_bytes: usize,
}

impl List {
    pub fn new() -> Self {
        List::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn push_head(&mut self, value: Vec<u8>) {
        self.size_bytes += value.len();
        self.items.push_front(value);
    }

    pub fn push_tail(&mut self, value: Vec<u8>) {
        self.size_bytes += value.len();
        self.items.push_back(value);
    }

    pub fn pop_head(&mut self) -> Option<Vec<u8>> {
        let v = self.items.pop_front();
        if let Some(v) = &v {
            self.size_bytes -= v.len();
        }
        v
    }

    pub fn pop_tail(&mut self) -> Option<Vec<u8>> {
        let v = self.items.pop_back();
        if let Some(v) = &v {
            self.size_bytes -= v.len();
        }
        v
    }

    fn resolve_index(&self, index: i64) -> Option<usize> {
        let len = self.items.len() as i64;
        let i = if index < 0 { len + index } else { index };
        if i < 0 || i >= len {
            None
        } else {
            Some(i as usize)
        }
    }

    /// Negative indices count from the tail. Out of range returns `None`.
    pub fn index(&self, index: i64) -> Option<&[u8]> {
        self.resolve_index(index).map(|i| self.items[i].as_slice())
    }

    pub fn set(&mut self, index: i64, value: Vec<u8>) -> bool {
        match self.resolve_index(index) {
            Some(i) => {
                self.size_bytes = self.size_bytes - self.items[i].len() + value.len();
                self.items[i] = value;
                true
            }
            None => false,
        }
    }

    /// Inclusive range; negative bounds count from the tail, mirroring
    /// `index`'s convention. An empty or fully out-of-range span
    /// returns an empty vec rather than erroring.
    pub fn range(&self, start: i64, stop: i64) -> Vec<Vec<u8>> {
        let len = self.items.len() as i64;
        if len == 0 {
            return vec![];
        }
        let norm = |i: i64| -> i64 {
            if i < 0 {
                (len + i).max(0)
            } else {
                i
            }
        };
        let start = norm(start);
        let stop = norm(stop).min(len - 1);
        if start > stop || start >= len {
            return vec![];
        }
        self.items
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect()
    }

    /// Inserts `value` immediately before or after the first element
    /// equal to `pivot`. Returns `false` if the pivot isn't found.
    pub fn insert(&mut self, before: bool, pivot: &[u8], value: Vec<u8>) -> bool {
        match self.items.iter().position(|v| v.as_slice() == pivot) {
            Some(i) => {
                let at = if before { i } else { i + 1 };
                self.size_bytes += value.len();
                self.items.insert(at, value);
                true
            }
            None => false,
        }
    }

    /// Removes elements equal to `value`. `count > 0` removes that many
    /// from the head; `count < 0` removes that many from the tail;
    /// `count == 0` removes all occurrences. Returns the number removed.
    pub fn remove(&mut self, value: &[u8], count: i64) -> usize {
        let matches: Vec<usize> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, v)| v.as_slice() == value)
            .map(|(i, _)| i)
            .collect();

        let to_remove: Vec<usize> = if count > 0 {
            matches.into_iter().take(count as usize).collect()
        } else if count < 0 {
            let n = (-count) as usize;
            let len = matches.len();
            matches.into_iter().skip(len.saturating_sub(n)).collect()
        } else {
            matches
        };

        for &i in to_remove.iter().rev() {
            let removed = self.items.remove(i).expect("index came from enumerate over self.items");
            self.size_bytes -= removed.len();
        }
        to_remove.len()
    }
}
