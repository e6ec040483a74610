use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};

/// NX/XX/CH modifiers for `SortedSet::add`. NX and XX are mutually
/// exclusive and change whether the add happens at all; CH only
/// affects what the caller reports as "changed" (added + updated
/// instead of just added) and is not consulted here -- the dispatch
/// layer decides what to report based on `AddOutcome`.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddFlags {
    pub nx: bool,
    pub xx: bool,
    pub ch: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddOutcome {
    pub added: bool,
    pub updated: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RangeByRank {
    /// Ascending by (score, member).
    Forward,
    Reverse,
}

/// An ordered collection of `(score, member)` pairs with member
/// uniqueness. Ordering is `(score, member)` lexicographically, which
/// gives a stable tie-break between equal scores -- the same
/// convention Redis's skiplist uses.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SortedSet {
    by_score: BTreeMap<(OrderedFloat<f64>, Vec<u8>), ()>,
    by_member: HashMap<Vec<u8>, OrderedFloat<f64>>,
    size_bytes: usize,
    /// Bumped on every structural mutation; consulted by `SubsetView`
    /// to decide whether it needs to re-derive its bounds.
    version: u64,
}

impl SortedSet {
    pub fn new() -> Self {
        SortedSet::default()
    }

    pub fn len(&self) -> usize {
        self.by_member.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_member.is_empty()
    }

    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn score_of(&self, member: &[u8]) -> Option<f64> {
        self.by_member.get(member).map(|s| s.0)
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.by_member.contains_key(member)
    }

    /// Existing member with a new score updates in place; existing
    /// member with the *same* score is a no-op (`updated = false`).
    pub fn add(&mut self, member: Vec<u8>, score: f64, flags: AddFlags) -> AddOutcome {
        let score = OrderedFloat(score);
        match self.by_member.get(&member).copied() {
            Some(existing) => {
                if flags.nx {
                    return AddOutcome { added: false, updated: false };
                }
                if existing == score {
                    return AddOutcome { added: false, updated: false };
                }
                self.by_score.remove(&(existing, member.clone()));
                self.by_score.insert((score, member.clone()), ());
                self.by_member.insert(member, score);
                self.version += 1;
                AddOutcome { added: false, updated: true }
            }
            None => {
                if flags.xx {
                    return AddOutcome { added: false, updated: false };
                }
                self.size_bytes += member.len();
                self.by_score.insert((score, member.clone()), ());
                self.by_member.insert(member, score);
                self.version += 1;
                AddOutcome { added: true, updated: false }
            }
        }
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self.by_member.remove(member) {
            Some(score) => {
                self.by_score.remove(&(score, member.to_vec()));
                self.size_bytes -= member.len();
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// 1-based rank in ascending score order, or `None` if absent.
    pub fn rank(&self, member: &[u8]) -> Option<usize> {
        let score = *self.by_member.get(member)?;
        Some(
            self.by_score
                .range(..(score, member.to_vec()))
                .count(),
        )
    }

    pub fn range_by_score(&self, min: f64, max: f64) -> Vec<(Vec<u8>, f64)> {
        // A byte-string member has no fixed-width upper sentinel that's
        // safe to bound a BTreeMap range query with, so this filters the
        // whole map rather than risk excluding a max-score member whose
        // bytes sort "high". Consistent with the subset view's count()
        // being an intentional full walk rather than a cached range.
        self.by_score
            .range((OrderedFloat(min), vec![])..)
            .take_while(|((s, _), _)| s.0 <= max)
            .map(|((s, m), _)| (m.clone(), s.0))
            .collect()
    }

    /// All members whose score falls in `[min, max]`, lexicographically
    /// ordered and filtered to `[lex_min, lex_max]`. Mirrors Redis's
    /// ZRANGEBYLEX, which is only meaningful when every candidate member
    /// shares a score; callers are responsible for that precondition.
    pub fn range_by_lex(&self, min: f64, max: f64, lex_min: Bound<Vec<u8>>, lex_max: Bound<Vec<u8>>) -> Vec<Vec<u8>> {
        let mut members: Vec<Vec<u8>> = self
            .range_by_score(min, max)
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        members.sort();
        members
            .into_iter()
            .filter(|m| {
                let above_min = match &lex_min {
                    Bound::Included(b) => m >= b,
                    Bound::Excluded(b) => m > b,
                    Bound::Unbounded => true,
                };
                let below_max = match &lex_max {
                    Bound::Included(b) => m <= b,
                    Bound::Excluded(b) => m < b,
                    Bound::Unbounded => true,
                };
                above_min && below_max
            })
            .collect()
    }

    /// Negative indices count from the highest rank, matching `List`'s
    /// convention.
    pub fn range_by_rank(&self, start: i64, stop: i64, order: RangeByRank) -> Vec<(Vec<u8>, f64)> {
        let len = self.by_score.len() as i64;
        if len == 0 {
            return vec![];
        }
        let norm = |i: i64| if i < 0 { (len + i).max(0) } else { i };
        let start = norm(start);
        let stop = norm(stop).min(len - 1);
        if start > stop || start >= len {
            return vec![];
        }
        let items: Vec<(Vec<u8>, f64)> = self.by_score.keys().map(|(s, m)| (m.clone(), s.0)).collect();
        let slice = &items[start as usize..=(stop as usize)];
        match order {
            RangeByRank::Forward => slice.to_vec(),
            RangeByRank::Reverse => slice.iter().rev().cloned().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], f64)> {
        self.by_score.keys().map(|(s, m)| (m.as_slice(), s.0))
    }
}

/// A range-bounded (by score) view over an underlying `SortedSet`. The
/// view is lazily revalidated: it carries the underlying set's version
/// at creation time and, when that version advances, re-derives its
/// bounds rather than trusting a cached member list -- there is no
/// cached member list, which is what keeps `count()` an O(n) walk
/// instead of an O(1) read of stale state.
#[derive(Clone, Debug)]
pub struct SubsetView {
    lo: f64,
    hi: f64,
    last_seen_version: u64,
}

impl SubsetView {
    pub fn new(set: &SortedSet, lo: f64, hi: f64) -> Self {
        SubsetView { lo, hi, last_seen_version: set.version() }
    }

    fn revalidate(&mut self, set: &SortedSet) {
        // Nothing to recompute eagerly -- `by_score` is a BTreeMap, so
        // there's no persistent "subtree root" to relocate. Bumping the
        // watermark just records that this view has observed the
        // mutation; every query below re-derives its answer from the
        // live set regardless.
        self.last_seen_version = set.version();
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lo, self.hi)
    }

    pub fn contains(&mut self, set: &SortedSet, member: &[u8]) -> bool {
        self.revalidate(set);
        match set.score_of(member) {
            Some(score) => score >= self.lo && score <= self.hi,
            None => false,
        }
    }

    /// Full in-order walk, on purpose, every call -- see the module
    /// docs on `SortedSet` about the cached-count tradeoff this avoids.
    pub fn count(&mut self, set: &SortedSet) -> usize {
        self.revalidate(set);
        set.range_by_score(self.lo, self.hi).len()
    }

    pub fn members(&mut self, set: &SortedSet) -> Vec<(Vec<u8>, f64)> {
        self.revalidate(set);
        set.range_by_score(self.lo, self.hi)
    }
}
