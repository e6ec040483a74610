mod bucket;
mod index;

pub use index::{BucketGuard, HashIndex, Probe};
