// Per-session counters a `Session` bumps as it dispatches commands
// (spec.md §4.11): "snapshots per-session counters, merges into global
// counters". Kept as plain atomics rather than behind a lock since a
// session's own task is the only writer and the monitor task is the
// only reader.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Default)]
pub struct SessionCounters {
    commands: AtomicU64,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    /// Set by `CONFIG RESETSTAT`-style requests; the monitor zeroes this
    /// session's contribution on its next sampling pass and clears the
    /// flag, rather than the session clearing its own counters (which
    /// would race the monitor's read).
    reset_requested: AtomicBool,
}

impl SessionCounters {
    pub fn record_command(&self, request_bytes: usize, response_bytes: usize) {
        self.commands.fetch_add(1, Ordering::Relaxed);
        self.bytes_in.fetch_add(request_bytes as u64, Ordering::Relaxed);
        self.bytes_out.fetch_add(response_bytes as u64, Ordering::Relaxed);
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::Relaxed);
    }

    /// Reads the current totals and, if a reset was requested, zeroes
    /// the counters atomically with clearing the flag so a concurrent
    /// `record_command` can't be silently dropped on the floor.
    pub fn sample_and_maybe_reset(&self) -> CounterSnapshot {
        let snapshot = CounterSnapshot {
            commands: self.commands.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
        };
        if self.reset_requested.swap(false, Ordering::Relaxed) {
            self.commands.store(0, Ordering::Relaxed);
            self.bytes_in.store(0, Ordering::Relaxed);
            self.bytes_out.store(0, Ordering::Relaxed);
        }
        snapshot
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CounterSnapshot {
    pub commands: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl std::ops::Add for CounterSnapshot {
    type Output = CounterSnapshot;
    fn add(self, rhs: CounterSnapshot) -> CounterSnapshot {
        CounterSnapshot {
            commands: self.commands + rhs.commands,
            bytes_in: self.bytes_in + rhs.bytes_in,
            bytes_out: self.bytes_out + rhs.bytes_out,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn records_accumulate_until_reset() {
        let counters = SessionCounters::default();
        counters.record_command(10, 20);
        counters.record_command(5, 5);
        let snap = counters.sample_and_maybe_reset();
        assert_eq!(snap, CounterSnapshot { commands: 2, bytes_in: 15, bytes_out: 25 });
        let snap2 = counters.sample_and_maybe_reset();
        assert_eq!(snap2, snap, "no reset requested, totals persist");
    }

    #[test]
    fn reset_flag_zeroes_on_next_sample_only() {
        let counters = SessionCounters::default();
        counters.record_command(10, 20);
        counters.request_reset();
        let snap = counters.sample_and_maybe_reset();
        assert_eq!(snap.commands, 1, "the reset takes effect after this sample, not before it");
        let snap2 = counters.sample_and_maybe_reset();
        assert_eq!(snap2, CounterSnapshot::default());
    }
}
