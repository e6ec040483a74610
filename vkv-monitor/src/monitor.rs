// The periodic sampling task itself (spec.md §4.11): every
// `sampling_frequency` seconds, snapshot per-session counters, merge
// into the running global totals, and compute instantaneous cmd/sec
// and bytes/sec over the elapsed wall interval since the previous pass.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use vkv_base::Clock;

use crate::counters::CounterSnapshot;
use crate::histogram::{LatencyHistograms, LatencyStats};
use crate::registry::SessionRegistry;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rates {
    pub commands_per_sec: f64,
    pub bytes_in_per_sec: f64,
    pub bytes_out_per_sec: f64,
}

pub struct Monitor {
    clock: Arc<dyn Clock>,
    registry: Arc<SessionRegistry>,
    latencies: Arc<LatencyHistograms>,
    global: std::sync::Mutex<CounterSnapshot>,
    last_sample_micros: AtomicI64,
}

impl Monitor {
    pub fn new(clock: Arc<dyn Clock>, registry: Arc<SessionRegistry>, latencies: Arc<LatencyHistograms>) -> Self {
        let now = clock.now_micros();
        Monitor { clock, registry, latencies, global: std::sync::Mutex::new(CounterSnapshot::default()), last_sample_micros: AtomicI64::new(now) }
    }

    /// Runs one sampling pass: merges every live session's counters
    /// (honoring any pending reset flags) into the global totals and
    /// returns the instantaneous rates since the prior pass.
    pub fn sample(&self) -> Rates {
        let merged = self
            .registry
            .active_sessions()
            .into_iter()
            .map(|s| s.sample_and_maybe_reset())
            .fold(CounterSnapshot::default(), |acc, s| acc + s);

        let now = self.clock.now_micros();
        let prev = self.last_sample_micros.swap(now, Ordering::Relaxed);
        let elapsed_secs = ((now - prev).max(1) as f64) / 1_000_000.0;

        let mut global = self.global.lock().unwrap();
        *global = *global + merged;

        Rates {
            commands_per_sec: merged.commands as f64 / elapsed_secs,
            bytes_in_per_sec: merged.bytes_in as f64 / elapsed_secs,
            bytes_out_per_sec: merged.bytes_out as f64 / elapsed_secs,
        }
    }

    pub fn global_totals(&self) -> CounterSnapshot {
        *self.global.lock().unwrap()
    }

    pub fn latency_stats(&self, command: &str) -> Option<LatencyStats> {
        self.latencies.stats(command)
    }

    pub fn record_latency(&self, command: &str, micros: u64) {
        self.latencies.record(command, micros);
    }

    /// Runs `sample` every `period` until `cancel` resolves. Intended to
    /// be spawned as one of the server's dedicated background workers
    /// (spec.md §5: "Background tasks (gossip, monitor, failover,
    /// checkpoint streaming) run on dedicated workers").
    pub async fn run(self: Arc<Self>, period: std::time::Duration, mut cancel: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let rates = self.sample();
                    tracing::debug!(
                        cmds_per_sec = rates.commands_per_sec,
                        bytes_in_per_sec = rates.bytes_in_per_sec,
                        bytes_out_per_sec = rates.bytes_out_per_sec,
                        "monitor sample"
                    );
                }
                _ = &mut cancel => break,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use test_log::test;
    use vkv_base::{ManualClock, SessionId};

    #[test]
    fn sample_merges_sessions_and_computes_rates() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(SessionRegistry::new());
        let latencies = Arc::new(LatencyHistograms::new());
        let monitor = Monitor::new(clock.clone(), registry.clone(), latencies);

        let session = registry.register(SessionId(1));
        session.record_command(10, 20);
        session.record_command(10, 20);

        clock.advance(2_000_000);
        let rates = monitor.sample();
        assert_eq!(rates.commands_per_sec, 1.0);
        assert_eq!(rates.bytes_in_per_sec, 10.0);
        assert_eq!(monitor.global_totals().commands, 2);
    }

    #[test]
    fn consecutive_samples_do_not_double_count_the_same_commands() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(SessionRegistry::new());
        let latencies = Arc::new(LatencyHistograms::new());
        let monitor = Monitor::new(clock.clone(), registry.clone(), latencies);

        let session = registry.register(SessionId(1));
        session.record_command(1, 1);
        clock.advance(1_000_000);
        monitor.sample();
        clock.advance(1_000_000);
        let rates = monitor.sample();
        assert_eq!(rates.commands_per_sec, 0.0);
        assert_eq!(monitor.global_totals().commands, 1);
    }

    #[test(tokio::test)]
    async fn run_stops_on_cancellation() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(SessionRegistry::new());
        let latencies = Arc::new(LatencyHistograms::new());
        let monitor = Arc::new(Monitor::new(clock, registry, latencies));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(monitor.run(std::time::Duration::from_millis(10), rx));
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
