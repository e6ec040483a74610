// Per-command latency histograms (spec.md §4.11): "bounded at 100 s,
// 2 significant digits". Recorded in microseconds so a 100 s bound is
// representable in a u64 without overflow concerns.

use std::sync::Mutex;

use dashmap::DashMap;
use hdrhistogram::Histogram;

const MAX_LATENCY_MICROS: u64 = 100 * 1_000_000;
const SIGNIFICANT_DIGITS: u8 = 2;

#[derive(Clone, Copy, Debug)]
pub struct LatencyStats {
    pub count: u64,
    pub min_micros: u64,
    pub mean_micros: f64,
    pub p99_micros: u64,
    pub max_micros: u64,
}

pub struct LatencyHistograms {
    by_command: DashMap<String, Mutex<Histogram<u64>>>,
}

impl Default for LatencyHistograms {
    fn default() -> Self {
        LatencyHistograms { by_command: DashMap::new() }
    }
}

impl LatencyHistograms {
    pub fn new() -> Self {
        LatencyHistograms::default()
    }

    pub fn record(&self, command: &str, micros: u64) {
        let clamped = micros.min(MAX_LATENCY_MICROS);
        let entry = self
            .by_command
            .entry(command.to_ascii_uppercase())
            .or_insert_with(|| Mutex::new(Histogram::new_with_bounds(1, MAX_LATENCY_MICROS, SIGNIFICANT_DIGITS).expect("valid histogram bounds")));
        entry.lock().unwrap().record(clamped).expect("value is within configured bounds");
    }

    pub fn stats(&self, command: &str) -> Option<LatencyStats> {
        let entry = self.by_command.get(&command.to_ascii_uppercase())?;
        let hist = entry.lock().unwrap();
        if hist.len() == 0 {
            return None;
        }
        Some(LatencyStats {
            count: hist.len(),
            min_micros: hist.min(),
            mean_micros: hist.mean(),
            p99_micros: hist.value_at_quantile(0.99),
            max_micros: hist.max(),
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.by_command.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn records_and_reports_stats_per_command() {
        let histograms = LatencyHistograms::new();
        histograms.record("get", 100);
        histograms.record("GET", 200);
        histograms.record("set", 50);

        let get_stats = histograms.stats("get").unwrap();
        assert_eq!(get_stats.count, 2);
        assert_eq!(get_stats.min_micros, 100);

        let set_stats = histograms.stats("SET").unwrap();
        assert_eq!(set_stats.count, 1);
    }

    #[test]
    fn unknown_command_has_no_stats() {
        let histograms = LatencyHistograms::new();
        assert!(histograms.stats("nope").is_none());
    }

    #[test]
    fn latencies_beyond_the_bound_are_clamped_not_rejected() {
        let histograms = LatencyHistograms::new();
        histograms.record("slow", 200 * 1_000_000);
        let stats = histograms.stats("slow").unwrap();
        assert_eq!(stats.max_micros, MAX_LATENCY_MICROS);
    }
}
