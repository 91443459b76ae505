use crate::snapshot::{BackendMetrics, LatencySummary, MetricsSnapshot};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const NUM_HISTOGRAM_BINS: usize = 100;

/// Logarithmic histogram for percentile estimation.
///
/// Samples are in microseconds. Each power of ten gets its own decade of bins
/// and the leading digit selects the bin inside the decade, so bin `d * 10 + k`
/// covers `[k * 10^d, (k + 1) * 10^d)`. Bin 0 holds zero-length samples. Ten
/// decades reach a little under three hours, which comfortably covers the
/// slowest inference call.
///
/// Recording is O(1) and lock-free; percentile estimation scans all bins and
/// interpolates linearly inside the bin that contains the target rank.
#[derive(Debug)]
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        let bin = Self::latency_to_bin(latency_us);
        self.bins[bin].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10();
        let leading = latency_us / 10u64.pow(decade);
        let bin = decade as usize * 10 + leading as usize;
        bin.min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Inclusive lower and exclusive upper bound of a bin.
    fn bin_bounds(bin: usize) -> (u64, u64) {
        if bin == 0 {
            return (0, 1);
        }
        let scale = 10u64.pow((bin / 10) as u32);
        let leading = (bin % 10) as u64;
        (leading * scale, (leading + 1) * scale)
    }

    fn estimate_percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = ((total * percentile).div_ceil(100)).max(1);
        let mut cumulative = 0;

        for (idx, bin) in self.bins.iter().enumerate() {
            let count = bin.load(Ordering::Relaxed);
            if count > 0 && cumulative + count >= target {
                let (start, end) = Self::bin_bounds(idx);
                let fraction = (target - cumulative) as f64 / count as f64;
                return start + (fraction * (end - start) as f64) as u64;
            }
            cumulative += count;
        }

        Self::bin_bounds(NUM_HISTOGRAM_BINS - 1).1
    }

    fn summary(&self) -> LatencySummary {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            avg_us: self.total_latency.load(Ordering::Relaxed) / total,
            p50_us: self.estimate_percentile(50),
            p95_us: self.estimate_percentile(95),
            p99_us: self.estimate_percentile(99),
        }
    }
}

/// Per-backend counters. Created lazily on first sight of an address.
#[derive(Debug)]
struct BackendStats {
    dispatch_count: AtomicU64,
    dispatch_successes: AtomicU64,
    dispatch_failures: AtomicU64,
    admission_denied: AtomicU64,
    probe_successes: AtomicU64,
    probe_failures: AtomicU64,
    dispatch_latency: LatencyHistogram,
    probe_latency: LatencyHistogram,
}

impl BackendStats {
    fn new() -> Self {
        Self {
            dispatch_count: AtomicU64::new(0),
            dispatch_successes: AtomicU64::new(0),
            dispatch_failures: AtomicU64::new(0),
            admission_denied: AtomicU64::new(0),
            probe_successes: AtomicU64::new(0),
            probe_failures: AtomicU64::new(0),
            dispatch_latency: LatencyHistogram::new(),
            probe_latency: LatencyHistogram::new(),
        }
    }

    fn snapshot(&self) -> BackendMetrics {
        BackendMetrics {
            dispatch_count: self.dispatch_count.load(Ordering::Relaxed),
            dispatch_successes: self.dispatch_successes.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            admission_denied: self.admission_denied.load(Ordering::Relaxed),
            probe_successes: self.probe_successes.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            dispatch_latency: self.dispatch_latency.summary(),
            probe_latency: self.probe_latency.summary(),
        }
    }
}

/// Central metrics store shared by the router, the health monitor and the
/// ingress server.
///
/// All atomics use `Ordering::Relaxed`: counters are independent of each other
/// and a snapshot is a best-effort point-in-time view.
#[derive(Debug)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    succeeded_requests: AtomicU64,
    exhausted_requests: AtomicU64,
    unavailable_requests: AtomicU64,
    retries: AtomicU64,
    admission_denied: AtomicU64,
    request_latency: LatencyHistogram,
    backends: RwLock<HashMap<String, Arc<BackendStats>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            succeeded_requests: AtomicU64::new(0),
            exhausted_requests: AtomicU64::new(0),
            unavailable_requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            admission_denied: AtomicU64::new(0),
            request_latency: LatencyHistogram::new(),
            backends: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Returns the stats entry for a backend, creating it on first use.
    fn backend(&self, address: &str) -> Arc<BackendStats> {
        if let Some(stats) = self.backends.read().get(address) {
            return Arc::clone(stats);
        }
        let mut guard = self.backends.write();
        Arc::clone(
            guard
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(BackendStats::new())),
        )
    }

    pub fn record_request_received(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_succeeded(&self, latency: Duration) {
        self.succeeded_requests.fetch_add(1, Ordering::Relaxed);
        self.request_latency.record(latency.as_micros() as u64);
    }

    pub fn record_request_exhausted(&self, latency: Duration) {
        self.exhausted_requests.fetch_add(1, Ordering::Relaxed);
        self.request_latency.record(latency.as_micros() as u64);
    }

    pub fn record_request_unavailable(&self) {
        self.unavailable_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    /// A selected backend lost the admission race.
    pub fn record_admission_denied(&self, address: &str) {
        self.admission_denied.fetch_add(1, Ordering::Relaxed);
        self.backend(address)
            .admission_denied
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Records one dispatch attempt against a backend.
    pub fn record_dispatch(&self, address: &str, latency: Duration, success: bool) {
        let stats = self.backend(address);
        stats.dispatch_count.fetch_add(1, Ordering::Relaxed);
        if success {
            stats.dispatch_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.dispatch_failures.fetch_add(1, Ordering::Relaxed);
        }
        stats.dispatch_latency.record(latency.as_micros() as u64);
    }

    /// Records one health probe result.
    pub fn record_probe(&self, address: &str, latency: Duration, success: bool) {
        let stats = self.backend(address);
        if success {
            stats.probe_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            stats.probe_failures.fetch_add(1, Ordering::Relaxed);
        }
        stats.probe_latency.record(latency.as_micros() as u64);
    }

    /// Drops stats for backends that are no longer part of the fleet.
    pub fn retain_backends(&self, addresses: &[String]) {
        self.backends
            .write()
            .retain(|address, _| addresses.iter().any(|a| a == address));
    }

    pub fn uptime_ms(&self) -> u64 {
        self.start_time.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let backends: BTreeMap<String, BackendMetrics> = self
            .backends
            .read()
            .iter()
            .map(|(address, stats)| (address.clone(), stats.snapshot()))
            .collect();

        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            succeeded_requests: self.succeeded_requests.load(Ordering::Relaxed),
            exhausted_requests: self.exhausted_requests.load(Ordering::Relaxed),
            unavailable_requests: self.unavailable_requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            admission_denied: self.admission_denied.load(Ordering::Relaxed),
            uptime_ms: self.uptime_ms(),
            request_latency: self.request_latency.summary(),
            backends,
        }
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_request_outcomes() {
        let registry = MetricsRegistry::new();

        for _ in 0..4 {
            registry.record_request_received();
        }
        registry.record_request_succeeded(Duration::from_millis(10));
        registry.record_request_succeeded(Duration::from_millis(30));
        registry.record_request_exhausted(Duration::from_millis(50));
        registry.record_request_unavailable();
        registry.record_retry();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_requests, 4);
        assert_eq!(snapshot.succeeded_requests, 2);
        assert_eq!(snapshot.exhausted_requests, 1);
        assert_eq!(snapshot.unavailable_requests, 1);
        assert_eq!(snapshot.retries, 1);
        assert_eq!(snapshot.in_progress(), 0);
        assert_eq!(snapshot.request_latency.avg_us, 30_000);
    }

    #[test]
    fn test_backend_tracking() {
        let registry = MetricsRegistry::new();

        registry.record_dispatch("a:1", Duration::from_micros(100), true);
        registry.record_dispatch("a:1", Duration::from_micros(200), true);
        registry.record_dispatch("a:1", Duration::from_micros(50), false);
        registry.record_dispatch("b:1", Duration::from_micros(10), false);
        registry.record_admission_denied("b:1");
        registry.record_probe("b:1", Duration::from_millis(2), false);

        let snapshot = registry.snapshot();
        let a = &snapshot.backends["a:1"];
        assert_eq!(a.dispatch_count, 3);
        assert_eq!(a.dispatch_successes, 2);
        assert_eq!(a.dispatch_failures, 1);
        assert_eq!(a.dispatch_latency.avg_us, 116);

        let b = &snapshot.backends["b:1"];
        assert_eq!(b.dispatch_failures, 1);
        assert_eq!(b.admission_denied, 1);
        assert_eq!(b.probe_failures, 1);
        assert_eq!(b.probe_successes, 0);
        assert_eq!(snapshot.admission_denied, 1);
    }

    #[test]
    fn test_retain_backends() {
        let registry = MetricsRegistry::new();
        registry.record_dispatch("a:1", Duration::ZERO, true);
        registry.record_dispatch("b:1", Duration::ZERO, true);

        registry.retain_backends(&["b:1".to_string()]);

        let snapshot = registry.snapshot();
        assert!(!snapshot.backends.contains_key("a:1"));
        assert!(snapshot.backends.contains_key("b:1"));
    }

    #[test]
    fn test_thread_safety() {
        let registry = Arc::new(MetricsRegistry::new());
        let mut handles = vec![];

        for i in 0..10 {
            let registry = registry.clone();
            handles.push(thread::spawn(move || {
                let address = format!("backend-{}:1", i % 3);
                for _ in 0..1000 {
                    registry.record_request_received();
                    registry.record_dispatch(&address, Duration::from_micros(100), true);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total_requests, 10_000);
        let dispatched: u64 = snapshot.backends.values().map(|b| b.dispatch_count).sum();
        assert_eq!(dispatched, 10_000);
        assert_eq!(snapshot.backends.len(), 3);
    }

    #[test]
    fn test_uptime() {
        let registry = MetricsRegistry::new();
        thread::sleep(Duration::from_millis(10));
        assert!(registry.uptime_ms() >= 10);
    }

    // ========================================================================
    // Histogram
    // ========================================================================

    #[test]
    fn test_histogram_percentiles() {
        let histogram = LatencyHistogram::new();
        for i in 0..1000 {
            histogram.record(i);
        }

        let summary = histogram.summary();
        assert_eq!(summary.avg_us, 499);
        assert!(summary.p50_us >= 450 && summary.p50_us <= 550, "p50 = {}", summary.p50_us);
        assert!(summary.p95_us >= 900 && summary.p95_us <= 999, "p95 = {}", summary.p95_us);
        assert!(summary.p99_us >= 950 && summary.p99_us <= 999, "p99 = {}", summary.p99_us);
    }

    #[test]
    fn test_histogram_empty() {
        assert_eq!(LatencyHistogram::new().summary(), LatencySummary::default());
    }

    #[test]
    fn test_histogram_bin_mapping() {
        assert_eq!(LatencyHistogram::latency_to_bin(0), 0);
        assert_eq!(LatencyHistogram::latency_to_bin(1), 1);
        assert_eq!(LatencyHistogram::latency_to_bin(9), 9);
        assert_eq!(LatencyHistogram::latency_to_bin(10), 11);
        assert_eq!(LatencyHistogram::latency_to_bin(250), 22);
        assert_eq!(LatencyHistogram::latency_to_bin(30_000_000), 73);
        assert_eq!(LatencyHistogram::latency_to_bin(u64::MAX), NUM_HISTOGRAM_BINS - 1);

        assert_eq!(LatencyHistogram::bin_bounds(22), (200, 300));
        assert_eq!(LatencyHistogram::bin_bounds(0), (0, 1));
    }

    #[test]
    fn test_histogram_single_slow_sample() {
        let histogram = LatencyHistogram::new();
        histogram.record(30_000_000);
        let summary = histogram.summary();
        assert!(summary.p99_us >= 30_000_000 && summary.p99_us <= 40_000_000);
    }
}
