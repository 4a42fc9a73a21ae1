use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free counters and gauges matching the names in §6. This crate does
/// not bind an HTTP listener for them — the metrics endpoint is an external
/// collaborator (§1, §6) — but exposes [`MetricsSink::render`], a
/// Prometheus-exposition-format text path a collaborator can mount
/// trivially, mirroring the teacher's `AdminView`-style snapshot structs in
/// `traffic_management::admin`.
#[derive(Default)]
pub struct MetricsSink {
    requests_total: DashMap<&'static str, AtomicU64>,
    bytes_up_total: AtomicU64,
    bytes_down_total: AtomicU64,
    auth_failures_total: AtomicU64,
    upstream_failures_total: DashMap<String, AtomicU64>,
    pool_size: AtomicU64,
    pool_healthy: AtomicU64,
    breaker_open: DashMap<String, AtomicU64>,
}

impl MetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_requests(&self, result: &'static str) {
        self.requests_total
            .entry(result)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_up(&self, n: u64) {
        self.bytes_up_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_bytes_down(&self, n: u64) {
        self.bytes_down_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn incr_auth_failures(&self) {
        self.auth_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn incr_upstream_failures(&self, upstream: &str) {
        self.upstream_failures_total
            .entry(upstream.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_pool_size(&self, n: u64) {
        self.pool_size.store(n, Ordering::Relaxed);
    }

    pub fn set_pool_healthy(&self, n: u64) {
        self.pool_healthy.store(n, Ordering::Relaxed);
    }

    pub fn set_breaker_open(&self, upstream: &str, open: bool) {
        self.breaker_open
            .entry(upstream.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(open as u64, Ordering::Relaxed);
    }

    /// Renders the current state in Prometheus exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        let _ = writeln!(out, "# TYPE requests_total counter");
        for entry in self.requests_total.iter() {
            let _ = writeln!(
                out,
                "requests_total{{result=\"{}\"}} {}",
                entry.key(),
                entry.value().load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# TYPE bytes_up_total counter");
        let _ = writeln!(
            out,
            "bytes_up_total {}",
            self.bytes_up_total.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# TYPE bytes_down_total counter");
        let _ = writeln!(
            out,
            "bytes_down_total {}",
            self.bytes_down_total.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# TYPE auth_failures_total counter");
        let _ = writeln!(
            out,
            "auth_failures_total {}",
            self.auth_failures_total.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# TYPE upstream_failures_total counter");
        for entry in self.upstream_failures_total.iter() {
            let _ = writeln!(
                out,
                "upstream_failures_total{{upstream=\"{}\"}} {}",
                entry.key(),
                entry.value().load(Ordering::Relaxed)
            );
        }

        let _ = writeln!(out, "# TYPE pool_size gauge");
        let _ = writeln!(out, "pool_size {}", self.pool_size.load(Ordering::Relaxed));

        let _ = writeln!(out, "# TYPE pool_healthy gauge");
        let _ = writeln!(
            out,
            "pool_healthy {}",
            self.pool_healthy.load(Ordering::Relaxed)
        );

        let _ = writeln!(out, "# TYPE breaker_open gauge");
        for entry in self.breaker_open.iter() {
            let _ = writeln!(
                out,
                "breaker_open{{upstream=\"{}\"}} {}",
                entry.key(),
                entry.value().load(Ordering::Relaxed)
            );
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_values() {
        let sink = MetricsSink::new();
        sink.incr_requests("no_upstream");
        sink.add_bytes_up(42);
        sink.incr_upstream_failures("a:1");
        sink.set_breaker_open("a:1", true);

        let rendered = sink.render();
        assert!(rendered.contains("requests_total{result=\"no_upstream\"} 1"));
        assert!(rendered.contains("bytes_up_total 42"));
        assert!(rendered.contains("upstream_failures_total{upstream=\"a:1\"} 1"));
        assert!(rendered.contains("breaker_open{upstream=\"a:1\"} 1"));
    }
}
