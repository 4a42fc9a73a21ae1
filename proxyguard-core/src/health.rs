use crate::metrics::MetricsSink;
use crate::pool::PoolRegistry;
use crate::upstream::{HealthState, UpstreamRecord};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, watch};

/// Periodically probes every upstream with a lightweight CONNECT to a
/// canary host (§4.4). Concurrency-capped via a semaphore so a large pool
/// cannot open hundreds of probe sockets at once; each probe's outcome both
/// updates the upstream's [`HealthState`] and feeds its breaker, since a
/// probe failure is as real a signal as a session failure.
pub struct HealthProber {
    canary: String,
    interval: Duration,
    timeout: Duration,
    concurrency: usize,
}

impl HealthProber {
    pub fn new(canary: impl Into<String>, interval: Duration, timeout: Duration, concurrency: usize) -> Self {
        Self {
            canary: canary.into(),
            interval,
            timeout,
            concurrency: concurrency.max(1),
        }
    }

    pub async fn run(
        &self,
        pool: Arc<PoolRegistry>,
        metrics: Arc<MetricsSink>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
            }

            let snapshot = pool.current();
            let healthy_count = std::sync::atomic::AtomicU64::new(0);
            let mut handles = Vec::with_capacity(snapshot.records.len());

            for record in snapshot.records.iter().cloned() {
                let semaphore = semaphore.clone();
                let pool = pool.clone();
                let metrics = metrics.clone();
                let canary = self.canary.clone();
                let timeout = self.timeout;

                handles.push(tokio::spawn(async move {
                    let _permit = semaphore.acquire().await.expect("semaphore never closed");
                    let ok = probe_one(&record, &canary, timeout).await;
                    pool.set_health_state(
                        record.id,
                        if ok { HealthState::Healthy } else { HealthState::Unhealthy },
                    );
                    pool.report_result(record.id, ok);
                    if !ok {
                        pool.force_breaker_open(record.id);
                        metrics.incr_upstream_failures(&record.id.to_string());
                    }
                    ok
                }));
            }

            for handle in handles {
                if let Ok(true) = handle.await {
                    healthy_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                }
            }

            metrics.set_pool_size(snapshot.records.len() as u64);
            metrics.set_pool_healthy(healthy_count.load(std::sync::atomic::Ordering::Relaxed));
        }
    }
}

/// Dials `record`, sends a CONNECT to `canary`, and returns whether the
/// handshake reported 2xx within `timeout` (§4.3 "success ... for plain
/// probes", adapted to the CONNECT canary described in §4.4).
async fn probe_one(record: &UpstreamRecord, canary: &str, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, probe_inner(record, canary))
        .await
        .unwrap_or(false)
}

async fn probe_inner(record: &UpstreamRecord, canary: &str) -> bool {
    let (host, port) = record.dial_addr();
    let mut stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(s) => s,
        Err(_) => return false,
    };

    let mut request = format!("CONNECT {canary} HTTP/1.1\r\nHost: {canary}\r\n");
    if let Some(auth) = record.basic_auth_header() {
        request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
    }
    request.push_str("\r\n");

    if stream.write_all(request.as_bytes()).await.is_err() {
        return false;
    }

    let mut buf = [0u8; 512];
    let n = match stream.read(&mut buf).await {
        Ok(n) if n > 0 => n,
        _ => return false,
    };

    parse_status_2xx(&buf[..n])
}

fn parse_status_2xx(response: &[u8]) -> bool {
    let mut headers = [httparse::EMPTY_HEADER; 1];
    let mut res = httparse::Response::new(&mut headers);
    match res.parse(response) {
        Ok(_) | Err(httparse::Error::TooManyHeaders) => {
            matches!(res.code, Some(code) if (200..300).contains(&code))
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_2xx_status_line() {
        assert!(parse_status_2xx(b"HTTP/1.1 200 Connection Established\r\n\r\n"));
        assert!(!parse_status_2xx(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n"));
        assert!(!parse_status_2xx(b"garbage"));
    }
}
