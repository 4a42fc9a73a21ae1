use crate::metrics::MetricsSink;
use crate::pool::PoolRegistry;
use crate::upstream::ParsedUpstream;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Parses the proxy file format from §6: one `scheme://[user[:pass]@]host:port`
/// per non-empty, non-comment (`#`) line.
pub fn parse_proxy_file(contents: &str) -> Result<Vec<ParsedUpstream>, String> {
    let mut out = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let parsed = ParsedUpstream::parse(line)
            .map_err(|reason| format!("line {}: {reason}", idx + 1))?;
        out.push(parsed);
    }
    Ok(out)
}

/// Observes the configured proxy file for modification (stat-based polling,
/// §4.7) and submits parsed upstream sets to the [`PoolRegistry`]. A parse
/// or duplicate-entry error aborts the reload without touching the current
/// snapshot — it is surfaced as a metric and a log record, never a crash.
pub struct ReloadWatcher {
    path: String,
    poll_interval: Duration,
}

impl ReloadWatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            poll_interval: Duration::from_secs(2),
        }
    }

    /// Performs the initial load at startup. An empty or unreadable file at
    /// startup yields an empty pool rather than a fatal error — the gateway
    /// still starts and will pick up upstreams on the first successful poll.
    pub async fn initial_load(&self, pool: &PoolRegistry, metrics: &MetricsSink) {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => self.apply(&contents, pool, metrics),
            Err(e) => {
                tracing::warn!(path = %self.path, error = %e, "proxy file unreadable at startup; starting with an empty pool");
            }
        }
    }

    /// Runs the poll loop until `shutdown` fires.
    pub async fn run(&self, pool: &PoolRegistry, metrics: &MetricsSink, mut shutdown: watch::Receiver<bool>) {
        let mut last_modified: Option<SystemTime> = self.modified_time().await;
        let mut ticker = tokio::time::interval(self.poll_interval);

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

            let modified = self.modified_time().await;
            if modified == last_modified {
                continue;
            }
            last_modified = modified;

            match tokio::fs::read_to_string(&self.path).await {
                Ok(contents) => self.apply(&contents, pool, metrics),
                Err(e) => {
                    tracing::warn!(path = %self.path, error = %e, "failed to read proxy file on reload");
                    metrics.incr_requests("reload_read_error");
                }
            }
        }
    }

    async fn modified_time(&self) -> Option<SystemTime> {
        tokio::fs::metadata(&self.path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
    }

    fn apply(&self, contents: &str, pool: &PoolRegistry, metrics: &MetricsSink) {
        let parsed = match parse_proxy_file(contents) {
            Ok(parsed) => parsed,
            Err(reason) => {
                tracing::error!(path = %self.path, reason = %reason, "proxy file parse error; snapshot unchanged");
                metrics.incr_requests("reload_parse_error");
                return;
            }
        };

        match pool.replace(parsed) {
            Ok(snapshot) => {
                tracing::info!(path = %self.path, upstreams = snapshot.records.len(), version = snapshot.version, "pool reloaded");
                metrics.set_pool_size(snapshot.records.len() as u64);
            }
            Err(reason) => {
                tracing::error!(path = %self.path, reason = %reason, "proxy file rejected; snapshot unchanged");
                metrics.incr_requests("reload_parse_error");
            }
        }
    }
}

pub fn is_proxy_file_name_valid(path: &str) -> bool {
    !Path::new(path).as_os_str().is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerParams;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn parses_blank_and_comment_lines() {
        let parsed = parse_proxy_file("# comment\n\nhttp://user:pass@a:1\nhttp://b:2\n").unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].host, "a");
        assert_eq!(parsed[0].username.as_deref(), Some("user"));
        assert_eq!(parsed[1].host, "b");
    }

    #[test]
    fn rejects_malformed_line_with_context() {
        let err = parse_proxy_file("http://a:1\nnotaurl\n").unwrap_err();
        assert!(err.starts_with("line 2"));
    }

    /// §8 concrete scenario 5 ("Hot reload"): the file initially lists
    /// [A, B]; a write changes it to [B, C]. The registry's pool size
    /// reflects the new set and A is gone once the watcher picks up the
    /// modification.
    #[tokio::test]
    async fn reload_replaces_pool_on_file_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("proxies.txt");
        fs::write(&path, "http://a:1\nhttp://b:2\n").unwrap();

        let pool = PoolRegistry::new(BreakerParams::default());
        let metrics = MetricsSink::new();
        let watcher = ReloadWatcher::new(path.to_str().unwrap());

        watcher.initial_load(&pool, &metrics).await;
        let first = pool.current();
        assert_eq!(first.records.len(), 2);
        let hosts: Vec<_> = first.records.iter().map(|r| r.host.clone()).collect();
        assert_eq!(hosts, vec!["a".to_string(), "b".to_string()]);

        fs::write(&path, "http://b:2\nhttp://c:3\n").unwrap();
        watcher.apply(&fs::read_to_string(&path).unwrap(), &pool, &metrics);

        let second = pool.current();
        let hosts: Vec<_> = second.records.iter().map(|r| r.host.clone()).collect();
        assert_eq!(hosts, vec!["b".to_string(), "c".to_string()]);
        assert!(!pool.current().records.iter().any(|r| r.host == "a"));
    }

    #[test]
    fn malformed_rewrite_leaves_snapshot_unchanged() {
        let pool = PoolRegistry::new(BreakerParams::default());
        let metrics = MetricsSink::new();
        let watcher = ReloadWatcher::new("unused");

        watcher.apply("http://a:1\n", &pool, &metrics);
        assert_eq!(pool.current().records.len(), 1);

        watcher.apply("not a url at all\n", &pool, &metrics);
        assert_eq!(pool.current().records.len(), 1);
        assert_eq!(pool.current().records[0].host, "a");
    }
}
