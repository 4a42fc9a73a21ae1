use crate::upstream::UpstreamId;
use dashmap::DashMap;
use std::time::{Duration, Instant};

/// `(client_id, upstream_identity, expires_at)` — §3 "StickyBinding".
#[derive(Debug, Clone, Copy)]
pub struct StickyBinding {
    pub upstream: UpstreamId,
    pub expires_at: Instant,
}

/// Maps client identity to a pinned upstream with TTL eviction (§4.8).
/// Backed by a single `DashMap`, which stripes its internal locking —
/// lookups do not block the I/O path noticeably, matching the teacher's
/// `DashMap`-everywhere convention for hot concurrent state.
pub struct StickyMap {
    bindings: DashMap<String, StickyBinding>,
    ttl: Duration,
}

impl StickyMap {
    pub fn new(ttl: Duration) -> Self {
        Self {
            bindings: DashMap::new(),
            ttl,
        }
    }

    /// TTL = 0 disables stickiness entirely (§3).
    pub fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Looks up a binding, evicting it lazily if expired. Returns `None` for
    /// a cold miss or an expired entry.
    pub fn get(&self, client_id: &str, now: Instant) -> Option<UpstreamId> {
        if !self.enabled() || client_id.is_empty() {
            return None;
        }
        let expired = match self.bindings.get(client_id) {
            Some(binding) => now >= binding.expires_at,
            None => return None,
        };
        if expired {
            self.bindings.remove(client_id);
            None
        } else {
            self.bindings.get(client_id).map(|b| b.upstream)
        }
    }

    /// Writes or refreshes a binding with `expires_at = now + ttl`.
    pub fn bind(&self, client_id: &str, upstream: UpstreamId, now: Instant) {
        if !self.enabled() || client_id.is_empty() {
            return;
        }
        self.bindings.insert(
            client_id.to_string(),
            StickyBinding {
                upstream,
                expires_at: now + self.ttl,
            },
        );
    }

    /// Explicit invalidation requested by the tunnel engine after a failed
    /// session (§4.6 step 7), or because the bound upstream's breaker just
    /// opened / the upstream vanished from the snapshot (§4.8 b/a).
    pub fn invalidate(&self, client_id: &str) {
        self.bindings.remove(client_id);
    }

    /// Drops every binding pointing at `upstream` — called when its breaker
    /// opens or it disappears from the current snapshot.
    pub fn invalidate_upstream(&self, upstream: UpstreamId) {
        self.bindings.retain(|_, b| b.upstream != upstream);
    }

    /// Periodic sweep (once per minute per §4.8) that evicts every expired
    /// binding, bounding memory for clients that never return.
    pub fn sweep(&self, now: Instant) {
        self.bindings.retain(|_, b| now < b.expires_at);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_when_ttl_zero() {
        let map = StickyMap::new(Duration::ZERO);
        let now = Instant::now();
        map.bind("bot1", UpstreamId(1), now);
        assert_eq!(map.get("bot1", now), None);
    }

    #[test]
    fn roundtrip_within_ttl_returns_same_upstream() {
        let map = StickyMap::new(Duration::from_secs(60));
        let now = Instant::now();
        map.bind("bot1", UpstreamId(7), now);
        assert_eq!(map.get("bot1", now + Duration::from_secs(10)), Some(UpstreamId(7)));
    }

    #[test]
    fn expires_after_ttl() {
        let map = StickyMap::new(Duration::from_millis(10));
        let now = Instant::now();
        map.bind("bot1", UpstreamId(7), now);
        assert_eq!(map.get("bot1", now + Duration::from_millis(20)), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn invalidate_upstream_clears_all_matching_bindings() {
        let map = StickyMap::new(Duration::from_secs(60));
        let now = Instant::now();
        map.bind("a", UpstreamId(1), now);
        map.bind("b", UpstreamId(1), now);
        map.bind("c", UpstreamId(2), now);
        map.invalidate_upstream(UpstreamId(1));
        assert_eq!(map.get("a", now), None);
        assert_eq!(map.get("b", now), None);
        assert_eq!(map.get("c", now), Some(UpstreamId(2)));
    }
}
