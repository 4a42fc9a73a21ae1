use crate::breaker::{BreakerParams, CircuitBreaker, CircuitState};
use crate::upstream::{HealthState, ParsedUpstream, PoolSnapshot, UpstreamId, UpstreamRecord};
use arc_swap::ArcSwap;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owns the current [`PoolSnapshot`] and the health/breaker state that
/// outlives any single snapshot, keyed by [`UpstreamId`] so it survives a
/// `replace` when an identity carries over — mirrors the teacher's
/// `TrafficManager`, collapsed from its multi-service `DashMap<(ServiceId,
/// UpstreamId), _>` keys down to a single pool's `DashMap<UpstreamId, _>`.
pub struct PoolRegistry {
    snapshot: ArcSwap<PoolSnapshot>,
    breakers: DashMap<UpstreamId, CircuitBreaker>,
    health: DashMap<UpstreamId, HealthState>,
    next_generation: AtomicU64,
    pub breaker_params: BreakerParams,
}

impl PoolRegistry {
    pub fn new(breaker_params: BreakerParams) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(PoolSnapshot::empty()),
            breakers: DashMap::new(),
            health: DashMap::new(),
            next_generation: AtomicU64::new(1),
            breaker_params,
        }
    }

    /// Returns the current snapshot. Callers hold an `Arc` and never observe
    /// a partial update (§3).
    pub fn current(&self) -> Arc<PoolSnapshot> {
        self.snapshot.load_full()
    }

    /// Parses, deduplicates, and atomically publishes a new upstream set.
    /// Identities present in the previous snapshot keep their generation and
    /// health/breaker state; new identities start at health `Unknown` with a
    /// fresh, closed breaker (§4.1, §4.4 "records added by reload start in
    /// Unknown"). Removed identities are dropped from the state maps —
    /// in-flight sessions referencing them hold their own `Arc<UpstreamRecord>`
    /// clone and may complete, but can never be reselected.
    pub fn replace(&self, parsed: Vec<ParsedUpstream>) -> Result<Arc<PoolSnapshot>, String> {
        let mut seen = HashSet::new();
        let previous = self.current();
        let mut records = Vec::with_capacity(parsed.len());

        for p in parsed {
            let key = (
                p.scheme.clone(),
                p.host.clone(),
                p.port,
                p.username.clone(),
                p.password.clone(),
            );
            if !seen.insert(key) {
                return Err(format!(
                    "duplicate upstream entry: {}://{}:{}",
                    p.scheme, p.host, p.port
                ));
            }

            let id = UpstreamRecord::compute_id(
                &p.scheme,
                &p.host,
                p.port,
                p.username.as_deref(),
                p.password.as_deref(),
            );

            let generation = previous
                .find(id)
                .map(|r| r.generation)
                .unwrap_or_else(|| self.next_generation.fetch_add(1, Ordering::Relaxed));

            records.push(UpstreamRecord {
                id,
                scheme: p.scheme,
                host: p.host,
                port: p.port,
                username: p.username,
                password: p.password,
                generation,
            });
        }

        let valid_ids: HashSet<UpstreamId> = records.iter().map(|r| r.id).collect();
        self.breakers.retain(|id, _| valid_ids.contains(id));
        self.health.retain(|id, _| valid_ids.contains(id));
        for id in &valid_ids {
            self.health.entry(*id).or_insert(HealthState::Unknown);
        }

        let new_snapshot = Arc::new(PoolSnapshot {
            version: previous.version + 1,
            records,
        });
        self.snapshot.store(new_snapshot.clone());
        Ok(new_snapshot)
    }

    pub fn health_state(&self, id: UpstreamId) -> HealthState {
        self.health
            .get(&id)
            .map(|h| *h)
            .unwrap_or(HealthState::Unknown)
    }

    pub fn set_health_state(&self, id: UpstreamId, state: HealthState) {
        self.health.insert(id, state);
    }

    pub fn circuit_state(&self, id: UpstreamId) -> CircuitState {
        self.breakers
            .entry(id)
            .or_insert_with(CircuitBreaker::new)
            .state()
    }

    pub fn circuit_opened_at(&self, id: UpstreamId) -> Option<std::time::Instant> {
        self.breakers.get(&id).and_then(|cb| cb.opened_at())
    }

    /// Claims admission for `id`, refreshing Open -> HalfOpen transitions and
    /// the single half-open in-flight slot as a side effect.
    pub fn try_admit(&self, id: UpstreamId) -> bool {
        self.breakers
            .entry(id)
            .or_insert_with(CircuitBreaker::new)
            .allow_request(id, &self.breaker_params)
    }

    /// Reports the outcome of a tunnel session or health probe against
    /// `id` (§4.1 "report_result"). Safe to call concurrently from many
    /// sessions — the per-upstream entry is a short DashMap critical
    /// section, never held across I/O.
    pub fn report_result(&self, id: UpstreamId, success: bool) {
        let mut cb = self.breakers.entry(id).or_insert_with(CircuitBreaker::new);
        cb.on_result(id, &self.breaker_params, success);
    }

    /// Forces the breaker open because the health prober independently
    /// determined the upstream is unhealthy (§4.4).
    pub fn force_breaker_open(&self, id: UpstreamId) {
        self.breakers
            .entry(id)
            .or_insert_with(CircuitBreaker::new)
            .force_open(id, "health_failed");
    }

    /// Eligibility test from §4.2: health in {Healthy, Unknown} and breaker
    /// in {Closed, HalfOpen}.
    pub fn is_eligible(&self, id: UpstreamId) -> bool {
        let health_ok = matches!(
            self.health_state(id),
            HealthState::Healthy | HealthState::Unknown
        );
        if !health_ok {
            return false;
        }
        let mut cb = self.breakers.entry(id).or_insert_with(CircuitBreaker::new);
        cb.refresh(id, &self.breaker_params);
        matches!(cb.state(), CircuitState::Closed | CircuitState::HalfOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(host: &str, port: u16) -> ParsedUpstream {
        ParsedUpstream {
            scheme: "http".to_string(),
            host: host.to_string(),
            port,
            username: None,
            password: None,
        }
    }

    #[test]
    fn replace_rejects_duplicates() {
        let registry = PoolRegistry::new(BreakerParams::default());
        let err = registry
            .replace(vec![parsed("a", 1), parsed("a", 1)])
            .unwrap_err();
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn replace_preserves_generation_for_carried_over_identity() {
        let registry = PoolRegistry::new(BreakerParams::default());
        let first = registry.replace(vec![parsed("a", 1), parsed("b", 2)]).unwrap();
        let a_gen = first.find(first.records[0].id).unwrap().generation;

        let second = registry
            .replace(vec![parsed("a", 1), parsed("c", 3)])
            .unwrap();
        let a_again = second
            .records
            .iter()
            .find(|r| r.host == "a")
            .unwrap();
        assert_eq!(a_again.generation, a_gen);

        let c = second.records.iter().find(|r| r.host == "c").unwrap();
        assert_ne!(c.generation, a_gen);
    }

    #[test]
    fn new_identities_start_unknown() {
        let registry = PoolRegistry::new(BreakerParams::default());
        let snap = registry.replace(vec![parsed("a", 1)]).unwrap();
        let id = snap.records[0].id;
        assert_eq!(registry.health_state(id), HealthState::Unknown);
        assert!(registry.is_eligible(id));
    }

    #[test]
    fn removed_identity_drops_state() {
        let registry = PoolRegistry::new(BreakerParams::default());
        let first = registry.replace(vec![parsed("a", 1)]).unwrap();
        let id = first.records[0].id;
        registry.set_health_state(id, HealthState::Unhealthy);

        registry.replace(vec![parsed("b", 2)]).unwrap();
        // `a` no longer exists; its health entry should have been reclaimed.
        assert_eq!(registry.health_state(id), HealthState::Unknown);
    }
}
