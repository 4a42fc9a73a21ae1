use crate::breaker::CircuitState;
use crate::error::GatewayError;
use crate::pool::PoolRegistry;
use crate::sticky::StickyMap;
use crate::upstream::{UpstreamId, UpstreamRecord};
use std::sync::Mutex;
use std::time::Instant;

/// Smooth weighted round-robin cursor state, reset whenever the eligible
/// set's identity signature changes (reload, health flap, breaker
/// transition). Every upstream carries the same weight — the distilled spec
/// has no per-upstream weight field — so this degenerates to a plain
/// round-robin, but keeps the teacher's `next_wrr_index` shape
/// (`traffic_management::manager::TrafficManager::next_wrr_index`) so a
/// future weighted upstream config is a one-line change, not a rewrite.
struct WrrState {
    current_weights: Vec<i64>,
    signature: Vec<UpstreamId>,
}

/// Chooses an upstream for a request, honoring stickiness and breaker/health
/// eligibility (§4.2). Holds only the WRR cursor; pool and sticky state live
/// in their own owners so callers can share one `Selector` across every
/// connection task without contention beyond a short mutex around the
/// cursor.
pub struct Selector {
    wrr: Mutex<WrrState>,
}

impl Selector {
    pub fn new() -> Self {
        Self {
            wrr: Mutex::new(WrrState {
                current_weights: Vec::new(),
                signature: Vec::new(),
            }),
        }
    }

    pub fn select(
        &self,
        pool: &PoolRegistry,
        sticky: &StickyMap,
        client_id: &str,
        now: Instant,
    ) -> Result<UpstreamRecord, GatewayError> {
        let snapshot = pool.current();

        // Step 1: sticky lookup.
        if !client_id.is_empty()
            && sticky.enabled()
            && let Some(bound) = sticky.get(client_id, now)
        {
            match snapshot.find(bound) {
                Some(record) if pool.is_eligible(bound) => return Ok(record.clone()),
                _ => sticky.invalidate(client_id),
            }
        }

        // Step 2: build the eligible candidate set.
        let mut eligible: Vec<&UpstreamRecord> = snapshot
            .records
            .iter()
            .filter(|r| pool.is_eligible(r.id))
            .collect();

        if eligible.is_empty() {
            return Err(GatewayError::NoUpstreamAvailable);
        }

        // Step 4: at most one HalfOpen candidate per round — the oldest
        // opened_at wins, other HalfOpen candidates sit out this selection.
        let half_open: Vec<&&UpstreamRecord> = eligible
            .iter()
            .filter(|r| pool.circuit_state(r.id) == CircuitState::HalfOpen)
            .collect();
        if half_open.len() > 1 {
            let keep = half_open
                .iter()
                .min_by_key(|r| {
                    (
                        pool.circuit_opened_at(r.id).unwrap_or_else(Instant::now),
                        r.generation,
                        r.id,
                    )
                })
                .map(|r| r.id)
                .expect("half_open is non-empty");
            eligible.retain(|r| pool.circuit_state(r.id) != CircuitState::HalfOpen || r.id == keep);
        }

        // Deterministic order: tie-break on (generation, identity).
        eligible.sort_by_key(|r| (r.generation, r.id));

        // Step 2 (cont'd): WRR pick, retried if the winner's half-open slot
        // was claimed by a concurrent selection between eligibility check
        // and admission.
        let mut candidates = eligible;
        let winner = loop {
            if candidates.is_empty() {
                return Err(GatewayError::NoUpstreamAvailable);
            }
            let idx = self.next_wrr_index(&candidates);
            let candidate = candidates[idx];
            if pool.try_admit(candidate.id) {
                break candidate.clone();
            }
            candidates.remove(idx);
        };

        // Step 3: write/refresh the sticky binding for the chosen upstream.
        if !client_id.is_empty() && sticky.enabled() {
            sticky.bind(client_id, winner.id, now);
        }

        Ok(winner)
    }

    fn next_wrr_index(&self, candidates: &[&UpstreamRecord]) -> usize {
        debug_assert!(!candidates.is_empty());
        let signature: Vec<UpstreamId> = candidates.iter().map(|r| r.id).collect();

        let mut state = self.wrr.lock().expect("wrr cursor mutex poisoned");
        if state.signature != signature {
            state.current_weights = vec![0; candidates.len()];
            state.signature = signature;
        }

        let mut best_idx = 0usize;
        let mut best_val = i64::MIN;
        for (i, _) in candidates.iter().enumerate() {
            state.current_weights[i] += 1;
            if state.current_weights[i] > best_val {
                best_val = state.current_weights[i];
                best_idx = i;
            }
        }
        state.current_weights[best_idx] -= candidates.len() as i64;
        best_idx
    }
}

impl Default for Selector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerParams;
    use crate::upstream::ParsedUpstream;

    fn upstream(host: &str, port: u16) -> ParsedUpstream {
        ParsedUpstream {
            scheme: "http".to_string(),
            host: host.to_string(),
            port,
            username: None,
            password: None,
        }
    }

    #[test]
    fn rotates_through_eligible_upstreams() {
        let pool = PoolRegistry::new(BreakerParams::default());
        pool.replace(vec![upstream("a", 1), upstream("b", 2), upstream("c", 3)])
            .unwrap();
        let sticky = StickyMap::new(std::time::Duration::ZERO);
        let selector = Selector::new();
        let now = Instant::now();

        let mut hosts = Vec::new();
        for _ in 0..4 {
            let r = selector.select(&pool, &sticky, "", now).unwrap();
            hosts.push(r.host);
        }
        assert_eq!(hosts, vec!["a", "b", "c", "a"]);
    }

    #[test]
    fn sticky_pins_client_to_same_upstream() {
        let pool = PoolRegistry::new(BreakerParams::default());
        pool.replace(vec![upstream("a", 1), upstream("b", 2), upstream("c", 3)])
            .unwrap();
        let sticky = StickyMap::new(std::time::Duration::from_secs(60));
        let selector = Selector::new();
        let now = Instant::now();

        let first = selector.select(&pool, &sticky, "bot1", now).unwrap();
        for _ in 0..5 {
            let again = selector.select(&pool, &sticky, "bot1", now).unwrap();
            assert_eq!(again.id, first.id);
        }
    }

    #[test]
    fn empty_pool_fails_fast() {
        let pool = PoolRegistry::new(BreakerParams::default());
        let sticky = StickyMap::new(std::time::Duration::ZERO);
        let selector = Selector::new();
        let err = selector.select(&pool, &sticky, "", Instant::now()).unwrap_err();
        assert!(matches!(err, GatewayError::NoUpstreamAvailable));
    }
}
