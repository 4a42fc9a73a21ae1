use crate::upstream::UpstreamId;
use std::time::{Duration, Instant};
use tracing::info;

/// Fixed circuit breaker parameters (§4.3). The teacher's
/// `CircuitBreakerParams` exposes `half_open_max_requests` and
/// `success_threshold` as tunables per-service; this gateway has one pool
/// and the distilled spec pins both to 1 ("HalfOpen admits at most one
/// probe session... on success -> Closed"), so only the threshold and open
/// duration are configurable here.
#[derive(Debug, Clone, Copy)]
pub struct BreakerParams {
    pub failure_threshold: u32,
    pub open_duration: Duration,
}

impl Default for BreakerParams {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-upstream breaker state machine, ported near-verbatim from the
/// teacher's `traffic_management::circuit::CircuitBreaker` with
/// `half_open_max_requests`/`success_threshold` fixed at 1 per §4.3.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_in_flight: 0,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    /// Promotes Open -> HalfOpen once `open_duration` has elapsed. Read-only
    /// observers (the selector building an eligibility list) call this so
    /// that eligibility reflects the clock without mutating in-flight
    /// counters; claiming the single half-open slot happens in
    /// [`CircuitBreaker::allow_request`].
    pub fn refresh(&mut self, upstream: UpstreamId, p: &BreakerParams) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at
                && opened_at.elapsed() >= p.open_duration
            {
                self.state = CircuitState::HalfOpen;
                self.opened_at = None;
                self.half_open_in_flight = 0;
                info!(
                    event = "circuit_transition",
                    upstream = %upstream,
                    to = "half_open",
                    reason = "cooldown_expired"
                );
            }
        }
    }

    /// Claims the single half-open probe slot, or admits unconditionally
    /// when closed. Returns false when the circuit is open, or when another
    /// session has already claimed the half-open slot.
    pub fn allow_request(&mut self, upstream: UpstreamId, p: &BreakerParams) -> bool {
        self.refresh(upstream, p);
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < 1 {
                    self.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Records the outcome of a request that was admitted by
    /// `allow_request`.
    pub fn on_result(&mut self, upstream: UpstreamId, p: &BreakerParams, success: bool) {
        match self.state {
            CircuitState::Closed => {
                if success {
                    self.consecutive_failures = 0;
                } else {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    if self.consecutive_failures >= p.failure_threshold {
                        self.trip_open(upstream, "failure_threshold_exceeded");
                    }
                }
            }
            CircuitState::Open => {}
            CircuitState::HalfOpen => {
                if self.half_open_in_flight > 0 {
                    self.half_open_in_flight -= 1;
                }
                if success {
                    self.reset_closed(upstream);
                } else {
                    self.trip_open(upstream, "half_open_probe_failed");
                }
            }
        }
    }

    /// Forces the circuit open regardless of the Closed failure counter —
    /// used when the health prober independently marks an upstream
    /// unhealthy (§4.4 "outcome updates health and feeds the breaker").
    pub fn force_open(&mut self, upstream: UpstreamId, reason: &'static str) {
        if self.state != CircuitState::Open {
            self.trip_open(upstream, reason);
        }
    }

    fn trip_open(&mut self, upstream: UpstreamId, reason: &'static str) {
        let failures = self.consecutive_failures;
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.consecutive_failures = 0;
        self.half_open_in_flight = 0;

        info!(
            event = "circuit_transition",
            upstream = %upstream,
            to = "open",
            reason = reason,
            failures = failures
        );
    }

    fn reset_closed(&mut self, upstream: UpstreamId) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.half_open_in_flight = 0;

        info!(
            event = "circuit_transition",
            upstream = %upstream,
            to = "closed",
            reason = "probe_succeeded"
        );
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> UpstreamId {
        UpstreamId(1)
    }

    #[test]
    fn opens_after_threshold_and_half_opens_after_cooldown() {
        let p = BreakerParams {
            failure_threshold: 3,
            open_duration: Duration::from_millis(50),
        };
        let mut cb = CircuitBreaker::new();

        for _ in 0..3 {
            assert!(cb.allow_request(id(), &p));
            cb.on_result(id(), &p, false);
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(!cb.allow_request(id(), &p));

        std::thread::sleep(Duration::from_millis(60));
        assert!(cb.allow_request(id(), &p));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Only one probe admitted while half-open.
        assert!(!cb.allow_request(id(), &p));
    }

    #[test]
    fn half_open_success_closes_failure_reopens() {
        let p = BreakerParams {
            failure_threshold: 1,
            open_duration: Duration::from_millis(10),
        };
        let mut cb = CircuitBreaker::new();
        cb.allow_request(id(), &p);
        cb.on_result(id(), &p, false);
        assert_eq!(cb.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(20));
        assert!(cb.allow_request(id(), &p));
        cb.on_result(id(), &p, true);
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.allow_request(id(), &p);
        cb.on_result(id(), &p, false);
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn success_resets_consecutive_failures_while_closed() {
        let p = BreakerParams {
            failure_threshold: 2,
            open_duration: Duration::from_secs(30),
        };
        let mut cb = CircuitBreaker::new();
        cb.allow_request(id(), &p);
        cb.on_result(id(), &p, false);
        cb.allow_request(id(), &p);
        cb.on_result(id(), &p, true);
        cb.allow_request(id(), &p);
        cb.on_result(id(), &p, false);
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
