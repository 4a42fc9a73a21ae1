use crate::error::GatewayError;
use std::time::Duration;

/// Process configuration, loaded once at startup from the environment table
/// in §6 of the specification. Unlike the teacher's file-based `SnakewayConfig`,
/// this gateway is configured entirely through environment variables — there
/// is no dynamic reload of these values, only of the proxy file (§4.7).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// HMAC-SHA256 key used by the [`crate::auth::Authenticator`].
    pub secret: String,
    /// When false, §4.5 checks are bypassed and `client_id` defaults to the
    /// caller's remote address.
    pub enable_auth: bool,
    /// Source file for the [`crate::reload::ReloadWatcher`].
    pub proxy_file: String,
    /// Sticky session TTL. Zero disables stickiness entirely.
    pub sticky_ttl: Duration,
    /// Client-facing listener address.
    pub proxy_port: u16,
    /// Port the metrics collaborator is expected to bind (not bound by this
    /// crate — see §6, "Dashboard/metrics HTTP wiring remain external").
    pub metrics_port: u16,
    /// Clock skew tolerated by the authenticator, in seconds.
    pub clock_skew: Duration,
    /// Circuit breaker consecutive-failure threshold.
    pub breaker_failure_threshold: u32,
    /// How long a tripped breaker stays open before admitting a probe.
    pub breaker_open_duration: Duration,
    /// Health prober interval.
    pub health_probe_interval: Duration,
    /// Per-probe dial/handshake timeout.
    pub health_probe_timeout: Duration,
    /// Canary host:port dialed by the health prober.
    pub health_canary: String,
    /// Maximum concurrent in-flight health probes.
    pub health_probe_concurrency: usize,
    /// Idle-read timeout applied to each relay direction.
    pub relay_idle_timeout: Duration,
    /// Timeout for dialing an upstream and completing its CONNECT/status
    /// handshake, shared by the tunnel engine and the health prober's probe
    /// connect (the prober additionally applies its own shorter
    /// `health_probe_timeout` around the whole probe).
    pub dial_timeout: Duration,
    /// Grace period given to in-flight sessions during shutdown before
    /// sockets are forcibly closed.
    pub shutdown_drain: Duration,
}

impl GatewayConfig {
    /// Loads configuration from the process environment, applying the
    /// defaults in §6 for anything unset. Fails fast with
    /// [`GatewayError::ConfigInvalid`] — the only fatal error kind other
    /// than a failed listener bind.
    pub fn from_env() -> Result<Self, GatewayError> {
        let secret = env_or("PG_SECRET", "dev-secret-do-not-use-in-prod");
        let enable_auth = parse_bool(&env_or("PG_ENABLE_AUTH", "true"), "PG_ENABLE_AUTH")?;
        let proxy_file = env_or("PG_PROXY_FILE", "proxies.txt");
        if proxy_file.trim().is_empty() {
            return Err(GatewayError::ConfigInvalid {
                reason: "PG_PROXY_FILE must not be empty".into(),
            });
        }

        let sticky_ttl_secs = parse_u64(&env_or("PG_STICKY_TTL", "0"), "PG_STICKY_TTL")?;
        let proxy_port = parse_port(&env_or("PROXY_PORT", "8888"), "PROXY_PORT")?;
        let metrics_port = parse_port(&env_or("METRICS_PORT", "9090"), "METRICS_PORT")?;

        let clock_skew = Duration::from_secs(parse_u64(
            &env_or("PG_CLOCK_SKEW_SECONDS", "300"),
            "PG_CLOCK_SKEW_SECONDS",
        )?);

        let breaker_failure_threshold =
            parse_u32(&env_or("PG_BREAKER_THRESHOLD", "5"), "PG_BREAKER_THRESHOLD")?;
        let breaker_open_duration = Duration::from_secs(parse_u64(
            &env_or("PG_BREAKER_OPEN_SECONDS", "30"),
            "PG_BREAKER_OPEN_SECONDS",
        )?);

        let health_probe_interval = Duration::from_secs(parse_u64(
            &env_or("PG_HEALTH_INTERVAL_SECONDS", "30"),
            "PG_HEALTH_INTERVAL_SECONDS",
        )?);
        let health_probe_timeout = Duration::from_secs(parse_u64(
            &env_or("PG_HEALTH_TIMEOUT_SECONDS", "5"),
            "PG_HEALTH_TIMEOUT_SECONDS",
        )?);
        let health_canary = env_or("PG_HEALTH_CANARY", "www.google.com:443");
        validate_host_port(&health_canary, "PG_HEALTH_CANARY")?;
        let health_probe_concurrency = parse_u32(
            &env_or("PG_HEALTH_CONCURRENCY", "8"),
            "PG_HEALTH_CONCURRENCY",
        )? as usize;

        let relay_idle_timeout = Duration::from_secs(parse_u64(
            &env_or("PG_RELAY_IDLE_SECONDS", "120"),
            "PG_RELAY_IDLE_SECONDS",
        )?);
        let dial_timeout = Duration::from_secs(parse_u64(
            &env_or("PG_DIAL_TIMEOUT_SECONDS", "10"),
            "PG_DIAL_TIMEOUT_SECONDS",
        )?);
        let shutdown_drain = Duration::from_secs(parse_u64(
            &env_or("PG_SHUTDOWN_DRAIN_SECONDS", "10"),
            "PG_SHUTDOWN_DRAIN_SECONDS",
        )?);

        Ok(Self {
            secret,
            enable_auth,
            proxy_file,
            sticky_ttl: Duration::from_secs(sticky_ttl_secs),
            proxy_port,
            metrics_port,
            clock_skew,
            breaker_failure_threshold,
            breaker_open_duration,
            health_probe_interval,
            health_probe_timeout,
            health_canary,
            health_probe_concurrency,
            relay_idle_timeout,
            dial_timeout,
            shutdown_drain,
        })
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str, name: &str) -> Result<bool, GatewayError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(GatewayError::ConfigInvalid {
            reason: format!("{name} is not a valid boolean: {value:?}"),
        }),
    }
}

fn parse_u64(value: &str, name: &str) -> Result<u64, GatewayError> {
    value.trim().parse::<u64>().map_err(|_| GatewayError::ConfigInvalid {
        reason: format!("{name} is not a non-negative integer: {value:?}"),
    })
}

fn parse_u32(value: &str, name: &str) -> Result<u32, GatewayError> {
    value.trim().parse::<u32>().map_err(|_| GatewayError::ConfigInvalid {
        reason: format!("{name} is not a non-negative integer: {value:?}"),
    })
}

fn parse_port(value: &str, name: &str) -> Result<u16, GatewayError> {
    value.trim().parse::<u16>().map_err(|_| GatewayError::ConfigInvalid {
        reason: format!("{name} is not a valid port: {value:?}"),
    })
}

/// Validates a `host:port` pair without resolving it (DNS happens lazily at
/// probe/dial time).
pub fn validate_host_port(value: &str, name: &str) -> Result<(), GatewayError> {
    let (host, port) = value.rsplit_once(':').ok_or_else(|| GatewayError::ConfigInvalid {
        reason: format!("{name} must be of the form host:port, got {value:?}"),
    })?;
    if host.is_empty() {
        return Err(GatewayError::ConfigInvalid {
            reason: format!("{name} has an empty host: {value:?}"),
        });
    }
    port.parse::<u16>().map_err(|_| GatewayError::ConfigInvalid {
        reason: format!("{name} has an invalid port: {value:?}"),
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_malformed_canary() {
        assert!(validate_host_port("www.google.com", "PG_HEALTH_CANARY").is_err());
        assert!(validate_host_port("www.google.com:not-a-port", "PG_HEALTH_CANARY").is_err());
        assert!(validate_host_port("www.google.com:443", "PG_HEALTH_CANARY").is_ok());
    }

    #[test]
    fn parses_bool_variants() {
        assert!(parse_bool("true", "x").unwrap());
        assert!(!parse_bool("false", "x").unwrap());
        assert!(parse_bool("garbage", "x").is_err());
    }
}
