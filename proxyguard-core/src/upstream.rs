use ahash::RandomState;
use std::hash::Hash;

/// Stable identity for an upstream, derived once from its endpoint and
/// credentials via a fixed-seed `ahash`. Deterministic across restarts, not
/// security sensitive — mirrors `make_upstream_id` in the teacher's
/// `runtime::state` module. Sticky bindings and breaker/health maps key off
/// this value rather than a pointer, so a hot-reload that drops and re-adds
/// the same endpoint does not orphan state (§9 "Cyclic references").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UpstreamId(pub u64);

impl std::fmt::Display for UpstreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Health state tracked independently of breaker substate (§3 clarification).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

/// An upstream proxy the gateway can tunnel through.
///
/// Immutable except for the health/breaker state tracked alongside it in the
/// [`crate::pool::PoolRegistry`] — endpoint fields never change after
/// creation; a replacement produced by a hot-reload is a new record with a
/// fresh generation.
#[derive(Debug, Clone)]
pub struct UpstreamRecord {
    pub id: UpstreamId,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub generation: u64,
}

impl UpstreamRecord {
    /// The tuple that determines equality for deduplication in
    /// `PoolRegistry::replace` (§4.1).
    pub fn identity_key(&self) -> (String, String, u16, Option<String>, Option<String>) {
        (
            self.scheme.clone(),
            self.host.clone(),
            self.port,
            self.username.clone(),
            self.password.clone(),
        )
    }

    pub fn dial_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }

    /// Derives this record's [`UpstreamId`] from its identity key, never from
    /// a pointer or a reload-assigned index.
    pub fn compute_id(
        scheme: &str,
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
    ) -> UpstreamId {
        static HASHER: RandomState = RandomState::with_seeds(1, 2, 3, 4);

        #[derive(Hash)]
        struct Key<'a> {
            scheme: &'a str,
            host: &'a str,
            port: u16,
            username: Option<&'a str>,
            password: Option<&'a str>,
        }

        let key = Key {
            scheme,
            host,
            port,
            username,
            password,
        };

        UpstreamId(HASHER.hash_one(&key))
    }

    /// Builds a Basic `Proxy-Authorization` header value from this record's
    /// credentials, if any were configured.
    pub fn basic_auth_header(&self) -> Option<String> {
        let username = self.username.as_deref()?;
        let password = self.password.as_deref().unwrap_or("");
        use base64::Engine;
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{username}:{password}"));
        Some(format!("Basic {encoded}"))
    }
}

/// An immutable view of the current upstream set, published atomically by
/// the [`crate::pool::PoolRegistry`]. Readers copy the `Arc` and never
/// observe a partial update (§3 "Pool snapshot").
#[derive(Debug, Clone)]
pub struct PoolSnapshot {
    pub version: u64,
    pub records: Vec<UpstreamRecord>,
}

impl PoolSnapshot {
    pub fn empty() -> Self {
        Self {
            version: 0,
            records: Vec::new(),
        }
    }

    pub fn find(&self, id: UpstreamId) -> Option<&UpstreamRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}

/// A parsed line from the proxy file, before it is assigned a generation by
/// the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUpstream {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ParsedUpstream {
    /// Parses a single non-comment, non-blank line of the proxy file:
    /// `scheme://[user[:pass]@]host:port` (§6 "Proxy file format").
    pub fn parse(line: &str) -> Result<Self, String> {
        let url = url::Url::parse(line).map_err(|e| format!("{e}"))?;

        let scheme = url.scheme().to_string();
        if scheme.is_empty() {
            return Err("missing scheme".to_string());
        }

        let host = url
            .host_str()
            .ok_or_else(|| "missing host".to_string())?
            .to_string();

        let port = url
            .port()
            .ok_or_else(|| "missing port".to_string())?;

        let username = {
            let u = url.username();
            if u.is_empty() { None } else { Some(u.to_string()) }
        };
        let password = url.password().map(|p| p.to_string());

        Ok(Self {
            scheme,
            host,
            port,
            username,
            password,
        })
    }
}
