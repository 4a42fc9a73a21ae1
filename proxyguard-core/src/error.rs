use thiserror::Error;

/// The taxonomy of errors the gateway can produce.
///
/// Session-local variants are caught at the top of a connection's task and
/// turned into a client-visible status plus a structured log record; they
/// never propagate across sessions. Only [`GatewayError::ConfigInvalid`] and
/// a failed listener bind are fatal at process startup.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("authentication rejected: {reason}")]
    AuthRejected { reason: &'static str },

    #[error("no upstream available")]
    NoUpstreamAvailable,

    #[error("failed to dial upstream {upstream}: {source}")]
    UpstreamDialFailure {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("upstream {upstream} refused CONNECT handshake with status {status}")]
    UpstreamHandshakeFailure { upstream: String, status: u16 },

    #[error("malformed client request: {reason}")]
    ClientProtocolError { reason: &'static str },

    #[error("relay aborted: {reason}")]
    RelayAborted { reason: String },

    #[error("failed to parse proxy file {path}: {reason}")]
    ReloadParseError { path: String, reason: String },

    #[error("health probe failed for {upstream}: {reason}")]
    ProbeFailure { upstream: String, reason: String },
}

impl GatewayError {
    /// Maps a session-local error onto the status line sent to the client,
    /// per §7 of the gateway specification.
    pub fn client_status(&self) -> u16 {
        match self {
            GatewayError::AuthRejected { .. } => 407,
            GatewayError::NoUpstreamAvailable => 502,
            GatewayError::UpstreamDialFailure { .. } => 502,
            GatewayError::UpstreamHandshakeFailure { status, .. } => {
                if (100..1000).contains(status) {
                    *status
                } else {
                    502
                }
            }
            GatewayError::ClientProtocolError { .. } => 400,
            GatewayError::RelayAborted { .. } => 502,
            GatewayError::ReloadParseError { .. } | GatewayError::ProbeFailure { .. } => 0,
            GatewayError::ConfigInvalid { .. } => 0,
        }
    }

    /// Whether this outcome should count as a breaker failure against the
    /// upstream that produced it.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamDialFailure { .. }
                | GatewayError::UpstreamHandshakeFailure { .. }
                | GatewayError::RelayAborted { .. }
                | GatewayError::ProbeFailure { .. }
        )
    }
}
