use crate::error::GatewayError;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

type HmacSha256 = Hmac<Sha256>;

/// `(client_id, timestamp, signature_hex)` — §3 "AuthToken".
#[derive(Debug, Clone)]
pub struct AuthToken {
    pub client_id: String,
    pub timestamp: i64,
}

/// Validates `Proxy-Authorization: Basic base64(client_id:timestamp:signature)`
/// tokens (§4.5). Holds the HMAC secret and the configured clock skew
/// window; stateless otherwise.
pub struct Authenticator {
    secret: Vec<u8>,
    enabled: bool,
    clock_skew: Duration,
}

impl Authenticator {
    pub fn new(secret: impl Into<Vec<u8>>, enabled: bool, clock_skew: Duration) -> Self {
        Self {
            secret: secret.into(),
            enabled,
            clock_skew,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Validates a decoded `client_id:timestamp:signature` credential
    /// string against `now` (Unix seconds). Constant-time in the signature
    /// comparison via `Mac::verify_slice` (§8 "HMAC validation is
    /// constant-time").
    pub fn validate(&self, credentials: &str, now: i64) -> Result<AuthToken, GatewayError> {
        let mut parts = credentials.splitn(3, ':');
        let client_id = parts.next().ok_or(GatewayError::AuthRejected {
            reason: "missing client_id",
        })?;
        let timestamp_str = parts.next().ok_or(GatewayError::AuthRejected {
            reason: "missing timestamp",
        })?;
        let signature_hex = parts.next().ok_or(GatewayError::AuthRejected {
            reason: "missing signature",
        })?;

        let timestamp: i64 = timestamp_str
            .parse()
            .map_err(|_| GatewayError::AuthRejected {
                reason: "timestamp is not numeric",
            })?;

        if (now - timestamp).abs() > self.clock_skew.as_secs() as i64 {
            return Err(GatewayError::AuthRejected {
                reason: "timestamp outside clock skew window",
            });
        }

        let expected_sig = hex::decode(signature_hex).map_err(|_| GatewayError::AuthRejected {
            reason: "signature is not valid hex",
        })?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts a key of any length");
        mac.update(client_id.as_bytes());
        mac.update(timestamp_str.as_bytes());

        mac.verify_slice(&expected_sig)
            .map_err(|_| GatewayError::AuthRejected {
                reason: "signature mismatch",
            })?;

        Ok(AuthToken {
            client_id: client_id.to_string(),
            timestamp,
        })
    }

    /// Computes the lowercase-hex signature for `client_id ∥ timestamp`,
    /// used by tests and by any tooling that needs to mint tokens.
    pub fn sign(&self, client_id: &str, timestamp: i64) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts a key of any length");
        mac.update(client_id.as_bytes());
        mac.update(timestamp.to_string().as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Extracts the Basic credential payload from a `Proxy-Authorization`
/// header value, e.g. `Basic <base64>`.
pub fn decode_proxy_authorization(header_value: &str) -> Result<String, GatewayError> {
    let b64 = header_value
        .strip_prefix("Basic ")
        .ok_or(GatewayError::AuthRejected {
            reason: "Proxy-Authorization is not Basic",
        })?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(b64.trim())
        .map_err(|_| GatewayError::AuthRejected {
            reason: "Proxy-Authorization is not valid base64",
        })?;
    String::from_utf8(decoded).map_err(|_| GatewayError::AuthRejected {
        reason: "Proxy-Authorization payload is not UTF-8",
    })
}

/// Extracts `user:pass` userinfo credentials from an absolute-URI request
/// target, for forward-proxy HTTP requests that encode auth in the URL
/// rather than the header (§4.5).
pub fn decode_userinfo(uri: &http::Uri) -> Option<String> {
    let authority = uri.authority()?;
    let s = authority.as_str();
    let (userinfo, _) = s.split_once('@')?;
    Some(userinfo.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_accepts_valid_token_rejects_tampering() {
        let auth = Authenticator::new("s", true, Duration::from_secs(300));
        let sig = auth.sign("bot1", 1_700_000_000);
        let creds = format!("bot1:1700000000:{sig}");
        assert!(auth.validate(&creds, 1_700_000_000).is_ok());

        let mut tampered = sig.clone();
        tampered.replace_range(0..1, if &sig[0..1] == "a" { "b" } else { "a" });
        let bad = format!("bot1:1700000000:{tampered}");
        assert!(auth.validate(&bad, 1_700_000_000).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let auth = Authenticator::new("s", true, Duration::from_secs(300));
        let sig = auth.sign("bot1", 1_700_000_000);
        let creds = format!("bot1:1700000000:{sig}");
        assert!(auth.validate(&creds, 1_700_000_000 + 301).is_err());
        assert!(auth.validate(&creds, 1_700_000_000 + 299).is_ok());
    }

    #[test]
    fn rejects_malformed_credentials() {
        let auth = Authenticator::new("s", true, Duration::from_secs(300));
        assert!(auth.validate("bot1:notanumber:abcd", 0).is_err());
        assert!(auth.validate("bot1:123", 123).is_err());
    }
}
