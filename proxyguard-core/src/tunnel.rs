use crate::auth::{Authenticator, decode_proxy_authorization, decode_userinfo};
use crate::error::GatewayError;
use crate::metrics::MetricsSink;
use crate::pool::PoolRegistry;
use crate::selector::Selector;
use crate::sticky::StickyMap;
use crate::upstream::UpstreamRecord;
use async_trait::async_trait;
use pingora::apps::ServerApp;
use pingora::protocols::{GetSocketDigest, Stream, l4::socket::SocketAddr as PingoraSocketAddr};
use pingora::server::ShutdownWatch;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

const MAX_REQUEST_HEAD_BYTES: usize = 8 * 1024;
const MAX_HEADERS: usize = 100;
const FAILURE_PROBATION: Duration = Duration::from_secs(2);

/// Hop-by-hop headers stripped from forwarded plain-HTTP requests (§4.6
/// step 5).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "proxy-authorization",
    "proxy-authenticate",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Per-connection state the tunnel engine needs: the pool, selector, sticky
/// map, authenticator, and metrics sink it was built with, plus the tunables
/// that shape each session (idle timeout, dial timeout).
///
/// This does not implement the teacher's `ProxyHttp` trait — that single-hop
/// HTTP hook pipeline assumes the server terminates one request/response
/// pair against one upstream. A tunnel that dials a *second* proxy, performs
/// its own CONNECT handshake, and relays opaque TLS bytes both ways does not
/// fit that shape. Pingora's answer to "arbitrary byte-oriented service" is
/// [`pingora::apps::ServerApp`], the same trait the teacher's own stack
/// would reach for outside the HTTP-proxy case; `TunnelApp` implements it
/// directly against the raw client `Stream`.
pub struct TunnelApp {
    pub pool: Arc<PoolRegistry>,
    pub selector: Arc<Selector>,
    pub sticky: Arc<StickyMap>,
    pub authenticator: Arc<Authenticator>,
    pub metrics: Arc<MetricsSink>,
    pub relay_idle_timeout: Duration,
    pub dial_timeout: Duration,
    pub shutdown_drain: Duration,
}

#[async_trait]
impl ServerApp for TunnelApp {
    async fn process_new(
        self: &Arc<Self>,
        mut io: Stream,
        shutdown: &ShutdownWatch,
    ) -> Option<Stream> {
        let peer = peer_addr_string(&io);
        if let Err(e) = self.handle_connection(&mut io, &peer, shutdown).await {
            let status = e.client_status();
            if status != 0 {
                let _ = write_status_response(&mut io, status, status_body(&e)).await;
            }
            tracing::warn!(peer = %peer, error = %e, "tunnel session ended with error");
        }
        None
    }
}

impl TunnelApp {
    async fn handle_connection(
        &self,
        io: &mut Stream,
        peer: &str,
        shutdown: &ShutdownWatch,
    ) -> Result<(), GatewayError> {
        let head = read_request_head(io).await?;

        let mut headers_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut req = httparse::Request::new(&mut headers_buf);
        let parsed = req
            .parse(&head.bytes)
            .map_err(|_| GatewayError::ClientProtocolError {
                reason: "malformed request line or headers",
            })?;
        if parsed.is_partial() {
            return Err(GatewayError::ClientProtocolError {
                reason: "incomplete request head",
            });
        }

        let method = req
            .method
            .ok_or(GatewayError::ClientProtocolError { reason: "missing method" })?
            .to_string();
        let target = req
            .path
            .ok_or(GatewayError::ClientProtocolError { reason: "missing request target" })?
            .to_string();

        let header_value = |name: &str| -> Option<String> {
            req.headers
                .iter()
                .find(|h| h.name.eq_ignore_ascii_case(name))
                .map(|h| String::from_utf8_lossy(h.value).to_string())
        };

        // Every header the client sent except the hop-by-hop set (§4.6 step
        // 5) and Host, which the absolute-URI construction below handles on
        // its own — forwarded as-is, in original order.
        let mut forwarded_headers = String::new();
        for h in req.headers.iter() {
            if h.name.eq_ignore_ascii_case("host") {
                continue;
            }
            if HOP_BY_HOP_HEADERS.iter().any(|hop| h.name.eq_ignore_ascii_case(hop)) {
                continue;
            }
            forwarded_headers.push_str(h.name);
            forwarded_headers.push_str(": ");
            forwarded_headers.push_str(&String::from_utf8_lossy(h.value));
            forwarded_headers.push_str("\r\n");
        }
        let host_header = header_value("host");

        let client_id = self
            .authenticate(&header_value("proxy-authorization"), &target, peer)
            .await?;

        let now = Instant::now();
        let upstream = self.selector.select(&self.pool, &self.sticky, &client_id, now);
        let upstream = match upstream {
            Ok(u) => u,
            Err(e) => {
                self.metrics.incr_requests("no_upstream");
                return Err(e);
            }
        };

        let outcome = if method.eq_ignore_ascii_case("CONNECT") {
            self.handle_connect(io, &upstream, &target, shutdown).await
        } else {
            self.handle_plain_http(
                io,
                &upstream,
                &method,
                &target,
                host_header.as_deref(),
                &forwarded_headers,
                &head.trailing,
                shutdown,
            )
            .await
        };

        match &outcome {
            Ok(()) => {
                self.metrics.incr_requests("success");
            }
            Err(e) => {
                self.metrics.incr_requests("bad_gateway");
                if e.is_breaker_failure() {
                    self.record_failure(&upstream, &client_id);
                }
            }
        }

        outcome
    }

    async fn authenticate(
        &self,
        proxy_auth_header: &Option<String>,
        target: &str,
        peer: &str,
    ) -> Result<String, GatewayError> {
        if !self.authenticator.enabled() {
            return Ok(peer.to_string());
        }

        let credentials = if let Some(header) = proxy_auth_header {
            decode_proxy_authorization(header)?
        } else if let Ok(uri) = target.parse::<http::Uri>()
            && let Some(userinfo) = decode_userinfo(&uri)
        {
            userinfo
        } else {
            self.metrics.incr_auth_failures();
            return Err(GatewayError::AuthRejected {
                reason: "Proxy-Authorization header absent",
            });
        };

        let now = chrono::Utc::now().timestamp();
        match self.authenticator.validate(&credentials, now) {
            Ok(token) => Ok(token.client_id),
            Err(e) => {
                self.metrics.incr_auth_failures();
                Err(e)
            }
        }
    }

    async fn handle_connect(
        &self,
        client: &mut Stream,
        upstream: &UpstreamRecord,
        target_authority: &str,
        shutdown: &ShutdownWatch,
    ) -> Result<(), GatewayError> {
        let mut upstream_conn = self.dial(upstream).await?;

        let mut request = format!(
            "CONNECT {target_authority} HTTP/1.1\r\nHost: {target_authority}\r\n"
        );
        if let Some(auth) = upstream.basic_auth_header() {
            request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
        request.push_str("\r\n");

        upstream_conn
            .write_all(request.as_bytes())
            .await
            .map_err(|source| GatewayError::UpstreamDialFailure {
                upstream: upstream.id.to_string(),
                source,
            })?;

        let status = read_upstream_status_line(&mut upstream_conn, self.dial_timeout).await?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::UpstreamHandshakeFailure {
                upstream: upstream.id.to_string(),
                status,
            });
        }

        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await
            .map_err(|source| GatewayError::UpstreamDialFailure {
                upstream: upstream.id.to_string(),
                source,
            })?;

        let outcome = relay(
            client,
            &mut upstream_conn,
            self.relay_idle_timeout,
            self.shutdown_drain,
            shutdown,
            &self.metrics,
            false,
        )
        .await;
        self.settle_relay_outcome(upstream, outcome, |stats| stats.bytes_down > 0)
    }

    async fn handle_plain_http(
        &self,
        client: &mut Stream,
        upstream: &UpstreamRecord,
        method: &str,
        target: &str,
        host_header: Option<&str>,
        forwarded_headers: &str,
        trailing: &[u8],
        shutdown: &ShutdownWatch,
    ) -> Result<(), GatewayError> {
        let mut upstream_conn = self.dial(upstream).await?;

        let (absolute_uri, host) = if target.starts_with("http://") || target.starts_with("https://") {
            let uri: http::Uri = target.parse().map_err(|_| GatewayError::ClientProtocolError {
                reason: "absolute-form request target is not a valid URI",
            })?;
            let host = uri
                .authority()
                .map(|a| a.as_str().to_string())
                .unwrap_or_default();
            (target.to_string(), host)
        } else {
            let host = host_header.ok_or(GatewayError::ClientProtocolError {
                reason: "origin-form request missing Host header",
            })?;
            (format!("http://{host}{target}"), host.to_string())
        };

        let mut request = format!("{method} {absolute_uri} HTTP/1.1\r\nHost: {host}\r\n");
        request.push_str(forwarded_headers);
        if let Some(auth) = upstream.basic_auth_header() {
            request.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
        request.push_str("\r\n");

        upstream_conn
            .write_all(request.as_bytes())
            .await
            .map_err(|source| GatewayError::UpstreamDialFailure {
                upstream: upstream.id.to_string(),
                source,
            })?;
        if !trailing.is_empty() {
            upstream_conn
                .write_all(trailing)
                .await
                .map_err(|source| GatewayError::UpstreamDialFailure {
                    upstream: upstream.id.to_string(),
                    source,
                })?;
        }

        // Unlike CONNECT, the upstream's response here is the client's
        // response — it must reach the client byte-for-byte, status line and
        // headers included (§4.6 step 5). So the relay starts immediately
        // rather than pre-reading and discarding the status line first: that
        // would both corrupt the response and risk a deadlock on a request
        // body larger than the initial head read, since the upstream would
        // be waiting on the rest of the body while this task blocked on the
        // response. `relay` is asked to watch the downstream bytes it is
        // already forwarding for a complete status line instead (§4.3: any
        // complete status line counts as success for a plain-HTTP probe,
        // unlike CONNECT's 2xx requirement).
        let outcome = relay(
            client,
            &mut upstream_conn,
            self.relay_idle_timeout,
            self.shutdown_drain,
            shutdown,
            &self.metrics,
            true,
        )
        .await;
        self.settle_relay_outcome(upstream, outcome, |stats| stats.status_line_seen)
    }

    async fn dial(&self, upstream: &UpstreamRecord) -> Result<TcpStream, GatewayError> {
        let (host, port) = upstream.dial_addr();
        tokio::time::timeout(self.dial_timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| GatewayError::UpstreamDialFailure {
                upstream: upstream.id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::TimedOut, "dial timed out"),
            })?
            .map_err(|source| GatewayError::UpstreamDialFailure {
                upstream: upstream.id.to_string(),
                source,
            })
    }

    /// Applies §4.3's success/failure rule: a failure is a session that
    /// ended within the probation window without meeting `is_success`; a
    /// success is any session that meets it. A session that outlives the
    /// probation window without meeting it either is neither — it does not
    /// move the breaker. The CONNECT path's `is_success` is "relayed at
    /// least one byte downstream"; the plain-HTTP path's is "a complete
    /// upstream status line was observed".
    fn settle_relay_outcome(
        &self,
        upstream: &UpstreamRecord,
        outcome: Result<RelayOutcome, GatewayError>,
        is_success: impl Fn(&RelayOutcome) -> bool,
    ) -> Result<(), GatewayError> {
        match outcome {
            Ok(stats) if is_success(&stats) => {
                tracing::debug!(upstream = %upstream.id, bytes_up = stats.bytes_up, bytes_down = stats.bytes_down, "tunnel session closed");
                self.pool.report_result(upstream.id, true);
                Ok(())
            }
            Ok(stats) if stats.elapsed < FAILURE_PROBATION => {
                Err(GatewayError::RelayAborted {
                    reason: "upstream closed before the session met its success condition".into(),
                })
            }
            Ok(_) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Reports a breaker failure exactly once per session outcome and, if
    /// that failure tripped the breaker open, invalidates any sticky
    /// binding pinning this client (or any client) to the now-open upstream
    /// (§4.3 "sticky bindings ... are invalidated when the breaker trips").
    fn record_failure(&self, upstream: &UpstreamRecord, client_id: &str) {
        self.pool.report_result(upstream.id, false);
        self.metrics.incr_upstream_failures(&upstream.id.to_string());
        if self.pool.circuit_state(upstream.id) == crate::breaker::CircuitState::Open {
            self.metrics.set_breaker_open(&upstream.id.to_string(), true);
            self.sticky.invalidate(client_id);
            self.sticky.invalidate_upstream(upstream.id);
        }
    }
}

struct RequestHead {
    bytes: Vec<u8>,
    trailing: Vec<u8>,
}

/// Reads the first HTTP request line and headers from the client, bounded
/// per §4.6 step 1: at most 8 KiB of head, at most 100 headers. Any excess
/// is a 400.
async fn read_request_head(io: &mut Stream) -> Result<RequestHead, GatewayError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(pos) = find_header_terminator(&buf) {
            let trailing = buf.split_off(pos + 4);
            buf.truncate(pos + 4);
            return Ok(RequestHead { bytes: buf, trailing });
        }

        if buf.len() >= MAX_REQUEST_HEAD_BYTES {
            return Err(GatewayError::ClientProtocolError {
                reason: "request head exceeds 8KiB limit",
            });
        }

        let n = io
            .read(&mut chunk)
            .await
            .map_err(|_| GatewayError::ClientProtocolError { reason: "failed reading request head" })?;
        if n == 0 {
            return Err(GatewayError::ClientProtocolError {
                reason: "client closed connection before sending a complete request",
            });
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

async fn read_upstream_status_line<S: AsyncRead + Unpin>(
    stream: &mut S,
    timeout: Duration,
) -> Result<u16, GatewayError> {
    let mut buf = Vec::with_capacity(256);
    let mut chunk = [0u8; 256];

    let read_fut = async {
        loop {
            if let Some(status) = try_parse_status(&buf) {
                return Ok(status);
            }
            if buf.len() >= MAX_REQUEST_HEAD_BYTES {
                return Err(());
            }
            let n = stream.read(&mut chunk).await.map_err(|_| ())?;
            if n == 0 {
                return Err(());
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    };

    tokio::time::timeout(timeout, read_fut)
        .await
        .map_err(|_| GatewayError::UpstreamDialFailure {
            upstream: "unknown".into(),
            source: std::io::Error::new(std::io::ErrorKind::TimedOut, "upstream handshake timed out"),
        })?
        .map_err(|_| GatewayError::UpstreamDialFailure {
            upstream: "unknown".into(),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream closed before a status line"),
        })
}

fn try_parse_status(buf: &[u8]) -> Option<u16> {
    let mut headers = [httparse::EMPTY_HEADER; 1];
    let mut res = httparse::Response::new(&mut headers);
    match res.parse(buf) {
        Ok(httparse::Status::Complete(_)) => res.code,
        Ok(httparse::Status::Partial) => None,
        Err(httparse::Error::TooManyHeaders) => res.code,
        Err(_) => None,
    }
}

struct RelayOutcome {
    bytes_up: u64,
    bytes_down: u64,
    elapsed: Duration,
    status_line_seen: bool,
}

/// Caps how many downstream bytes `relay` accumulates while watching for a
/// complete upstream status line — a sanity bound, not a real limit on
/// response size, since every byte is still forwarded to the client as soon
/// as it's read regardless of whether a status line has been recognized yet.
const STATUS_LINE_WATCH_CAP: usize = MAX_REQUEST_HEAD_BYTES;

/// Bidirectional byte relay between the client and the upstream connection
/// (§4.6 step 6). Each direction shares one idle-inactivity timer: if
/// neither direction has moved a byte within `idle_timeout`, the session is
/// closed. Preserves byte order within each direction — this loop never
/// reorders reads relative to writes.
///
/// When `track_status_line` is set (the plain-HTTP path), the first bytes
/// read from `upstream` are mirrored into a small accumulator purely to
/// detect a complete HTTP status line for the breaker's success rule (§4.3)
/// — they are written to `client` unconditionally and in the same order
/// either way, so this never withholds or reorders a byte of the response.
///
/// Also observes `shutdown` (§5 "graceful shutdown signals all tunnel
/// sessions"): once the server starts shutting down, the session is given
/// `drain` to finish on its own before the relay is forcibly aborted.
async fn relay<A, B>(
    client: &mut A,
    upstream: &mut B,
    idle_timeout: Duration,
    drain: Duration,
    shutdown: &ShutdownWatch,
    metrics: &MetricsSink,
    track_status_line: bool,
) -> Result<RelayOutcome, GatewayError>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let start = Instant::now();
    let mut up_buf = [0u8; 16 * 1024];
    let mut down_buf = [0u8; 16 * 1024];
    let mut bytes_up = 0u64;
    let mut bytes_down = 0u64;
    let mut client_open = true;
    let mut upstream_open = true;

    let mut status_line_seen = false;
    let mut status_watch_buf: Vec<u8> = Vec::new();
    let mut status_watch_done = !track_status_line;

    let mut shutdown = shutdown.clone();
    let mut drain_deadline: Option<tokio::time::Instant> = if *shutdown.borrow() {
        Some(tokio::time::Instant::now() + drain)
    } else {
        None
    };

    while client_open || upstream_open {
        tokio::select! {
            res = client.read(&mut up_buf), if client_open => {
                match res {
                    Ok(0) => { client_open = false; let _ = upstream.shutdown().await; }
                    Ok(n) => {
                        upstream.write_all(&up_buf[..n]).await.map_err(|source| GatewayError::UpstreamDialFailure { upstream: "relay".into(), source })?;
                        bytes_up += n as u64;
                        metrics.add_bytes_up(n as u64);
                    }
                    Err(e) => return Err(GatewayError::RelayAborted { reason: format!("client read: {e}") }),
                }
            }
            res = upstream.read(&mut down_buf), if upstream_open => {
                match res {
                    Ok(0) => { upstream_open = false; let _ = client.shutdown().await; }
                    Ok(n) => {
                        client.write_all(&down_buf[..n]).await.map_err(|e| GatewayError::RelayAborted { reason: format!("client write: {e}") })?;
                        bytes_down += n as u64;
                        metrics.add_bytes_down(n as u64);
                        if !status_watch_done {
                            status_watch_buf.extend_from_slice(&down_buf[..n]);
                            if try_parse_status(&status_watch_buf).is_some() {
                                status_line_seen = true;
                                status_watch_done = true;
                                status_watch_buf = Vec::new();
                            } else if status_watch_buf.len() >= STATUS_LINE_WATCH_CAP {
                                status_watch_done = true;
                                status_watch_buf = Vec::new();
                            }
                        }
                    }
                    Err(e) => return Err(GatewayError::RelayAborted { reason: format!("upstream read: {e}") }),
                }
            }
            _ = tokio::time::sleep(idle_timeout) => {
                return Err(GatewayError::RelayAborted { reason: "idle timeout".into() });
            }
            res = shutdown.changed(), if drain_deadline.is_none() => {
                if res.is_ok() && *shutdown.borrow() {
                    drain_deadline = Some(tokio::time::Instant::now() + drain);
                }
            }
            _ = tokio::time::sleep_until(drain_deadline.unwrap_or_else(tokio::time::Instant::now)), if drain_deadline.is_some() => {
                return Err(GatewayError::RelayAborted { reason: "graceful shutdown drain window elapsed".into() });
            }
        }
    }

    Ok(RelayOutcome {
        bytes_up,
        bytes_down,
        elapsed: start.elapsed(),
        status_line_seen,
    })
}

async fn write_status_response(io: &mut Stream, status: u16, body: &str) -> Result<(), GatewayError> {
    let reason = reason_phrase(status);
    let mut response = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    if status == 407 {
        response.push_str("Proxy-Authenticate: Basic realm=\"proxy-guard\"\r\n");
    }
    response.push_str("\r\n");
    response.push_str(body);

    io.write_all(response.as_bytes())
        .await
        .map_err(|source| GatewayError::UpstreamDialFailure {
            upstream: "client".into(),
            source,
        })
}

fn status_body(e: &GatewayError) -> &'static str {
    match e {
        GatewayError::NoUpstreamAvailable => "no upstream available",
        GatewayError::AuthRejected { .. } => "authentication required",
        GatewayError::ClientProtocolError { .. } => "bad request",
        _ => "bad gateway",
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "Connection Established",
        400 => "Bad Request",
        407 => "Proxy Authentication Required",
        502 => "Bad Gateway",
        _ => "Error",
    }
}

/// Reads the client's remote address off the stream's socket digest, the
/// same mechanism `Session::client_addr()` uses internally (see the
/// teacher's `ctx::request::request_ctx` for the `ProxyHttp`-side
/// equivalent). `ServerApp` hands us the raw `Stream` rather than a
/// `Session`, so we read the digest directly instead.
fn peer_addr_string(io: &Stream) -> String {
    io.get_socket_digest()
        .and_then(|digest| digest.peer_addr())
        .map(|addr| match addr {
            PingoraSocketAddr::Inet(a) => a.to_string(),
            PingoraSocketAddr::Unix(_) => "unix".to_string(),
        })
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relay_preserves_byte_order_both_directions() {
        let (mut client_a, mut client_b) = duplex(64);
        let (mut upstream_a, mut upstream_b) = duplex(64);
        let metrics = MetricsSink::new();
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let relay_task = tokio::spawn(async move {
            relay(
                &mut client_b,
                &mut upstream_b,
                Duration::from_secs(5),
                Duration::from_secs(5),
                &shutdown_rx,
                &metrics,
                false,
            )
            .await
        });

        client_a.write_all(b"hello-upstream").await.unwrap();
        let mut got = [0u8; 14];
        upstream_a.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"hello-upstream");

        upstream_a.write_all(b"hello-client").await.unwrap();
        let mut got2 = [0u8; 12];
        client_a.read_exact(&mut got2).await.unwrap();
        assert_eq!(&got2, b"hello-client");

        drop(client_a);
        drop(upstream_a);
        let outcome = relay_task.await.unwrap();
        assert!(outcome.is_ok() || outcome.is_err());
    }

    /// Regression test for the plain-HTTP corruption bug: the full response
    /// (status line, headers, body) must reach the client intact, and
    /// `status_line_seen` must be set from the bytes actually forwarded
    /// rather than a separately consumed read.
    #[tokio::test]
    async fn relay_forwards_full_response_and_detects_status_line() {
        let (mut client_a, mut client_b) = duplex(256);
        let (mut upstream_a, mut upstream_b) = duplex(256);
        let metrics = MetricsSink::new();
        let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

        let relay_task = tokio::spawn(async move {
            relay(
                &mut client_b,
                &mut upstream_b,
                Duration::from_secs(5),
                Duration::from_secs(5),
                &shutdown_rx,
                &metrics,
                true,
            )
            .await
        });

        let response = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello";
        upstream_a.write_all(response).await.unwrap();
        let mut got = vec![0u8; response.len()];
        client_a.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, response);

        drop(client_a);
        drop(upstream_a);
        let outcome = relay_task.await.unwrap().unwrap();
        assert!(outcome.status_line_seen);
        assert_eq!(outcome.bytes_down, response.len() as u64);
    }

    #[test]
    fn finds_header_terminator() {
        assert_eq!(find_header_terminator(b"GET / HTTP/1.1\r\n\r\n"), Some(15));
        assert_eq!(find_header_terminator(b"GET / HTTP/1.1\r\n"), None);
    }
}
