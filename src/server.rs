//! HTTP server and graceful shutdown.
//!
//! A deliberately thin host around the router: raw HTTP/1.1 over tokio,
//! keep-alive, and graceful drain. TLS, body-size limits, rate limiting, and
//! slow-client protection belong to the reverse proxy in front; the router
//! core only needs something that parses a request head and writes a
//! response back.
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before SIGKILL. The server
//! reacts by:
//! 1. Immediately stopping `listener.accept()` — no new connections.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use crate::error::Error;
use crate::frozen::FrozenRouter;
use crate::handler::BoxFuture;
use crate::method;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::MAX_PATH_LENGTH;

/// Longest accepted request line: method + target + version + slack.
const MAX_REQUEST_LINE: usize = MAX_PATH_LENGTH + 256;
const MAX_HEADER_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 128;

/// Anything the server can drive: the mutable router, a frozen snapshot, or
/// an application type wrapping one.
pub trait App: Send + Sync + Sized + 'static {
    fn call(app: &Arc<Self>, req: Request) -> BoxFuture;
}

impl App for Router {
    fn call(app: &Arc<Self>, req: Request) -> BoxFuture {
        let app = Arc::clone(app);
        Box::pin(async move { app.dispatch(req).await })
    }
}

impl App for FrozenRouter {
    fn call(app: &Arc<Self>, req: Request) -> BoxFuture {
        let app = Arc::clone(app);
        Box::pin(async move { app.dispatch(req).await })
    }
}

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// ```rust,no_run
    /// use strada::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Starts accepting connections and dispatching them through `app`.
    ///
    /// Returns only after a full graceful shutdown (SIGTERM or Ctrl-C,
    /// followed by all in-flight requests completing).
    pub async fn serve<A: App>(self, app: A) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;

        // Shared across connection tasks without copying the route tables.
        let app = Arc::new(app);

        info!(addr = %self.addr, "listening");

        // JoinSet tracks every spawned connection task so shutdown can wait
        // for them all.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // `biased` checks arms top-to-bottom: a signal stops the
                // accept loop even when connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(conn) => conn,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    tasks.spawn(async move {
                        if let Err(e) = handle_connection(app, stream, remote_addr).await {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the JoinSet does not grow without
                // bound on long-running servers.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        // Drain: every in-flight connection finishes before returning.
        while tasks.join_next().await.is_some() {}

        info!("stopped");
        Ok(())
    }
}

// ── Connection handling ───────────────────────────────────────────────────────

async fn handle_connection<A: App>(
    app: Arc<A>,
    stream: TcpStream,
    remote_addr: SocketAddr,
) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    loop {
        let req = match read_request(&mut reader, remote_addr).await? {
            Parsed::Request(req) => req,
            Parsed::Eof => return Ok(()),
            Parsed::Malformed => {
                Response::status(400).write_to(&mut write_half, false).await?;
                return Ok(());
            }
        };

        let head_only = req.method() == method::HEAD;
        let close = wants_close(&req);

        let res = A::call(&app, req).await;
        res.write_to(&mut write_half, head_only).await?;

        if close {
            return Ok(());
        }
    }
}

enum Parsed {
    Request(Request),
    Eof,
    Malformed,
}

/// Reads one request head (and `content-length` body) off the wire.
async fn read_request<R>(reader: &mut BufReader<R>, remote_addr: SocketAddr) -> std::io::Result<Parsed>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    if read_crlf_line(reader, &mut line, MAX_REQUEST_LINE).await? == 0 {
        return Ok(Parsed::Eof);
    }

    // "METHOD SP request-target SP HTTP/1.1"
    let mut parts = line.split(' ');
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v), None) if !m.is_empty() && t.starts_with('/') => (m, t, v),
        _ => return Ok(Parsed::Malformed),
    };
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Ok(Parsed::Malformed);
    }

    let mut req = Request::new(method, target).with_remote_addr(remote_addr.to_string());
    if version == "HTTP/1.0" {
        req = req.with_header("connection", "close");
    }

    let mut content_length = 0usize;
    for _ in 0..MAX_HEADERS {
        let mut header = String::new();
        if read_crlf_line(reader, &mut header, MAX_HEADER_LINE).await? == 0 {
            return Ok(Parsed::Eof);
        }
        if header.is_empty() {
            // End of head.
            if content_length > 0 {
                let mut body = vec![0u8; content_length];
                reader.read_exact(&mut body).await?;
                req = req.with_body(body);
            }
            return Ok(Parsed::Request(req));
        }
        let Some((name, value)) = header.split_once(':') else {
            return Ok(Parsed::Malformed);
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = match usize::from_str(value) {
                Ok(n) => n,
                Err(_) => return Ok(Parsed::Malformed),
            };
        }
        req = req.with_header(name, value);
    }
    // Header count exceeded.
    Ok(Parsed::Malformed)
}

/// Reads one `\r\n`-terminated line, stripped. Returns 0 on a clean EOF
/// before any byte.
async fn read_crlf_line<R>(
    reader: &mut BufReader<R>,
    line: &mut String,
    limit: usize,
) -> std::io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let n = (&mut *reader).take(limit as u64).read_line(line).await?;
    if n == 0 {
        return Ok(0);
    }
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(n)
}

fn wants_close(req: &Request) -> bool {
    req.header("connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by the Kubernetes control
/// plane) and **SIGINT** (Ctrl-C, for local dev). On Windows only Ctrl-C is
/// available.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // `pending()` never resolves — on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn remote() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40000)
    }

    async fn parse(bytes: &[u8]) -> Parsed {
        let mut reader = BufReader::new(bytes);
        read_request(&mut reader, remote()).await.unwrap()
    }

    #[tokio::test]
    async fn parses_request_head_and_body() {
        let raw = b"POST /users?src=t HTTP/1.1\r\nHost: api.example.com\r\nContent-Length: 4\r\n\r\nbody";
        match parse(raw).await {
            Parsed::Request(req) => {
                assert_eq!(req.method(), "POST");
                assert_eq!(req.path(), "/users");
                assert_eq!(req.query(), "src=t");
                assert_eq!(req.host(), "api.example.com");
                assert_eq!(req.body(), b"body");
                assert_eq!(req.remote_addr(), "127.0.0.1:40000");
            }
            _ => panic!("expected parsed request"),
        }
    }

    #[tokio::test]
    async fn rejects_malformed_request_line() {
        assert!(matches!(parse(b"GARBAGE\r\n\r\n").await, Parsed::Malformed));
        assert!(matches!(
            parse(b"GET nopath HTTP/1.1\r\n\r\n").await,
            Parsed::Malformed
        ));
        assert!(matches!(
            parse(b"GET / HTTP/0.9\r\n\r\n").await,
            Parsed::Malformed
        ));
    }

    #[tokio::test]
    async fn eof_before_any_byte_is_clean() {
        assert!(matches!(parse(b"").await, Parsed::Eof));
    }

    #[tokio::test]
    async fn http10_implies_close() {
        match parse(b"GET / HTTP/1.0\r\n\r\n").await {
            Parsed::Request(req) => assert!(wants_close(&req)),
            _ => panic!("expected parsed request"),
        }
    }
}
