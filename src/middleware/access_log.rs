//! Access logging into the ring buffer.

use std::panic::{resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use futures::FutureExt;

use crate::handler::{BoxedHandler, Handler, Middleware};
use crate::request::Request;
use crate::ring::{LogEvent, RingBuffer};

/// Wraps handlers with access logging.
///
/// After the inner handler returns (or panics), one [`LogEvent`] — method,
/// path, status, body bytes, duration, client address with the port
/// stripped — is offered to the ring buffer. The write result is ignored:
/// when the buffer is full the event is dropped rather than applying
/// back-pressure to the request. A panicking handler is logged as `500` and
/// the panic is rethrown so outer middleware and the router observe it.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use strada::{middleware::access_log, RingBuffer, Router};
///
/// let rb = Arc::new(RingBuffer::with_capacity(1024).unwrap());
/// let router = Router::new();
/// router.use_middleware(access_log(Arc::clone(&rb))).unwrap();
/// ```
pub fn access_log(buffer: Arc<RingBuffer>) -> Middleware {
    Arc::new(move |next: BoxedHandler| {
        let buffer = Arc::clone(&buffer);
        (move |req: Request| {
            let buffer = Arc::clone(&buffer);
            let next = next.clone();
            async move {
                let start = Instant::now();
                let method = req.method().to_owned();
                let path = req.path().to_owned();
                let remote_addr = strip_port(req.remote_addr()).to_owned();

                let outcome = AssertUnwindSafe(next.call(req)).catch_unwind().await;
                let (status, bytes) = match &outcome {
                    Ok(res) => (res.status_code(), res.body().len() as i64),
                    Err(_) => (500, 0),
                };

                let _ = buffer.try_write(LogEvent {
                    timestamp: unix_nanos(),
                    method,
                    path,
                    status,
                    bytes,
                    duration_nanos: start.elapsed().as_nanos() as i64,
                    remote_addr,
                    ..LogEvent::default()
                });

                match outcome {
                    Ok(res) => res,
                    Err(payload) => resume_unwind(payload),
                }
            }
        })
        .into_boxed_handler()
    })
}

/// `"1.2.3.4:5678"` → `"1.2.3.4"`, `"[::1]:80"` → `"::1"`. Anything without
/// a syntactically valid port is kept whole.
fn strip_port(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let after = &rest[end + 1..];
            if after.is_empty() || (after.starts_with(':') && is_port(&after[1..])) {
                return &rest[..end];
            }
        }
        return addr;
    }
    match addr.rfind(':') {
        Some(idx) if is_port(&addr[idx + 1..]) => &addr[..idx],
        _ => addr,
    }
}

fn is_port(p: &str) -> bool {
    !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Response, Router};

    #[test]
    fn strip_port_cases() {
        assert_eq!(strip_port("10.0.0.1:55421"), "10.0.0.1");
        assert_eq!(strip_port("10.0.0.1"), "10.0.0.1");
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("[::1]"), "::1");
        assert_eq!(strip_port("host:notaport"), "host:notaport");
    }

    #[tokio::test]
    async fn event_written_after_response() {
        let rb = Arc::new(RingBuffer::with_capacity(8).unwrap());
        let router = Router::new();
        router.use_middleware(access_log(Arc::clone(&rb))).unwrap();
        router
            .get("/hello/:name", |req: Request| async move {
                Response::text(format!("hi {}", req.param("name").unwrap_or("?")))
            })
            .unwrap();

        let req = Request::new("GET", "/hello/ana").with_remote_addr("10.0.0.9:4242");
        let res = router.dispatch(req).await;
        assert_eq!(res.status_code(), 200);

        rb.close();
        let mut events = Vec::new();
        rb.consume(|batch| events.extend_from_slice(batch));
        assert_eq!(events.len(), 1);
        let ev = &events[0];
        assert_eq!(ev.method, "GET");
        assert_eq!(ev.path, "/hello/ana");
        assert_eq!(ev.status, 200);
        assert_eq!(ev.bytes, "hi ana".len() as i64);
        assert_eq!(ev.remote_addr, "10.0.0.9");
        assert!(ev.timestamp > 0);
    }

    #[tokio::test]
    async fn panic_logged_as_500_and_rethrown() {
        let rb = Arc::new(RingBuffer::with_capacity(8).unwrap());
        let router = Router::with_config(
            crate::RouterConfig::new().panic_handler(|_| Response::status(503)),
        );
        router.use_middleware(access_log(Arc::clone(&rb))).unwrap();
        router
            .get("/boom", |_req: Request| async move {
                panic!("boom");
                #[allow(unreachable_code)]
                Response::status(200)
            })
            .unwrap();

        // The middleware rethrows; the router's panic handler converts it.
        let res = router.dispatch(Request::new("GET", "/boom")).await;
        assert_eq!(res.status_code(), 503);

        rb.close();
        let mut events = Vec::new();
        rb.consume(|batch| events.extend_from_slice(batch));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, 500);
    }
}
