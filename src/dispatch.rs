//! The request-dispatch state machine.
//!
//! Both router variants — mutable and frozen — run the exact same states for
//! every request; only the table lookups differ, abstracted behind
//! [`TableCore`]:
//!
//! 1. length check (`414` beyond [`MAX_PATH_LENGTH`]);
//! 2. branch choice: raw (encoded) path when `use_raw_path` is on and the
//!    wire form is a valid encoding of the decoded path, else decoded;
//! 3. decoded branch only: canonicalize, redirecting (`301` safe / `308`
//!    otherwise) when the request path is not already canonical;
//! 4. match-path derivation (lowercased when case-insensitive; capture path
//!    untouched so parameter values keep their case and encoding);
//! 5. host table, then default table, each through the same three attempts:
//!    serve (with `HEAD`→`GET` fallback), alternate trailing slash, method
//!    negotiation (`405` with `Allow`, auto-`OPTIONS`);
//! 6. `404`.
//!
//! Resolution is entirely synchronous — the caller holds whatever lock its
//! tables need only across [`resolve`], then drops it before awaiting the
//! selected handler in [`finish`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use percent_encoding::percent_decode_str;

use crate::handler::BoxedHandler;
use crate::method::{self, AllowSet};
use crate::params::Params;
use crate::pool::{Pool, Pooled};
use crate::request::{CaptureSource, Request, RouteCapture};
use crate::response::Response;
use crate::router::RouterConfig;
use crate::segments::{clean_path, lower_ascii, PathSegments};
use crate::trie::Route;
use crate::{MAX_DEPTH, MAX_PATH_LENGTH};

/// Table lookups a router variant must provide. Everything else about
/// dispatch is shared.
pub(crate) trait TableCore {
    fn static_route(&self, method: &str, path: &str) -> Option<&Route>;
    fn method_has_params(&self, method: &str) -> bool;
    fn has_any_params(&self) -> bool;
    fn any_trailing_slash(&self) -> bool;
    fn static_allow_cached(&self, path: &str) -> Option<&str>;
    fn trie_search(
        &self,
        method: &str,
        segs: &PathSegments,
        match_path: &str,
        params: Option<&mut Params>,
    ) -> Option<&Route>;
    fn allow_into(&self, match_path: &str, segs: &mut PathSegments, set: &mut AllowSet);
}

/// Scratch-record pools shared across requests. Each router variant owns a
/// set; acquisition is exclusive until release.
pub(crate) struct Pools {
    pub(crate) segs: Pool<PathSegments>,
    pub(crate) params: Arc<Pool<Params>>,
}

impl Default for Pools {
    fn default() -> Self {
        Self {
            segs: Pool::new(64),
            params: Arc::new(Pool::new(64)),
        }
    }
}

/// Preprocessed request, borrowed from the [`Request`] for the duration of
/// resolution.
pub(crate) struct RouteContext<'r> {
    pub(crate) method: &'r str,
    /// Normalized path lookups run against (lowercased when configured).
    pub(crate) match_path: Cow<'r, str>,
    /// Path parameter values are sliced from; identical byte layout to
    /// `match_path`.
    pub(crate) capture_path: &'r str,
    pub(crate) use_raw: bool,
}

/// What resolution decided. Owns everything it carries so the table lock can
/// be released before any handler runs.
pub(crate) enum Resolved {
    /// A finished response: redirect, auto-OPTIONS, or preprocessing stop.
    Respond(Response),
    /// A matched handler, with captured parameters for parametric routes.
    Invoke {
        handler: BoxedHandler,
        capture: Option<RouteCapture>,
    },
    /// Some other method matches; run the override or write the bare 405.
    MethodNotAllowed { allow: String },
    NotFound,
}

// ── Preprocessing ─────────────────────────────────────────────────────────────

/// States 1–4: length limits, branch choice, canonicalization redirect,
/// match-path derivation. `Err` is a finished response.
pub(crate) fn prepare<'r>(
    req: &'r Request,
    config: &RouterConfig,
) -> Result<RouteContext<'r>, Response> {
    let use_raw = config.use_raw_path && raw_path_valid(req);

    if req.path().len() > MAX_PATH_LENGTH {
        return Err(Response::status(414));
    }
    if use_raw && req.raw_path().len() > MAX_PATH_LENGTH {
        return Err(Response::status(414));
    }

    let capture_path: &'r str = if use_raw {
        req.raw_path()
    } else {
        let cleaned = clean_path(req.path());
        if cleaned.len() > MAX_PATH_LENGTH {
            return Err(Response::status(414));
        }
        if cleaned.as_ref() != req.path() {
            return Err(Response::redirect(redirect_code(req.method()), &cleaned));
        }
        req.path()
    };

    let match_path = if config.ignore_case {
        lower_ascii(capture_path)
    } else {
        Cow::Borrowed(capture_path)
    };

    Ok(RouteContext {
        method: req.method(),
        match_path,
        capture_path,
        use_raw,
    })
}

/// The raw branch is taken only when the wire form is a well-formed percent
/// encoding that decodes to the request's decoded path. Malformed raw paths
/// fall back to the decoded branch.
fn raw_path_valid(req: &Request) -> bool {
    let raw = req.raw_path();
    !raw.is_empty()
        && is_well_formed_encoding(raw)
        && percent_decode_str(raw)
            .decode_utf8()
            .map(|decoded| decoded == req.path())
            .unwrap_or(false)
}

pub(crate) fn is_well_formed_encoding(s: &str) -> bool {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if i + 2 >= bytes.len()
                || !bytes[i + 1].is_ascii_hexdigit()
                || !bytes[i + 2].is_ascii_hexdigit()
            {
                return false;
            }
            i += 3;
        } else {
            i += 1;
        }
    }
    true
}

fn redirect_code(method: &str) -> u16 {
    if method == method::GET || method == method::HEAD {
        301
    } else {
        308
    }
}

// ── Resolution ────────────────────────────────────────────────────────────────

/// States 5–6: host table, default table, not-found.
pub(crate) fn resolve<T: TableCore>(
    default_table: &T,
    hosts: &HashMap<String, T>,
    config: &RouterConfig,
    ctx: &RouteContext<'_>,
    host: &str,
    pools: &Pools,
) -> Resolved {
    if !hosts.is_empty() {
        if let Some(table) = hosts.get(normalize_host(host).as_str()) {
            if let Some(resolved) = attempt(table, config, ctx, pools) {
                return resolved;
            }
        }
    }
    if let Some(resolved) = attempt(default_table, config, ctx, pools) {
        return resolved;
    }
    Resolved::NotFound
}

/// One table's three attempts. A `Some` return completes the request: in
/// particular, a host table's method-not-allowed answer overrides falling
/// through to the default table.
fn attempt<T: TableCore>(
    table: &T,
    config: &RouterConfig,
    ctx: &RouteContext<'_>,
    pools: &Pools,
) -> Option<Resolved> {
    if let Some(resolved) = try_serve(table, ctx.method, &ctx.match_path, pools, &|| {
        primary_source(ctx)
    }) {
        return Some(resolved);
    }
    if let Some(resolved) = try_alternate_slash(table, config, ctx, pools) {
        return Some(resolved);
    }
    try_method_not_allowed(table, config, ctx, pools)
}

fn primary_source(ctx: &RouteContext<'_>) -> CaptureSource {
    if ctx.use_raw {
        CaptureSource::Raw
    } else {
        CaptureSource::Decoded
    }
}

/// `HEAD` negotiates: explicit `HEAD` route first, then the `GET` route
/// (the host server suppresses the body).
fn try_serve<T: TableCore>(
    table: &T,
    req_method: &str,
    match_path: &str,
    pools: &Pools,
    source: &dyn Fn() -> CaptureSource,
) -> Option<Resolved> {
    if req_method == method::HEAD {
        if let Some(resolved) = serve_method(table, method::HEAD, match_path, pools, source) {
            return Some(resolved);
        }
        return serve_method(table, method::GET, match_path, pools, source);
    }
    serve_method(table, req_method, match_path, pools, source)
}

fn serve_method<T: TableCore>(
    table: &T,
    method: &str,
    match_path: &str,
    pools: &Pools,
    source: &dyn Fn() -> CaptureSource,
) -> Option<Resolved> {
    // Static fast path: exact map hit, no traversal, no parameter store.
    if let Some(route) = table.static_route(method, match_path) {
        return Some(Resolved::Invoke {
            handler: route.handler.clone(),
            capture: None,
        });
    }
    if !table.method_has_params(method) {
        return None;
    }

    let mut segs = pools.segs.acquire();
    if !segs.parse(match_path) || segs.len() > MAX_DEPTH {
        pools.segs.release(segs);
        return None;
    }

    // First pass locates the route; only parametric hits pay for a second
    // pass that captures values.
    let resolved = match table.trie_search(method, &segs, match_path, None) {
        None => None,
        Some(route) if !route.has_params => Some(Resolved::Invoke {
            handler: route.handler.clone(),
            capture: None,
        }),
        Some(route) => {
            let mut params = pools.params.acquire();
            params.reset();
            let _ = table.trie_search(method, &segs, match_path, Some(&mut params));
            Some(Resolved::Invoke {
                handler: route.handler.clone(),
                capture: Some(RouteCapture {
                    params: Pooled::new(params, Arc::clone(&pools.params)),
                    source: source(),
                }),
            })
        }
    };
    pools.segs.release(segs);
    resolved
}

/// Trailing-slash alternation. Strict mode redirects to the registered form;
/// non-strict mode serves the alternate form transparently.
fn try_alternate_slash<T: TableCore>(
    table: &T,
    config: &RouterConfig,
    ctx: &RouteContext<'_>,
    pools: &Pools,
) -> Option<Resolved> {
    // Fast-skip: adding a slash can only reach routes registered with one.
    if !ctx.match_path.ends_with('/') && !table.any_trailing_slash() {
        return None;
    }
    let alt_match = alternate_path(&ctx.match_path)?;

    if config.strict_slash {
        // Redirect only when the requested form matches nothing at all but
        // the toggled form does. Requiring an empty allow set on the
        // original path keeps redirect targets terminal: the target always
        // serves or negotiates, never bounces back.
        if allowed_header(table, &ctx.match_path, pools).is_none()
            && allowed_header(table, &alt_match, pools).is_some()
        {
            let alt_capture = alternate_path(ctx.capture_path)?;
            return Some(Resolved::Respond(Response::redirect(
                redirect_code(ctx.method),
                &alt_capture,
            )));
        }
        return None;
    }

    let alt_capture = alternate_path(ctx.capture_path)?;
    try_serve(table, ctx.method, &alt_match, pools, &|| {
        CaptureSource::Owned(alt_capture.clone())
    })
}

/// Allow-set negotiation: `405` with `Allow`, or `200` for `OPTIONS`.
fn try_method_not_allowed<T: TableCore>(
    table: &T,
    config: &RouterConfig,
    ctx: &RouteContext<'_>,
    pools: &Pools,
) -> Option<Resolved> {
    let allow = if config.strict_slash {
        allowed_header(table, &ctx.match_path, pools)?
    } else {
        // Non-strict: both slash forms are equivalent, so the allow set
        // merges them.
        let mut set = AllowSet::default();
        let mut segs = pools.segs.acquire();
        table.allow_into(&ctx.match_path, &mut segs, &mut set);
        if let Some(alt) = alternate_path(&ctx.match_path) {
            table.allow_into(&alt, &mut segs, &mut set);
        }
        pools.segs.release(segs);
        if set.is_empty() {
            return None;
        }
        set.render()
    };

    if ctx.method == method::OPTIONS {
        return Some(Resolved::Respond(
            Response::builder(200)
                .header("allow", &allow)
                .body(String::new()),
        ));
    }
    Some(Resolved::MethodNotAllowed { allow })
}

fn allowed_header<T: TableCore>(table: &T, match_path: &str, pools: &Pools) -> Option<String> {
    // A table with no parametric routes answers from the registration-time
    // cache.
    if !table.has_any_params() {
        return table.static_allow_cached(match_path).map(str::to_owned);
    }
    let mut set = AllowSet::default();
    let mut segs = pools.segs.acquire();
    table.allow_into(match_path, &mut segs, &mut set);
    pools.segs.release(segs);
    (!set.is_empty()).then(|| set.render())
}

// ── Completion ────────────────────────────────────────────────────────────────

/// Runs the resolved outcome to a response. This is the only async stage; no
/// table lock is held here.
pub(crate) async fn finish(resolved: Resolved, mut req: Request, config: &RouterConfig) -> Response {
    match resolved {
        Resolved::Respond(res) => res,
        Resolved::Invoke { handler, capture } => {
            if let Some(capture) = capture {
                req.set_capture(capture);
            }
            invoke(handler, req, config).await
        }
        Resolved::MethodNotAllowed { allow } => match &config.method_not_allowed {
            Some(handler) => {
                let mut res = invoke(handler.clone(), req, config).await;
                res.set_header_if_absent("allow", &allow);
                res
            }
            None => Response::builder(405)
                .header("allow", &allow)
                .body(String::new()),
        },
        Resolved::NotFound => match &config.not_found {
            Some(handler) => invoke(handler.clone(), req, config).await,
            None => Response::builder(404)
                .header("content-type", "text/plain; charset=utf-8")
                .body("404 page not found\n".to_owned()),
        },
    }
}

/// Handler invocation with panic isolation. With no panic handler the panic
/// propagates to the host server; pooled resources held by the unwinding
/// future are reclaimed by their guards.
async fn invoke(handler: BoxedHandler, req: Request, config: &RouterConfig) -> Response {
    match &config.panic_handler {
        Some(panic_handler) => match AssertUnwindSafe(handler.call(req)).catch_unwind().await {
            Ok(res) => res,
            Err(payload) => panic_handler(payload),
        },
        None => handler.call(req).await,
    }
}

// ── Shared path/host helpers ──────────────────────────────────────────────────

/// The path with its trailing slash toggled; `None` when there is no
/// meaningful alternate (`""`, `"/"`).
pub(crate) fn alternate_path(p: &str) -> Option<String> {
    if p.is_empty() || p == "/" {
        return None;
    }
    match p.strip_suffix('/') {
        Some(stripped) => Some(stripped.to_owned()),
        None => Some(format!("{p}/")),
    }
}

/// Normalizes a host for table keys and lookups: trim, ASCII-lowercase,
/// strip a syntactically valid port, strip IPv6 brackets. An invalid port
/// leaves the literal intact.
pub(crate) fn normalize_host(host: &str) -> String {
    let h = host.trim().to_ascii_lowercase();
    if let Some(rest) = h.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            let inner = &rest[..end];
            let after = &rest[end + 1..];
            if after.is_empty() {
                return inner.to_owned();
            }
            if let Some(port) = after.strip_prefix(':') {
                if is_valid_port(port) {
                    return inner.to_owned();
                }
            }
        }
        return h;
    }
    if let Some(idx) = h.rfind(':') {
        if is_valid_port(&h[idx + 1..]) {
            return h[..idx].to_owned();
        }
    }
    h
}

fn is_valid_port(p: &str) -> bool {
    !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_host_cases() {
        let cases = [
            ("", ""),
            (" api.example.com ", "api.example.com"),
            ("API.EXAMPLE.COM", "api.example.com"),
            ("api.example.com:8080", "api.example.com"),
            ("api.example.com:abc", "api.example.com:abc"),
            ("api.example.com:", "api.example.com:"),
            (":8080", ""),
            ("[2001:db8::1]", "2001:db8::1"),
            ("[2001:db8::1]:8443", "2001:db8::1"),
            ("[2001:db8::1]:abc", "[2001:db8::1]:abc"),
        ];
        for (input, want) in cases {
            assert_eq!(normalize_host(input), want, "input {input:?}");
        }
    }

    #[test]
    fn alternate_toggles_trailing_slash() {
        assert_eq!(alternate_path("/a"), Some("/a/".to_owned()));
        assert_eq!(alternate_path("/a/"), Some("/a".to_owned()));
        assert_eq!(alternate_path("/"), None);
        assert_eq!(alternate_path(""), None);
    }

    #[test]
    fn well_formed_encoding() {
        assert!(is_well_formed_encoding("/a/b"));
        assert!(is_well_formed_encoding("/files/a%2Fb"));
        assert!(is_well_formed_encoding("/%C3%A9"));
        assert!(!is_well_formed_encoding("/files/%2"));
        assert!(!is_well_formed_encoding("/files/%zz"));
        assert!(!is_well_formed_encoding("%"));
    }

    #[test]
    fn prepare_redirects_non_canonical() {
        let config = RouterConfig::default();
        let req = Request::new("GET", "/a//b");
        match prepare(&req, &config) {
            Err(res) => {
                assert_eq!(res.status_code(), 301);
                assert_eq!(res.header("location"), Some("/a/b"));
            }
            Ok(_) => panic!("expected redirect"),
        }

        let req = Request::new("POST", "/a/../b");
        match prepare(&req, &config) {
            Err(res) => {
                assert_eq!(res.status_code(), 308);
                assert_eq!(res.header("location"), Some("/b"));
            }
            Ok(_) => panic!("expected redirect"),
        }
    }

    #[test]
    fn prepare_rejects_oversized_path() {
        let config = RouterConfig::default();
        let long = format!("/{}", "a".repeat(MAX_PATH_LENGTH + 1));
        let req = Request::new("GET", &long);
        match prepare(&req, &config) {
            Err(res) => assert_eq!(res.status_code(), 414),
            Ok(_) => panic!("expected 414"),
        }
    }

    #[test]
    fn prepare_lowercases_match_path_only() {
        let config = RouterConfig {
            ignore_case: true,
            ..RouterConfig::default()
        };
        let req = Request::new("GET", "/Users/AbC");
        let ctx = prepare(&req, &config).unwrap();
        assert_eq!(ctx.match_path, "/users/abc");
        assert_eq!(ctx.capture_path, "/Users/AbC");
    }

    #[test]
    fn prepare_raw_branch_skips_cleaning() {
        let config = RouterConfig {
            use_raw_path: true,
            ..RouterConfig::default()
        };
        // Raw form valid: raw branch, no clean, no redirect.
        let req = Request::new("GET", "/files/a%2Fb");
        let ctx = prepare(&req, &config).unwrap();
        assert!(ctx.use_raw);
        assert_eq!(ctx.match_path, "/files/a%2Fb");

        // Malformed raw form: decoded branch.
        let req = Request::new("GET", "/files/ok").with_raw_path("/files/%2");
        let ctx = prepare(&req, &config).unwrap();
        assert!(!ctx.use_raw);
        assert_eq!(ctx.match_path, "/files/ok");
    }
}
