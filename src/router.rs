//! The application router.
//!
//! One [`RouteTable`] per virtual host plus a default table, each holding a
//! static fast-path map and a conflict-checked trie per method. Registration
//! is serialized behind a writer lock; dispatch takes the reader side only
//! for the synchronous resolution stage and never holds it across a handler
//! await. Configuration is fixed at construction, so the normalization rules
//! that registration bakes into the tables (lowercased literals under
//! `ignore_case`, canonical patterns) always agree with what dispatch does
//! to request paths.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::dispatch::{self, Pools};
use crate::error::RouteError;
use crate::handler::{compose, BoxedHandler, Handler, Middleware};
use crate::method;
use crate::request::Request;
use crate::response::Response;
use crate::segments::clean_path;
use crate::table::RouteTable;
use crate::{MAX_DEPTH, MAX_PATH_LENGTH};

/// Converts a handler panic into a response. Receives the panic payload.
pub type PanicHandler = Arc<dyn Fn(Box<dyn Any + Send>) -> Response + Send + Sync>;

/// Router behavior, fixed at construction.
///
/// ```rust
/// use strada::{Request, Response, Router, RouterConfig};
///
/// let config = RouterConfig::new()
///     .ignore_case(true)
///     .strict_slash(false)
///     .not_found(|_req: Request| async { Response::status(404) });
/// let router = Router::with_config(config);
/// ```
pub struct RouterConfig {
    pub(crate) ignore_case: bool,
    pub(crate) strict_slash: bool,
    pub(crate) use_raw_path: bool,
    pub(crate) not_found: Option<BoxedHandler>,
    pub(crate) method_not_allowed: Option<BoxedHandler>,
    pub(crate) panic_handler: Option<PanicHandler>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            ignore_case: false,
            strict_slash: true,
            use_raw_path: false,
            not_found: None,
            method_not_allowed: None,
            panic_handler: None,
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowercase registered literals and request paths before matching.
    /// Captured parameter values keep their original case.
    pub fn ignore_case(mut self, on: bool) -> Self {
        self.ignore_case = on;
        self
    }

    /// When true (the default), redirect between `/p` and `/p/` toward the
    /// registered form. When false, both forms serve the same handler.
    pub fn strict_slash(mut self, on: bool) -> Self {
        self.strict_slash = on;
        self
    }

    /// Match against the percent-encoded wire path when it is a valid
    /// encoding; captured values stay encoded and cleaning is skipped.
    pub fn use_raw_path(mut self, on: bool) -> Self {
        self.use_raw_path = on;
        self
    }

    /// Overrides the default `404` response.
    pub fn not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Some(handler.into_boxed_handler());
        self
    }

    /// Overrides the default `405` response. Not consulted for `OPTIONS`,
    /// which always gets the automatic `200` with `Allow`.
    pub fn method_not_allowed(mut self, handler: impl Handler) -> Self {
        self.method_not_allowed = Some(handler.into_boxed_handler());
        self
    }

    /// Converts handler panics into responses instead of propagating them to
    /// the host server.
    pub fn panic_handler(
        mut self,
        f: impl Fn(Box<dyn Any + Send>) -> Response + Send + Sync + 'static,
    ) -> Self {
        self.panic_handler = Some(Arc::new(f));
        self
    }
}

pub(crate) struct RouterState {
    pub(crate) default_table: RouteTable,
    pub(crate) hosts: HashMap<String, RouteTable>,
    pub(crate) middlewares: Vec<Middleware>,
    pub(crate) route_count: usize,
}

impl Default for RouterState {
    fn default() -> Self {
        Self {
            default_table: RouteTable::default(),
            hosts: HashMap::new(),
            middlewares: Vec::new(),
            route_count: 0,
        }
    }
}

/// The application router.
///
/// ```rust
/// use strada::{Request, Response, Router};
///
/// async fn get_user(req: Request) -> Response {
///     let id = req.param("id").unwrap_or("unknown");
///     Response::text(format!("user {id}"))
/// }
///
/// let router = Router::new();
/// router.get("/users/:id", get_user).unwrap();
/// router.get("/assets/*filepath", |req: Request| async move {
///     Response::text(req.param("filepath").unwrap_or("").to_owned())
/// }).unwrap();
/// ```
pub struct Router {
    config: Arc<RouterConfig>,
    state: RwLock<RouterState>,
    pools: Pools,
}

impl Router {
    pub fn new() -> Self {
        Self::with_config(RouterConfig::default())
    }

    pub fn with_config(config: RouterConfig) -> Self {
        Self {
            config: Arc::new(config),
            state: RwLock::new(RouterState::default()),
            pools: Pools::default(),
        }
    }

    pub(crate) fn config(&self) -> &Arc<RouterConfig> {
        &self.config
    }

    pub(crate) fn state(&self) -> &RwLock<RouterState> {
        &self.state
    }

    /// Appends global middleware. Chains are composed into each handler at
    /// registration time, so middleware must be installed before the first
    /// route.
    pub fn use_middleware(&self, mw: Middleware) -> Result<(), RouteError> {
        let mut state = self.state.write();
        if state.route_count > 0 {
            return Err(RouteError::MiddlewareAfterRoutes);
        }
        state.middlewares.push(mw);
        Ok(())
    }

    /// Registers a handler for `method` and `pattern` on the default table.
    ///
    /// `method` is any RFC 9110 token; `pattern` must be canonical and may
    /// contain `:name` (one segment) and `*name` (trailing catch-all)
    /// captures.
    pub fn handle(
        &self,
        method: &str,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<(), RouteError> {
        self.register("", method, pattern, handler.into_boxed_handler(), &[])
    }

    pub fn get(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::GET, pattern, handler)
    }

    pub fn head(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::HEAD, pattern, handler)
    }

    pub fn post(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::POST, pattern, handler)
    }

    pub fn put(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::PUT, pattern, handler)
    }

    pub fn patch(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::PATCH, pattern, handler)
    }

    pub fn delete(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::DELETE, pattern, handler)
    }

    pub fn options(&self, pattern: &str, handler: impl Handler) -> Result<(), RouteError> {
        self.handle(method::OPTIONS, pattern, handler)
    }

    /// Full registration path, shared with [`Group`](crate::Group). `host`
    /// is already normalized ("" targets the default table); the group's
    /// middleware chain composes inside the router's global chain.
    pub(crate) fn register(
        &self,
        host: &str,
        method: &str,
        pattern: &str,
        handler: BoxedHandler,
        group_chain: &[Middleware],
    ) -> Result<(), RouteError> {
        if !method::is_valid_token(method) {
            return Err(RouteError::InvalidMethod(method.to_owned()));
        }
        if pattern
            .bytes()
            .any(|b| b == 0 || b == b'\r' || b == b'\n')
        {
            return Err(RouteError::InvalidPath(pattern.to_owned()));
        }
        let cleaned = clean_path(pattern);
        if cleaned.as_ref() != pattern {
            return Err(RouteError::NonCanonicalPattern {
                pattern: pattern.to_owned(),
                canonical: cleaned.into_owned(),
            });
        }
        if pattern.len() > MAX_PATH_LENGTH {
            return Err(RouteError::PatternTooLong(pattern.to_owned()));
        }

        let normalized = if self.config.ignore_case {
            normalize_pattern(pattern)
        } else {
            pattern.to_owned()
        };
        let parts: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();
        if parts.len() > MAX_DEPTH {
            return Err(RouteError::RouteTooDeep(pattern.to_owned()));
        }
        validate_segments(&parts, pattern)?;

        let mut state = self.state.write();
        let composed = if state.middlewares.is_empty() && group_chain.is_empty() {
            handler
        } else {
            let mut chain: Vec<Middleware> =
                Vec::with_capacity(state.middlewares.len() + group_chain.len());
            chain.extend(state.middlewares.iter().cloned());
            chain.extend(group_chain.iter().cloned());
            compose(handler, &chain)
        };
        let table = if host.is_empty() {
            &mut state.default_table
        } else {
            state.hosts.entry(host.to_owned()).or_default()
        };
        table.register(method, &normalized, &parts, composed)?;
        state.route_count += 1;
        Ok(())
    }

    /// Routes one request to a response. Never returns an error and never
    /// panics unless a handler panics with no
    /// [`panic_handler`](RouterConfig::panic_handler) configured.
    pub async fn dispatch(&self, req: Request) -> Response {
        let resolved = {
            let ctx = match dispatch::prepare(&req, &self.config) {
                Ok(ctx) => ctx,
                Err(res) => return res,
            };
            let state = self.state.read();
            dispatch::resolve(
                &state.default_table,
                &state.hosts,
                &self.config,
                &ctx,
                req.host(),
                &self.pools,
            )
        };
        dispatch::finish(resolved, req, &self.config).await
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Lowercases literal segments, leaving `:`/`*` capture names untouched so
/// `req.param` keys keep their registered spelling.
fn normalize_pattern(pattern: &str) -> String {
    let trailing = pattern.len() > 1 && pattern.ends_with('/');
    let mut out = String::with_capacity(pattern.len() + 1);
    for part in pattern.split('/').filter(|s| !s.is_empty()) {
        out.push('/');
        if part.starts_with(':') || part.starts_with('*') {
            out.push_str(part);
        } else {
            out.push_str(&part.to_ascii_lowercase());
        }
    }
    if out.is_empty() {
        out.push('/');
    } else if trailing {
        out.push('/');
    }
    out
}

fn validate_segments(parts: &[&str], pattern: &str) -> Result<(), RouteError> {
    let mut seen: Vec<&str> = Vec::new();
    for (i, part) in parts.iter().enumerate() {
        match part.as_bytes()[0] {
            b'*' if i != parts.len() - 1 => {
                return Err(RouteError::WildcardNotLast(pattern.to_owned()));
            }
            b':' | b'*' => {
                let name = &part[1..];
                if name.is_empty() {
                    return Err(RouteError::MissingParamName(pattern.to_owned()));
                }
                if seen.contains(&name) {
                    return Err(RouteError::DuplicateParamName {
                        name: name.to_owned(),
                        pattern: pattern.to_owned(),
                    });
                }
                seen.push(name);
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ok(_req: Request) -> Response {
        Response::text("ok")
    }

    #[test]
    fn rejects_invalid_method() {
        let r = Router::new();
        assert!(matches!(
            r.handle("BAD METHOD", "/foo", ok),
            Err(RouteError::InvalidMethod(_))
        ));
        assert!(matches!(
            r.handle("", "/foo", ok),
            Err(RouteError::InvalidMethod(_))
        ));
    }

    #[test]
    fn rejects_non_canonical_patterns() {
        let r = Router::new();
        for pattern in ["users", "/a//b", "/a/./b", "/a/../b"] {
            assert!(
                matches!(
                    r.get(pattern, ok),
                    Err(RouteError::NonCanonicalPattern { .. })
                ),
                "pattern {pattern:?}"
            );
        }
    }

    #[test]
    fn rejects_bad_segments() {
        let r = Router::new();
        assert!(matches!(
            r.get("/a/*rest/b", ok),
            Err(RouteError::WildcardNotLast(_))
        ));
        assert!(matches!(
            r.get("/a/:", ok),
            Err(RouteError::MissingParamName(_))
        ));
        assert!(matches!(
            r.get("/a/*", ok),
            Err(RouteError::MissingParamName(_))
        ));
        assert!(matches!(
            r.get("/users/:id/orders/:id", ok),
            Err(RouteError::DuplicateParamName { .. })
        ));
    }

    #[test]
    fn rejects_depth_and_length() {
        let r = Router::new();
        let at_limit = "/a".repeat(MAX_DEPTH);
        r.get(&at_limit, ok).unwrap();
        let too_deep = "/a".repeat(MAX_DEPTH) + "/b";
        assert!(matches!(
            r.get(&too_deep, ok),
            Err(RouteError::RouteTooDeep(_))
        ));

        let too_long = format!("/{}", "a".repeat(MAX_PATH_LENGTH));
        assert!(matches!(
            r.get(&too_long, ok),
            Err(RouteError::PatternTooLong(_))
        ));
    }

    #[test]
    fn rejects_control_bytes() {
        let r = Router::new();
        assert!(matches!(
            r.get("/a\r\n/b", ok),
            Err(RouteError::InvalidPath(_))
        ));
    }

    #[test]
    fn middleware_locked_after_first_route() {
        let r = Router::new();
        let mw: Middleware = Arc::new(|next| next);
        r.use_middleware(mw.clone()).unwrap();
        r.get("/a", ok).unwrap();
        assert!(matches!(
            r.use_middleware(mw),
            Err(RouteError::MiddlewareAfterRoutes)
        ));
    }

    #[test]
    fn ignore_case_normalizes_literals_not_names() {
        assert_eq!(normalize_pattern("/Users/:ID"), "/users/:ID");
        assert_eq!(normalize_pattern("/A/B/"), "/a/b/");
        assert_eq!(normalize_pattern("/Static/*FilePath"), "/static/*FilePath");
        assert_eq!(normalize_pattern("/"), "/");
    }
}
