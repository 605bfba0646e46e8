//! Route groups: shared prefixes, shared middleware, host binding.
//!
//! A group is a lightweight registration view over a [`Router`] — it owns a
//! prefix, a middleware chain, and optionally a host, and forwards every
//! registration to the router with those applied. Nested groups snapshot
//! the parent's chain, so later changes to either side stay isolated.
//! Everything composes at registration time; a group costs nothing at
//! dispatch.

use crate::dispatch::normalize_host;
use crate::error::RouteError;
use crate::handler::{Handler, Middleware};
use crate::method;
use crate::router::Router;
use crate::segments::clean_path;

impl Router {
    /// A group rooted at `prefix` on the default table.
    pub fn group(&self, prefix: &str) -> Group<'_> {
        Group {
            router: self,
            host: String::new(),
            prefix: clean_prefix(prefix),
            middlewares: Vec::new(),
        }
    }

    /// A group bound to a virtual host. The host is normalized (trimmed,
    /// lowercased, port stripped); requests for it consult this table before
    /// the default one.
    pub fn host(&self, host: &str) -> Group<'_> {
        Group {
            router: self,
            host: normalize_host(host),
            prefix: String::new(),
            middlewares: Vec::new(),
        }
    }
}

/// A nested registration scope with its own prefix and middleware chain.
pub struct Group<'r> {
    router: &'r Router,
    host: String,
    prefix: String,
    middlewares: Vec<Middleware>,
}

impl<'r> Group<'r> {
    /// Appends middleware to this group's chain. Group middleware runs
    /// inside the router's global chain.
    pub fn use_middleware(mut self, mw: Middleware) -> Self {
        self.middlewares.push(mw);
        self
    }

    /// A child group inheriting this group's host, prefix, and a snapshot of
    /// its middleware chain.
    pub fn group(&self, prefix: &str) -> Group<'r> {
        Group {
            router: self.router,
            host: self.host.clone(),
            prefix: join_paths(&self.prefix, &clean_prefix(prefix)),
            middlewares: self.middlewares.clone(),
        }
    }

    pub fn handle(
        &self,
        method: &str,
        pattern: &str,
        handler: impl Handler,
    ) -> Result<(), RouteError> {
        self.router.register(
            &self.host,
            method,
            &join_paths(&self.prefix, pattern),
            handler.into_boxed_handler(),
            &self.middlewares,
        )
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
}

/// Prefixes normalize to either "" (no prefix) or a canonical path with no
/// trailing slash, so joining never produces `//`.
fn clean_prefix(prefix: &str) -> String {
    if prefix.is_empty() {
        return String::new();
    }
    let cleaned = clean_path(prefix);
    if cleaned == "/" {
        return String::new();
    }
    cleaned.trim_end_matches('/').to_owned()
}

fn join_paths(prefix: &str, pattern: &str) -> String {
    if prefix.is_empty() {
        return pattern.to_owned();
    }
    if pattern.is_empty() {
        return prefix.to_owned();
    }
    let mut joined = String::with_capacity(prefix.len() + pattern.len() + 1);
    joined.push_str(prefix.trim_end_matches('/'));
    if !pattern.starts_with('/') {
        joined.push('/');
    }
    joined.push_str(pattern);
    joined
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_normalization() {
        assert_eq!(clean_prefix(""), "");
        assert_eq!(clean_prefix("/"), "");
        assert_eq!(clean_prefix("/v1"), "/v1");
        assert_eq!(clean_prefix("/v1/"), "/v1");
        assert_eq!(clean_prefix("v1"), "/v1");
    }

    #[test]
    fn join_behavior() {
        assert_eq!(join_paths("", "/users"), "/users");
        assert_eq!(join_paths("/v1", "/users"), "/v1/users");
        assert_eq!(join_paths("/v1", "users"), "/v1/users");
        assert_eq!(join_paths("/v1", ""), "/v1");
    }
}
