//! Error types.
//!
//! Two failure domains, two types:
//!
//! - [`RouteError`] — registration-time failures (bad pattern, conflicting
//!   routes, middleware ordering). Surfaced to the caller as a `Result`;
//!   registration never panics and never leaves a partially-visible route.
//! - [`Error`] — infrastructure failures of the host server: binding to a
//!   port or accepting a connection.
//!
//! Request-time failures are never errors. They become HTTP status codes
//! (`404`, `405`, `414`, redirects) produced by dispatch.

use std::fmt;

use thiserror::Error;

/// A route registration failure.
///
/// Every variant is local to the failing call: either the pattern is fully
/// inserted, or no structural change is visible to concurrent lookups.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RouteError {
    /// The method is not a valid RFC 9110 token (empty, whitespace, or
    /// control bytes).
    #[error("invalid method: {0:?}")]
    InvalidMethod(String),

    /// The pattern is not in canonical form. Patterns must be pre-cleaned:
    /// leading `/`, no `//` runs, no `.` or `..` segments.
    #[error("non-canonical pattern {pattern:?} (canonical form: {canonical:?})")]
    NonCanonicalPattern { pattern: String, canonical: String },

    /// The pattern exceeds [`MAX_PATH_LENGTH`](crate::MAX_PATH_LENGTH) bytes.
    #[error("pattern too long: {0:?}")]
    PatternTooLong(String),

    /// The pattern contains a NUL, CR, or LF byte.
    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    /// The pattern has more than [`MAX_DEPTH`](crate::MAX_DEPTH) segments.
    #[error("route too deep: {0:?}")]
    RouteTooDeep(String),

    /// A `:` or `*` segment with no name, e.g. `/users/:`.
    #[error("parameter must have a name (e.g. :id or *filepath) in {0:?}")]
    MissingParamName(String),

    /// A `*name` segment somewhere other than the final position.
    #[error("wildcard must be the last segment in {0:?}")]
    WildcardNotLast(String),

    /// The same parameter name captured twice along one pattern,
    /// e.g. `/users/:id/orders/:id`.
    #[error("duplicate parameter name {name:?} in {pattern:?}")]
    DuplicateParamName { name: String, pattern: String },

    /// A parameter or wildcard at this level is already registered under a
    /// different name, e.g. `/users/:id` then `/users/:name`.
    #[error("{new:?} conflicts with existing {existing:?} in {pattern:?}")]
    ParamNameConflict {
        existing: String,
        new: String,
        pattern: String,
    },

    /// A parameter and a wildcard cannot share a level,
    /// e.g. `/users/:id` then `/users/*rest`.
    #[error("{new:?} conflicts with existing {existing:?} at the same level in {pattern:?}")]
    ParamWildcardConflict {
        existing: String,
        new: String,
        pattern: String,
    },

    /// The exact pattern is already registered for this method.
    #[error("duplicate route: {0:?}")]
    DuplicateRoute(String),

    /// Middleware must be installed before the first route.
    #[error("cannot add middleware after routes are registered")]
    MiddlewareAfterRoutes,
}

/// The error type returned by the host server's fallible operations.
///
/// Application-level outcomes (404, 405, redirects) are expressed as HTTP
/// [`Response`](crate::Response) values, not as `Error`s. This type surfaces
/// infrastructure failures: binding to a port or accepting a connection.
#[derive(Debug)]
pub struct Error(std::io::Error);

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "io: {}", self.0)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self(e)
    }
}
