//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. A middleware is any function from handler to
//! handler (see [`Middleware`](crate::Middleware)); chains compose once at
//! registration time, never per request.
//!
//! The one middleware the crate ships is [`access_log`]: per-request events
//! into the lock-free ring buffer, drop-on-full. CORS, recovery, body
//! limits, and timeouts belong to the host environment or to application
//! middleware built on the same contract.

mod access_log;

pub use access_log::access_log;
