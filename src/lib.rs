//! # strada
//!
//! A high-performance HTTP request router for latency-sensitive services.
//! One hard problem, solved carefully: given a large set of registered
//! routes — static paths, `:name` parameters, `*name` catch-alls — dispatch
//! a request to the right handler with predictable latency and no heap
//! allocation on the hot path beyond pool acquisitions.
//!
//! ## What's inside
//!
//! - **Segment-indexed tries** with strict static → param → wildcard
//!   priority and full conflict detection at registration: duplicate
//!   routes, clashing parameter names, and misplaced wildcards are errors,
//!   never silent shadowing.
//! - **A frozen variant** ([`Router::freeze`]) that compacts linear static
//!   chains into single-comparison spans for read-only deployment, with
//!   behavior identical to the mutable router.
//! - **A conforming dispatch front**: canonical-path redirects, `HEAD`→`GET`
//!   fallback, automatic `OPTIONS` and `405` with `Allow`, trailing-slash
//!   policy, host-based virtual routing, and opt-in matching on the encoded
//!   path.
//! - **A lock-free MPSC ring buffer** ([`RingBuffer`]) carrying access-log
//!   events out of the request path, drop-on-full.
//!
//! What stays out: TLS, body limits, timeouts, rate limiting. The reverse
//! proxy in front already does proxy things; this crate does router things.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strada::{Request, Response, Router, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new();
//!     app.get("/users/:id", get_user).unwrap();
//!     app.post("/users", create_user).unwrap();
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! async fn get_user(req: Request) -> Response {
//!     let id = req.param("id").unwrap_or("unknown");
//!     Response::json(format!(r#"{{"id":"{id}"}}"#))
//! }
//!
//! async fn create_user(req: Request) -> Response {
//!     if req.body().is_empty() {
//!         return Response::status(400);
//!     }
//!     Response::builder(201).header("location", "/users/99").body("created".into())
//! }
//! ```

mod dispatch;
mod error;
mod frozen;
mod group;
mod handler;
mod params;
mod pool;
mod request;
mod response;
mod ring;
mod router;
mod segments;
mod server;
mod table;
mod trie;

pub mod method;
pub mod middleware;

pub use error::{Error, RouteError};
#[doc(hidden)]
pub use handler::BoxFuture;
pub use frozen::FrozenRouter;
pub use group::Group;
pub use handler::{BoxedHandler, Handler, Middleware};
pub use request::Request;
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use ring::{InvalidCapacity, LogEvent, RingBuffer};
pub use router::{PanicHandler, Router, RouterConfig};
pub use server::{App, Server};

/// Maximum request path and pattern length in bytes.
pub const MAX_PATH_LENGTH: usize = 4096;

/// Maximum route depth in segments.
pub const MAX_DEPTH: usize = 50;
