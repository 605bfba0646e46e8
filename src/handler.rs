//! Handler trait, type erasure, and middleware composition.
//!
//! # How async handlers are stored
//!
//! The route tables hold handlers of *different* concrete types in one
//! structure (static maps, trie leaves, frozen nodes). Rust collections can
//! only hold one concrete type, so handlers are stored as **trait objects**
//! (`dyn ErasedHandler`) behind a common dispatch interface.
//!
//! The chain from user code to vtable call is:
//!
//! ```text
//! async fn hello(req: Request) -> Response { … }   ← user writes this
//!        ↓ router.get("/", hello)
//! hello.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(hello))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! handler.call(req)  at request time               ← one vtable dispatch
//! ```
//!
//! The only per-request cost is one Arc clone (atomic increment) and one
//! virtual call.
//!
//! # Middleware
//!
//! A [`Middleware`] maps a handler to a wrapped handler. Chains are composed
//! **once at registration time** and the result is stored in the tables as a
//! single [`BoxedHandler`] — there is no per-request wrapping.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Pin<Box<…>>` because the runtime polls the future in place; `Send +
/// 'static` so tokio may move it across worker threads. Public because it
/// appears in the [`App`](crate::App) trait's method signature.
#[doc(hidden)]
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it backs the public
/// [`BoxedHandler`] wrapper. External crates cannot usefully implement this
/// trait; they go through the sealed [`Handler`] instead.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A heap-allocated, type-erased handler shared across concurrent requests
/// and across the mutable and frozen route tables.
///
/// Middleware receives the next handler as a `BoxedHandler` and invokes it
/// with [`call`](Self::call); cloning is one atomic increment.
#[derive(Clone)]
pub struct BoxedHandler(Arc<dyn ErasedHandler + Send + Sync + 'static>);

impl BoxedHandler {
    pub fn call(&self, req: Request) -> BoxFuture {
        self.0.call(req)
    }
}

/// Maps a handler to a wrapped handler.
///
/// Applied at registration time, outermost first: for `use_middleware(a)`
/// then `use_middleware(b)`, a request passes through `a`, then `b`, then
/// the route handler.
pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static>;

/// Folds a middleware chain around `handler`, innermost last.
pub(crate) fn compose(handler: BoxedHandler, chain: &[Middleware]) -> BoxedHandler {
    chain.iter().rev().fold(handler, |inner, mw| mw(inner))
}

// ── Public Handler trait ──────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is automatically satisfied for any
/// `async fn` with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed** (via the private `Sealed` supertrait): only the
/// blanket impl below can satisfy it, which keeps the API surface stable.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

/// The sealing module. Because `Sealed` is private, external crates cannot
/// name it and therefore cannot implement `Handler` on their own types.
mod private {
    pub trait Sealed {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

/// Covers named `async fn` items, async closures, and any struct
/// implementing `Fn(Request) -> impl Future`.
impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        BoxedHandler(Arc::new(FnHandler(self)))
    }
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

/// Newtype holding a concrete handler `F`, bridging the typed world to the
/// trait-object world.
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}
