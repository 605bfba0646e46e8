//! The frozen router: an immutable, compacted snapshot.
//!
//! [`Router::freeze`] walks the mutable tables under the read lock and
//! rebuilds each trie with **linear-chain compression**: every maximal run
//! of single-child static nodes with no route and no dynamic child in
//! between collapses into one node carrying the joined segments as a
//! `static_span`. A lookup then compares the whole span against one byte
//! range of the request path instead of descending segment by segment.
//!
//! Everything observable at the router boundary — status, body, `Allow`,
//! `Location` — matches the mutable router for the same route set; the
//! integration suite asserts this parity over a sampled request universe.
//! Having no registration, the frozen router also needs no lock.

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatch::{self, Pools, TableCore};
use crate::method::AllowSet;
use crate::params::Params;
use crate::request::Request;
use crate::response::Response;
use crate::router::{Router, RouterConfig, RouterState};
use crate::segments::PathSegments;
use crate::table::RouteTable;
use crate::trie::{Node, Route};
use crate::MAX_DEPTH;

/// An immutable, read-optimized snapshot of a [`Router`].
pub struct FrozenRouter {
    config: Arc<RouterConfig>,
    default_table: FrozenTable,
    hosts: HashMap<String, FrozenTable>,
    pools: Pools,
}

impl Router {
    /// Produces a frozen snapshot of the current route set. Routes
    /// registered afterwards do not appear in it.
    pub fn freeze(&self) -> FrozenRouter {
        let state = self.state().read();
        freeze_state(Arc::clone(self.config()), &state)
    }
}

impl FrozenRouter {
    /// Identical contract to [`Router::dispatch`], minus the lock.
    pub async fn dispatch(&self, req: Request) -> Response {
        let resolved = {
            let ctx = match dispatch::prepare(&req, &self.config) {
                Ok(ctx) => ctx,
                Err(res) => return res,
            };
            dispatch::resolve(
                &self.default_table,
                &self.hosts,
                &self.config,
                &ctx,
                req.host(),
                &self.pools,
            )
        };
        dispatch::finish(resolved, req, &self.config).await
    }
}

fn freeze_state(config: Arc<RouterConfig>, state: &RouterState) -> FrozenRouter {
    FrozenRouter {
        config,
        default_table: freeze_table(&state.default_table),
        hosts: state
            .hosts
            .iter()
            .map(|(host, table)| (host.clone(), freeze_table(table)))
            .collect(),
        pools: Pools::default(),
    }
}

// ── Frozen tables ─────────────────────────────────────────────────────────────

pub(crate) struct FrozenTable {
    roots: HashMap<String, FrozenNode>,
    statics: HashMap<String, HashMap<String, Route>>,
    has_params: HashMap<String, bool>,
    static_allow: HashMap<String, String>,
    any_trailing_slash: bool,
}

fn freeze_table(table: &RouteTable) -> FrozenTable {
    FrozenTable {
        roots: table
            .roots()
            .iter()
            .map(|(method, root)| (method.clone(), freeze_node(root)))
            .collect(),
        statics: table.clone_statics(),
        has_params: table.clone_has_params(),
        static_allow: table.clone_static_allow(),
        any_trailing_slash: table.trailing_slash_flag(),
    }
}

impl TableCore for FrozenTable {
    fn static_route(&self, method: &str, path: &str) -> Option<&Route> {
        self.statics.get(method)?.get(path)
    }

    fn method_has_params(&self, method: &str) -> bool {
        self.has_params.get(method).copied().unwrap_or(false)
    }

    fn has_any_params(&self) -> bool {
        self.has_params.values().any(|&v| v)
    }

    fn any_trailing_slash(&self) -> bool {
        self.any_trailing_slash
    }

    fn static_allow_cached(&self, path: &str) -> Option<&str> {
        self.static_allow.get(path).map(String::as_str)
    }

    fn trie_search(
        &self,
        method: &str,
        segs: &PathSegments,
        match_path: &str,
        params: Option<&mut Params>,
    ) -> Option<&Route> {
        self.roots
            .get(method)?
            .search(segs, match_path, 0, params)?
            .route
            .as_ref()
    }

    fn allow_into(&self, match_path: &str, segs: &mut PathSegments, set: &mut AllowSet) {
        for (method, map) in &self.statics {
            if map.contains_key(match_path) {
                set.insert(method);
            }
        }
        let mut parsed = false;
        for (method, &has) in &self.has_params {
            if !has {
                continue;
            }
            if !parsed {
                if !segs.parse(match_path) || segs.len() > MAX_DEPTH {
                    return;
                }
                parsed = true;
            }
            if let Some(root) = self.roots.get(method) {
                if root.search(segs, match_path, 0, None).is_some() {
                    set.insert(method);
                }
            }
        }
    }
}

// ── Frozen nodes ──────────────────────────────────────────────────────────────

const STATIC_CHILD_THRESHOLD: usize = 4;

struct FrozenNode {
    /// Compressed static chain: the joined literal segments this node
    /// consumes in one comparison. Empty on roots and dynamic nodes.
    static_span: String,
    /// Number of path segments `static_span` covers.
    span_segs: usize,
    /// Segment text for dynamic nodes (`":name"` / `"*name"`); empty for
    /// span nodes, whose identity is the span itself.
    part: String,
    name: Option<Arc<str>>,
    static_children: Option<Box<FrozenChildren>>,
    param_child: Option<Box<FrozenNode>>,
    wild_child: Option<Box<FrozenNode>>,
    route: Option<Route>,
}

/// Same small-vector-then-map shape as the mutable trie, keyed by the first
/// segment of each child's span.
enum FrozenChildren {
    Small(Vec<(String, FrozenNode)>),
    Map(HashMap<String, FrozenNode>),
}

impl FrozenChildren {
    fn new() -> Self {
        Self::Small(Vec::new())
    }

    fn get(&self, part: &str) -> Option<&FrozenNode> {
        match self {
            Self::Small(vec) => vec.iter().find(|(p, _)| p == part).map(|(_, n)| n),
            Self::Map(map) => map.get(part),
        }
    }

    fn insert(&mut self, key: String, node: FrozenNode) {
        if let Self::Small(vec) = self {
            if vec.len() >= STATIC_CHILD_THRESHOLD {
                let mut map: HashMap<String, FrozenNode> = std::mem::take(vec).into_iter().collect();
                map.insert(key, node);
                *self = Self::Map(map);
                return;
            }
            vec.push((key, node));
            return;
        }
        if let Self::Map(map) = self {
            map.insert(key, node);
        }
    }
}

/// Freezes a root or dynamic node: no span of its own, children compressed.
fn freeze_node(node: &Node) -> FrozenNode {
    let mut frozen = FrozenNode {
        static_span: String::new(),
        span_segs: 0,
        part: node.part.clone(),
        name: node.name.clone(),
        static_children: None,
        param_child: None,
        wild_child: None,
        route: node.route.clone(),
    };
    attach_children(&mut frozen, node);
    frozen
}

fn attach_children(frozen: &mut FrozenNode, node: &Node) {
    if let Some(children) = &node.static_children {
        for child in children.iter() {
            let (parts, end) = compress_chain(child);
            let key = parts[0].to_owned();
            let frozen_child = freeze_span(&parts, end);
            frozen
                .static_children
                .get_or_insert_with(|| Box::new(FrozenChildren::new()))
                .insert(key, frozen_child);
        }
    }
    if let Some(param) = &node.param_child {
        frozen.param_child = Some(Box::new(freeze_node(param)));
    }
    if let Some(wild) = &node.wild_child {
        frozen.wild_child = Some(Box::new(freeze_node(wild)));
    }
}

/// Follows a chain of route-less, single-static-child nodes and returns the
/// traversed segments plus the node the chain ends on.
fn compress_chain(start: &Node) -> (Vec<&str>, &Node) {
    let mut parts = Vec::with_capacity(4);
    let mut cur = start;
    loop {
        parts.push(cur.part.as_str());
        if cur.route.is_some() || cur.param_child.is_some() || cur.wild_child.is_some() {
            return (parts, cur);
        }
        let next = match &cur.static_children {
            Some(children) if children.len() == 1 => children.only(),
            _ => None,
        };
        match next {
            Some(next) => cur = next,
            None => return (parts, cur),
        }
    }
}

fn freeze_span(parts: &[&str], end: &Node) -> FrozenNode {
    let mut frozen = FrozenNode {
        static_span: parts.join("/"),
        span_segs: parts.len(),
        part: String::new(),
        name: None,
        static_children: None,
        param_child: None,
        wild_child: None,
        route: end.route.clone(),
    };
    attach_children(&mut frozen, end);
    frozen
}

impl FrozenNode {
    fn is_wildcard(&self) -> bool {
        self.part.as_bytes().first() == Some(&b'*')
    }

    /// Mirrors the mutable trie's search, except that a span node first
    /// compares its whole chain against one byte range and advances the
    /// depth by `span_segs`.
    fn search(
        &self,
        segs: &PathSegments,
        match_path: &str,
        mut height: usize,
        mut params: Option<&mut Params>,
    ) -> Option<&FrozenNode> {
        if height > MAX_DEPTH {
            return None;
        }

        if self.span_segs > 0 {
            if height + self.span_segs > segs.len() {
                return None;
            }
            let start = segs.offset(height);
            let end = segs.end(height + self.span_segs - 1);
            if &match_path[start..end] != self.static_span {
                return None;
            }
            height += self.span_segs;
        }

        if height == segs.len() || self.is_wildcard() {
            if self.route.is_none() {
                if height == segs.len() {
                    if let Some(wild) = &self.wild_child {
                        return wild.search(segs, match_path, height, params);
                    }
                }
                return None;
            }
            if self.is_wildcard() {
                if let (Some(p), Some(name)) = (params.as_deref_mut(), &self.name) {
                    let mut start = segs.offset(height);
                    if match_path.as_bytes().get(start) == Some(&b'/') {
                        start += 1;
                    }
                    p.push(Arc::clone(name), start, match_path.len());
                }
            }
            return Some(self);
        }

        let part = segs.seg(match_path, height);

        if let Some(children) = &self.static_children {
            if let Some(child) = children.get(part) {
                // The child's span re-checks from the current height; depth
                // advances inside its search.
                if let Some(found) = child.search(segs, match_path, height, params.as_deref_mut())
                {
                    return Some(found);
                }
            }
        }

        if let Some(child) = &self.param_child {
            let snapshot = params.as_ref().map(|p| p.len());
            if let (Some(p), Some(name)) = (params.as_deref_mut(), &child.name) {
                p.push(Arc::clone(name), segs.offset(height), segs.end(height));
            }
            if let Some(found) = child.search(segs, match_path, height + 1, params.as_deref_mut()) {
                return Some(found);
            }
            if let (Some(p), Some(len)) = (params.as_deref_mut(), snapshot) {
                p.truncate(len);
            }
        }

        if let Some(child) = &self.wild_child {
            if let Some(found) = child.search(segs, match_path, height, params) {
                return Some(found);
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Handler;
    use crate::handler::BoxedHandler;

    fn noop() -> BoxedHandler {
        (|_req: Request| async { Response::status(200) }).into_boxed_handler()
    }

    fn build(patterns: &[&str]) -> Node {
        let mut root = Node::default();
        for pattern in patterns {
            let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
            let has_params = parts
                .iter()
                .any(|p| p.starts_with(':') || p.starts_with('*'));
            root.insert(
                pattern,
                &parts,
                0,
                Route {
                    pattern: (*pattern).to_owned(),
                    handler: noop(),
                    has_params,
                },
            )
            .unwrap();
        }
        root
    }

    fn frozen_find<'n>(root: &'n FrozenNode, path: &str) -> Option<&'n str> {
        let mut segs = PathSegments::default();
        assert!(segs.parse(path));
        root.search(&segs, path, 0, None)
            .and_then(|n| n.route.as_ref())
            .map(|r| r.pattern.as_str())
    }

    #[test]
    fn chains_compress_into_spans() {
        let root = build(&["/api/v1/users/list"]);
        let frozen = freeze_node(&root);
        let children = frozen.static_children.as_deref().unwrap();
        let child = children.get("api").unwrap();
        assert_eq!(child.static_span, "api/v1/users/list");
        assert_eq!(child.span_segs, 4);
        assert!(child.route.is_some());
    }

    #[test]
    fn chain_breaks_at_branch_and_route() {
        let root = build(&["/api/v1/users", "/api/v1/users/list", "/api/v2/ping"]);
        let frozen = freeze_node(&root);
        // `/api` then the split at `v1`/`v2` bounds the first span.
        let api = frozen.static_children.as_deref().unwrap().get("api").unwrap();
        assert_eq!(api.static_span, "api");
        assert_eq!(api.span_segs, 1);
        let v1 = api.static_children.as_deref().unwrap().get("v1").unwrap();
        // `users` carries a route, so the chain stops there.
        assert_eq!(v1.static_span, "v1/users");
        assert!(v1.route.is_some());
    }

    #[test]
    fn span_lookup_matches_and_rejects() {
        let root = build(&["/api/v1/users/list", "/api/v1/users/:id"]);
        let frozen = freeze_node(&root);
        assert_eq!(
            frozen_find(&frozen, "/api/v1/users/list"),
            Some("/api/v1/users/list")
        );
        assert_eq!(
            frozen_find(&frozen, "/api/v1/users/42"),
            Some("/api/v1/users/:id")
        );
        assert_eq!(frozen_find(&frozen, "/api/v1/users"), None);
        assert_eq!(frozen_find(&frozen, "/api/v2/users/list"), None);
    }

    #[test]
    fn frozen_param_capture_uses_offsets() {
        let root = build(&["/users/:id/files/*rest"]);
        let frozen = freeze_node(&root);
        let path = "/users/42/files/a/b.txt";
        let mut segs = PathSegments::default();
        assert!(segs.parse(path));
        let mut params = Params::default();
        assert!(frozen
            .search(&segs, path, 0, Some(&mut params))
            .is_some());
        let (s, e) = params.get("id").unwrap();
        assert_eq!(&path[s..e], "42");
        let (s, e) = params.get("rest").unwrap();
        assert_eq!(&path[s..e], "a/b.txt");
    }

    #[test]
    fn wildcard_empty_remainder_survives_freeze() {
        let root = build(&["/static/*filepath"]);
        let frozen = freeze_node(&root);
        assert_eq!(
            frozen_find(&frozen, "/static"),
            Some("/static/*filepath")
        );
        assert_eq!(
            frozen_find(&frozen, "/static/"),
            Some("/static/*filepath")
        );
    }
}
