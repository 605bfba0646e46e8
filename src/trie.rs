//! The mutable routing trie.
//!
//! One tree per HTTP method, segment-indexed rather than byte-indexed: each
//! node owns exactly one path segment. Children are structured by kind to
//! keep the hot path free of type tests —
//!
//! - static children, keyed by literal segment (a small vector up to four
//!   entries, upgraded to a hash map beyond);
//! - at most one parameter child (`:name`);
//! - at most one wildcard child (`*name`, always a leaf).
//!
//! Lookup priority is strict: static, then parameter, then wildcard, with
//! clean backtracking of captured parameters when a deeper sub-lookup
//! misses. Conflicts (`/users/:id` vs `/users/:name`, param vs wildcard at
//! one level, duplicate leaves) are rejected at insertion, so lookup never
//! has to disambiguate.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RouteError;
use crate::handler::BoxedHandler;
use crate::params::Params;
use crate::segments::PathSegments;
use crate::MAX_DEPTH;

/// Static children stay a linear vector until a node accumulates more than
/// this many; beyond it, lookups pay for hashing instead of scanning.
const STATIC_CHILD_THRESHOLD: usize = 4;

/// Leaf payload: the registered pattern and its composed handler.
#[derive(Clone)]
pub(crate) struct Route {
    pub(crate) pattern: String,
    pub(crate) handler: BoxedHandler,
    /// Leaf-only flag: false lets dispatch skip parameter-store acquisition
    /// for purely static routes.
    pub(crate) has_params: bool,
}

pub(crate) enum StaticChildren {
    Small(Vec<(String, Node)>),
    Map(HashMap<String, Node>),
}

impl StaticChildren {
    fn new() -> Self {
        Self::Small(Vec::new())
    }

    pub(crate) fn get(&self, part: &str) -> Option<&Node> {
        match self {
            Self::Small(vec) => vec.iter().find(|(p, _)| p == part).map(|(_, n)| n),
            Self::Map(map) => map.get(part),
        }
    }

    /// Returns the child for `part`, creating a bare literal node when
    /// absent. Upgrades small → map at the threshold.
    fn get_mut_or_create(&mut self, part: &str) -> &mut Node {
        if let Self::Small(vec) = self {
            if vec.len() >= STATIC_CHILD_THRESHOLD && vec.iter().all(|(p, _)| p != part) {
                let map: HashMap<String, Node> = std::mem::take(vec).into_iter().collect();
                *self = Self::Map(map);
            }
        }
        match self {
            Self::Small(vec) => {
                let idx = match vec.iter().position(|(p, _)| p == part) {
                    Some(i) => i,
                    None => {
                        vec.push((part.to_owned(), Node::literal(part)));
                        vec.len() - 1
                    }
                };
                &mut vec[idx].1
            }
            Self::Map(map) => map
                .entry(part.to_owned())
                .or_insert_with(|| Node::literal(part)),
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Small(vec) => vec.len(),
            Self::Map(map) => map.len(),
        }
    }

    /// The sole child, when there is exactly one. Drives frozen chain
    /// compression.
    pub(crate) fn only(&self) -> Option<&Node> {
        match self {
            Self::Small(vec) if vec.len() == 1 => Some(&vec[0].1),
            Self::Map(map) if map.len() == 1 => map.values().next(),
            _ => None,
        }
    }

    pub(crate) fn iter(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        match self {
            Self::Small(vec) => Box::new(vec.iter().map(|(_, n)| n)),
            Self::Map(map) => Box::new(map.values()),
        }
    }
}

/// One segment of the routing tree.
#[derive(Default)]
pub(crate) struct Node {
    /// This node's segment: a literal, `":name"`, or `"*name"`. Empty on
    /// roots.
    pub(crate) part: String,
    /// Capture name for `:`/`*` nodes (`part` minus the sigil), shared into
    /// parameter stores without allocating.
    pub(crate) name: Option<Arc<str>>,
    pub(crate) static_children: Option<Box<StaticChildren>>,
    pub(crate) param_child: Option<Box<Node>>,
    pub(crate) wild_child: Option<Box<Node>>,
    pub(crate) route: Option<Route>,
}

impl Node {
    fn literal(part: &str) -> Self {
        Self {
            part: part.to_owned(),
            ..Self::default()
        }
    }

    fn dynamic(part: &str) -> Self {
        Self {
            part: part.to_owned(),
            name: Some(Arc::from(&part[1..])),
            ..Self::default()
        }
    }

    pub(crate) fn is_wildcard(&self) -> bool {
        self.part.as_bytes().first() == Some(&b'*')
    }

    /// Inserts a route along `parts`, starting at `height`.
    ///
    /// Callers have already validated the pattern shape (canonical form,
    /// depth, wildcard position, parameter names), so the only failures left
    /// are conflicts with what the tree already holds — and those are
    /// detected before any node is created, which keeps failed insertions
    /// invisible.
    pub(crate) fn insert(
        &mut self,
        pattern: &str,
        parts: &[&str],
        height: usize,
        route: Route,
    ) -> Result<(), RouteError> {
        if height == parts.len() {
            if self.route.is_some() {
                return Err(RouteError::DuplicateRoute(pattern.to_owned()));
            }
            self.route = Some(route);
            return Ok(());
        }

        let part = parts[height];
        match part.as_bytes()[0] {
            b':' => {
                if let Some(child) = &mut self.param_child {
                    if child.part != part {
                        return Err(RouteError::ParamNameConflict {
                            existing: child.part.clone(),
                            new: part.to_owned(),
                            pattern: pattern.to_owned(),
                        });
                    }
                    return child.insert(pattern, parts, height + 1, route);
                }
                if let Some(wild) = &self.wild_child {
                    return Err(RouteError::ParamWildcardConflict {
                        existing: wild.part.clone(),
                        new: part.to_owned(),
                        pattern: pattern.to_owned(),
                    });
                }
                self.param_child
                    .insert(Box::new(Node::dynamic(part)))
                    .insert(pattern, parts, height + 1, route)
            }
            b'*' => {
                if let Some(child) = &mut self.wild_child {
                    if child.part != part {
                        return Err(RouteError::ParamNameConflict {
                            existing: child.part.clone(),
                            new: part.to_owned(),
                            pattern: pattern.to_owned(),
                        });
                    }
                    return child.insert(pattern, parts, height + 1, route);
                }
                if let Some(param) = &self.param_child {
                    return Err(RouteError::ParamWildcardConflict {
                        existing: param.part.clone(),
                        new: part.to_owned(),
                        pattern: pattern.to_owned(),
                    });
                }
                self.wild_child
                    .insert(Box::new(Node::dynamic(part)))
                    .insert(pattern, parts, height + 1, route)
            }
            _ => self
                .static_children
                .get_or_insert_with(|| Box::new(StaticChildren::new()))
                .get_mut_or_create(part)
                .insert(pattern, parts, height + 1, route),
        }
    }

    /// Recursive lookup with strict static → param → wildcard priority.
    ///
    /// `match_path` is the normalized string the segments were parsed from.
    /// Captured values are stored as byte ranges, valid for any string of
    /// identical layout (the capture path differs from `match_path` only in
    /// ASCII case), so nothing is sliced or copied here.
    pub(crate) fn search(
        &self,
        segs: &PathSegments,
        match_path: &str,
        height: usize,
        mut params: Option<&mut Params>,
    ) -> Option<&Node> {
        if height > MAX_DEPTH {
            return None;
        }

        // Path exhausted, or a wildcard consumes whatever remains.
        if height == segs.len() || self.is_wildcard() {
            if self.route.is_none() {
                // A dangling interior node can still satisfy the request if
                // a wildcard child matches the empty remainder
                // (`/static/` vs `/static/*filepath`).
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

        // 1) Static.
        if let Some(children) = &self.static_children {
            if let Some(child) = children.get(part) {
                if let Some(found) =
                    child.search(segs, match_path, height + 1, params.as_deref_mut())
                {
                    return Some(found);
                }
            }
        }

        // 2) Parameter. Snapshot the collector length so a miss deeper down
        //    unwinds this capture.
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

        // 3) Wildcard, consuming from the current segment onward.
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
    use crate::{Request, Response};

    fn noop() -> BoxedHandler {
        (|_req: Request| async { Response::status(200) }).into_boxed_handler()
    }

    fn insert(root: &mut Node, pattern: &str) -> Result<(), RouteError> {
        let parts: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
        let has_params = parts
            .iter()
            .any(|p| p.starts_with(':') || p.starts_with('*'));
        root.insert(
            pattern,
            &parts,
            0,
            Route {
                pattern: pattern.to_owned(),
                handler: noop(),
                has_params,
            },
        )
    }

    fn search<'n>(root: &'n Node, path: &str, params: Option<&mut Params>) -> Option<&'n str> {
        let mut segs = PathSegments::default();
        assert!(segs.parse(path));
        root.search(&segs, path, 0, params)
            .and_then(|n| n.route.as_ref())
            .map(|r| r.pattern.as_str())
    }

    #[test]
    fn static_beats_param_beats_wildcard() {
        let mut root = Node::default();
        insert(&mut root, "/files/new").unwrap();
        insert(&mut root, "/files/:name").unwrap();

        assert_eq!(search(&root, "/files/new", None), Some("/files/new"));
        assert_eq!(search(&root, "/files/other", None), Some("/files/:name"));
    }

    #[test]
    fn backtracks_param_capture_on_deep_miss() {
        let mut root = Node::default();
        insert(&mut root, "/a/:x/end").unwrap();
        insert(&mut root, "/a/b").unwrap();

        let mut params = Params::default();
        // `/a/b/end`: static child `b` is tried first and dead-ends, then the
        // param branch captures `x=b` and reaches `end`.
        assert_eq!(
            search(&root, "/a/b/end", Some(&mut params)),
            Some("/a/:x/end")
        );
        assert_eq!(params.get("x"), Some((3, 4)));

        // `/a/b/nope` misses everywhere; the unwound collector is empty.
        params.reset();
        assert_eq!(search(&root, "/a/b/nope", Some(&mut params)), None);
        assert_eq!(params.len(), 0);
    }

    #[test]
    fn wildcard_captures_remainder() {
        let mut root = Node::default();
        insert(&mut root, "/static/*filepath").unwrap();

        let path = "/static/css/app.css";
        let mut params = Params::default();
        assert_eq!(
            search(&root, path, Some(&mut params)),
            Some("/static/*filepath")
        );
        let (start, end) = params.get("filepath").unwrap();
        assert_eq!(&path[start..end], "css/app.css");
    }

    #[test]
    fn wildcard_matches_empty_remainder() {
        let mut root = Node::default();
        insert(&mut root, "/static/*filepath").unwrap();

        for path in ["/static", "/static/"] {
            let mut params = Params::default();
            assert_eq!(
                search(&root, path, Some(&mut params)),
                Some("/static/*filepath"),
                "path {path:?}"
            );
            let (start, end) = params.get("filepath").unwrap();
            assert_eq!(&path[start..end], "");
        }
    }

    #[test]
    fn param_name_conflict() {
        let mut root = Node::default();
        insert(&mut root, "/users/:id").unwrap();
        assert!(matches!(
            insert(&mut root, "/users/:name"),
            Err(RouteError::ParamNameConflict { .. })
        ));
        // Same name extends fine.
        insert(&mut root, "/users/:id/orders").unwrap();
    }

    #[test]
    fn param_wildcard_conflict_both_directions() {
        let mut root = Node::default();
        insert(&mut root, "/users/:id").unwrap();
        assert!(matches!(
            insert(&mut root, "/users/*any"),
            Err(RouteError::ParamWildcardConflict { .. })
        ));

        let mut root = Node::default();
        insert(&mut root, "/users/*any").unwrap();
        assert!(matches!(
            insert(&mut root, "/users/:id"),
            Err(RouteError::ParamWildcardConflict { .. })
        ));
    }

    #[test]
    fn duplicate_route_rejected() {
        let mut root = Node::default();
        insert(&mut root, "/dup").unwrap();
        assert!(matches!(
            insert(&mut root, "/dup"),
            Err(RouteError::DuplicateRoute(_))
        ));
    }

    #[test]
    fn failed_insert_leaves_no_visible_route() {
        let mut root = Node::default();
        insert(&mut root, "/users/:id").unwrap();
        insert(&mut root, "/users/:name/x").unwrap_err();
        // The conflicting branch must not have become matchable.
        assert_eq!(search(&root, "/users/42/x", None), None);
        assert_eq!(search(&root, "/users/42", None), Some("/users/:id"));
    }

    #[test]
    fn static_children_upgrade_to_map() {
        let mut root = Node::default();
        for name in ["a", "b", "c", "d", "e", "f"] {
            insert(&mut root, &format!("/{name}")).unwrap();
        }
        match root.static_children.as_deref() {
            Some(StaticChildren::Map(m)) => assert_eq!(m.len(), 6),
            _ => panic!("expected upgrade to map beyond threshold"),
        }
        for name in ["a", "b", "c", "d", "e", "f"] {
            assert!(search(&root, &format!("/{name}"), None).is_some());
        }
    }

    #[test]
    fn deep_lookup_cut_off() {
        // Depth validation normally happens at registration; the trie's own
        // guard is the backstop for raw lookups past MAX_DEPTH.
        let mut root = Node::default();
        let deep = "/a".repeat(MAX_DEPTH + 5);
        insert(&mut root, &deep).unwrap();
        assert_eq!(search(&root, &deep, None), None);

        let shallow = "/a".repeat(3);
        insert(&mut root, &shallow).unwrap();
        assert_eq!(search(&root, &shallow, None), Some(shallow.as_str()));
    }
}
