//! Per-method route storage for one virtual host.
//!
//! A [`RouteTable`] splits registered routes two ways per method: purely
//! static patterns land in an exact-match map (zero-traversal fast path) and
//! anything with a `:` or `*` segment lands in the trie. A per-method flag
//! records whether the trie holds anything at all, so static-only methods
//! never pay for a traversal, and a per-path `Allow` header is precomputed
//! whenever the whole table is static.

use std::collections::HashMap;

use crate::dispatch::TableCore;
use crate::handler::BoxedHandler;
use crate::method::AllowSet;
use crate::params::Params;
use crate::segments::PathSegments;
use crate::trie::{Node, Route};
use crate::MAX_DEPTH;

#[derive(Default)]
pub(crate) struct RouteTable {
    /// method → trie root.
    roots: HashMap<String, Node>,
    /// method → (normalized pattern → route); the static fast path.
    statics: HashMap<String, HashMap<String, Route>>,
    /// Methods with at least one parametric route.
    has_params: HashMap<String, bool>,
    /// Precomputed `Allow` per purely-static path; valid for lookups only
    /// while no method in the table has parametric routes.
    static_allow: HashMap<String, String>,
    /// Any registered pattern ends with `/`; gates alternate-slash work.
    any_trailing_slash: bool,
}

impl RouteTable {
    /// Inserts a pre-validated, normalized pattern. The caller has cleaned
    /// the pattern and checked depth, names, and wildcard placement; what
    /// remains here is structural conflict detection inside the trie.
    pub(crate) fn register(
        &mut self,
        method: &str,
        pattern: &str,
        parts: &[&str],
        handler: BoxedHandler,
    ) -> Result<(), crate::RouteError> {
        let has_params = parts
            .iter()
            .any(|p| p.starts_with(':') || p.starts_with('*'));
        let route = Route {
            pattern: pattern.to_owned(),
            handler,
            has_params,
        };

        self.roots
            .entry(method.to_owned())
            .or_default()
            .insert(pattern, parts, 0, route.clone())?;

        if has_params {
            self.has_params.insert(method.to_owned(), true);
        } else {
            self.statics
                .entry(method.to_owned())
                .or_default()
                .insert(pattern.to_owned(), route);
            self.rebuild_static_allow(pattern);
        }
        if pattern.len() > 1 && pattern.ends_with('/') {
            self.any_trailing_slash = true;
        }
        Ok(())
    }

    fn rebuild_static_allow(&mut self, path: &str) {
        let mut set = AllowSet::default();
        for (method, map) in &self.statics {
            if map.contains_key(path) {
                set.insert(method);
            }
        }
        self.static_allow.insert(path.to_owned(), set.render());
    }

    pub(crate) fn roots(&self) -> &HashMap<String, Node> {
        &self.roots
    }

    pub(crate) fn clone_statics(&self) -> HashMap<String, HashMap<String, Route>> {
        self.statics.clone()
    }

    pub(crate) fn clone_has_params(&self) -> HashMap<String, bool> {
        self.has_params.clone()
    }

    pub(crate) fn clone_static_allow(&self) -> HashMap<String, String> {
        self.static_allow.clone()
    }

    pub(crate) fn trailing_slash_flag(&self) -> bool {
        self.any_trailing_slash
    }
}

impl TableCore for RouteTable {
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
