//! Captured route parameters.
//!
//! A small ordered key/value container, pool-recycled across requests. Keys
//! are `Arc<str>` clones of the names stored in the trie (refcount bump, no
//! allocation); values are byte ranges into the capture path, resolved by
//! [`Request::param`](crate::Request::param) against the string the request
//! owns. Reset is length-only, so the vectors keep their capacity.

use std::sync::Arc;

pub(crate) struct Params {
    keys: Vec<Arc<str>>,
    values: Vec<(usize, usize)>,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            keys: Vec::with_capacity(6),
            values: Vec::with_capacity(6),
        }
    }
}

impl Params {
    pub(crate) fn push(&mut self, key: Arc<str>, start: usize, end: usize) {
        self.keys.push(key);
        self.values.push((start, end));
    }

    pub(crate) fn reset(&mut self) {
        self.keys.clear();
        self.values.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.keys.len()
    }

    /// Backtracking support: drops captures made past `len`.
    pub(crate) fn truncate(&mut self, len: usize) {
        self.keys.truncate(len);
        self.values.truncate(len);
    }

    /// Linear scan; parameter counts are small enough that a map would cost
    /// more than it saves.
    pub(crate) fn get(&self, key: &str) -> Option<(usize, usize)> {
        self.keys
            .iter()
            .position(|k| &**k == key)
            .map(|i| self.values[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_get() {
        let mut p = Params::default();
        p.push(Arc::from("id"), 7, 9);
        p.push(Arc::from("rest"), 10, 15);
        assert_eq!(p.get("id"), Some((7, 9)));
        assert_eq!(p.get("rest"), Some((10, 15)));
        assert_eq!(p.get("missing"), None);
    }

    #[test]
    fn reset_keeps_capacity() {
        let mut p = Params::default();
        for i in 0..10 {
            p.push(Arc::from("k"), i, i + 1);
        }
        let cap = p.keys.capacity();
        p.reset();
        assert_eq!(p.len(), 0);
        assert_eq!(p.keys.capacity(), cap);
    }

    #[test]
    fn truncate_backtracks() {
        let mut p = Params::default();
        p.push(Arc::from("a"), 0, 1);
        let snapshot = p.len();
        p.push(Arc::from("b"), 2, 3);
        p.truncate(snapshot);
        assert_eq!(p.get("b"), None);
        assert_eq!(p.get("a"), Some((0, 1)));
    }
}
