//! Lock-free object pools.
//!
//! Dispatch acquires its scratch records (segment records, parameter stores)
//! from process-wide pools instead of allocating per request. A pool is a
//! bounded [`ArrayQueue`]: `acquire` pops or falls back to `Default`,
//! `release` pushes back and silently drops on overflow. There is no
//! blocking anywhere on this path.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;

pub(crate) struct Pool<T> {
    items: ArrayQueue<T>,
}

impl<T: Default> Pool<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
        }
    }

    /// Pops a recycled instance, or builds a fresh one. Callers reset the
    /// instance themselves; the pool hands it back as-is.
    pub(crate) fn acquire(&self) -> T {
        self.items.pop().unwrap_or_default()
    }

    pub(crate) fn release(&self, item: T) {
        // Full pool: drop the instance instead of waiting.
        let _ = self.items.push(item);
    }
}

/// A pooled instance that returns itself on drop.
///
/// Used for the parameter store, which outlives dispatch by riding inside
/// [`Request`](crate::Request) into the handler. Scratch records that stay
/// inside dispatch use explicit `acquire`/`release` instead.
pub(crate) struct Pooled<T: Default> {
    item: Option<T>,
    pool: Arc<Pool<T>>,
}

impl<T: Default> Pooled<T> {
    pub(crate) fn new(item: T, pool: Arc<Pool<T>>) -> Self {
        Self {
            item: Some(item),
            pool,
        }
    }
}

impl<T: Default> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.item.as_ref().expect("pooled item taken")
    }
}

impl<T: Default> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().expect("pooled item taken")
    }
}

impl<T: Default> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_release_roundtrip() {
        let pool: Pool<Vec<u8>> = Pool::new(2);
        let mut v = pool.acquire();
        v.push(7);
        pool.release(v);
        let v = pool.acquire();
        // Recycled instance comes back as-is; callers reset.
        assert_eq!(v, vec![7]);
    }

    #[test]
    fn overflow_drops() {
        let pool: Pool<Vec<u8>> = Pool::new(1);
        pool.release(vec![1]);
        pool.release(vec![2]);
        assert_eq!(pool.acquire(), vec![1]);
        assert!(pool.acquire().is_empty());
    }

    #[test]
    fn pooled_returns_on_drop() {
        let pool = Arc::new(Pool::<Vec<u8>>::new(4));
        {
            let mut guard = Pooled::new(pool.acquire(), Arc::clone(&pool));
            guard.push(9);
        }
        assert_eq!(pool.acquire(), vec![9]);
    }
}
