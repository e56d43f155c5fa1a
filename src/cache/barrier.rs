//! The "being-cached" barrier (spec §4.G).
//!
//! A process-wide set of `(user-id, site-name)` pairs currently undergoing
//! a snapshot swap. The rename pair in [`crate::store::swap_snapshot`] is
//! not atomic across its two renames; this barrier is how readers avoid
//! observing the brief gap in between. `mark` must run before the swap
//! starts and `unmark` after it finishes, in all outcomes (success or
//! failure) -- callers use a guard to make that automatic.

use std::sync::Arc;

use dashmap::DashSet;

/// Key identifying a site for barrier purposes.
pub type SiteKey = (String, String);

/// Shared barrier handle. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct Barrier {
    inner: Arc<DashSet<SiteKey>>,
}

impl Barrier {
    /// Construct an empty barrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `(user_id, site_name)` as being re-materialized.
    pub fn mark(&self, user_id: &str, site_name: &str) {
        self.inner.insert((user_id.to_string(), site_name.to_string()));
    }

    /// Clear the mark for `(user_id, site_name)`.
    pub fn unmark(&self, user_id: &str, site_name: &str) {
        self.inner.remove(&(user_id.to_string(), site_name.to_string()));
    }

    /// Whether `(user_id, site_name)` is currently marked.
    pub fn is_being(&self, user_id: &str, site_name: &str) -> bool {
        self.inner
            .contains(&(user_id.to_string(), site_name.to_string()))
    }

    /// Mark the key and return a guard that unmarks it on drop, so a swap
    /// that returns early (via `?`) or panics still clears the barrier.
    pub fn guard(&self, user_id: &str, site_name: &str) -> BarrierGuard {
        self.mark(user_id, site_name);
        BarrierGuard {
            barrier: self.clone(),
            key: (user_id.to_string(), site_name.to_string()),
        }
    }
}

/// RAII guard that unmarks a barrier key on drop.
pub struct BarrierGuard {
    barrier: Barrier,
    key: SiteKey,
}

impl Drop for BarrierGuard {
    fn drop(&mut self) {
        self.barrier.unmark(&self.key.0, &self.key.1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_unmark_round_trip() {
        let b = Barrier::new();
        assert!(!b.is_being("u1", "blog"));
        b.mark("u1", "blog");
        assert!(b.is_being("u1", "blog"));
        b.unmark("u1", "blog");
        assert!(!b.is_being("u1", "blog"));
    }

    #[test]
    fn guard_unmarks_on_drop() {
        let b = Barrier::new();
        {
            let _guard = b.guard("u1", "blog");
            assert!(b.is_being("u1", "blog"));
        }
        assert!(!b.is_being("u1", "blog"));
    }

    #[test]
    fn distinct_keys_do_not_interfere() {
        let b = Barrier::new();
        b.mark("u1", "blog");
        assert!(!b.is_being("u1", "other"));
        assert!(!b.is_being("u2", "blog"));
    }
}
