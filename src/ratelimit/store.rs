//! Per-key state storage shared by the algorithms.

use dashmap::DashMap;

/// A concurrent map from rate limit key to algorithm state.
///
/// `update` holds the shard write lock for the whole closure, so a
/// read-compute-write on one key is a single atomic step. Keys hashed to
/// different shards never contend.
#[derive(Debug)]
pub(crate) struct KeyedStore<S> {
    entries: DashMap<String, S>,
}

impl<S> KeyedStore<S> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Run `f` against the state for `key`, creating it with `init` first if
    /// the key has never been seen.
    pub(crate) fn update<R>(
        &self,
        key: &str,
        init: impl FnOnce() -> S,
        f: impl FnOnce(&mut S) -> R,
    ) -> R {
        if let Some(mut state) = self.entries.get_mut(key) {
            return f(&mut state);
        }
        let mut state = self.entries.entry(key.to_string()).or_insert_with(init);
        f(&mut state)
    }

    /// Read the state for `key` without creating it.
    pub(crate) fn inspect<R>(&self, key: &str, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.entries.get(key).map(|state| f(&state))
    }

    /// Forget `key` entirely. Returns whether it existed.
    pub(crate) fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Drop every entry for which `keep` returns false. Returns how many
    /// entries were removed.
    pub(crate) fn retain(&self, mut keep: impl FnMut(&S) -> bool) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, state| keep(state));
        before.saturating_sub(self.entries.len())
    }
}
