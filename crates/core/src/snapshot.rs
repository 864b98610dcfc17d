//! Wholesale-replaced shared state.

use parking_lot::RwLock;
use std::sync::Arc;

/// An immutable value that is swapped out as a unit.
///
/// Readers clone the inner `Arc` and keep working on it while a refresh
/// installs the next version; nobody ever sees a half-updated value.
#[derive(Debug)]
pub struct Snapshot<T> {
    inner: RwLock<Arc<T>>,
}

impl<T> Snapshot<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: RwLock::new(Arc::new(value)),
        }
    }

    /// Current version.
    pub fn load(&self) -> Arc<T> {
        Arc::clone(&self.inner.read())
    }

    /// Install a new version, returning the previous one.
    pub fn store(&self, value: T) -> Arc<T> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(value))
    }
}

impl<T: Default> Default for Snapshot<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_keep_their_version() {
        let snapshot = Snapshot::new(vec![1, 2, 3]);
        let before = snapshot.load();

        let previous = snapshot.store(vec![4]);
        assert_eq!(*previous, vec![1, 2, 3]);
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*snapshot.load(), vec![4]);
    }
}
